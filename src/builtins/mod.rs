//! Native library
//!
//! Globals (`console`, `print`, `Array`, `RegExp`, `Math`, `setTimeout`) are
//! bound in the global scope as non-writable values. Methods reachable
//! through a value's type (array, string, number, regular expression and
//! object methods) live in the [`Intrinsics`] tables consulted by property
//! lookup.

pub mod array;
pub mod console;
pub mod number;
pub mod object;
pub mod regexp;
pub mod string;
pub mod timer;

use crate::runtime::function::{Arguments, Function, NativeFn};
use crate::runtime::object::{ObjectFlags, ObjectType};
use crate::value::Value;
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

/// Per-type method tables
#[derive(Debug)]
pub struct Intrinsics {
    pub array: Value,
    pub string: Value,
    pub number: Value,
    pub regexp: Value,
    /// Methods shared by every value
    pub object: Value,
}

impl Default for Intrinsics {
    fn default() -> Self {
        Intrinsics {
            array: Value::object(),
            string: Value::object(),
            number: Value::object(),
            regexp: Value::object(),
            object: Value::object(),
        }
    }
}

impl Intrinsics {
    /// The type-specific table, if the type has one
    pub fn for_type(&self, object_type: ObjectType) -> Option<&Value> {
        match object_type {
            ObjectType::Array => Some(&self.array),
            ObjectType::String => Some(&self.string),
            ObjectType::Number => Some(&self.number),
            ObjectType::RegExp => Some(&self.regexp),
            _ => None,
        }
    }
}

/// Install the whole native library
pub fn install(interp: &mut Interpreter) {
    console::install(interp);
    array::install(interp);
    string::install(interp);
    number::install(interp);
    object::install(interp);
    regexp::install(interp);
    timer::install(interp);
}

/// A native function value that cannot be overwritten or enumerated
pub(crate) fn method(name: &str, params: &[&str], native: NativeFn) -> Value {
    Value::function(Function::native(name, params, native)).with_flags(ObjectFlags::empty())
}

/// Bind a global that scripts cannot reassign
pub(crate) fn define_frozen(interp: &mut Interpreter, name: &str, value: Value) {
    interp.define_global(name, value.with_flags(ObjectFlags::ENUMERABLE));
}

/// Add methods to a method table
pub(crate) fn add_methods(table: &Value, methods: &[(&str, &[&str], NativeFn)]) {
    for (name, params, native) in methods {
        table.set_property(name, method(name, params, *native));
    }
}

// Argument helpers

pub(crate) fn this_of(args: &Arguments, expected: ObjectType, method: &str) -> InterpreterResult<Value> {
    let this = args.this();
    if this.get_type() != expected {
        return Err(InterpreterError::TypeError(format!(
            "{} called on {}, expected {}",
            method,
            this.get_type(),
            expected
        )));
    }
    Ok(this)
}

/// A number argument, or `default` when the argument is missing
pub(crate) fn number_arg(args: &Arguments, index: usize, default: f64, method: &str) -> InterpreterResult<f64> {
    let value = args.at(index);
    if value.is_undefined() {
        return Ok(default);
    }
    value.as_number().ok_or_else(|| {
        InterpreterError::TypeError(format!(
            "{}: argument {} must be a number, got {}",
            method,
            index + 1,
            value.get_type()
        ))
    })
}

/// A callable argument
pub(crate) fn function_arg(args: &Arguments, index: usize, method: &str) -> InterpreterResult<Value> {
    let value = args.at(index);
    if !value.is_function() {
        return Err(InterpreterError::TypeError(format!(
            "{}: argument {} must be a function, got {}",
            method,
            index + 1,
            value.get_type()
        )));
    }
    Ok(value)
}

pub(crate) fn string_arg(args: &Arguments, index: usize, method: &str) -> InterpreterResult<String> {
    let value = args.at(index);
    value.string_value().ok_or_else(|| {
        InterpreterError::TypeError(format!(
            "{}: argument {} must be a string, got {}",
            method,
            index + 1,
            value.get_type()
        ))
    })
}
