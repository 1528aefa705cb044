//! Methods shared by every value

use crate::builtins::add_methods;
use crate::runtime::function::{Arguments, NativeFn};
use crate::value::Value;
use crate::vm::{Interpreter, InterpreterResult};

const METHODS: &[(&str, &[&str], NativeFn)] = &[
    ("toString", &[], to_string),
    ("hasOwnProperty", &["name"], has_own_property),
];

pub fn install(interp: &mut Interpreter) {
    add_methods(&interp.intrinsics().object, METHODS);
}

fn to_string(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(args.this().to_string()))
}

fn has_own_property(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let name = args.at(0).to_string();
    Ok(Value::bool(args.this().has_own_property(&name)))
}
