//! Function values
//!
//! A function is either:
//! - a script function: a syntax-tree body plus its prototype (name and
//!   parameter names), compiled on first call and cached
//! - a native function: a Rust delegate with declared parameter names

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::parser::ast::{FunctionDef, Prototype};
use crate::parser::compiler::Compiler;
use crate::runtime::property::{PropertyHolder, PropertyTable};
use crate::value::Value;
use crate::vm::opcode::InstructionList;
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

/// Native function signature
///
/// Natives receive the running interpreter and the call's arguments. The
/// returned value is pushed as the call result.
pub type NativeFn = fn(&mut Interpreter, &Arguments) -> InterpreterResult<Value>;

#[derive(Clone)]
pub enum FunctionKind {
    Native(NativeFn),
    Script(Rc<FunctionDef>),
}

#[derive(Clone)]
pub struct Function {
    proto: Prototype,
    kind: FunctionKind,
    /// Instruction list, once compiled. Copies made by [`Function::instance`]
    /// share it.
    code: Rc<OnceCell<Rc<InstructionList>>>,
}

impl Function {
    pub fn native(name: &str, params: &[&str], native: NativeFn) -> Self {
        Function {
            proto: Prototype::new(
                Some(name.to_string()),
                params.iter().map(|p| p.to_string()).collect(),
            ),
            kind: FunctionKind::Native(native),
            code: Rc::default(),
        }
    }

    pub fn script(def: Rc<FunctionDef>) -> Self {
        Function {
            proto: def.proto.clone(),
            kind: FunctionKind::Script(def),
            code: Rc::default(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.proto.name.as_deref()
    }

    pub fn params(&self) -> &[String] {
        &self.proto.params
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native(_))
    }

    pub fn code(&self) -> Option<&Rc<InstructionList>> {
        self.code.get()
    }

    pub fn is_compiled(&self) -> bool {
        self.code.get().is_some()
    }

    /// A new function with the same body and compiled-code cache
    pub fn instance(&self) -> Self {
        self.clone()
    }

    /// Make the function callable. Script functions are compiled the first
    /// time; natives and already compiled functions are left alone.
    ///
    /// Returns whether a compilation happened.
    pub fn prepare(&mut self) -> InterpreterResult<bool> {
        let FunctionKind::Script(def) = &self.kind else {
            return Ok(false);
        };
        if self.code.get().is_some() {
            return Ok(false);
        }
        if def.body.is_none() {
            return Err(InterpreterError::InternalError(format!(
                "function {} has no body",
                self.name().unwrap_or("<anonymous>")
            )));
        }
        let code = Compiler::new().generate_function(def)?;
        Ok(self.code.set(code).is_ok())
    }

    /// Source-like rendering used by `toString()`
    pub fn source_text(&self) -> String {
        let name = self.name().unwrap_or("");
        match self.kind {
            FunctionKind::Native(_) => format!("function {}() {{ [native code] }}", name),
            FunctionKind::Script(_) => format!(
                "function {}({}) {{ [code] }}",
                name,
                self.proto.params.join(", ")
            ),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.proto.name)
            .field("params", &self.proto.params)
            .field("native", &self.is_native())
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Arguments handed to a native function
///
/// All arguments are available positionally. Declared parameter names are
/// also bound as properties, and the receiver is bound as `this`.
#[derive(Debug)]
pub struct Arguments {
    positional: Vec<Value>,
    properties: PropertyTable,
}

impl Arguments {
    pub fn new(params: &[String], positional: Vec<Value>, this: Value) -> Self {
        let mut properties = PropertyTable::new();
        for (i, name) in params.iter().enumerate() {
            let value = positional.get(i).cloned().unwrap_or_else(Value::undefined);
            properties.set(name, value);
        }
        properties.set("this", this);
        Arguments {
            positional,
            properties,
        }
    }

    /// Positional argument, undefined when missing
    pub fn at(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or_else(Value::undefined)
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.positional
    }

    /// The receiver of the call
    pub fn this(&self) -> Value {
        self.get_property("this")
    }
}

impl PropertyHolder for Arguments {
    fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }
}
