//! `console.log`, `console.error`, `console.flush` and the global `print`

use std::io::Write;

use crate::builtins::{add_methods, define_frozen, method};
use crate::runtime::function::Arguments;
use crate::value::Value;
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

pub fn install(interp: &mut Interpreter) {
    let console = Value::object();
    add_methods(&console, &[("log", &[], log), ("error", &[], error), ("flush", &[], flush)]);
    define_frozen(interp, "console", console);
    define_frozen(interp, "print", method("print", &[], log));
}

/// The arguments' canonical forms, space separated
fn line(args: &Arguments) -> String {
    args.values()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn io_error(method: &str, e: std::io::Error) -> InterpreterError {
    InterpreterError::InternalError(format!("{}: {}", method, e))
}

/// Write the arguments to the interpreter's output
fn log(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    writeln!(interp.output(), "{}", line(args)).map_err(|e| io_error("console.log", e))?;
    Ok(Value::undefined())
}

/// Write the arguments to the interpreter's error output
fn error(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    writeln!(interp.error_output(), "{}", line(args)).map_err(|e| io_error("console.error", e))?;
    Ok(Value::undefined())
}

fn flush(interp: &mut Interpreter, _: &Arguments) -> InterpreterResult<Value> {
    interp.output().flush().map_err(|e| io_error("console.flush", e))?;
    interp.error_output().flush().map_err(|e| io_error("console.flush", e))?;
    Ok(Value::undefined())
}
