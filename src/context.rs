//! Script execution context
//!
//! The Context is the main entry point for the runtime. It owns the
//! interpreter (and with it the global scope, intrinsics and timers) and
//! provides the API for evaluating source code.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::builtins;
use crate::parser::ast::Program;
use crate::parser::compiler::{CompileError, Compiler};
use crate::parser::parse;
use crate::runtime::function::{Function, NativeFn};
use crate::value::Value;
use crate::vm::opcode::{CodeRange, InstructionList, disassemble};
use crate::vm::{Interpreter, InterpreterConfig, InterpreterError};

/// Error from evaluation
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] InterpreterError),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings for a [`Context`]
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub interpreter: InterpreterConfig,
    /// Write the disassembly of every compiled program to the output
    pub dump_bytecode: bool,
}

/// Execution context
pub struct Context {
    interpreter: Interpreter,
    options: ContextOptions,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context with the native library installed
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        let mut interpreter = Interpreter::with_config(options.interpreter.clone());
        builtins::install(&mut interpreter);
        Context {
            interpreter,
            options,
        }
    }

    /// Redirect `console.log` and bytecode dumps
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.interpreter.set_output(Box::new(output));
        self
    }

    /// Redirect `console.error`
    pub fn with_error_output(mut self, output: impl Write + 'static) -> Self {
        self.interpreter.set_error_output(Box::new(output));
        self
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interpreter
    }

    /// Parse without generating code
    pub fn parse(&self, source: &str) -> Result<Program, EvalError> {
        Ok(parse(source)?)
    }

    /// Parse and generate code without executing it
    pub fn compile(&mut self, source: &str) -> Result<Rc<InstructionList>, EvalError> {
        let program = self.parse(source)?;
        let code = Compiler::new().generate(&program)?;
        debug!(instructions = code.len(), "compiled program");
        if self.options.dump_bytecode {
            let listing = disassemble(&code);
            self.interpreter
                .output()
                .write_all(listing.as_bytes())
                .map_err(|e| InterpreterError::InternalError(format!("bytecode dump: {}", e)))?;
        }
        Ok(code)
    }

    /// Run compiled code to completion and return its result. The VM is
    /// reset afterwards, whether or not the run succeeded.
    pub fn execute(&mut self, code: Rc<InstructionList>) -> Result<Value, EvalError> {
        let result = self.run_range(CodeRange::full(code));
        self.interpreter.reset();
        Ok(result?)
    }

    /// Evaluate source code. The result is the value of the last expression
    /// statement or of a top-level `return`.
    pub fn eval(&mut self, source: &str) -> Result<Value, EvalError> {
        let code = self.compile(source)?;
        self.execute(code)
    }

    pub fn eval_file(&mut self, path: impl AsRef<Path>) -> Result<Value, EvalError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "evaluating file");
        self.eval(&source)
    }

    /// Block until every pending timer has fired, running each callback
    pub fn run_event_loop(&mut self) -> Result<(), EvalError> {
        while let Some(range) = self.interpreter.wait_timer() {
            let result = self.run_range(range);
            self.interpreter.reset();
            result?;
        }
        Ok(())
    }

    /// Run the callbacks of timers that have already fired, without waiting
    /// for the rest
    pub fn run_ready_timers(&mut self) -> Result<(), EvalError> {
        while let Some(range) = self.interpreter.poll_timer() {
            let result = self.run_range(range);
            self.interpreter.reset();
            result?;
        }
        Ok(())
    }

    /// Bind a native function in the global scope
    pub fn register_native(&mut self, name: &str, params: &[&str], native: NativeFn) {
        let function = Value::function(Function::native(name, params, native));
        self.interpreter.define_global(name, function);
    }

    /// Bind a value in the global scope
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.interpreter.define_global(name, value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.interpreter.lookup_global(name)
    }

    /// The receiver of plain calls and top-level code
    pub fn global(&self) -> &Value {
        self.interpreter.global_object()
    }

    /// Drop pending timers and clear all run state
    pub fn shut_down(&mut self) {
        self.interpreter.shut_down();
    }

    fn run_range(&mut self, range: CodeRange) -> Result<Value, InterpreterError> {
        self.interpreter.set_counters(range)?;
        self.interpreter.run()?;
        Ok(self.interpreter.get_result())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::function::Arguments;
    use crate::vm::InterpreterResult;

    /// Output sink the test keeps a handle on
    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn eval(source: &str) -> String {
        let mut ctx = Context::new();
        ctx.eval(source).unwrap().to_string()
    }

    fn captured_both() -> (Context, Captured, Captured) {
        let out = Captured::default();
        let err = Captured::default();
        let ctx = Context::new()
            .with_output(out.clone())
            .with_error_output(err.clone());
        (ctx, out, err)
    }

    fn captured(options: ContextOptions) -> (Context, Captured) {
        let out = Captured::default();
        let ctx = Context::with_options(options).with_output(out.clone());
        (ctx, out)
    }

    #[test]
    fn test_eval_empty() {
        let mut ctx = Context::new();
        assert!(ctx.eval("").unwrap().is_undefined());
    }

    #[test]
    fn test_eval_expressions() {
        assert_eq!(eval("2 + 3;"), "5");
        assert_eq!(eval("2 + 3 * 4;"), "14");
        assert_eq!(eval("(2 + 3) * 4;"), "20");
        assert_eq!(eval("5 < 10;"), "1");
        assert_eq!(eval("1 ? 100 : 200;"), "100");
        assert_eq!(eval("-5;"), "-5");
        assert_eq!(eval("'a' + 'b';"), "ab");
    }

    #[test]
    fn test_top_level_return() {
        assert_eq!(eval("return 42; 7;"), "42");
        assert_eq!(eval("var x = 5; if (x < 10) { return 1; } else { return 2; }"), "1");
    }

    #[test]
    fn test_globals_survive_between_evals() {
        let mut ctx = Context::new();
        ctx.eval("var counter = 1; function bump() { counter += 1; }").unwrap();
        ctx.eval("bump(); bump();").unwrap();
        assert_eq!(ctx.eval("counter;").unwrap().to_string(), "3");
        assert_eq!(ctx.get_global("counter").unwrap().to_string(), "3");
        assert_eq!(ctx.interpreter().stack_len(), 0);
    }

    #[test]
    fn test_reset_after_error() {
        let mut ctx = Context::new();
        let err = ctx.eval("function f() { return missing; } f();").unwrap_err();
        assert_eq!(err.to_string(), "ReferenceError: missing is not defined");
        assert_eq!(ctx.interpreter().call_depth(), 0);
        assert_eq!(ctx.eval("1 + 1;").unwrap().to_string(), "2");
    }

    #[test]
    fn test_compile_error() {
        let mut ctx = Context::new();
        let err = ctx.eval("1 +").unwrap_err();
        assert!(matches!(err, EvalError::Compile(_)));
    }

    #[test]
    fn test_missing_file() {
        let mut ctx = Context::new();
        let err = ctx.eval_file("/nonexistent/script.js").unwrap_err();
        assert!(matches!(err, EvalError::Io { .. }));
    }

    #[test]
    fn test_console_log() {
        let (mut ctx, out) = captured(ContextOptions::default());
        ctx.eval("console.log('sum', 1 + 2); console.log([1, 2], null);").unwrap();
        assert_eq!(out.text(), "sum 3\n1,2 null\n");
    }

    #[test]
    fn test_console_error_and_print() {
        let (mut ctx, out, err) = captured_both();
        ctx.eval("print('a', 1); console.error('bad', [2]); console.flush();").unwrap();
        assert_eq!(out.text(), "a 1\n");
        assert_eq!(err.text(), "bad 2\n");
    }

    #[test]
    fn test_new_array() {
        let mut ctx = Context::new();
        assert_eq!(ctx.eval("var a = new Array(3); a.length;").unwrap().to_string(), "3");
        assert_eq!(ctx.eval("a.hasOwnProperty('push');").unwrap().to_string(), "1");
        assert_eq!(ctx.eval("a.push(4); a.length;").unwrap().to_string(), "4");
        assert_eq!(eval("var b = Array(1, 2, 3); b.reverse().join('-');"), "3-2-1");
    }

    #[test]
    fn test_native_globals_are_frozen() {
        let mut ctx = Context::new();
        ctx.eval("Math = 1;").unwrap();
        assert_eq!(ctx.eval("Math.floor(2.5);").unwrap().to_string(), "2");
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(eval("'hello'.toUpperCase();"), "HELLO");
        assert_eq!(eval("'a-b-c'.split('-').length;"), "3");
        assert_eq!(eval("'v1.2'.replace('[0-9]', 'x');"), "vx.2");
        assert_eq!(eval("(255).toString(16);"), "ff");
        assert_eq!(eval("(3.14159).toFixed(2);"), "3.14");
        assert_eq!(eval("Math.max(1, 9, 4);"), "9");
        assert_eq!(eval("Math.pow(2, 8);"), "256");
        assert_eq!(eval("[1, 2, 3].indexOf(2);"), "1");
        assert_eq!(eval("var o = {a: 1}; o.hasOwnProperty('a');"), "1");
    }

    #[test]
    fn test_library_callbacks() {
        assert_eq!(eval("[3, 1, 2].sort().join();"), "1,2,3");
        assert_eq!(
            eval("[5, 25, 100, 1].sort(function(a, b) { return a - b; }).join();"),
            "1,5,25,100"
        );
        assert_eq!(
            eval("var k = { m: 3 }; [1, 2].map(function(x, i) { return x * this.m + i; }, k).join();"),
            "3,7"
        );
        assert_eq!(eval("var a = [2]; a.unshift(1); a.concat([3], 4).join('');"), "1234");
        assert_eq!(eval("var a = [1, 2]; a.shift() + a.length;"), "2");
    }

    #[test]
    fn test_string_and_regexp() {
        assert_eq!(eval("'  pad '.trim().concat('!');"), "pad!");
        assert_eq!(eval("'abcabc'.lastIndexOf('c');"), "5");
        assert_eq!(eval("'hello'.substr(1, 3).charCodeAt(0);"), "101");
        assert_eq!(eval("'a.b.c'.replace(RegExp('[.]', 'g'), '/');"), "a/b/c");
        assert_eq!(eval("var re = new RegExp('(\\\\d)'); re.exec('x7')[1];"), "7");
        assert_eq!(eval("var re = RegExp('b', 'g'); re.test('abc') + re.lastIndex;"), "3");
        assert_eq!(eval("RegExp('x+', 'gi').source;"), "x+");
        assert_eq!(eval("'a1b2'.match(RegExp('[0-9]', 'g')).length;"), "2");
    }

    #[test]
    fn test_deeply_nested_array_prints() {
        let mut ctx = Context::new();
        let result = ctx
            .eval("var a = []; for (var i = 0; i < 200000; i++) { a = [a]; } '' + a;")
            .unwrap();
        assert_eq!(result.to_string(), "");
        ctx.eval("a = 0;").unwrap();
    }

    #[test]
    fn test_huge_arrays_are_range_errors() {
        let mut ctx = Context::new();
        let err = ctx.eval("var a = []; a[1073741822] = 1;").unwrap_err();
        assert!(matches!(err, EvalError::Runtime(InterpreterError::RangeError(_))));
        let err = ctx.eval("new Array(1073741823);").unwrap_err();
        assert!(matches!(err, EvalError::Runtime(InterpreterError::RangeError(_))));
        assert_eq!(ctx.eval("new Array(5).length;").unwrap().to_string(), "5");
    }

    #[test]
    fn test_function_expression_is_fresh_per_evaluation() {
        let mut ctx = Context::new();
        ctx.eval(
            "function make() { return function() { return 7; }; }
             var a = make(); var b = make(); a.tag = 'a';",
        )
        .unwrap();
        let a = ctx.get_global("a").unwrap();
        let b = ctx.get_global("b").unwrap();
        assert!(!a.ptr_eq(&b));
        assert!(b.get_property("tag").is_undefined());
        assert_eq!(ctx.eval("a() + b();").unwrap().to_string(), "14");
        assert_eq!(ctx.interpreter().stats().functions_compiled, 2);
    }

    fn double(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
        let n = args.at(0).as_number().unwrap_or(f64::NAN);
        Ok(Value::number(n * 2.0))
    }

    #[test]
    fn test_register_native() {
        let mut ctx = Context::new();
        ctx.register_native("double", &["n"], double);
        assert_eq!(ctx.eval("double(21);").unwrap().to_string(), "42");
    }

    #[test]
    fn test_set_timeout_event_loop() {
        let (mut ctx, out) = captured(ContextOptions::default());
        ctx.eval(
            "function later() { console.log('later'); }
             setTimeout(later, 5);
             console.log('now');",
        )
        .unwrap();
        ctx.run_event_loop().unwrap();
        assert_eq!(out.text(), "now\nlater\n");
        assert_eq!(ctx.interpreter().pending_timers(), 0);
    }

    #[test]
    fn test_run_ready_timers_does_not_block() {
        let (mut ctx, out) = captured(ContextOptions::default());
        ctx.eval(
            "function soon() { console.log('soon'); }
             function later() { console.log('later'); }
             setTimeout(soon, 0);
             setTimeout(later, 60000);",
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        ctx.run_ready_timers().unwrap();
        assert_eq!(out.text(), "soon\n");
        assert_eq!(ctx.interpreter().pending_timers(), 1);
        ctx.shut_down();
        assert_eq!(ctx.interpreter().pending_timers(), 0);
    }

    #[test]
    fn test_set_timeout_rejects_non_function() {
        let mut ctx = Context::new();
        let err = ctx.eval("setTimeout(1, 0);").unwrap_err();
        assert!(matches!(err, EvalError::Runtime(InterpreterError::TypeError(_))));
    }

    #[test]
    fn test_dump_bytecode() {
        let options = ContextOptions {
            dump_bytecode: true,
            ..ContextOptions::default()
        };
        let (mut ctx, out) = captured(options);
        ctx.eval("2 + 3;").unwrap();
        assert_eq!(out.text().lines().count(), 3);
        assert!(out.text().starts_with("0000  push"));
    }

    #[test]
    fn test_interpreter_config() {
        let options = ContextOptions {
            interpreter: InterpreterConfig {
                max_call_depth: 16,
                ..InterpreterConfig::default()
            },
            ..ContextOptions::default()
        };
        let mut ctx = Context::with_options(options);
        let err = ctx.eval("function f(n) { return f(n + 1); } f(0);").unwrap_err();
        assert!(matches!(err, EvalError::Runtime(InterpreterError::RangeError(_))));
    }
}
