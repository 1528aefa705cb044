//! Bytecode generator
//!
//! Walks the syntax tree and drives an [`InstructionBuilder`]. Each node
//! kind has its own `emit_*` routine. A program is wrapped in one top-level
//! block; a function body additionally gets a leading `noop` and a trailing
//! `push undefined; ret`, so every body has the same entry and exit shape.
//!
//! Expression statements leave nothing on the operand stack except in tail
//! position, where the value is kept as the completion value of the program.

use std::rc::Rc;

use thiserror::Error;

use crate::parser::ast::{BinaryOp, Expr, FunctionDef, Program, Stmt, UnaryOp, UpdateOp};
use crate::runtime::function::Function;
use crate::value::Value;
use crate::vm::builder::InstructionBuilder;
use crate::vm::opcode::{Instruction, InstructionList, OpCode, Operand};

/// Compilation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("SyntaxError: expected {expected}, found {found} at line {line}, column {column}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("SyntaxError: {0}")]
    SyntaxError(String),
    #[error("SyntaxError: invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("SyntaxError: {0} not supported")]
    Unsupported(String),
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Single-use code generator
#[derive(Debug, Default)]
pub struct Compiler {
    builder: InstructionBuilder,
    generated: bool,
    in_function: bool,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the instruction list for a whole program
    ///
    /// # Panics
    /// Panics when called a second time on the same compiler.
    pub fn generate(&mut self, program: &Program) -> CompileResult<Rc<InstructionList>> {
        self.start();
        self.builder.create_block();
        self.emit_body(&program.body, true)?;
        self.finish()
    }

    /// Generate the instruction list for a function body
    ///
    /// # Panics
    /// Panics when called a second time on the same compiler.
    pub fn generate_function(&mut self, def: &FunctionDef) -> CompileResult<Rc<InstructionList>> {
        self.start();
        self.in_function = true;
        self.builder.create_block();
        self.op(OpCode::Noop);
        if let Some(body) = &def.body {
            self.emit_body(body, false)?;
        }
        self.push(Operand::Object(Value::undefined()));
        self.op(OpCode::Ret);
        self.finish()
    }

    fn start(&mut self) {
        assert!(!self.generated, "Compiler::generate called twice");
        self.generated = true;
    }

    fn finish(&mut self) -> CompileResult<Rc<InstructionList>> {
        self.builder.end_block();
        self.builder.finalize();
        Ok(self.builder.release_instruction_list())
    }

    // Emission helpers

    fn op(&mut self, opcode: OpCode) {
        self.builder.add_instruction(Instruction::simple(opcode));
    }

    fn op_with(&mut self, opcode: OpCode, operand: Operand) {
        self.builder
            .add_instruction(Instruction::with_operand(opcode, operand));
    }

    fn push(&mut self, operand: Operand) {
        self.op_with(OpCode::Push, operand);
    }

    fn named(&mut self, opcode: OpCode, name: &str) {
        self.op_with(opcode, Operand::Name(name.to_string()));
    }

    fn counted(&mut self, opcode: OpCode, count: usize) {
        self.op_with(opcode, Operand::Number(count as f64));
    }

    // Statements

    /// Emit a program or function body: named function declarations first,
    /// then the remaining statements in order
    fn emit_body(&mut self, body: &[Stmt], tail: bool) -> CompileResult<()> {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                self.emit_function_declaration(def);
            }
        }
        let last = body.iter().rposition(|s| !matches!(s, Stmt::Function(_)));
        for (i, stmt) in body.iter().enumerate() {
            if matches!(stmt, Stmt::Function(_)) {
                continue;
            }
            self.emit_stmt(stmt, tail && Some(i) == last)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, tail: bool) -> CompileResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.emit_expr(expr)?;
                if !tail {
                    self.op(OpCode::Pop);
                }
            }
            Stmt::Var(decls) => {
                for (name, init) in decls {
                    self.named(OpCode::Decl, name);
                    if let Some(init) = init {
                        self.emit_expr(init)?;
                        self.named(OpCode::Store, name);
                        self.op(OpCode::Pop);
                    }
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => self.emit_if(test, consequent, alternate.as_deref(), tail)?,
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.emit_stmt(init, false)?;
                }
                self.emit_loop(test.as_ref(), body, update.as_ref())?;
            }
            Stmt::While { test, body } => self.emit_loop(Some(test), body, None)?,
            Stmt::DoWhile { body, test } => self.emit_do_while(body, test)?,
            Stmt::Block(stmts) => {
                let last = stmts.len().saturating_sub(1);
                for (i, stmt) in stmts.iter().enumerate() {
                    self.emit_stmt(stmt, tail && i == last)?;
                }
            }
            Stmt::Function(def) => self.emit_function_declaration(def),
            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.emit_expr(expr)?,
                    None => self.push(Operand::Object(Value::undefined())),
                }
                self.op(if self.in_function {
                    OpCode::Ret
                } else {
                    OpCode::Leave
                });
            }
            Stmt::Empty => {}
        }
        Ok(())
    }

    /// `decl name; push fn; store name; pop`
    fn emit_function_declaration(&mut self, def: &Rc<FunctionDef>) {
        let Some(name) = def.proto.name.as_deref() else {
            return;
        };
        self.named(OpCode::Decl, name);
        self.emit_function_value(def);
        self.named(OpCode::Store, name);
        self.op(OpCode::Pop);
    }

    fn emit_function_value(&mut self, def: &Rc<FunctionDef>) {
        let function = Value::function(Function::script(Rc::clone(def)));
        self.push(Operand::Object(function));
    }

    /// `<cond> pop jmpz [then]` or `<cond> pop jmpz [then jmp] [else]`
    fn emit_if(
        &mut self,
        test: &Expr,
        consequent: &Stmt,
        alternate: Option<&Stmt>,
        tail: bool,
    ) -> CompileResult<()> {
        self.emit_condition(test, OpCode::Jmpz)?;
        self.builder.create_block();
        self.emit_stmt(consequent, tail)?;
        match alternate {
            Some(alternate) => {
                self.builder.add_instruction(Instruction::jump(OpCode::Jmp));
                self.builder.update_stacked_jump();
                self.builder.create_block();
                self.emit_stmt(alternate, tail)?;
                self.builder.end_block_for_jump();
                self.builder.end_block();
            }
            None => self.builder.end_block_for_jump(),
        }
        Ok(())
    }

    /// Test value, a flag-preserving `pop`, then a placeholder jump
    fn emit_condition(&mut self, test: &Expr, jump: OpCode) -> CompileResult<()> {
        self.emit_expr(test)?;
        self.op(OpCode::Pop);
        self.builder.add_instruction(Instruction::jump(jump));
        Ok(())
    }

    /// `S: <cond> pop jmpz(X) [body update pop] jmp(-B)`
    ///
    /// Without a test the loop only ends through `return`.
    fn emit_loop(&mut self, test: Option<&Expr>, body: &Stmt, update: Option<&Expr>) -> CompileResult<()> {
        let start = self.builder.current_length();
        let exit = match test {
            Some(test) => {
                self.emit_expr(test)?;
                self.op(OpCode::Pop);
                let site = self.builder.add_instruction(Instruction::jump(OpCode::Jmpz));
                Some((site, self.builder.current_length()))
            }
            None => None,
        };

        self.emit_stmt(body, false)?;
        if let Some(update) = update {
            self.emit_expr(update)?;
            self.op(OpCode::Pop);
        }

        let back = self.builder.add_instruction(Instruction::jump(OpCode::Jmp));
        let end = self.builder.current_length();
        self.builder.patch_jump(back, -((end - start) as i32));
        if let Some((site, after_test)) = exit {
            self.builder.patch_jump(site, (end - after_test) as i32);
        }
        Ok(())
    }

    /// `S: [body] <cond> pop jmpnz(-B)`
    fn emit_do_while(&mut self, body: &Stmt, test: &Expr) -> CompileResult<()> {
        let start = self.builder.current_length();
        self.emit_stmt(body, false)?;
        self.emit_expr(test)?;
        self.op(OpCode::Pop);
        let back = self.builder.add_instruction(Instruction::jump(OpCode::Jmpnz));
        let end = self.builder.current_length();
        self.builder.patch_jump(back, -((end - start) as i32));
        Ok(())
    }

    // Expressions

    fn emit_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Number(n) => self.push(Operand::Number(*n)),
            Expr::Str(s) => self.push(Operand::Str(s.clone())),
            Expr::Bool(b) => self.push(Operand::Bool(*b)),
            Expr::Null => self.push(Operand::Null),
            Expr::Undefined => self.push(Operand::Object(Value::undefined())),
            Expr::Ident(name) => self.named(OpCode::Fetch, name),
            Expr::This => self.op(OpCode::PushThis),
            Expr::Array(elements) => {
                for element in elements {
                    self.emit_expr(element)?;
                }
                self.counted(OpCode::NewArray, elements.len());
            }
            Expr::Object(pairs) => {
                for (key, value) in pairs {
                    self.push(Operand::Str(key.clone()));
                    self.emit_expr(value)?;
                }
                self.counted(OpCode::NewObject, pairs.len());
            }
            Expr::Function(def) => self.emit_function_value(def),
            Expr::Unary { op, arg } => {
                self.emit_expr(arg)?;
                self.op(match op {
                    UnaryOp::Not => OpCode::Not,
                    UnaryOp::Neg => OpCode::Neg,
                    UnaryOp::BitNot => OpCode::BitNot,
                });
            }
            Expr::Update { op, prefix, target } => {
                let opcode = match (op, prefix) {
                    (UpdateOp::Increment, true) => OpCode::Inc,
                    (UpdateOp::Decrement, true) => OpCode::Dec,
                    (UpdateOp::Increment, false) => OpCode::PostInc,
                    (UpdateOp::Decrement, false) => OpCode::PostDec,
                };
                // Only variables can be updated; the VM rejects a null target
                match target.as_ref() {
                    Expr::Ident(name) => self.named(opcode, name),
                    _ => self.op(opcode),
                }
            }
            Expr::Binary { op, left, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.op(binary_opcode(*op));
            }
            Expr::Assign { op, target, value } => self.emit_assign(*op, target, value)?,
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.emit_condition(test, OpCode::Jmpz)?;
                self.builder.create_block();
                self.emit_expr(consequent)?;
                self.builder.add_instruction(Instruction::jump(OpCode::Jmp));
                self.builder.update_stacked_jump();
                self.builder.create_block();
                self.emit_expr(alternate)?;
                self.builder.end_block_for_jump();
                self.builder.end_block();
            }
            Expr::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.op(OpCode::Pop);
                    }
                    self.emit_expr(item)?;
                }
            }
            Expr::Member { object, property } => {
                self.emit_expr(object)?;
                self.named(OpCode::GetProp, property);
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.op(OpCode::GetIndex);
            }
            Expr::Call { callee, args } => self.emit_call(callee, args)?,
            Expr::New { callee, args } => {
                self.emit_expr(callee)?;
                self.emit_arguments(args)?;
                self.op(OpCode::MarkConstructor);
                self.counted(OpCode::Call, args.len());
            }
        }
        Ok(())
    }

    fn emit_arguments(&mut self, args: &[Expr]) -> CompileResult<()> {
        for arg in args {
            self.emit_expr(arg)?;
        }
        Ok(())
    }

    /// Plain calls push the callee. Member and index calls keep the receiver
    /// on the stack below the callee and mark the call right before `call`.
    fn emit_call(&mut self, callee: &Expr, args: &[Expr]) -> CompileResult<()> {
        match callee {
            Expr::Member { object, property } => {
                self.emit_expr(object)?;
                self.op(OpCode::Dup);
                self.named(OpCode::GetProp, property);
                self.emit_arguments(args)?;
                self.op(OpCode::MarkMember);
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.op(OpCode::Dup);
                self.emit_expr(index)?;
                self.op(OpCode::GetIndex);
                self.emit_arguments(args)?;
                self.op(OpCode::MarkMember);
            }
            _ => {
                self.emit_expr(callee)?;
                self.emit_arguments(args)?;
            }
        }
        self.counted(OpCode::Call, args.len());
        Ok(())
    }

    fn emit_assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> CompileResult<()> {
        match target {
            Expr::Ident(name) => {
                if let Some(op) = op {
                    self.named(OpCode::Fetch, name);
                    self.emit_expr(value)?;
                    self.op(binary_opcode(op));
                } else {
                    self.emit_expr(value)?;
                }
                self.named(OpCode::Store, name);
            }
            Expr::Member { object, property } => {
                self.emit_expr(object)?;
                if let Some(op) = op {
                    self.op(OpCode::Dup);
                    self.named(OpCode::GetProp, property);
                    self.emit_expr(value)?;
                    self.op(binary_opcode(op));
                } else {
                    self.emit_expr(value)?;
                }
                self.named(OpCode::SetProp, property);
            }
            Expr::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                if let Some(op) = op {
                    // The object and key expressions are evaluated a second
                    // time to read the current value
                    self.emit_expr(object)?;
                    self.emit_expr(index)?;
                    self.op(OpCode::GetIndex);
                    self.emit_expr(value)?;
                    self.op(binary_opcode(op));
                } else {
                    self.emit_expr(value)?;
                }
                self.op(OpCode::SetIndex);
            }
            _ => return Err(CompileError::InvalidAssignmentTarget),
        }
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> OpCode {
    match op {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Sub => OpCode::Sub,
        BinaryOp::Mul => OpCode::Mul,
        BinaryOp::Div => OpCode::Div,
        BinaryOp::Rem => OpCode::Rem,
        BinaryOp::Shl => OpCode::Shl,
        BinaryOp::Shr => OpCode::Shr,
        BinaryOp::BitAnd => OpCode::BitAnd,
        BinaryOp::BitOr => OpCode::BitOr,
        BinaryOp::BitXor => OpCode::BitXor,
        BinaryOp::And => OpCode::And,
        BinaryOp::Or => OpCode::Or,
        BinaryOp::Lt => OpCode::Lt,
        BinaryOp::Gt => OpCode::Gt,
        BinaryOp::Lte => OpCode::Lte,
        BinaryOp::Gte => OpCode::Gte,
        BinaryOp::Eq => OpCode::Eq,
        BinaryOp::NotEq => OpCode::Neq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Rc<InstructionList> {
        let program = parse(source).unwrap();
        Compiler::new().generate(&program).unwrap()
    }

    fn opcodes(source: &str) -> Vec<OpCode> {
        compile(source).iter().map(|i| i.opcode).collect()
    }

    /// Jump lengths keyed by instruction position
    fn jumps(code: &InstructionList) -> Vec<(usize, OpCode, i32)> {
        code.iter()
            .enumerate()
            .filter(|(_, i)| i.opcode.is_jump())
            .map(|(pc, i)| (pc, i.opcode, i.jump))
            .collect()
    }

    #[test]
    fn test_addition() {
        let code = compile("2 + 3;");
        assert_eq!(code.len(), 3);
        assert!(matches!(code[0].operand, Operand::Number(n) if n == 2.0));
        assert!(matches!(code[1].operand, Operand::Number(n) if n == 3.0));
        assert_eq!(code[2].opcode, OpCode::Add);
    }

    #[test]
    fn test_statements_pop_except_tail() {
        use OpCode::*;
        assert_eq!(
            opcodes("1; 2;"),
            vec![Push, Pop, Push]
        );
        assert_eq!(
            opcodes("var x = 10; x + 1;"),
            vec![Decl, Push, Store, Pop, Fetch, Push, Add]
        );
    }

    #[test]
    fn test_if_layout() {
        let code = compile("if (x) { 1; }");
        // fetch pop jmpz push
        assert_eq!(jumps(&code), vec![(2, OpCode::Jmpz, 1)]);
    }

    #[test]
    fn test_if_else_layout() {
        let code = compile("if (0) { 1; } else { 2; 3; }");
        // 0 push 1 pop 2 jmpz 3 push 4 jmp 5 push 6 pop 7 push
        assert_eq!(
            jumps(&code),
            vec![(2, OpCode::Jmpz, 2), (4, OpCode::Jmp, 3)]
        );
        assert_eq!(code.len(), 8);
    }

    #[test]
    fn test_while_layout() {
        let code = compile("while (x) { y; }");
        // 0 fetch 1 pop 2 jmpz 3 fetch 4 pop 5 jmp
        assert_eq!(
            jumps(&code),
            vec![(2, OpCode::Jmpz, 3), (5, OpCode::Jmp, -6)]
        );
    }

    #[test]
    fn test_for_layout() {
        let code = compile("for (var i = 0; i < 3; i++) { }");
        let ops: Vec<_> = code.iter().map(|i| i.opcode).collect();
        use OpCode::*;
        assert_eq!(
            ops,
            vec![Decl, Push, Store, Pop, Fetch, Push, Lt, Pop, Jmpz, PostInc, Pop, Jmp]
        );
        // Loop starts at 4, the exit lands just past the backward jump
        assert_eq!(jumps(&code), vec![(8, Jmpz, 3), (11, Jmp, -8)]);
    }

    #[test]
    fn test_do_while_layout() {
        let code = compile("do { x; } while (y);");
        // 0 fetch 1 pop 2 fetch 3 pop 4 jmpnz
        assert_eq!(jumps(&code), vec![(4, OpCode::Jmpnz, -5)]);
    }

    #[test]
    fn test_conditional_expression() {
        let code = compile("a ? 1 : 2;");
        assert_eq!(
            jumps(&code),
            vec![(2, OpCode::Jmpz, 2), (4, OpCode::Jmp, 1)]
        );
    }

    #[test]
    fn test_function_body_shape() {
        let program = parse("function f(a) { a; }").unwrap();
        let Stmt::Function(def) = &program.body[0] else {
            panic!("expected declaration");
        };
        let code = Compiler::new().generate_function(def).unwrap();
        use OpCode::*;
        let ops: Vec<_> = code.iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Noop, Fetch, Pop, Push, Ret]);
    }

    #[test]
    fn test_function_declarations_hoisted() {
        use OpCode::*;
        assert_eq!(
            opcodes("f(); function f() {}"),
            vec![Decl, Push, Store, Pop, Fetch, Call]
        );
    }

    #[test]
    fn test_call_markers_precede_call() {
        use OpCode::*;
        assert_eq!(
            opcodes("o.m(1);"),
            vec![Fetch, Dup, GetProp, Push, MarkMember, Call]
        );
        assert_eq!(
            opcodes("new A(1, 2);"),
            vec![Fetch, Push, Push, MarkConstructor, Call]
        );
    }

    #[test]
    fn test_compound_assignment() {
        use OpCode::*;
        assert_eq!(opcodes("x += 2;"), vec![Fetch, Push, Add, Store]);
        assert_eq!(
            opcodes("o.n *= 2;"),
            vec![Fetch, Dup, GetProp, Push, Mul, SetProp]
        );
    }

    #[test]
    fn test_top_level_return_leaves() {
        use OpCode::*;
        assert_eq!(opcodes("return 1; 2;"), vec![Push, Leave, Push]);
    }

    #[test]
    #[should_panic(expected = "called twice")]
    fn test_generate_is_single_use() {
        let program = parse("1;").unwrap();
        let mut compiler = Compiler::new();
        compiler.generate(&program).unwrap();
        let _ = compiler.generate(&program);
    }
}
