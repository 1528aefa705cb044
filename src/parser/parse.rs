//! Recursive-descent parser
//!
//! Builds a [`Program`] from source text. Binary operators are parsed by
//! precedence climbing; everything else is one function per grammar rule.

use std::rc::Rc;

use crate::parser::ast::{
    BinaryOp, Expr, FunctionDef, Program, Prototype, Stmt, UnaryOp, UpdateOp,
};
use crate::parser::compiler::{CompileError, CompileResult};
use crate::parser::lexer::{Lexer, SourcePos, Token};

/// Parse a complete program
pub fn parse(source: &str) -> CompileResult<Program> {
    Parser::new(source).parse_program()
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    pos: SourcePos,
    peeked: Option<(Token, SourcePos)>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let (current, pos) = lexer.next_spanned();
        Parser {
            lexer,
            current,
            pos,
            peeked: None,
        }
    }

    pub fn parse_program(&mut self) -> CompileResult<Program> {
        let mut body = Vec::new();
        while self.current != Token::Eof {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // Token handling

    fn advance(&mut self) -> CompileResult<Token> {
        let (next, pos) = match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.lexer.next_spanned(),
        };
        if let Token::Error(msg) = &next {
            return Err(self.syntax_error_at(msg.clone(), pos));
        }
        self.pos = pos;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn peek(&mut self) -> &Token {
        let lexer = &mut self.lexer;
        &self.peeked.get_or_insert_with(|| lexer.next_spanned()).0
    }

    fn check(&self, token: &Token) -> bool {
        &self.current == token
    }

    fn eat(&mut self, token: &Token) -> CompileResult<bool> {
        if self.check(token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, token: Token) -> CompileResult<()> {
        if self.check(&token) {
            self.advance()?;
            Ok(())
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    fn expect_ident(&mut self) -> CompileResult<String> {
        match self.advance_if_ident()? {
            Some(name) => Ok(name),
            None => Err(self.unexpected("identifier")),
        }
    }

    fn advance_if_ident(&mut self) -> CompileResult<Option<String>> {
        if let Token::Ident(name) = &self.current {
            let name = name.clone();
            self.advance()?;
            Ok(Some(name))
        } else {
            Ok(None)
        }
    }

    /// A statement ends with `;`, or implicitly before `}` or end of input
    fn consume_semicolon(&mut self) -> CompileResult<()> {
        if self.eat(&Token::Semicolon)? || matches!(self.current, Token::RBrace | Token::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("';'"))
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        if let Token::Error(msg) = &self.current {
            return self.syntax_error_at(msg.clone(), self.pos);
        }
        CompileError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current.describe(),
            line: self.pos.line,
            column: self.pos.column,
        }
    }

    fn syntax_error_at(&self, msg: String, pos: SourcePos) -> CompileError {
        CompileError::SyntaxError(format!("{} at line {}, column {}", msg, pos.line, pos.column))
    }

    // Statements

    fn parse_statement(&mut self) -> CompileResult<Stmt> {
        // `function name(...)` declares; an anonymous `function` starts an expression
        if self.check(&Token::Function) && matches!(self.peek(), Token::Ident(_)) {
            self.advance()?;
            return Ok(Stmt::Function(self.parse_function_rest()?));
        }

        match self.current {
            Token::LBrace => {
                self.advance()?;
                Ok(Stmt::Block(self.parse_block_body()?))
            }
            Token::Var => {
                self.advance()?;
                let decls = self.parse_var_declarations()?;
                self.consume_semicolon()?;
                Ok(Stmt::Var(decls))
            }
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::While => {
                self.advance()?;
                self.expect(Token::LParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body })
            }
            Token::Do => {
                self.advance()?;
                let body = Box::new(self.parse_statement()?);
                self.expect(Token::While)?;
                self.expect(Token::LParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RParen)?;
                self.eat(&Token::Semicolon)?;
                Ok(Stmt::DoWhile { body, test })
            }
            Token::Return => {
                self.advance()?;
                let value = if matches!(self.current, Token::Semicolon | Token::RBrace | Token::Eof) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            Token::Break | Token::Continue => Err(CompileError::Unsupported(format!(
                "'{}' statements at line {}",
                if self.check(&Token::Break) { "break" } else { "continue" },
                self.pos.line
            ))),
            Token::Semicolon => {
                self.advance()?;
                Ok(Stmt::Empty)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Statements up to the closing `}` (the `{` is already consumed)
    fn parse_block_body(&mut self) -> CompileResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.unexpected("'}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance()?;
        Ok(body)
    }

    fn parse_var_declarations(&mut self) -> CompileResult<Vec<(String, Option<Expr>)>> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Eq)? {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        let test = self.parse_expression()?;
        self.expect(Token::RParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat(&Token::Else)? {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;

        let init = match self.current {
            Token::Semicolon => None,
            Token::Var => {
                self.advance()?;
                Some(Box::new(Stmt::Var(self.parse_var_declarations()?)))
            }
            _ => Some(Box::new(Stmt::Expr(self.parse_expression()?))),
        };
        self.expect(Token::Semicolon)?;

        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon)?;

        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RParen)?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    /// Everything after the `function` keyword
    fn parse_function_rest(&mut self) -> CompileResult<Rc<FunctionDef>> {
        let name = self.advance_if_ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.expect(Token::LBrace)?;
        let body = self.parse_block_body()?;
        Ok(Rc::new(FunctionDef {
            proto: Prototype::new(name, params),
            body: Some(body),
        }))
    }

    // Expressions

    pub fn parse_expression(&mut self) -> CompileResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat(&Token::Comma)? {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn parse_assignment(&mut self) -> CompileResult<Expr> {
        let target = self.parse_conditional()?;

        let op = match self.current {
            Token::Eq => None,
            Token::PlusEq => Some(BinaryOp::Add),
            Token::MinusEq => Some(BinaryOp::Sub),
            Token::StarEq => Some(BinaryOp::Mul),
            Token::SlashEq => Some(BinaryOp::Div),
            Token::PercentEq => Some(BinaryOp::Rem),
            Token::LtLtEq => Some(BinaryOp::Shl),
            Token::GtGtEq => Some(BinaryOp::Shr),
            Token::AmpEq => Some(BinaryOp::BitAnd),
            Token::PipeEq => Some(BinaryOp::BitOr),
            Token::CaretEq => Some(BinaryOp::BitXor),
            _ => return Ok(target),
        };

        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(CompileError::InvalidAssignmentTarget);
        }
        self.advance()?;
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> CompileResult<Expr> {
        let test = self.parse_binary(0)?;
        if !self.eat(&Token::Question)? {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary_operator(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.current {
            Token::PipePipe => (BinaryOp::Or, 1),
            Token::AmpAmp => (BinaryOp::And, 2),
            Token::Pipe => (BinaryOp::BitOr, 3),
            Token::Caret => (BinaryOp::BitXor, 4),
            Token::Amp => (BinaryOp::BitAnd, 5),
            Token::EqEq | Token::EqEqEq => (BinaryOp::Eq, 6),
            Token::BangEq | Token::BangEqEq => (BinaryOp::NotEq, 6),
            Token::Lt => (BinaryOp::Lt, 7),
            Token::Gt => (BinaryOp::Gt, 7),
            Token::LtEq => (BinaryOp::Lte, 7),
            Token::GtEq => (BinaryOp::Gte, 7),
            Token::LtLt => (BinaryOp::Shl, 8),
            Token::GtGt => (BinaryOp::Shr, 8),
            Token::Plus => (BinaryOp::Add, 9),
            Token::Minus => (BinaryOp::Sub, 9),
            Token::Star => (BinaryOp::Mul, 10),
            Token::Slash => (BinaryOp::Div, 10),
            Token::Percent => (BinaryOp::Rem, 10),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, min_prec: u8) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;
        while let Some((op, prec)) = self.binary_operator() {
            if prec <= min_prec {
                break;
            }
            self.advance()?;
            let right = self.parse_binary(prec)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let op = match self.current {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Tilde => UnaryOp::BitNot,
            Token::PlusPlus | Token::MinusMinus => {
                let op = if self.check(&Token::PlusPlus) {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                self.advance()?;
                let target = self.parse_unary()?;
                return Ok(Expr::Update {
                    op,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            Token::Plus => return Err(CompileError::Unsupported("unary '+'".to_string())),
            _ => return self.parse_postfix(),
        };
        self.advance()?;
        let arg = self.parse_unary()?;
        // Fold negative literals so `-5` is a single push
        if let (UnaryOp::Neg, Expr::Number(n)) = (op, &arg) {
            return Ok(Expr::Number(-n));
        }
        Ok(Expr::Unary {
            op,
            arg: Box::new(arg),
        })
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let expr = self.parse_call()?;
        let op = match self.current {
            Token::PlusPlus => UpdateOp::Increment,
            Token::MinusMinus => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        self.advance()?;
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_arguments(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_assignment()?);
                if !self.eat(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_call(&mut self) -> CompileResult<Expr> {
        let mut expr = if self.eat(&Token::New)? {
            let callee = self.parse_member_chain()?;
            let args = if self.check(&Token::LParen) {
                self.parse_arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.parse_primary()?
        };

        loop {
            expr = match self.current {
                Token::Dot => {
                    self.advance()?;
                    let property = self.expect_ident()?;
                    Expr::Member {
                        object: Box::new(expr),
                        property,
                    }
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    }
                }
                Token::LParen => {
                    let args = self.parse_arguments()?;
                    Expr::Call {
                        callee: Box::new(expr),
                        args,
                    }
                }
                _ => return Ok(expr),
            };
        }
    }

    /// Primary expression followed by `.name`/`[index]` only; the callee of `new`
    fn parse_member_chain(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.current {
                Token::Dot => {
                    self.advance()?;
                    let property = self.expect_ident()?;
                    Expr::Member {
                        object: Box::new(expr),
                        property,
                    }
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    }
                }
                _ => return Ok(expr),
            };
        }
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let expr = match &self.current {
            Token::Number(n) => Expr::Number(*n),
            Token::String(s) => Expr::Str(s.clone()),
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Null => Expr::Null,
            Token::This => Expr::This,
            Token::Ident(name) if name == "undefined" => Expr::Undefined,
            Token::Ident(name) => Expr::Ident(name.clone()),
            Token::LParen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(expr);
            }
            Token::LBracket => return self.parse_array_literal(),
            Token::LBrace => return self.parse_object_literal(),
            Token::Function => {
                self.advance()?;
                return Ok(Expr::Function(self.parse_function_rest()?));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance()?;
        Ok(expr)
    }

    fn parse_array_literal(&mut self) -> CompileResult<Expr> {
        self.expect(Token::LBracket)?;
        let mut elements = Vec::new();
        while !self.check(&Token::RBracket) {
            elements.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RBracket)?;
        Ok(Expr::Array(elements))
    }

    fn parse_object_literal(&mut self) -> CompileResult<Expr> {
        self.expect(Token::LBrace)?;
        let mut props = Vec::new();
        while !self.check(&Token::RBrace) {
            let key = match &self.current {
                Token::Ident(name) => name.clone(),
                Token::String(s) => s.clone(),
                Token::Number(n) => crate::util::number_to_string(*n),
                _ => return Err(self.unexpected("property name")),
            };
            self.advance()?;
            self.expect(Token::Colon)?;
            let value = self.parse_assignment()?;
            props.push((key, value));
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Object(props))
    }
}
