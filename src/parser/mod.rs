//! Parser and code generator
//!
//! Source text is parsed into an [`ast::Program`] which the [`Compiler`]
//! lowers to an instruction list.

pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod parse;

// Re-exports
pub use compiler::{CompileError, CompileResult, Compiler};
pub use lexer::{Lexer, Token};
pub use parse::parse;
