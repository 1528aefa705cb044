//! Ridge - a small bytecode runtime for a dynamically typed scripting language
//!
//! Scripts are parsed, lowered to a flat instruction list and executed by a
//! stack-based virtual machine.
//!
//! # Features
//! - Subset of JavaScript syntax with dynamic scoping
//! - Functions compiled lazily on first call
//! - Interrupt queue for callbacks and timers, serviced between instructions
//! - Small native library (`console`, `Array`, `RegExp`, `Math`, `setTimeout`)
//!
//! # Example
//! ```
//! use ridge::Context;
//!
//! let mut ctx = Context::new();
//! let result = ctx.eval("1 + 2").unwrap();
//! assert_eq!(result.as_number(), Some(3.0));
//! ```

// Core modules
pub mod value;
pub mod context;

// Virtual machine
pub mod vm;

// Parser and code generator
pub mod parser;

// Built-in objects
pub mod builtins;

// Runtime support
pub mod runtime;

// Utilities
pub mod util;

// Re-export main types
pub use context::{Context, ContextOptions, EvalError};
pub use value::Value;
