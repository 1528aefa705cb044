//! Virtual machine module
//!
//! Instructions are assembled by the [`builder`] and executed by the
//! stack-based [`Interpreter`].

pub mod builder;
pub mod interpreter;
pub mod opcode;
pub mod scope;
pub mod stack;

pub use builder::{BlockId, InstructionBuilder, InstructionId};
pub use interpreter::{
    Interpreter, InterpreterConfig, InterpreterError, InterpreterResult, InterpreterStats, VmFlags,
    VmState,
};
pub use opcode::{CodeRange, Instruction, InstructionList, OpCode, Operand, disassemble};
pub use scope::ScopeStore;
pub use stack::{CallStack, Stack};
