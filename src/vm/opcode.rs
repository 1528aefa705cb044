//! Instruction encoding
//!
//! The bytecode is a list of [`Instruction`]s. Each instruction has:
//! - an opcode
//! - an operand, tagged with its data type (null, bool, number, string,
//!   name, object handle)
//! - a signed jump length, meaningful only for jump-kind opcodes and relative
//!   to the instruction that follows the jump

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::util::number_to_string;
use crate::value::Value;

/// Expected operand shape of an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpFormat {
    /// No operand
    None,
    /// Variable name
    Name,
    /// Property name
    Property,
    /// Literal value to push
    Value,
    /// Element, argument or pair count
    Count,
    /// Jump length in the jump field
    Jump,
}

/// Bytecode opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Do nothing
    Noop = 0,

    // Scope store
    /// Push the value bound to a name: -> val
    Fetch,
    /// Bind the top value to a name, leaving it on the stack: val -> val
    Store,
    /// Declare a name as undefined in the innermost scope
    Decl,

    // Stack
    /// Push the operand: -> val
    Push,
    /// Drop the top value without touching the flags: a ->
    Pop,
    /// Duplicate top: a -> a a
    Dup,
    /// Push the active receiver: -> this
    PushThis,

    // Properties
    /// Get property by name: obj -> val
    GetProp,
    /// Set property by name: obj val -> val
    SetProp,
    /// Get by computed key: obj key -> val
    GetIndex,
    /// Set by computed key: obj key val -> val
    SetIndex,

    // Construction helpers
    /// Build an array from N values: v1 .. vN -> arr
    NewArray,
    /// Build an object from N key/value pairs: k1 v1 .. kN vN -> obj
    NewObject,

    // Call markers
    /// Mark the next call as a constructor call
    MarkConstructor,
    /// Mark the next call as a member call (receiver below the callee)
    MarkMember,

    // Unary
    /// Pre-increment a variable: -> new
    Inc,
    /// Pre-decrement a variable: -> new
    Dec,
    /// Post-increment a variable: -> old
    PostInc,
    /// Post-decrement a variable: -> old
    PostDec,
    /// Logical not: a -> !a
    Not,
    /// Bitwise not: a -> ~a
    BitNot,
    /// Numeric negation: a -> -a
    Neg,

    // Binary: a b -> a op b
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,

    // Control flow
    /// Unconditional relative jump
    Jmp,
    /// Jump if the zero flag is set (last value was falsy)
    Jmpz,
    /// Jump if the zero flag is clear (last value was truthy)
    Jmpnz,
    /// Call with N arguments: [recv] func a1 .. aN -> ret
    Call,
    /// Return from a script function: val ->
    Ret,
    /// Jump to the end of the current range
    Leave,
}

impl OpCode {
    /// Total number of opcodes
    pub const COUNT: usize = OpCode::Leave as usize + 1;

    /// Metadata for this opcode
    #[inline]
    pub fn info(self) -> &'static OpCodeInfo {
        &OPCODE_INFO[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Jump-kind opcodes carry a meaningful jump length
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::Jmpz | OpCode::Jmpnz)
    }

    /// Net change of the operand stack depth. `None` when the change depends
    /// on the operand (`newarray`, `newobject`, `call`) or on the frame being
    /// left (`ret`).
    pub fn stack_effect(self) -> Option<isize> {
        match self {
            OpCode::NewArray | OpCode::NewObject | OpCode::Call | OpCode::Ret => None,
            _ => {
                let info = self.info();
                Some(info.n_push as isize - info.n_pop as isize)
            }
        }
    }
}

/// Opcode metadata
#[derive(Debug, Clone, Copy)]
pub struct OpCodeInfo {
    /// Mnemonic used by the disassembler
    pub name: &'static str,
    /// Number of values popped (0 for count-driven opcodes). The interpreter
    /// checks the net effect in debug builds.
    pub n_pop: u8,
    /// Number of values pushed
    pub n_push: u8,
    /// Operand format
    pub format: OpFormat,
}

impl OpCodeInfo {
    const fn new(name: &'static str, n_pop: u8, n_push: u8, format: OpFormat) -> Self {
        OpCodeInfo { name, n_pop, n_push, format }
    }
}

/// Opcode information table, indexed by opcode
pub static OPCODE_INFO: [OpCodeInfo; OpCode::COUNT] = [
    OpCodeInfo::new("noop", 0, 0, OpFormat::None),
    OpCodeInfo::new("fetch", 0, 1, OpFormat::Name),
    OpCodeInfo::new("store", 1, 1, OpFormat::Name),
    OpCodeInfo::new("decl", 0, 0, OpFormat::Name),
    OpCodeInfo::new("push", 0, 1, OpFormat::Value),
    OpCodeInfo::new("pop", 1, 0, OpFormat::None),
    OpCodeInfo::new("dup", 1, 2, OpFormat::None),
    OpCodeInfo::new("pushthis", 0, 1, OpFormat::None),
    OpCodeInfo::new("getprop", 1, 1, OpFormat::Property),
    OpCodeInfo::new("setprop", 2, 1, OpFormat::Property),
    OpCodeInfo::new("getindex", 2, 1, OpFormat::None),
    OpCodeInfo::new("setindex", 3, 1, OpFormat::None),
    OpCodeInfo::new("newarray", 0, 1, OpFormat::Count),
    OpCodeInfo::new("newobject", 0, 1, OpFormat::Count),
    OpCodeInfo::new("markst", 0, 0, OpFormat::None),
    OpCodeInfo::new("markmem", 0, 0, OpFormat::None),
    OpCodeInfo::new("inc", 0, 1, OpFormat::Name),
    OpCodeInfo::new("dec", 0, 1, OpFormat::Name),
    OpCodeInfo::new("pinc", 0, 1, OpFormat::Name),
    OpCodeInfo::new("pdec", 0, 1, OpFormat::Name),
    OpCodeInfo::new("not", 1, 1, OpFormat::None),
    OpCodeInfo::new("bitnot", 1, 1, OpFormat::None),
    OpCodeInfo::new("neg", 1, 1, OpFormat::None),
    OpCodeInfo::new("add", 2, 1, OpFormat::None),
    OpCodeInfo::new("sub", 2, 1, OpFormat::None),
    OpCodeInfo::new("mul", 2, 1, OpFormat::None),
    OpCodeInfo::new("div", 2, 1, OpFormat::None),
    OpCodeInfo::new("rem", 2, 1, OpFormat::None),
    OpCodeInfo::new("shl", 2, 1, OpFormat::None),
    OpCodeInfo::new("shr", 2, 1, OpFormat::None),
    OpCodeInfo::new("band", 2, 1, OpFormat::None),
    OpCodeInfo::new("bor", 2, 1, OpFormat::None),
    OpCodeInfo::new("bxor", 2, 1, OpFormat::None),
    OpCodeInfo::new("and", 2, 1, OpFormat::None),
    OpCodeInfo::new("or", 2, 1, OpFormat::None),
    OpCodeInfo::new("lt", 2, 1, OpFormat::None),
    OpCodeInfo::new("gt", 2, 1, OpFormat::None),
    OpCodeInfo::new("lte", 2, 1, OpFormat::None),
    OpCodeInfo::new("gte", 2, 1, OpFormat::None),
    OpCodeInfo::new("eq", 2, 1, OpFormat::None),
    OpCodeInfo::new("neq", 2, 1, OpFormat::None),
    OpCodeInfo::new("jmp", 0, 0, OpFormat::Jump),
    OpCodeInfo::new("jmpz", 0, 0, OpFormat::Jump),
    OpCodeInfo::new("jmpnz", 0, 0, OpFormat::Jump),
    OpCodeInfo::new("call", 0, 1, OpFormat::Count),
    OpCodeInfo::new("ret", 1, 0, OpFormat::None),
    OpCodeInfo::new("leave", 0, 0, OpFormat::None),
];

/// Operand data type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Null,
    Bool,
    Number,
    String,
    Name,
    Object,
}

/// Instruction operand
#[derive(Debug, Clone, Default)]
pub enum Operand {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Name(String),
    Object(Value),
}

impl Operand {
    pub fn data_type(&self) -> DataType {
        match self {
            Operand::Null => DataType::Null,
            Operand::Bool(_) => DataType::Bool,
            Operand::Number(_) => DataType::Number,
            Operand::Str(_) => DataType::String,
            Operand::Name(_) => DataType::Name,
            Operand::Object(_) => DataType::Object,
        }
    }

    /// The name payload of a name or string operand
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(s) | Operand::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A count payload (argument, element or pair count)
    pub fn as_count(&self) -> Option<usize> {
        match self {
            Operand::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    /// Materialize the operand as a runtime value. Object operands share
    /// their handle, everything else allocates a fresh value.
    pub fn to_value(&self) -> Value {
        match self {
            Operand::Null => Value::null(),
            Operand::Bool(b) => Value::bool(*b),
            Operand::Number(n) => Value::number(*n),
            Operand::Str(s) | Operand::Name(s) => Value::string(s.as_str()),
            Operand::Object(v) => v.clone(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Null => write!(f, "null"),
            Operand::Bool(b) => write!(f, "{}", b),
            Operand::Number(n) => f.write_str(&number_to_string(*n)),
            Operand::Str(s) => write!(f, "{:?}", s),
            Operand::Name(s) => f.write_str(s),
            Operand::Object(v) => f.write_str(&v.as_string()),
        }
    }
}

/// One bytecode instruction
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: OpCode,
    pub operand: Operand,
    /// Relative jump length (jump-kind opcodes only)
    pub jump: i32,
}

impl Instruction {
    /// Instruction without operand
    pub fn simple(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::Null,
            jump: 0,
        }
    }

    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction {
            opcode,
            operand,
            jump: 0,
        }
    }

    /// Jump instruction with a placeholder length
    pub fn jump(opcode: OpCode) -> Self {
        debug_assert!(opcode.is_jump(), "{} is not a jump", opcode.name());
        Instruction::simple(opcode)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode.name();
        match self.opcode.info().format {
            OpFormat::None => f.write_str(name),
            OpFormat::Jump => write!(f, "{:<9} {:+}", name, self.jump),
            _ => write!(f, "{:<9} {}", name, self.operand),
        }
    }
}

/// A finalized, immutable instruction list
#[derive(Debug, Clone, Default)]
pub struct InstructionList(Vec<Instruction>);

impl InstructionList {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        InstructionList(instructions)
    }
}

impl Deref for InstructionList {
    type Target = [Instruction];

    fn deref(&self) -> &[Instruction] {
        &self.0
    }
}

/// A half-open range `[start, end)` of a shared instruction list
#[derive(Debug, Clone)]
pub struct CodeRange {
    pub code: Rc<InstructionList>,
    pub start: usize,
    pub end: usize,
}

impl CodeRange {
    pub fn new(code: Rc<InstructionList>, start: usize, end: usize) -> Self {
        CodeRange { code, start, end }
    }

    /// The whole list
    pub fn full(code: Rc<InstructionList>) -> Self {
        let end = code.len();
        CodeRange { code, start: 0, end }
    }
}

/// Render an instruction list, one numbered instruction per line
pub fn disassemble(code: &InstructionList) -> String {
    let mut out = String::new();
    for (pc, instr) in code.iter().enumerate() {
        out.push_str(&format!("{:04}  {}\n", pc, instr));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_count() {
        assert_eq!(OPCODE_INFO.len(), OpCode::COUNT);
        assert_eq!(OpCode::Leave.name(), "leave");
        assert_eq!(OpCode::Noop.name(), "noop");
        assert_eq!(OpCode::Jmpnz.name(), "jmpnz");
    }

    #[test]
    fn test_jump_kinds() {
        assert!(OpCode::Jmp.is_jump());
        assert!(OpCode::Jmpz.is_jump());
        assert!(OpCode::Jmpnz.is_jump());
        assert!(!OpCode::Call.is_jump());
        assert_eq!(OpCode::Jmpz.info().format, OpFormat::Jump);
    }

    #[test]
    fn test_stack_effect() {
        assert_eq!(OpCode::Push.stack_effect(), Some(1));
        assert_eq!(OpCode::Dup.stack_effect(), Some(1));
        assert_eq!(OpCode::Store.stack_effect(), Some(0));
        assert_eq!(OpCode::Add.stack_effect(), Some(-1));
        assert_eq!(OpCode::SetIndex.stack_effect(), Some(-2));
        assert_eq!(OpCode::Jmpz.stack_effect(), Some(0));
        assert_eq!(OpCode::Call.stack_effect(), None);
        assert_eq!(OpCode::NewObject.stack_effect(), None);
        assert_eq!(OpCode::Ret.stack_effect(), None);
    }

    #[test]
    fn test_operand_tags() {
        assert_eq!(Operand::Null.data_type(), DataType::Null);
        assert_eq!(Operand::Number(1.0).data_type(), DataType::Number);
        assert_eq!(Operand::Name("x".into()).data_type(), DataType::Name);
        assert_eq!(Operand::Object(Value::object()).data_type(), DataType::Object);
        assert_eq!(Operand::Number(3.0).as_count(), Some(3));
        assert_eq!(Operand::Number(1.5).as_count(), None);
    }

    #[test]
    fn test_display() {
        let push = Instruction::with_operand(OpCode::Push, Operand::Number(2.0));
        assert_eq!(push.to_string(), "push      2");

        let mut jmp = Instruction::jump(OpCode::Jmpz);
        jmp.jump = -4;
        assert_eq!(jmp.to_string(), "jmpz      -4");

        let code = InstructionList::new(vec![Instruction::simple(OpCode::Add)]);
        assert_eq!(disassemble(&code), "0000  add\n");
    }
}
