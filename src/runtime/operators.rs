//! Operators over values
//!
//! The operand types decide the behavior:
//! - `+` adds numbers and concatenates when either side is a string; any
//!   other pairing is a type error.
//! - relational operators compare numerically when both sides are numbers
//!   and lexicographically on the canonical strings otherwise.
//! - `==`/`!=` require the same type tag and the same canonical string. No
//!   cross-type coercion happens.
//! - the remaining arithmetic and bitwise operators only accept numbers and
//!   produce undefined for anything else.
//! - `&&`/`||` see two already evaluated operands, so they pick a value but
//!   cannot suppress side effects.

use std::cmp::Ordering;

use crate::runtime::object::ObjectType;
use crate::value::Value;
use crate::vm::{InterpreterError, InterpreterResult};

/// Numeric-only binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

/// Relational operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Lte,
    Gte,
}

/// `lhs + rhs`
pub fn add(lhs: &Value, rhs: &Value) -> InterpreterResult<Value> {
    match (lhs.get_type(), rhs.get_type()) {
        (ObjectType::Number, ObjectType::Number) => {
            let (a, b) = (number_of(lhs), number_of(rhs));
            Ok(Value::number(a + b))
        }
        (ObjectType::String, _) | (_, ObjectType::String) => {
            let mut s = lhs.to_string();
            s.push_str(&rhs.to_string());
            Ok(Value::string(s))
        }
        (l, r) => Err(InterpreterError::TypeError(format!(
            "cannot add {} and {}",
            l, r
        ))),
    }
}

/// Numeric binary operators; undefined unless both operands are numbers
pub fn arithmetic(op: ArithmeticOp, lhs: &Value, rhs: &Value) -> Value {
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        return Value::undefined();
    };
    let result = match op {
        ArithmeticOp::Sub => a - b,
        ArithmeticOp::Mul => a * b,
        ArithmeticOp::Div => a / b,
        ArithmeticOp::Rem => a % b,
        ArithmeticOp::Shl => to_int32(a).wrapping_shl(to_uint32(b) & 31) as f64,
        ArithmeticOp::Shr => to_int32(a).wrapping_shr(to_uint32(b) & 31) as f64,
        ArithmeticOp::BitAnd => (to_int32(a) & to_int32(b)) as f64,
        ArithmeticOp::BitOr => (to_int32(a) | to_int32(b)) as f64,
        ArithmeticOp::BitXor => (to_int32(a) ^ to_int32(b)) as f64,
    };
    Value::number(result)
}

/// Relational comparison, producing 1 or 0
pub fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Value {
    let ordering = match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(lhs.to_string().cmp(&rhs.to_string())),
    };
    // NaN compares false under every operator
    let Some(ordering) = ordering else {
        return Value::bool(false);
    };
    let result = match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
    };
    Value::bool(result)
}

/// Same type tag and same canonical string
pub fn equals(lhs: &Value, rhs: &Value) -> bool {
    lhs.get_type() == rhs.get_type() && lhs.to_string() == rhs.to_string()
}

pub fn logical_and(lhs: Value, rhs: Value) -> Value {
    if lhs.is_true() { rhs } else { lhs }
}

pub fn logical_or(lhs: Value, rhs: Value) -> Value {
    if lhs.is_true() { lhs } else { rhs }
}

pub fn not(value: &Value) -> Value {
    Value::bool(!value.is_true())
}

pub fn negate(value: &Value) -> Value {
    match value.as_number() {
        Some(n) => Value::number(-n),
        None => Value::undefined(),
    }
}

pub fn bit_not(value: &Value) -> Value {
    match value.as_number() {
        Some(n) => Value::number(!to_int32(n) as f64),
        None => Value::undefined(),
    }
}

/// `value + delta` for `++`/`--`. Numeric strings count as numbers.
pub fn step(value: &Value, delta: f64) -> Value {
    match value.to_number() {
        Some(n) => Value::number(n + delta),
        None => Value::undefined(),
    }
}

fn number_of(value: &Value) -> f64 {
    value.as_number().unwrap_or(f64::NAN)
}

/// ToInt32: truncate and wrap modulo 2^32
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}
