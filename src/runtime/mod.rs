//! Runtime support
//!
//! The object model behind [`Value`](crate::value::Value):
//! - Object representation (JsObject, flags, types)
//! - Property tables
//! - Arrays, regular expressions and string helpers
//! - Function objects and call arguments
//! - Operator semantics shared by the VM and the native library

pub mod array;
pub mod function;
pub mod object;
pub mod operators;
pub mod property;
pub mod regexp;
pub mod string;

pub use array::{JsArray, MAX_ARRAY_LENGTH};
pub use function::{Arguments, Function, FunctionKind, NativeFn};
pub use object::{JsObject, ObjectFlags, ObjectKind, ObjectType};
pub use property::{PropertyHolder, PropertyTable};
pub use regexp::JsRegExp;
