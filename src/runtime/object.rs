//! Heap object representation
//!
//! Every [`Value`](crate::value::Value) points at one `JsObject`. The object
//! carries a closed set of kinds, a property table and coarse
//! writable/enumerable flags that apply to the object as a whole.

use bitflags::bitflags;

use crate::runtime::array::JsArray;
use crate::runtime::function::Function;
use crate::runtime::property::{PropertyHolder, PropertyTable};
use crate::runtime::regexp::JsRegExp;
use crate::runtime::string;
use crate::value::Value;

bitflags! {
    /// Coarse attribute flags, set on the whole value wrapper.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u8 {
        /// Stores through a variable or property holding this value succeed
        const WRITABLE = 1 << 0;
        /// Shown when the holder is printed
        const ENUMERABLE = 1 << 1;
    }
}

impl Default for ObjectFlags {
    fn default() -> Self {
        ObjectFlags::WRITABLE | ObjectFlags::ENUMERABLE
    }
}

/// Runtime type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Null,
    Undefined,
    Number,
    String,
    Object,
    Array,
    Function,
    RegExp,
}

impl ObjectType {
    /// Lower-case type name, as used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Null => "null",
            ObjectType::Undefined => "undefined",
            ObjectType::Number => "number",
            ObjectType::String => "string",
            ObjectType::Object => "object",
            ObjectType::Array => "array",
            ObjectType::Function => "function",
            ObjectType::RegExp => "regexp",
        }
    }

    /// Objects, arrays, functions and regular expressions can carry their
    /// own properties
    #[inline]
    pub fn is_object_like(self) -> bool {
        matches!(
            self,
            ObjectType::Object | ObjectType::Array | ObjectType::Function | ObjectType::RegExp
        )
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of a heap object
#[derive(Debug)]
pub enum ObjectKind {
    Null,
    Undefined,
    Number(f64),
    String(String),
    /// Plain object; its state lives entirely in the property table
    Object,
    Array(JsArray),
    Function(Function),
    RegExp(JsRegExp),
}

/// A heap object
#[derive(Debug)]
pub struct JsObject {
    kind: ObjectKind,
    properties: PropertyTable,
    flags: ObjectFlags,
}

impl JsObject {
    pub fn new(kind: ObjectKind) -> Self {
        JsObject {
            kind,
            properties: PropertyTable::new(),
            flags: ObjectFlags::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    #[inline]
    pub fn kind_mut(&mut self) -> &mut ObjectKind {
        &mut self.kind
    }

    /// Runtime type tag
    pub fn object_type(&self) -> ObjectType {
        match self.kind {
            ObjectKind::Null => ObjectType::Null,
            ObjectKind::Undefined => ObjectType::Undefined,
            ObjectKind::Number(_) => ObjectType::Number,
            ObjectKind::String(_) => ObjectType::String,
            ObjectKind::Object => ObjectType::Object,
            ObjectKind::Array(_) => ObjectType::Array,
            ObjectKind::Function(_) => ObjectType::Function,
            ObjectKind::RegExp(_) => ObjectType::RegExp,
        }
    }

    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    #[inline]
    pub fn set_flags(&mut self, flags: ObjectFlags) {
        self.flags = flags;
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(ObjectFlags::WRITABLE)
    }

    #[inline]
    pub fn is_enumerable(&self) -> bool {
        self.flags.contains(ObjectFlags::ENUMERABLE)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            ObjectKind::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ObjectKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&JsArray> {
        match &self.kind {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut JsArray> {
        match &mut self.kind {
            ObjectKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut Function> {
        match &mut self.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_regexp(&self) -> Option<&JsRegExp> {
        match &self.kind {
            ObjectKind::RegExp(re) => Some(re),
            _ => None,
        }
    }

    /// Synthetic properties computed from the payload: `length` and numeric
    /// indices on arrays and strings, pattern attributes on regular
    /// expressions.
    fn synthetic_property(&self, name: &str) -> Option<Value> {
        match &self.kind {
            ObjectKind::Array(array) => {
                if name == "length" {
                    return Some(Value::number(array.len() as f64));
                }
                let index = parse_index(name)?;
                Some(array.get(index))
            }
            ObjectKind::String(s) => {
                if name == "length" {
                    return Some(Value::number(string::char_count(s) as f64));
                }
                let index = parse_index(name)?;
                Some(
                    string::char_at(s, index)
                        .map(Value::string)
                        .unwrap_or_else(Value::undefined),
                )
            }
            ObjectKind::RegExp(re) => match name {
                "source" => Some(Value::string(re.source())),
                "flags" => Some(Value::string(re.flags())),
                "global" => Some(Value::bool(re.global())),
                "ignoreCase" => Some(Value::bool(re.ignore_case())),
                "multiline" => Some(Value::bool(re.multiline())),
                _ => None,
            },
            _ => None,
        }
    }
}

impl JsObject {
    /// Move out every value this object holds directly
    fn take_children(&mut self, pending: &mut Vec<Value>) {
        if let ObjectKind::Array(array) = &mut self.kind {
            pending.extend(array.take_values());
        }
        pending.extend(self.properties.drain_values());
    }
}

/// Nested containers are freed from a work list instead of recursively, so
/// arbitrarily deep nesting cannot overflow the native stack.
impl Drop for JsObject {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(value) = pending.pop() {
            if let Some(mut object) = value.into_unique() {
                object.take_children(&mut pending);
            }
        }
    }
}

impl PropertyHolder for JsObject {
    fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }

    fn get_property(&self, name: &str) -> Value {
        if let Some(value) = self.synthetic_property(name) {
            return value;
        }
        self.properties
            .get(name)
            .cloned()
            .unwrap_or_else(Value::undefined)
    }

    fn has_own_property(&self, name: &str) -> bool {
        let synthetic = match &self.kind {
            ObjectKind::Array(array) => {
                name == "length" || parse_index(name).is_some_and(|i| i < array.len())
            }
            ObjectKind::String(s) => {
                name == "length" || parse_index(name).is_some_and(|i| i < string::char_count(s))
            }
            ObjectKind::RegExp(_) => {
                matches!(name, "source" | "flags" | "global" | "ignoreCase" | "multiline")
            }
            _ => false,
        };
        synthetic || self.properties.has(name)
    }
}

/// Parse a canonical array index ("0", "17"; not "01" or "-1")
pub fn parse_index(name: &str) -> Option<usize> {
    if name.is_empty() || (name.len() > 1 && name.starts_with('0')) {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
