//! Script value representation
//!
//! A [`Value`] is a reference-counted handle to a heap [`JsObject`]. Cloning
//! a value shares the object; nothing is deep-copied implicitly. The handle
//! is untyped, the object carries the runtime type tag.
//!
//! Objects are freed when their last handle is dropped. Reference cycles
//! (an object that can reach itself through its properties or elements) are
//! never collected and leak for the life of the process.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::runtime::array::JsArray;
use crate::runtime::function::Function;
use crate::runtime::object::{JsObject, ObjectFlags, ObjectKind, ObjectType};
use crate::runtime::property::PropertyHolder;
use crate::runtime::regexp::JsRegExp;
use crate::util::number_to_string;

/// Name of the property every function carries for constructor calls
pub const PROTOTYPE: &str = "prototype";

/// Where the next global match of a regular expression starts
pub const LAST_INDEX: &str = "lastIndex";

/// Shared handle to a heap object
#[derive(Clone)]
pub struct Value(Rc<RefCell<JsObject>>);

impl Value {
    fn from_kind(kind: ObjectKind) -> Self {
        Value(Rc::new(RefCell::new(JsObject::new(kind))))
    }

    // Constructors

    #[inline]
    pub fn null() -> Self {
        Self::from_kind(ObjectKind::Null)
    }

    #[inline]
    pub fn undefined() -> Self {
        Self::from_kind(ObjectKind::Undefined)
    }

    #[inline]
    pub fn number(n: f64) -> Self {
        Self::from_kind(ObjectKind::Number(n))
    }

    /// Booleans are numbers: `1` for true, `0` for false
    #[inline]
    pub fn bool(b: bool) -> Self {
        Self::number(if b { 1.0 } else { 0.0 })
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::from_kind(ObjectKind::String(s.into()))
    }

    /// Create an empty plain object
    pub fn object() -> Self {
        Self::from_kind(ObjectKind::Object)
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::from_kind(ObjectKind::Array(JsArray::from_values(values)))
    }

    /// Create a function object with a fresh, empty `prototype` object
    pub fn function(function: Function) -> Self {
        let value = Self::from_kind(ObjectKind::Function(function));
        value.borrow_mut().add_property(PROTOTYPE, Value::object());
        value
    }

    /// A regular expression object, `lastIndex` starting at 0
    pub fn regexp(re: JsRegExp) -> Self {
        let value = Self::from_kind(ObjectKind::RegExp(re));
        value.borrow_mut().add_property(LAST_INDEX, Value::number(0.0));
        value
    }

    /// Replace the attribute flags, returning the same handle
    pub fn with_flags(self, flags: ObjectFlags) -> Self {
        self.0.borrow_mut().set_flags(flags);
        self
    }

    // Access

    #[inline]
    pub fn borrow(&self) -> Ref<'_, JsObject> {
        self.0.borrow()
    }

    #[inline]
    pub fn borrow_mut(&self) -> RefMut<'_, JsObject> {
        self.0.borrow_mut()
    }

    /// Identity comparison
    #[inline]
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    fn addr(&self) -> *const RefCell<JsObject> {
        Rc::as_ptr(&self.0)
    }

    // Type checking

    pub fn get_type(&self) -> ObjectType {
        self.0.borrow().object_type()
    }

    pub fn is_null(&self) -> bool {
        self.get_type() == ObjectType::Null
    }

    pub fn is_undefined(&self) -> bool {
        self.get_type() == ObjectType::Undefined
    }

    /// Null or undefined
    pub fn is_nullish(&self) -> bool {
        matches!(self.get_type(), ObjectType::Null | ObjectType::Undefined)
    }

    pub fn is_number(&self) -> bool {
        self.get_type() == ObjectType::Number
    }

    pub fn is_string(&self) -> bool {
        self.get_type() == ObjectType::String
    }

    pub fn is_array(&self) -> bool {
        self.get_type() == ObjectType::Array
    }

    pub fn is_function(&self) -> bool {
        self.get_type() == ObjectType::Function
    }

    /// Plain objects, arrays and functions
    pub fn is_object_like(&self) -> bool {
        self.get_type().is_object_like()
    }

    pub fn is_writable(&self) -> bool {
        self.0.borrow().is_writable()
    }

    pub fn is_enumerable(&self) -> bool {
        self.0.borrow().is_enumerable()
    }

    // Conversions

    /// The number payload, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        self.0.borrow().as_number()
    }

    /// Numeric view: numbers as-is, strings that parse as numbers
    pub fn to_number(&self) -> Option<f64> {
        let obj = self.0.borrow();
        match obj.kind() {
            ObjectKind::Number(n) => Some(*n),
            ObjectKind::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse().ok()
                }
            }
            _ => None,
        }
    }

    /// The string payload, if this is a string
    pub fn string_value(&self) -> Option<String> {
        self.0.borrow().as_str().map(str::to_string)
    }

    /// Truthiness used by conditional jumps
    pub fn is_true(&self) -> bool {
        match self.0.borrow().kind() {
            ObjectKind::Null | ObjectKind::Undefined => false,
            ObjectKind::Number(n) => *n != 0.0 && !n.is_nan(),
            ObjectKind::String(s) => !s.is_empty(),
            ObjectKind::Object
            | ObjectKind::Array(_)
            | ObjectKind::Function(_)
            | ObjectKind::RegExp(_) => true,
        }
    }

    // Properties

    /// Own or synthetic property, undefined when missing
    pub fn get_property(&self, name: &str) -> Value {
        self.0.borrow().get_property(name)
    }

    pub fn has_own_property(&self, name: &str) -> bool {
        self.0.borrow().has_own_property(name)
    }

    /// Store a property. A store over a non-writable value is ignored and
    /// reported as `false`.
    pub fn set_property(&self, name: &str, value: Value) -> bool {
        let existing = self.0.borrow().properties().get(name).cloned();
        if existing.is_some_and(|v| !v.is_writable()) {
            return false;
        }
        self.0.borrow_mut().add_property(name, value);
        true
    }

    pub fn remove_property(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove_property(name)
    }

    /// Flat-copy properties of `source` onto this object. With
    /// `only_missing`, names this object already owns are left alone.
    pub fn copy_properties_from(&self, source: &Value, only_missing: bool) {
        if self.ptr_eq(source) {
            return;
        }
        let entries: Vec<(String, Value)> = source
            .borrow()
            .properties()
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut target = self.0.borrow_mut();
        for (name, value) in entries {
            if only_missing && target.has_own_property(&name) {
                continue;
            }
            target.add_property(&name, value);
        }
    }

    /// Take the object out if this is its only handle
    pub(crate) fn into_unique(self) -> Option<JsObject> {
        Rc::try_unwrap(self.0).ok().map(RefCell::into_inner)
    }

    // Printing

    /// Debug form used by the REPL: strings quoted, containers expanded
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        self.write_debug(&mut out);
        out
    }

    /// Containers are walked with an explicit work list; `path` holds the
    /// containers currently open, so only true cycles are cut.
    fn write_canonical(&self, out: &mut String) {
        let mut work = vec![Emit::Value(self.clone())];
        let mut path = FxHashSet::default();
        while let Some(step) = work.pop() {
            let value = match step {
                Emit::Value(value) => value,
                Emit::Text(text) => {
                    out.push_str(text);
                    continue;
                }
                Emit::Key(_) => continue,
                Emit::Leave(addr) => {
                    path.remove(&addr);
                    continue;
                }
            };
            let obj = value.0.borrow();
            match obj.kind() {
                ObjectKind::Null => out.push_str("null"),
                ObjectKind::Undefined => out.push_str("undefined"),
                ObjectKind::Number(n) => out.push_str(&number_to_string(*n)),
                ObjectKind::String(s) => out.push_str(s),
                ObjectKind::Object => out.push_str("[object Object]"),
                ObjectKind::Function(f) => out.push_str(&f.source_text()),
                ObjectKind::RegExp(re) => out.push_str(&re.to_string()),
                ObjectKind::Array(array) => {
                    if !path.insert(value.addr()) {
                        continue;
                    }
                    work.push(Emit::Leave(value.addr()));
                    for (i, element) in array.values().into_iter().enumerate().rev() {
                        if !element.is_nullish() {
                            work.push(Emit::Value(element));
                        }
                        if i > 0 {
                            work.push(Emit::Text(","));
                        }
                    }
                }
            }
        }
    }

    fn write_debug(&self, out: &mut String) {
        let mut work = vec![Emit::Value(self.clone())];
        let mut path = FxHashSet::default();
        while let Some(step) = work.pop() {
            let value = match step {
                Emit::Value(value) => value,
                Emit::Text(text) => {
                    out.push_str(text);
                    continue;
                }
                Emit::Key(name) => {
                    out.push_str(&name);
                    out.push_str(": ");
                    continue;
                }
                Emit::Leave(addr) => {
                    path.remove(&addr);
                    continue;
                }
            };
            if path.contains(&value.addr()) {
                out.push_str("[Circular]");
                continue;
            }
            let obj = value.0.borrow();
            match obj.kind() {
                ObjectKind::String(s) => {
                    out.push('"');
                    out.extend(s.escape_debug());
                    out.push('"');
                }
                ObjectKind::Function(f) => match f.name() {
                    Some(name) => {
                        out.push_str("[Function: ");
                        out.push_str(name);
                        out.push(']');
                    }
                    None => out.push_str("[Function (anonymous)]"),
                },
                ObjectKind::Array(array) => {
                    if array.is_empty() {
                        out.push_str("[]");
                        continue;
                    }
                    path.insert(value.addr());
                    out.push_str("[ ");
                    work.push(Emit::Leave(value.addr()));
                    work.push(Emit::Text(" ]"));
                    for (i, element) in array.values().into_iter().enumerate().rev() {
                        work.push(Emit::Value(element));
                        if i > 0 {
                            work.push(Emit::Text(", "));
                        }
                    }
                }
                ObjectKind::Object => {
                    let visible: Vec<(String, Value)> = obj
                        .properties()
                        .iter()
                        .filter(|(_, v)| v.is_enumerable())
                        .map(|(k, v)| (k.to_string(), v.clone()))
                        .collect();
                    if visible.is_empty() {
                        out.push_str("{}");
                        continue;
                    }
                    path.insert(value.addr());
                    out.push_str("{ ");
                    work.push(Emit::Leave(value.addr()));
                    work.push(Emit::Text(" }"));
                    for (i, (name, property)) in visible.into_iter().enumerate().rev() {
                        work.push(Emit::Value(property));
                        work.push(Emit::Key(name));
                        if i > 0 {
                            work.push(Emit::Text(", "));
                        }
                    }
                }
                ObjectKind::RegExp(re) => out.push_str(&re.to_string()),
                ObjectKind::Null => out.push_str("null"),
                ObjectKind::Undefined => out.push_str("undefined"),
                ObjectKind::Number(n) => out.push_str(&number_to_string(*n)),
            }
        }
    }
}

/// One pending step of a printing walk
enum Emit {
    Value(Value),
    Text(&'static str),
    /// Property name, printed as `name: `
    Key(String),
    /// A container's last element has been printed
    Leave(*const RefCell<JsObject>),
}

impl Default for Value {
    fn default() -> Self {
        Value::undefined()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Canonical textual form (`ToString`)
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_canonical(&mut out);
        f.write_str(&out)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}
