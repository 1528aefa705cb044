//! Array payload
//!
//! Arrays are dense vectors with holes. A hole costs one pointer-sized slot
//! and reads as undefined, so `new Array(n)` and stores past the end do not
//! allocate a value per missing element. Reads past the end return undefined;
//! growth past [`MAX_ARRAY_LENGTH`] is refused.

use crate::value::Value;

/// Largest length an array may grow to (2^24 - 1)
pub const MAX_ARRAY_LENGTH: usize = (1 << 24) - 1;

#[derive(Debug, Default, Clone)]
pub struct JsArray {
    elements: Vec<Option<Value>>,
}

impl JsArray {
    /// Create a new empty array
    pub fn new() -> Self {
        Self::default()
    }

    /// An array of `length` holes. `None` past the maximum length.
    pub fn with_length(length: usize) -> Option<Self> {
        if length > MAX_ARRAY_LENGTH {
            return None;
        }
        let mut elements = Vec::new();
        elements.resize(length, None);
        Some(JsArray { elements })
    }

    /// Create an array from a vector of values
    pub fn from_values(mut values: Vec<Value>) -> Self {
        values.truncate(MAX_ARRAY_LENGTH);
        JsArray {
            elements: values.into_iter().map(Some).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`, or undefined for holes and out of range reads
    pub fn get(&self, index: usize) -> Value {
        self.elements
            .get(index)
            .and_then(Option::clone)
            .unwrap_or_else(Value::undefined)
    }

    /// Store an element, growing the array with holes if needed.
    ///
    /// Returns false if the array would grow past the maximum length.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if index >= MAX_ARRAY_LENGTH {
            return false;
        }
        if index >= self.elements.len() {
            self.elements.resize(index + 1, None);
        }
        self.elements[index] = Some(value);
        true
    }

    /// Append a value. Returns the new length, or `None` when full.
    pub fn push(&mut self, value: Value) -> Option<usize> {
        if self.elements.len() >= MAX_ARRAY_LENGTH {
            return None;
        }
        self.elements.push(Some(value));
        Some(self.elements.len())
    }

    /// Remove the last element. A hole pops as undefined.
    pub fn pop(&mut self) -> Option<Value> {
        self.elements
            .pop()
            .map(|slot| slot.unwrap_or_else(Value::undefined))
    }

    /// Remove the first element
    pub fn shift(&mut self) -> Option<Value> {
        if self.elements.is_empty() {
            return None;
        }
        Some(self.elements.remove(0).unwrap_or_else(Value::undefined))
    }

    /// Insert `values` at the front. Returns the new length, or `None` when
    /// the result would be too long.
    pub fn unshift(&mut self, values: Vec<Value>) -> Option<usize> {
        if self.elements.len() + values.len() > MAX_ARRAY_LENGTH {
            return None;
        }
        self.elements.splice(0..0, values.into_iter().map(Some));
        Some(self.elements.len())
    }

    pub fn reverse(&mut self) {
        self.elements.reverse();
    }

    /// Replace the contents. Values past the maximum length are dropped.
    pub fn replace(&mut self, values: Vec<Value>) {
        *self = Self::from_values(values);
    }

    /// Snapshot of the elements with holes read as undefined
    pub fn values(&self) -> Vec<Value> {
        self.iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.elements
            .iter()
            .map(|slot| slot.clone().unwrap_or_else(Value::undefined))
    }

    /// Move every stored element out, leaving the array empty
    pub(crate) fn take_values(&mut self) -> impl Iterator<Item = Value> + '_ {
        self.elements.drain(..).flatten()
    }
}
