//! Property table and the property holder contract
//!
//! Objects, arrays, strings, functions and native argument lists all carry a
//! name→Value table. Lookup goes through a hash index; the entries themselves
//! live in a vector so iteration order is stable for printing.

use rustc_hash::FxHashMap;

use crate::value::Value;

/// Property table: hash index over a dense entry vector.
#[derive(Debug, Default, Clone)]
pub struct PropertyTable {
    /// Entries in insertion order (removal swaps the last entry in)
    entries: Vec<(String, Value)>,
    /// Name -> index into `entries`
    index: FxHashMap<String, usize>,
}

impl PropertyTable {
    /// Create a new empty property table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of properties
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a property by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    /// Insert or overwrite a property. Returns the previous value.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        if let Some(&i) = self.index.get(name) {
            return Some(std::mem::replace(&mut self.entries[i].1, value));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), value));
        None
    }

    /// Remove a property
    pub fn delete(&mut self, name: &str) -> Option<Value> {
        let i = self.index.remove(name)?;
        let (_, value) = self.entries.swap_remove(i);
        if let Some((moved, _)) = self.entries.get(i) {
            self.index.insert(moved.clone(), i);
        }
        Some(value)
    }

    #[inline]
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterate over (name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over property names
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Move every value out, leaving the table empty
    pub(crate) fn drain_values(&mut self) -> impl Iterator<Item = Value> + '_ {
        self.index.clear();
        self.entries.drain(..).map(|(_, value)| value)
    }
}

/// Anything that exposes a name→Value mapping.
///
/// Missing names read as the undefined sentinel, never as an error.
pub trait PropertyHolder {
    fn properties(&self) -> &PropertyTable;
    fn properties_mut(&mut self) -> &mut PropertyTable;

    fn add_property(&mut self, name: &str, value: Value) {
        self.properties_mut().set(name, value);
    }

    fn get_property(&self, name: &str) -> Value {
        self.properties()
            .get(name)
            .cloned()
            .unwrap_or_else(Value::undefined)
    }

    fn has_own_property(&self, name: &str) -> bool {
        self.properties().has(name)
    }

    fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties_mut().delete(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut table = PropertyTable::new();
        assert!(table.set("x", Value::number(1.0)).is_none());
        assert!(table.set("y", Value::number(2.0)).is_none());

        assert_eq!(table.len(), 2);
        assert_eq!(table.get("x").map(|v| v.to_string()).as_deref(), Some("1"));
        assert!(table.get("z").is_none());

        let old = table.set("x", Value::number(3.0));
        assert_eq!(old.map(|v| v.to_string()).as_deref(), Some("1"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_delete_keeps_index_consistent() {
        let mut table = PropertyTable::new();
        table.set("a", Value::number(1.0));
        table.set("b", Value::number(2.0));
        table.set("c", Value::number(3.0));

        assert!(table.delete("a").is_some());
        assert!(table.delete("a").is_none());
        assert!(!table.has("a"));
        assert_eq!(table.get("c").map(|v| v.to_string()).as_deref(), Some("3"));
        assert_eq!(table.get("b").map(|v| v.to_string()).as_deref(), Some("2"));
        assert_eq!(table.keys().count(), 2);
    }
}
