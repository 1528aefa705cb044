//! Scope store
//!
//! A stack of name → value maps. The bottom map is the global scope and is
//! never popped. Lookup walks from the innermost map outward. Only function
//! calls push and pop maps; blocks do not introduce a scope.

use rustc_hash::FxHashMap;

use crate::value::Value;

#[derive(Debug)]
pub struct ScopeStore {
    scopes: Vec<FxHashMap<String, Value>>,
}

impl Default for ScopeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStore {
    pub fn new() -> Self {
        ScopeStore {
            scopes: vec![FxHashMap::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Pop the innermost scope. The global scope stays.
    pub fn pop_scope(&mut self) -> bool {
        if self.scopes.len() > 1 {
            self.scopes.pop();
            true
        } else {
            false
        }
    }

    /// Bind `name` in the innermost scope, replacing any binding there
    pub fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    /// Bind `name` in the global scope
    pub fn declare_global(&mut self, name: &str, value: Value) {
        self.scopes[0].insert(name.to_string(), value);
    }

    /// Whether the innermost scope binds `name`
    pub fn declared_locally(&self, name: &str) -> bool {
        self.scopes.last().is_some_and(|s| s.contains_key(name))
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Rebind `name` in the innermost scope that has it, or in the global
    /// scope when no scope does
    pub fn assign(&mut self, name: &str, value: Value) {
        let index = self
            .scopes
            .iter()
            .rposition(|scope| scope.contains_key(name))
            .unwrap_or(0);
        self.scopes[index].insert(name.to_string(), value);
    }

    pub fn global(&self) -> &FxHashMap<String, Value> {
        &self.scopes[0]
    }

    /// Number of scopes, the global one included
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Drop every scope above the global one
    pub fn truncate_to_global(&mut self) {
        self.scopes.truncate(1);
    }
}
