//! Ordered, append-only symbol tables.
//!
//! Units are small, so lookups are linear scans over parallel name/item
//! vectors. Insertion order is kept, so a registry can be cut back to an
//! earlier length when a unit fails.

use crate::error::{CompileError, CompileResult};

#[derive(Debug, Clone)]
pub struct Registry<T> {
    names: Vec<String>,
    items: Vec<T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry {
            names: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Appends `item` under `name`. A name that is already present is
    /// rejected and the registry is left untouched.
    pub fn append(&mut self, name: impl Into<String>, item: T) -> CompileResult<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(CompileError::RedundantDefinitionOfGlobal(name));
        }
        self.names.push(name);
        self.items.push(item);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.index_of(name).map(|index| &self.items[index])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.index_of(name).map(|index| &mut self.items[index])
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Drops every entry appended after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.names.truncate(len);
        self.items.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order() {
        let mut registry = Registry::new();
        registry.append("b", 2).expect("b");
        registry.append("a", 1).expect("a");
        registry.append("c", 3).expect("c");

        assert_eq!(registry.index_of("b"), Some(0));
        assert_eq!(registry.index_of("a"), Some(1));
        assert_eq!(registry.index_of("c"), Some(2));
        assert_eq!(registry.get("a"), Some(&1));
    }

    #[test]
    fn rejects_duplicates_and_keeps_the_original() {
        let mut registry = Registry::new();
        registry.append("main", "first").expect("first");

        let err = registry.append("main", "second").unwrap_err();
        assert_eq!(err, CompileError::RedundantDefinitionOfGlobal("main".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("main"), Some(&"first"));
    }

    #[test]
    fn truncate_forgets_later_names() {
        let mut registry = Registry::new();
        registry.append("kept", 1).expect("kept");
        let mark = registry.len();
        registry.append("dropped", 2).expect("dropped");

        registry.truncate(mark);
        assert!(!registry.contains("dropped"));
        assert_eq!(registry.get("kept"), Some(&1));
        registry.append("dropped", 3).expect("name is free again");
        assert_eq!(registry.get("dropped"), Some(&3));
    }

    #[test]
    fn composite_keys_are_plain_names() {
        let mut registry = Registry::new();
        registry.append("Point.sum", ()).expect("method");
        assert!(registry.contains("Point.sum"));
        assert!(!registry.contains("sum"));
    }

    #[test]
    fn get_mut_allows_taking_state_out() {
        let mut registry = Registry::new();
        registry.append("f", Some(12usize)).expect("f");
        let taken = registry.get_mut("f").and_then(Option::take);
        assert_eq!(taken, Some(12));
        assert_eq!(registry.get("f"), Some(&None));
    }
}
