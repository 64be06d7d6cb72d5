//! Lexical scope chain for function bodies.
//!
//! Bindings are kept in a vector and searched from the back, so a later
//! declaration shadows an earlier one with the same name. A scope may borrow
//! a parent; function bodies use a child of the parameter scope.

use crate::types::Type;

/// Where a bound value lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage<V> {
    /// Stack address; the value has to be loaded.
    Slot(V),
    /// The value itself, e.g. a parameter or a model address.
    Direct(V),
}

#[derive(Debug, Clone)]
pub struct Binding<V> {
    pub name: String,
    pub ty: Type,
    pub storage: Storage<V>,
}

#[derive(Debug)]
pub struct Scope<'parent, V> {
    parent: Option<&'parent Scope<'parent, V>>,
    bindings: Vec<Binding<V>>,
}

impl<'parent, V> Scope<'parent, V> {
    pub fn new() -> Self {
        Scope {
            parent: None,
            bindings: Vec::new(),
        }
    }

    pub fn with_parent(parent: &'parent Scope<'parent, V>) -> Self {
        Scope {
            parent: Some(parent),
            bindings: Vec::new(),
        }
    }

    pub fn declare(&mut self, name: impl Into<String>, ty: Type, storage: Storage<V>) {
        self.bindings.push(Binding {
            name: name.into(),
            ty,
            storage,
        });
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding<V>> {
        self.bindings
            .iter()
            .rev()
            .find(|binding| binding.name == name)
            .or_else(|| self.parent.and_then(|parent| parent.lookup(name)))
    }
}

impl<V> Default for Scope<'_, V> {
    fn default() -> Self {
        Scope::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Primitive;

    fn int32() -> Type {
        Type::Primitive(Primitive::Int32)
    }

    #[test]
    fn most_recent_binding_wins() {
        let mut scope = Scope::new();
        scope.declare("a", int32(), Storage::Direct(1));
        scope.declare("a", Type::Primitive(Primitive::Int8), Storage::Slot(2));

        let binding = scope.lookup("a").expect("a");
        assert_eq!(binding.storage, Storage::Slot(2));
        assert_eq!(binding.ty, Type::Primitive(Primitive::Int8));
    }

    #[test]
    fn falls_back_to_parent() {
        let mut params = Scope::new();
        params.declare("n", int32(), Storage::Direct(7));

        let mut body = Scope::with_parent(&params);
        body.declare("local", int32(), Storage::Slot(8));

        assert_eq!(body.lookup("n").map(|b| b.storage.clone()), Some(Storage::Direct(7)));
        assert_eq!(body.lookup("local").map(|b| b.storage.clone()), Some(Storage::Slot(8)));
        assert!(params.lookup("local").is_none());
        assert!(body.lookup("missing").is_none());
    }

    #[test]
    fn child_shadows_parent() {
        let mut params = Scope::new();
        params.declare("x", int32(), Storage::Direct(1));
        let mut body = Scope::with_parent(&params);
        body.declare("x", int32(), Storage::Slot(2));

        assert_eq!(body.lookup("x").map(|b| b.storage.clone()), Some(Storage::Slot(2)));
    }
}
