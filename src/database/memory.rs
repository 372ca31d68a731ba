//! A map-backed [`ProgramDatabase`].

use std::collections::HashMap;

use crate::{
    database::{ClassId, ClassRef, FieldRef, Method, MethodId, MethodRef, ProgramDatabase},
    ir::ConstValue,
};

/// A [`ProgramDatabase`] held entirely in memory.
///
/// All methods share one constant pool: an index means the same entry in every
/// method body. Class hierarchy queries use the registered superclass links.
///
/// # Examples
///
/// ```rust,ignore
/// use jitfront::database::{ClassId, ClassRef, InMemoryDatabase, Method, MethodRef, Signature};
/// use jitfront::ir::BasicType;
///
/// let sig = Signature::new(vec![], BasicType::Int);
/// let mut db = InMemoryDatabase::new();
/// let callee = db.add_method(Method::new("one", sig.clone()));
/// let holder = ClassRef::loaded("Util", ClassId(1));
/// db.set_method_ref(1, MethodRef::resolved(holder, "one", sig, callee).with_static());
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryDatabase {
    methods: Vec<Method>,
    fields: HashMap<u16, FieldRef>,
    method_refs: HashMap<u16, MethodRef>,
    classes: HashMap<u16, ClassRef>,
    constants: HashMap<u16, ConstValue>,
    superclasses: HashMap<ClassId, ClassId>,
    monomorphic: HashMap<MethodId, MethodId>,
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method and returns its id.
    pub fn add_method(&mut self, method: Method) -> MethodId {
        self.methods.push(method);
        MethodId(self.methods.len() as u32 - 1)
    }

    /// Replaces a registered method, e.g. to make it call itself.
    pub fn replace_method(&mut self, id: MethodId, method: Method) {
        if let Some(slot) = self.methods.get_mut(id.0 as usize) {
            *slot = method;
        }
    }

    /// Sets the field reference at a pool index.
    pub fn set_field(&mut self, index: u16, field: FieldRef) {
        self.fields.insert(index, field);
    }

    /// Sets the method reference at a pool index.
    pub fn set_method_ref(&mut self, index: u16, method: MethodRef) {
        self.method_refs.insert(index, method);
    }

    /// Sets the class reference at a pool index.
    pub fn set_class(&mut self, index: u16, class: ClassRef) {
        self.classes.insert(index, class);
    }

    /// Sets the loadable constant at a pool index.
    pub fn set_constant(&mut self, index: u16, value: ConstValue) {
        self.constants.insert(index, value);
    }

    /// Declares `sup` as the direct superclass of `sub`.
    pub fn set_superclass(&mut self, sub: ClassId, sup: ClassId) {
        self.superclasses.insert(sub, sup);
    }

    /// Declares `target` the only implementation of the virtual method `method`.
    pub fn set_monomorphic_target(&mut self, method: MethodId, target: MethodId) {
        self.monomorphic.insert(method, target);
    }

    /// Returns the number of registered methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

impl ProgramDatabase for InMemoryDatabase {
    fn method(&self, id: MethodId) -> Option<&Method> {
        self.methods.get(id.0 as usize)
    }

    fn resolve_field(&self, _method: MethodId, index: u16) -> Option<FieldRef> {
        self.fields.get(&index).cloned()
    }

    fn resolve_method(&self, _caller: MethodId, index: u16) -> Option<MethodRef> {
        self.method_refs.get(&index).cloned()
    }

    fn resolve_class(&self, _method: MethodId, index: u16) -> Option<ClassRef> {
        self.classes.get(&index).cloned()
    }

    fn load_constant(&self, _method: MethodId, index: u16) -> Option<ConstValue> {
        self.constants.get(&index).copied()
    }

    fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut current = Some(sub);
        let mut steps = 0;
        while let Some(class) = current {
            if class == sup {
                return true;
            }
            steps += 1;
            if steps > self.superclasses.len() {
                return false;
            }
            current = self.superclasses.get(&class).copied();
        }
        false
    }

    fn find_monomorphic_target(&self, method: MethodId) -> Option<MethodId> {
        self.monomorphic.get(&method).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::Signature, ir::BasicType};

    #[test]
    fn test_subclass_chain() {
        let mut db = InMemoryDatabase::new();
        db.set_superclass(ClassId(3), ClassId(2));
        db.set_superclass(ClassId(2), ClassId(1));
        assert!(db.is_subclass_of(ClassId(3), ClassId(1)));
        assert!(db.is_subclass_of(ClassId(2), ClassId(2)));
        assert!(!db.is_subclass_of(ClassId(1), ClassId(3)));
    }

    #[test]
    fn test_cyclic_hierarchy_terminates() {
        let mut db = InMemoryDatabase::new();
        db.set_superclass(ClassId(1), ClassId(2));
        db.set_superclass(ClassId(2), ClassId(1));
        assert!(!db.is_subclass_of(ClassId(1), ClassId(9)));
    }

    #[test]
    fn test_method_lookup() {
        let mut db = InMemoryDatabase::new();
        let id = db.add_method(Method::new("f", Signature::new(vec![], BasicType::Void)));
        assert_eq!(db.method(id).map(|m| m.name.as_str()), Some("f"));
        assert!(db.method(MethodId(5)).is_none());
        assert!(db.exception_handlers(MethodId(5)).is_empty());
    }
}
