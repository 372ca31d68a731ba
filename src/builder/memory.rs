//! Redundant field load and store elimination.
//!
//! [`MemoryValueCache`] remembers the last value written to or read from object
//! fields within straight-line code, in two tables:
//!
//! - **Fresh objects**: objects allocated in the current region that have not
//!   escaped. Every field is tracked separately, and a store of the default value to
//!   a field that was never written is dropped, since the allocation already zeroed it.
//! - **Generic memory**: for any other object, one remembered `(object, value)` pair
//!   per field offset. A store to the same offset through a different object replaces
//!   the entry.
//!
//! There is no alias analysis. A call, a monitor operation, a store the cache cannot
//! analyze (unresolved field) or the start of a new block clears everything. Storing a
//! fresh object anywhere makes it escape, moving it out of the fresh table.

use std::collections::HashMap;

use tracing::trace;

use crate::{
    database::{ClassId, FieldRef},
    ir::{Graph, ValueId},
};

/// Identity of a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FieldKey {
    holder: ClassId,
    offset: u32,
}

impl FieldKey {
    fn of(field: &FieldRef) -> Option<Self> {
        Some(FieldKey {
            holder: field.holder.id?,
            offset: field.offset?,
        })
    }
}

#[derive(Debug)]
struct FreshObject {
    object: ValueId,
    fields: HashMap<FieldKey, ValueId>,
}

#[derive(Debug, Clone, Copy)]
struct Remembered {
    object: ValueId,
    field: FieldKey,
    value: ValueId,
}

/// Outcome of recording a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The store must be emitted.
    Keep,
    /// The store writes a value the field already holds and is dropped.
    Eliminated,
}

/// Known field values of the current straight-line region.
#[derive(Debug)]
pub struct MemoryValueCache {
    enabled: bool,
    generic: HashMap<u32, Remembered>,
    fresh: Vec<FreshObject>,
    hits: usize,
    eliminated: usize,
}

impl MemoryValueCache {
    /// Creates an empty cache. A disabled cache never hits and never eliminates.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        MemoryValueCache {
            enabled,
            generic: HashMap::new(),
            fresh: Vec::new(),
            hits: 0,
            eliminated: 0,
        }
    }

    /// Looks up the value a load of `field` through `object` would produce.
    ///
    /// Volatile and unresolved fields never hit.
    pub fn load(&mut self, object: ValueId, field: &FieldRef) -> Option<ValueId> {
        if !self.enabled || field.is_volatile {
            return None;
        }
        let key = FieldKey::of(field)?;
        let found = match self.fresh.iter().find(|f| f.object == object) {
            Some(fresh) => fresh.fields.get(&key).copied(),
            None => self
                .generic
                .get(&key.offset)
                .filter(|r| r.object == object && r.field == key)
                .map(|r| r.value),
        };
        if let Some(value) = found {
            self.hits += 1;
            trace!(target: "jitfront::memory", %object, field = %field.name, %value, "load hit");
        }
        found
    }

    /// Records the value produced by a load that was emitted, so a later load of the
    /// same field through the same object can reuse it.
    pub fn record_load(&mut self, object: ValueId, field: &FieldRef, load: ValueId) {
        if !self.enabled || field.is_volatile {
            return;
        }
        let Some(key) = FieldKey::of(field) else {
            return;
        };
        match self.fresh.iter_mut().find(|f| f.object == object) {
            Some(fresh) => {
                fresh.fields.entry(key).or_insert(load);
            }
            None => {
                self.generic.insert(
                    key.offset,
                    Remembered {
                        object,
                        field: key,
                        value: load,
                    },
                );
            }
        }
    }

    /// Records a store of `value` to `field` of `object`.
    ///
    /// An unresolved field kills the whole cache. The value being stored escapes.
    pub fn store(
        &mut self,
        graph: &Graph,
        object: ValueId,
        field: &FieldRef,
        value: ValueId,
    ) -> StoreOutcome {
        if !self.enabled {
            return StoreOutcome::Keep;
        }
        let Some(key) = FieldKey::of(field) else {
            self.kill();
            return StoreOutcome::Keep;
        };
        // Volatile stores are cached like any other store and do not kill the cache.

        if let Some(fresh) = self.fresh.iter_mut().find(|f| f.object == object) {
            let is_default = graph.ty(value) == field.ty.value_type()
                && graph.constant(value).is_some_and(|c| c.is_default());
            if !fresh.fields.contains_key(&key) && is_default {
                self.eliminated += 1;
                trace!(
                    target: "jitfront::memory",
                    %object,
                    field = %field.name,
                    "default store to fresh object eliminated"
                );
                return StoreOutcome::Eliminated;
            }
            fresh.fields.insert(key, value);
        } else {
            self.generic.insert(
                key.offset,
                Remembered {
                    object,
                    field: key,
                    value,
                },
            );
        }
        self.store_value(value);
        StoreOutcome::Keep
    }

    /// Marks `value` as escaped if it is a tracked fresh object.
    pub fn store_value(&mut self, value: ValueId) {
        self.fresh.retain(|f| f.object != value);
    }

    /// Starts tracking a freshly allocated object.
    pub fn new_instance(&mut self, object: ValueId) {
        if self.enabled {
            self.fresh.push(FreshObject {
                object,
                fields: HashMap::new(),
            });
        }
    }

    /// Forgets everything.
    pub fn kill(&mut self) {
        self.generic.clear();
        self.fresh.clear();
    }

    /// Returns the number of loads answered from the cache.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the number of stores eliminated.
    #[must_use]
    pub fn eliminated_stores(&self) -> usize {
        self.eliminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::ClassRef,
        ir::{BasicType, ConstValue, Instruction, Node, ValueType},
    };

    fn field(name: &str, offset: u32) -> FieldRef {
        FieldRef::instance(ClassRef::loaded("Point", ClassId(1)), name, BasicType::Int, offset)
    }

    fn setup() -> (Graph, ValueId, ValueId, ValueId) {
        let mut graph = Graph::new();
        let klass = Box::new(ClassRef::loaded("Point", ClassId(1)));
        let object = graph.add_node(Node::new(Instruction::NewInstance { klass }, ValueType::Object));
        let zero = graph.add_node(Node::constant(ConstValue::Int(0)));
        let seven = graph.add_node(Node::constant(ConstValue::Int(7)));
        (graph, object, zero, seven)
    }

    #[test]
    fn test_volatile_store_keeps_other_fields() {
        let (graph, object, _, seven) = setup();
        let x = field("x", 8);
        let flag = FieldRef {
            is_volatile: true,
            ..field("flag", 16)
        };
        let mut cache = MemoryValueCache::new(true);
        cache.new_instance(object);
        cache.store(&graph, object, &x, seven);
        cache.store(&graph, object, &flag, seven);
        assert_eq!(cache.load(object, &x), Some(seven));
    }

    #[test]
    fn test_store_then_load_hits() {
        let (graph, object, _, seven) = setup();
        let x = field("x", 8);
        let mut cache = MemoryValueCache::new(true);
        cache.new_instance(object);
        assert_eq!(cache.store(&graph, object, &x, seven), StoreOutcome::Keep);
        assert_eq!(cache.load(object, &x), Some(seven));
        assert_eq!(cache.load(object, &field("y", 12)), None);
        cache.kill();
        assert_eq!(cache.load(object, &x), None);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_default_store_to_fresh_object() {
        let (graph, object, zero, seven) = setup();
        let x = field("x", 8);
        let mut cache = MemoryValueCache::new(true);
        cache.new_instance(object);
        assert_eq!(cache.store(&graph, object, &x, zero), StoreOutcome::Eliminated);
        assert_eq!(cache.store(&graph, object, &x, seven), StoreOutcome::Keep);
        // Once written, a default store is a real store.
        assert_eq!(cache.store(&graph, object, &x, zero), StoreOutcome::Keep);
        assert_eq!(cache.eliminated_stores(), 1);
    }

    #[test]
    fn test_generic_memory_is_per_object() {
        let (mut graph, a, _, seven) = setup();
        let b = graph.add_node(Node::new(Instruction::Local { index: 0 }, ValueType::Object));
        let x = field("x", 8);
        let mut cache = MemoryValueCache::new(true);
        cache.store(&graph, b, &x, seven);
        assert_eq!(cache.load(b, &x), Some(seven));
        assert_eq!(cache.load(a, &x), None);
    }

    #[test]
    fn test_escape_and_unresolved_store() {
        let (mut graph, object, _, seven) = setup();
        let holder = graph.add_node(Node::new(Instruction::Local { index: 0 }, ValueType::Object));
        let x = field("x", 8);
        let next = FieldRef {
            ty: BasicType::Object,
            ..field("next", 16)
        };
        let mut cache = MemoryValueCache::new(true);
        cache.new_instance(object);
        cache.store(&graph, holder, &next, object);
        // The object escaped, so a default store is no longer provably redundant.
        let zero = graph.add_node(Node::constant(ConstValue::Int(0)));
        assert_eq!(cache.store(&graph, object, &x, zero), StoreOutcome::Keep);

        let unresolved = FieldRef::unresolved(ClassRef::unloaded("Other"), "z", BasicType::Int, false);
        cache.store(&graph, holder, &unresolved, seven);
        assert_eq!(cache.load(object, &x), None);
    }

    #[test]
    fn test_disabled_cache() {
        let (graph, object, zero, seven) = setup();
        let x = field("x", 8);
        let mut cache = MemoryValueCache::new(false);
        cache.new_instance(object);
        assert_eq!(cache.store(&graph, object, &x, zero), StoreOutcome::Keep);
        cache.store(&graph, object, &x, seven);
        assert_eq!(cache.load(object, &x), None);
    }
}
