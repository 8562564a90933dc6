//! Handle table for host values living on the script side.
//!
//! The forward map owns the host value; the inverse map finds the handle of
//! an already-interned value by reference identity. Handles come from a
//! monotonically increasing counter and are never recycled.

use rustc_hash::FxHashMap;
use tracing::trace;

use hostbridge_core::{HostValue, TypeHash};

/// Reference identity of an internable host value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Identity {
    Object(usize),
    Array(usize),
    Type(TypeHash),
}

impl Identity {
    /// `None` for values passed to script by value.
    pub fn of(value: &HostValue) -> Option<Identity> {
        match value {
            HostValue::Object(obj) => Some(Identity::Object(obj.identity())),
            HostValue::Array(arr) => Some(Identity::Array(arr.identity())),
            HostValue::Type(hash) => Some(Identity::Type(*hash)),
            _ => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    forward: FxHashMap<i32, HostValue>,
    back: FxHashMap<Identity, i32>,
    next: i32,
}

impl ObjectTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            forward: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            back: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            next: 0,
        }
    }

    /// Handle `value` is registered under, if any.
    pub fn handle_of(&self, value: &HostValue) -> Option<i32> {
        Identity::of(value).and_then(|id| self.back.get(&id).copied())
    }

    /// Register `value` under a fresh handle in both directions.
    pub fn insert(&mut self, value: HostValue) -> i32 {
        let handle = self.allocate();
        if let Some(id) = Identity::of(&value) {
            self.back.insert(id, handle);
        }
        self.forward.insert(handle, value);
        trace!(handle, "interned host value");
        handle
    }

    /// Register `value` under a fresh handle without making it the value's
    /// canonical handle.
    pub fn insert_alias(&mut self, value: HostValue) -> i32 {
        let handle = self.allocate();
        self.forward.insert(handle, value);
        handle
    }

    fn allocate(&mut self) -> i32 {
        let handle = self.next;
        self.next += 1;
        handle
    }

    pub fn get(&self, handle: i32) -> Option<&HostValue> {
        self.forward.get(&handle)
    }

    /// Remove `handle` in both directions. Missing entries are ignored.
    pub fn release(&mut self, handle: i32) -> Option<HostValue> {
        let value = self.forward.remove(&handle)?;
        if let Some(id) = Identity::of(&value) {
            if self.back.get(&id) == Some(&handle) {
                self.back.remove(&id);
            }
        }
        trace!(handle, "released host value");
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Drop every entry; returns the released values.
    pub fn clear(&mut self) -> Vec<HostValue> {
        self.back.clear();
        self.forward.drain().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::HostObject;

    fn object() -> HostValue {
        HostValue::Object(HostObject::new(TypeHash::from_name("Thing"), 7i32))
    }

    #[test]
    fn interned_value_is_found_by_identity() {
        let mut table = ObjectTable::default();
        let value = object();
        let handle = table.insert(value.clone());
        assert_eq!(table.handle_of(&value), Some(handle));
        assert_eq!(table.handle_of(&object()), None);
        assert!(table.get(handle).is_some_and(|v| *v == value));
    }

    #[test]
    fn released_handles_are_not_recycled() {
        let mut table = ObjectTable::default();
        let value = object();
        let first = table.insert(value.clone());
        assert!(table.release(first).is_some());
        assert_eq!(table.handle_of(&value), None);
        let second = table.insert(value);
        assert_ne!(first, second);
    }

    #[test]
    fn releasing_twice_is_harmless() {
        let mut table = ObjectTable::default();
        let handle = table.insert(object());
        assert!(table.release(handle).is_some());
        assert!(table.release(handle).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn alias_does_not_replace_canonical_handle() {
        let mut table = ObjectTable::default();
        let value = object();
        let canonical = table.insert(value.clone());
        let alias = table.insert_alias(value.clone());
        assert_eq!(table.handle_of(&value), Some(canonical));
        table.release(alias);
        assert_eq!(table.handle_of(&value), Some(canonical));
    }

    #[test]
    fn scalars_have_no_identity() {
        assert_eq!(Identity::of(&HostValue::Int32(1)), None);
        assert_eq!(
            Identity::of(&HostValue::Type(TypeHash::from_name("A"))),
            Some(Identity::Type(TypeHash::from_name("A")))
        );
    }
}
