//! Tables with insertion-ordered iteration and optional metatables.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::TableKey;
use crate::{LuaError, Value};

/// An associative array.
///
/// Entries keep their insertion position; assigning `nil` to an existing key
/// leaves a tombstone so iteration order stays stable while traversing.
#[derive(Default)]
pub struct Table {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<TableKey, usize>,
    metatable: Option<TableRef>,
}

impl Table {
    /// Raw lookup, `nil` if absent.
    pub fn get(&self, key: &Value) -> Value {
        TableKey::from_value(key)
            .and_then(|k| self.index.get(&k))
            .map(|&i| self.entries[i].1.clone())
            .unwrap_or_default()
    }

    /// Raw assignment.
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), LuaError> {
        let Some(k) = TableKey::from_value(&key) else {
            return Err(LuaError::runtime(if key.is_nil() {
                "table index is nil"
            } else {
                "table index is NaN"
            }));
        };
        match self.index.get(&k) {
            Some(&i) => self.entries[i].1 = value,
            None if value.is_nil() => {}
            None => {
                self.index.insert(k, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    /// Border of the sequence part: the largest `n` with `t[1..=n]` all non-nil.
    pub fn len(&self) -> usize {
        let mut n = 0;
        while !self.get(&Value::Number((n + 1) as f64)).is_nil() {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, v)| v.is_nil())
    }

    /// Live entries in enumeration order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().filter(|(_, v)| !v.is_nil()).map(|(k, v)| (k, v))
    }
}

/// Shared reference to a [`Table`].
#[derive(Clone, Default)]
pub struct TableRef(Rc<RefCell<Table>>);

impl TableRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup.
    pub fn get(&self, key: impl Into<Value>) -> Value {
        self.0.borrow().get(&key.into())
    }

    /// Raw assignment.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<(), LuaError> {
        self.0.borrow_mut().set(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Snapshot of the live entries, safe to hold while the table is mutated.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.0
            .borrow()
            .pairs()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of the live values in enumeration order.
    pub fn values(&self) -> Vec<Value> {
        self.0.borrow().pairs().map(|(_, v)| v.clone()).collect()
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.0.borrow().metatable.clone()
    }

    pub fn set_metatable(&self, metatable: Option<TableRef>) {
        self.0.borrow_mut().metatable = metatable;
    }

    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let t = TableRef::new();
        t.set("a", 1).unwrap();
        t.set(1, "x").unwrap();
        assert_eq!(t.get("a").as_number(), Some(1.0));
        assert_eq!(t.get(1).as_str(), Some("x"));
        assert!(t.get("missing").is_nil());
    }

    #[test]
    fn nil_key_is_an_error() {
        let t = TableRef::new();
        assert!(t.set(Value::Nil, 1).is_err());
    }

    #[test]
    fn iteration_keeps_insertion_order() {
        let t = TableRef::new();
        t.set("z", 1).unwrap();
        t.set("a", 2).unwrap();
        t.set("m", 3).unwrap();
        t.set("a", Value::Nil).unwrap();
        let keys: Vec<_> = t.pairs().into_iter().map(|(k, _)| k.as_str().unwrap().to_string()).collect();
        assert_eq!(keys, vec!["z", "m"]);
    }

    #[test]
    fn sequence_length() {
        let t = TableRef::new();
        for i in 1..=3 {
            t.set(i, i * 10).unwrap();
        }
        t.set(5, 50).unwrap();
        assert_eq!(t.len(), 3);
    }
}
