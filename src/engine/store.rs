//! Shared Store
//!
//! One key/value map per run, shared by reference across every
//! continuation of that run. Steps execute one at a time, so no locking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StepError;

/// Handle to a run's shared key/value map.
#[derive(Clone, Debug, Default)]
pub struct Store {
    map: Rc<RefCell<HashMap<String, Value>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.borrow().get(key).cloned()
    }

    /// Returns the value under `key` deserialized as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.map.borrow_mut().insert(key.into(), value.into());
    }

    /// Returns a copy of the whole map.
    ///
    /// Later writes are not reflected in the copy; use [`Store::set`] and
    /// [`Store::clear`] to change the shared map.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.map.borrow().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    /// Removes every entry. Other handles to this store see the empty map.
    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }

    /// Returns true if both handles refer to the same map.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.map, &other.map)
    }
}
