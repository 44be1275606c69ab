//! Payload store
//!
//! Most-recent-value cache keyed by lower-cased device address. The
//! engine applies each batch to the store, lets the case handlers read
//! and transform it, and clears it at the end of the cycle.

use crate::message::{Document, Message, Value};
use parking_lot::RwLock;

/// Concurrency-safe most-recent-value cache
#[derive(Debug, Default)]
pub struct PayloadStore {
    values: RwLock<Document>,
}

impl PayloadStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite values from a batch in arrival order.
    /// Addresses are lower-cased.
    pub fn apply(&self, batch: &[Message]) {
        let mut values = self.values.write();
        for message in batch {
            values.insert(message.key(), message.value.clone());
        }
    }

    /// Current value for a key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Current numeric value for a key
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.read().get(key).and_then(Value::as_f64)
    }

    /// Whether a key holds a value (null counts)
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Set a value
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    /// Remove a key, returning its value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    /// Drop every value
    pub fn clear(&self) {
        self.values.write().clear();
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Document {
        self.values.read().clone()
    }

    /// Run a transformation against the contents under the write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut values = self.values.write();
        f(&mut values)
    }
}
