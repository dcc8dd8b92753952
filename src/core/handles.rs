use crate::domain::model::{HandleId, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// In-process values addressed by `Resource::Handle`.
#[derive(Debug)]
pub struct HandleStore {
    next_id: AtomicU64,
    values: RwLock<HashMap<HandleId, Value>>,
}

impl Default for HandleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, value: Value) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.write().insert(id, value);
        id
    }

    pub fn get(&self, id: HandleId) -> Option<Value> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.read().contains_key(&id)
    }

    /// Stores `value` under an existing id. Returns false when the id is unknown.
    pub fn replace(&self, id: HandleId, value: Value) -> bool {
        match self.write().get_mut(&id) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: HandleId) -> Option<Value> {
        self.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave a half-written map entry.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<HandleId, Value>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<HandleId, Value>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }
}
