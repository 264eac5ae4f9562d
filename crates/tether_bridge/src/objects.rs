//! Per-world storage for values that cannot live inline in component rows.
//!
//! Component memory is plain bytes, so `Variant`, `Array`, `Dictionary` and
//! packed-array fields hold a `u64` instance id into this pool. Id `0` means
//! "empty". The pool is a `DashMap`, independent of the world lock, so readers
//! holding a shared world borrow can resolve ids concurrently.

use crate::value::Value;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub type ObjectId = u64;

#[derive(Default)]
pub struct ObjectPool {
    objects: DashMap<ObjectId, Value>,
    next_id: AtomicU64,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value and return its id (never `0`).
    pub fn insert(&self, value: Value) -> ObjectId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.objects.insert(id, value);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<Value> {
        self.objects.get(&id).map(|entry| entry.value().clone())
    }

    /// Overwrite an existing object; returns `false` if `id` is unknown.
    pub fn replace(&self, id: ObjectId, value: Value) -> bool {
        match self.objects.get_mut(&id) {
            Some(mut slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: ObjectId) -> Option<Value> {
        self.objects.remove(&id).map(|(_, value)| value)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&self) {
        self.objects.clear();
    }
}
