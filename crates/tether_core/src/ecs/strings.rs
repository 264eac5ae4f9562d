//! Interned string storage for `string` component fields.
//!
//! Component rows are plain bytes, so string fields hold a `StringId` into
//! the owning world's pool. Every row that stores an id holds one reference
//! on it; when the last reference is released the slot is recycled. Id `0` is
//! the empty string and is never counted or freed.

use std::collections::HashMap;
use std::sync::Arc;

pub type StringId = u32;

struct Entry {
    text: Arc<str>,
    refs: u32,
}

pub struct StringPool {
    entries: Vec<Option<Entry>>,
    index: HashMap<Arc<str>, StringId>,
    free: Vec<StringId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Some(Entry {
                text: Arc::from(""),
                refs: 0,
            })],
            index: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Intern `value` and take one reference on it.
    pub fn intern(&mut self, value: &str) -> StringId {
        if value.is_empty() {
            return 0;
        }
        if let Some(&id) = self.index.get(value) {
            if let Some(entry) = self.entries[id as usize].as_mut() {
                entry.refs += 1;
            }
            return id;
        }
        let shared: Arc<str> = Arc::from(value);
        let entry = Some(Entry {
            text: Arc::clone(&shared),
            refs: 1,
        });
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id as usize] = entry;
                id
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as StringId
            }
        };
        self.index.insert(shared, id);
        id
    }

    /// Drop one reference. Returns `true` when this freed the string.
    pub fn release(&mut self, id: StringId) -> bool {
        if id == 0 {
            return false;
        }
        let Some(slot) = self.entries.get_mut(id as usize) else {
            return false;
        };
        let Some(entry) = slot.as_mut() else {
            return false;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return false;
        }
        if let Some(entry) = slot.take() {
            self.index.remove(&entry.text);
        }
        self.free.push(id);
        true
    }

    pub fn get(&self, id: StringId) -> Option<&str> {
        self.entries
            .get(id as usize)
            .and_then(Option::as_ref)
            .map(|entry| &*entry.text)
    }

    /// References currently held on `id`.
    pub fn refs(&self, id: StringId) -> u32 {
        self.entries
            .get(id as usize)
            .and_then(Option::as_ref)
            .map_or(0, |entry| entry.refs)
    }

    /// Live strings, counting the empty string.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut pool = StringPool::new();
        let a = pool.intern("player");
        let b = pool.intern("enemy");
        assert_eq!(pool.intern("player"), a);
        assert_ne!(a, b);
        assert_eq!(pool.get(b), Some("enemy"));
        assert_eq!(pool.intern(""), 0);
        assert_eq!(pool.get(0), Some(""));
    }

    #[test]
    fn last_release_frees_and_recycles_the_slot() {
        let mut pool = StringPool::new();
        let a = pool.intern("crate");
        pool.intern("crate");
        assert_eq!(pool.refs(a), 2);

        assert!(!pool.release(a));
        assert_eq!(pool.get(a), Some("crate"));
        assert!(pool.release(a));
        assert_eq!(pool.get(a), None);
        assert!(pool.is_empty());

        let b = pool.intern("barrel");
        assert_eq!(b, a);
        assert_eq!(pool.get(b), Some("barrel"));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn empty_string_and_unknown_ids_ignore_release() {
        let mut pool = StringPool::new();
        assert!(!pool.release(0));
        assert!(!pool.release(99));
        assert_eq!(pool.get(0), Some(""));
        assert_eq!(pool.refs(0), 0);
    }

    #[test]
    fn overwrite_cycle_stays_bounded() {
        let mut pool = StringPool::new();
        let mut held = pool.intern("v0");
        for i in 1..10_000 {
            let next = pool.intern(&format!("v{i}"));
            pool.release(held);
            held = next;
        }
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(held), Some("v9999"));
    }
}
