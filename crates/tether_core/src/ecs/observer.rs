//! Change observers.
//!
//! An observer watches one event kind for a set of component ids and runs
//! its callback synchronously from inside the mutating `World` call. The
//! callback only sees the trigger (never the world), so it must not expect to
//! read component data; typical observers flip a flag or record the entity.

use crate::ecs::{ComponentId, EntityId};
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObserverEvent {
    /// Component added to an entity (fires before the first `OnSet`).
    OnAdd,
    /// Component value written.
    OnSet,
    /// Component about to be removed (also fires on despawn).
    OnRemove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverTrigger {
    pub event: ObserverEvent,
    pub entity: EntityId,
    pub component: ComponentId,
}

pub type ObserverCallback = Arc<dyn Fn(&ObserverTrigger) + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

impl ObserverId {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ObserverEntry {
    id: ObserverId,
    event: ObserverEvent,
    components: Vec<ComponentId>,
    callback: ObserverCallback,
}

#[derive(Default)]
pub(crate) struct ObserverSet {
    entries: Vec<ObserverEntry>,
    next_id: u32,
}

impl ObserverSet {
    pub fn add(
        &mut self,
        event: ObserverEvent,
        components: &[ComponentId],
        callback: ObserverCallback,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let mut components = components.to_vec();
        components.sort_unstable();
        components.dedup();
        self.entries.push(ObserverEntry {
            id,
            event,
            components,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn fire(&self, trigger: ObserverTrigger) {
        for entry in &self.entries {
            if entry.event == trigger.event
                && entry.components.binary_search(&trigger.component).is_ok()
            {
                (entry.callback)(&trigger);
            }
        }
    }
}
