// world.rs - ECS World with entity management, observers and iteration

use crate::ecs::observer::ObserverSet;
use crate::ecs::{
    Column, ComponentId, ComponentInfo, ComponentTable, EntityId, ObserverCallback, ObserverEvent,
    ObserverId, ObserverTrigger, StringPool, TypeDescriptor, WorldError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct EntitySlot {
    generation: u32,
    alive: bool,
    name: Option<String>,
}

/// The main ECS world containing all entities and components.
pub struct World {
    slots: Vec<EntitySlot>,
    free: VecDeque<u32>,
    live: usize,
    components: ComponentTable,
    columns: HashMap<ComponentId, Column>,
    observers: ObserverSet,
    strings: StringPool,
}

impl World {
    /// Create a new empty world.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            live: 0,
            components: ComponentTable::new(),
            columns: HashMap::new(),
            observers: ObserverSet::default(),
            strings: StringPool::new(),
        }
    }

    // ------------------------------------------------------------------
    // Component types
    // ------------------------------------------------------------------

    /// Register a component type with this world (idempotent by name).
    pub fn register_component(
        &mut self,
        name: &str,
        size: usize,
        align: usize,
        layout: Option<Arc<TypeDescriptor>>,
    ) -> Result<ComponentId, WorldError> {
        let id = self.components.register(name, size, align, layout)?;
        if !self.columns.contains_key(&id) {
            if let Some(info) = self.components.get(id) {
                self.columns.insert(id, Column::new(info));
            }
        }
        Ok(id)
    }

    pub fn component_info(&self, id: ComponentId) -> Option<&ComponentInfo> {
        self.components.get(id)
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.components.id_of(name)
    }

    pub fn component_types(&self) -> &ComponentTable {
        &self.components
    }

    pub(crate) fn column(&self, id: ComponentId) -> Option<&Column> {
        self.columns.get(&id)
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Spawn an empty entity.
    ///
    /// Freed slots are reused oldest-first; their generation was bumped on despawn.
    pub fn spawn(&mut self) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.name = None;
            return EntityId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(EntitySlot {
            generation: 0,
            alive: true,
            name: None,
        });
        EntityId::new(index, 0)
    }

    pub fn spawn_named(&mut self, name: impl Into<String>) -> EntityId {
        let entity = self.spawn();
        self.slots[entity.index() as usize].name = Some(name.into());
        entity
    }

    /// Despawn an entity, firing `OnRemove` for each of its components.
    ///
    /// The slot's generation is incremented, invalidating stale handles. A slot
    /// whose generation would wrap is retired instead of recycled.
    pub fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        for cid in self.components_of(entity) {
            self.observers.fire(ObserverTrigger {
                event: ObserverEvent::OnRemove,
                entity,
                component: cid,
            });
            if let Some(col) = self.columns.get_mut(&cid) {
                col.remove(entity.index());
            }
        }

        let slot = &mut self.slots[entity.index() as usize];
        slot.alive = false;
        slot.name = None;
        self.live -= 1;
        if slot.generation == u32::MAX {
            tracing::debug!(index = entity.index(), "retiring exhausted entity slot");
        } else {
            slot.generation += 1;
            self.free.push_back(entity.index());
        }
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation())
    }

    /// Current live handle for a slot index, if that slot is occupied.
    pub fn entity_at_slot(&self, index: u32) -> Option<EntityId> {
        let slot = self.slots.get(index as usize)?;
        slot.alive.then(|| EntityId::new(index, slot.generation))
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.live
    }

    pub fn set_name(&mut self, entity: EntityId, name: Option<String>) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.slots[entity.index() as usize].name = name;
        true
    }

    pub fn name(&self, entity: EntityId) -> Option<&str> {
        if !self.is_alive(entity) {
            return None;
        }
        self.slots[entity.index() as usize].name.as_deref()
    }

    /// Iterate every live entity in slot order until `f` returns `false`.
    ///
    /// This is the unstructured full-table walk; unlike `Query` it also visits
    /// entities without components.
    pub fn each_raw_while<F>(&self, mut f: F)
    where
        F: FnMut(EntityId) -> bool,
    {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.alive && !f(EntityId::new(index as u32, slot.generation)) {
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Component data
    // ------------------------------------------------------------------

    fn check(&self, entity: EntityId, id: ComponentId) -> Result<&ComponentInfo, WorldError> {
        if !self.is_alive(entity) {
            return Err(WorldError::EntityNotAlive { entity });
        }
        self.components
            .get(id)
            .ok_or(WorldError::ComponentNotRegistered { component: id })
    }

    pub fn has_component(&self, entity: EntityId, id: ComponentId) -> bool {
        self.is_alive(entity)
            && self
                .columns
                .get(&id)
                .is_some_and(|col| col.contains(entity.index()))
    }

    /// Component ids carried by an entity, ascending.
    pub fn components_of(&self, entity: EntityId) -> Vec<ComponentId> {
        if !self.is_alive(entity) {
            return Vec::new();
        }
        let mut ids: Vec<ComponentId> = self
            .columns
            .iter()
            .filter(|(_, col)| col.contains(entity.index()))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Add a zero-initialized component. Fires `OnAdd` if it was not present.
    pub fn add_component(&mut self, entity: EntityId, id: ComponentId) -> Result<bool, WorldError> {
        let size = self.check(entity, id)?.size;
        if self.has_component(entity, id) {
            return Ok(false);
        }
        let zeroed = vec![0u8; size];
        if let Some(col) = self.columns.get_mut(&id) {
            col.insert(entity.index(), &zeroed);
        }
        self.observers.fire(ObserverTrigger {
            event: ObserverEvent::OnAdd,
            entity,
            component: id,
        });
        Ok(true)
    }

    /// Write a component value, adding it if needed.
    ///
    /// Fires `OnAdd` (when new) followed by `OnSet`.
    pub fn set_component(
        &mut self,
        entity: EntityId,
        id: ComponentId,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        let expected = self.check(entity, id)?.size;
        if bytes.len() != expected {
            return Err(WorldError::SizeMismatch {
                component: id,
                expected,
                actual: bytes.len(),
            });
        }
        let added = match self.columns.get_mut(&id) {
            Some(col) => col.insert(entity.index(), bytes),
            None => return Err(WorldError::ComponentNotRegistered { component: id }),
        };
        if added {
            self.observers.fire(ObserverTrigger {
                event: ObserverEvent::OnAdd,
                entity,
                component: id,
            });
        }
        self.observers.fire(ObserverTrigger {
            event: ObserverEvent::OnSet,
            entity,
            component: id,
        });
        Ok(())
    }

    /// Remove a component. Fires `OnRemove` before the data is dropped.
    pub fn remove_component(&mut self, entity: EntityId, id: ComponentId) -> Result<bool, WorldError> {
        self.check(entity, id)?;
        if !self.has_component(entity, id) {
            return Ok(false);
        }
        self.observers.fire(ObserverTrigger {
            event: ObserverEvent::OnRemove,
            entity,
            component: id,
        });
        Ok(self
            .columns
            .get_mut(&id)
            .is_some_and(|col| col.remove(entity.index())))
    }

    /// Raw bytes of a component, if the entity has it.
    pub fn component_bytes(&self, entity: EntityId, id: ComponentId) -> Option<&[u8]> {
        if !self.is_alive(entity) {
            return None;
        }
        self.columns.get(&id)?.get(entity.index())
    }

    /// Run `f` over every row of a component column in parallel, then fire
    /// `OnSet` for each touched entity.
    pub fn par_for_each_component_mut<F>(&mut self, id: ComponentId, f: F)
    where
        F: Fn(&mut [u8]) + Sync + Send,
    {
        let Some(col) = self.columns.get_mut(&id) else {
            return;
        };
        col.par_for_each_row_mut(f);
        let slots = col.entities().to_vec();
        for slot in slots {
            if let Some(entity) = self.entity_at_slot(slot) {
                self.observers.fire(ObserverTrigger {
                    event: ObserverEvent::OnSet,
                    entity,
                    component: id,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Install an observer for `event` on any of `components`.
    pub fn observe(
        &mut self,
        event: ObserverEvent,
        components: &[ComponentId],
        callback: ObserverCallback,
    ) -> ObserverId {
        self.observers.add(event, components, callback)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    pub fn strings(&self) -> &StringPool {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut StringPool {
        &mut self.strings
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Cursor, PrimitiveKind, Query};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: i32,
        y: i32,
    }

    fn position(world: &mut World) -> ComponentId {
        let layout = TypeDescriptor::structure("Position")
            .member("x", Arc::new(TypeDescriptor::primitive(PrimitiveKind::I32)))
            .member("y", Arc::new(TypeDescriptor::primitive(PrimitiveKind::I32)))
            .build();
        world
            .register_component("Position", 8, 4, Some(Arc::new(layout)))
            .unwrap()
    }

    fn put(world: &mut World, e: EntityId, pos: ComponentId, value: Position) {
        world.set_component(e, pos, bytemuck::bytes_of(&value)).unwrap();
    }

    #[test]
    fn despawn_invalidates_handle_and_reuses_slot() {
        let mut world = World::new();
        let e1 = world.spawn();
        assert!(world.despawn(e1));
        assert!(!world.is_alive(e1));
        assert!(!world.despawn(e1));

        let e2 = world.spawn();
        assert_eq!(e2.index(), e1.index());
        assert_ne!(e2.generation(), e1.generation());
        assert!(world.is_alive(e2));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn component_bytes_follow_the_layout() {
        let mut world = World::new();
        let pos = position(&mut world);
        let e = world.spawn();
        put(&mut world, e, pos, Position { x: 3, y: -4 });
        let bytes = world.component_bytes(e, pos).unwrap();
        assert_eq!(bytemuck::pod_read_unaligned::<Position>(bytes), Position { x: 3, y: -4 });

        let layout = world.component_info(pos).unwrap().layout.clone().unwrap();
        let mut cursor = Cursor::new(layout, bytes);
        cursor.push().unwrap();
        cursor.member("y").unwrap();
        assert_eq!(cursor.get_int().unwrap(), -4);
    }

    #[test]
    fn observers_fire_for_add_set_remove() {
        let mut world = World::new();
        let pos = position(&mut world);
        let log: Arc<Mutex<Vec<ObserverEvent>>> = Arc::default();

        for event in [ObserverEvent::OnAdd, ObserverEvent::OnSet, ObserverEvent::OnRemove] {
            let log = Arc::clone(&log);
            world.observe(event, &[pos], Arc::new(move |t| log.lock().unwrap().push(t.event)));
        }

        let e = world.spawn();
        put(&mut world, e, pos, Position { x: 1, y: 1 });
        put(&mut world, e, pos, Position { x: 2, y: 2 });
        world.despawn(e);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ObserverEvent::OnAdd,
                ObserverEvent::OnSet,
                ObserverEvent::OnSet,
                ObserverEvent::OnRemove
            ]
        );
    }

    #[test]
    fn removed_observer_stops_firing() {
        let mut world = World::new();
        let pos = position(&mut world);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = world.observe(
            ObserverEvent::OnSet,
            &[pos],
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let e = world.spawn();
        put(&mut world, e, pos, Position { x: 0, y: 0 });
        assert!(world.remove_observer(id));
        put(&mut world, e, pos, Position { x: 1, y: 0 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(world.observer_count(), 0);
    }

    #[test]
    fn raw_iteration_includes_bare_entities() {
        let mut world = World::new();
        let pos = position(&mut world);
        let bare = world.spawn();
        let e = world.spawn();
        put(&mut world, e, pos, Position { x: 0, y: 0 });

        let mut seen = Vec::new();
        world.each_raw_while(|entity| {
            seen.push(entity);
            true
        });
        assert_eq!(seen, vec![bare, e]);

        let mut first = Vec::new();
        world.each_raw_while(|entity| {
            first.push(entity);
            false
        });
        assert_eq!(first, vec![bare]);
        assert_eq!(Query::new([pos]).count(&world), 1);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut world = World::new();
        let pos = position(&mut world);
        let e = world.spawn();
        assert!(matches!(
            world.set_component(e, pos, &[0u8; 3]),
            Err(WorldError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn parallel_update_fires_on_set() {
        let mut world = World::new();
        let pos = position(&mut world);
        for i in 0..100 {
            let e = world.spawn();
            put(&mut world, e, pos, Position { x: i, y: 0 });
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        world.observe(
            ObserverEvent::OnSet,
            &[pos],
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        world.par_for_each_component_mut(pos, |row| {
            let mut p: Position = bytemuck::pod_read_unaligned(row);
            p.y = p.x * 2;
            row.copy_from_slice(bytemuck::bytes_of(&p));
        });
        assert_eq!(hits.load(Ordering::SeqCst), 100);
        let e = world.entity_at_slot(7).unwrap();
        let p: Position = bytemuck::pod_read_unaligned(world.component_bytes(e, pos).unwrap());
        assert_eq!(p, Position { x: 7, y: 14 });
    }
}
