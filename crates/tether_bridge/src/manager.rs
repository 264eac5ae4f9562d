// manager.rs - Process-level owner of every bridged world
//
// The manager is the boundary the dynamic value layer calls into. Every
// operation takes a world token first, runs against that world under its
// own mutex, and turns failures into a logged benign default (`Token::INVALID`,
// `false`, an empty map or an empty list). `with_world` is the one entry
// point that hands errors back to the caller.
//
// Lock order: the world table lock is released before a world mutex is
// taken, and is only write-locked to create or destroy a world.

use crate::components;
use crate::config::BridgeConfig;
use crate::dispatch::{DispatchMode, DispatchScheduler, FrameReport, SystemCallback, SystemInfo};
use crate::error::{BridgeError, MetaError};
use crate::handles::HandleRegistry;
use crate::instrumentation::SystemStats;
use crate::meta::{ComponentMetaRegistry, ComponentType};
use crate::query_cache::{CachingStrategy, EntityRecord, QueryStats};
use crate::token::{Token, TokenKind, MAX_WORLD_ID};
use crate::value::Value;
use crate::world::{BridgeWorld, QueryDescriptor};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

struct WorldSlot {
    world: BridgeWorld,
    scheduler: DispatchScheduler,
}

struct WorldEntry {
    generation: u16,
    slot: Arc<Mutex<WorldSlot>>,
}

/// A destroyed world id waiting to be reused.
struct FreeWorld {
    id: u16,
    generation: u16,
    handles: HandleRegistry,
}

struct WorldTable {
    slots: HashMap<u16, WorldEntry>,
    /// Destroyed ids, reused oldest-first under the next generation. Each
    /// keeps its torn-down handle registry so entity and query tokens from
    /// earlier incarnations stay invalid.
    free: VecDeque<FreeWorld>,
    /// Next never-used id.
    next_id: u16,
}

pub struct WorldManager {
    config: BridgeConfig,
    registry: Arc<ComponentMetaRegistry>,
    worlds: RwLock<WorldTable>,
}

fn lock_slot(slot: &Mutex<WorldSlot>) -> MutexGuard<'_, WorldSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorldManager {
    /// Manager with every built-in component type registered.
    pub fn new(config: BridgeConfig) -> Result<Self, MetaError> {
        let registry = ComponentMetaRegistry::new();
        components::register_all(&registry)?;
        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    /// Manager over a caller-populated registry.
    pub fn with_registry(config: BridgeConfig, registry: Arc<ComponentMetaRegistry>) -> Self {
        Self {
            config,
            registry,
            worlds: RwLock::new(WorldTable {
                slots: HashMap::new(),
                free: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Types registered here are bound to worlds created afterwards.
    pub fn registry(&self) -> &Arc<ComponentMetaRegistry> {
        &self.registry
    }

    fn slot(&self, world: Token) -> Result<Arc<Mutex<WorldSlot>>, BridgeError> {
        if world.kind() != TokenKind::World {
            return Err(BridgeError::WrongKind {
                token: world,
                expected: TokenKind::World,
            });
        }
        let table = self.worlds.read().unwrap_or_else(PoisonError::into_inner);
        table
            .slots
            .get(&world.world_id())
            .filter(|entry| entry.generation == world.generation())
            .map(|entry| Arc::clone(&entry.slot))
            .ok_or(BridgeError::WorldNotFound { world })
    }

    /// Run `f` against a world and its scheduler.
    pub fn with_world<R>(
        &self,
        world: Token,
        f: impl FnOnce(&mut BridgeWorld, &mut DispatchScheduler) -> R,
    ) -> Result<R, BridgeError> {
        let slot = self.slot(world)?;
        let mut guard = lock_slot(&slot);
        let WorldSlot { world, scheduler } = &mut *guard;
        Ok(f(world, scheduler))
    }

    fn call<R>(
        &self,
        op: &'static str,
        world: Token,
        f: impl FnOnce(&mut BridgeWorld, &mut DispatchScheduler) -> Result<R, BridgeError>,
    ) -> Option<R> {
        match self.with_world(world, f).and_then(|result| result) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(op, %world, %err, "bridge call failed");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Worlds
    // ------------------------------------------------------------------

    pub fn create_world(&self) -> Token {
        let mut table = self.worlds.write().unwrap_or_else(PoisonError::into_inner);
        if table.slots.len() >= self.config.max_worlds as usize {
            tracing::warn!(max = self.config.max_worlds, "world limit reached");
            return Token::INVALID;
        }

        let built = if let Some(free) = table.free.pop_front() {
            let FreeWorld { id, generation, handles } = free;
            (id, generation, BridgeWorld::recycled(id, generation, handles, &self.config, &self.registry))
        } else if table.next_id <= MAX_WORLD_ID {
            let id = table.next_id;
            table.next_id += 1;
            (id, 0, BridgeWorld::new(id, &self.config, &self.registry))
        } else {
            tracing::warn!("world ids exhausted");
            return Token::INVALID;
        };
        let (id, generation, world) = match built {
            (id, generation, Ok(world)) => (id, generation, world),
            (id, generation, Err(err)) => {
                tracing::warn!(world = id, generation, %err, "failed to create world");
                return Token::INVALID;
            }
        };

        let token = world.token();
        let scheduler = DispatchScheduler::new(
            self.config.instrumentation.sample_capacity,
            self.config.instrumentation.enabled_by_default,
        );
        table.slots.insert(
            id,
            WorldEntry {
                generation,
                slot: Arc::new(Mutex::new(WorldSlot { world, scheduler })),
            },
        );
        token
    }

    /// Destroy a world, invalidating every token it minted.
    pub fn destroy_world(&self, world: Token) -> bool {
        if world.kind() != TokenKind::World {
            tracing::warn!(%world, "destroy_world called with a non-world token");
            return false;
        }
        let removed = {
            let mut table = self.worlds.write().unwrap_or_else(PoisonError::into_inner);
            let current = table
                .slots
                .get(&world.world_id())
                .is_some_and(|entry| entry.generation == world.generation());
            if current {
                table.slots.remove(&world.world_id())
            } else {
                None
            }
        };
        let Some(entry) = removed else {
            tracing::warn!(%world, "destroy_world: no such world");
            return false;
        };

        let handles = {
            let mut guard = lock_slot(&entry.slot);
            let WorldSlot { world: bridged, scheduler } = &mut *guard;
            scheduler.clear(bridged);
            bridged.teardown();
            bridged.take_handles(&self.config)
        };

        if entry.generation == u16::MAX {
            tracing::debug!(%world, "retiring world id with exhausted generation");
        } else {
            let mut table = self.worlds.write().unwrap_or_else(PoisonError::into_inner);
            table.free.push_back(FreeWorld {
                id: world.world_id(),
                generation: entry.generation + 1,
                handles,
            });
        }
        tracing::debug!(%world, "world destroyed");
        true
    }

    pub fn world_exists(&self, world: Token) -> bool {
        self.slot(world).is_ok()
    }

    pub fn world_count(&self) -> usize {
        self.worlds.read().unwrap_or_else(PoisonError::into_inner).slots.len()
    }

    /// Tokens of every live world, ascending by id.
    pub fn worlds(&self) -> Vec<Token> {
        let table = self.worlds.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<(u16, u16)> = table
            .slots
            .iter()
            .map(|(&id, entry)| (id, entry.generation))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(id, generation)| Token::world(id, generation)).collect()
    }

    /// Run one frame of script systems.
    pub fn progress_world(&self, world: Token, delta: f32) -> FrameReport {
        self.call("progress_world", world, |world, scheduler| Ok(scheduler.run(world, delta)))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    pub fn create_entity(&self, world: Token) -> Token {
        self.call("create_entity", world, |w, _| w.create_entity())
            .unwrap_or(Token::INVALID)
    }

    pub fn create_entity_with_name(&self, world: Token, name: &str) -> Token {
        self.call("create_entity_with_name", world, |w, _| w.create_entity_with_name(name))
            .unwrap_or(Token::INVALID)
    }

    pub fn destroy_entity(&self, world: Token, entity: Token) -> bool {
        self.call("destroy_entity", world, |w, _| w.destroy_entity(entity))
            .is_some()
    }

    pub fn entity_exists(&self, world: Token, entity: Token) -> bool {
        self.with_world(world, |w, _| w.entity_exists(entity))
            .unwrap_or(false)
    }

    pub fn set_entity_name(&self, world: Token, entity: Token, name: Option<&str>) -> bool {
        self.call("set_entity_name", world, |w, _| w.set_entity_name(entity, name))
            .is_some()
    }

    pub fn get_entity_name(&self, world: Token, entity: Token) -> Option<String> {
        self.call("get_entity_name", world, |w, _| w.entity_name(entity))
            .flatten()
    }

    pub fn entity_count(&self, world: Token) -> usize {
        self.call("entity_count", world, |w, _| Ok(w.entity_count()))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn add_component(&self, world: Token, entity: Token, name: &str, value: &Value) -> bool {
        self.call("add_component", world, |w, _| w.add_component(entity, name, value))
            .is_some()
    }

    pub fn set_component(&self, world: Token, entity: Token, name: &str, value: &Value) -> bool {
        self.call("set_component", world, |w, _| w.set_component(entity, name, value))
            .is_some()
    }

    /// Component value, or an empty map on any failure.
    pub fn get_component(&self, world: Token, entity: Token, name: &str) -> Value {
        self.call("get_component", world, |w, _| w.get_component(entity, name))
            .unwrap_or_else(Value::map)
    }

    pub fn has_component(&self, world: Token, entity: Token, name: &str) -> bool {
        self.call("has_component", world, |w, _| w.has_component(entity, name))
            .unwrap_or(false)
    }

    pub fn remove_component(&self, world: Token, entity: Token, name: &str) -> bool {
        self.call("remove_component", world, |w, _| w.remove_component(entity, name))
            .unwrap_or(false)
    }

    /// Parallel in-place update of every `T` row; returns rows touched.
    pub fn update_components<T, F>(&self, world: Token, f: F) -> usize
    where
        T: ComponentType,
        F: Fn(&mut T) + Send + Sync,
    {
        self.call("update_components", world, |w, _| w.update_components::<T, F>(f))
            .unwrap_or(0)
    }

    pub fn component_names(&self, world: Token, entity: Token) -> Vec<String> {
        self.call("component_names", world, |w, _| w.component_names(entity))
            .unwrap_or_default()
    }

    pub fn get_component_type(&self, world: Token, name: &str) -> Token {
        self.call("get_component_type", world, |w, _| w.component_type(name))
            .unwrap_or(Token::INVALID)
    }

    pub fn register_script_component(&self, world: Token, name: &str, fields: &[(String, String)]) -> Token {
        self.call("register_script_component", world, |w, _| w.register_script_component(name, fields))
            .unwrap_or(Token::INVALID)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn create_query(&self, world: Token, components: &[&str]) -> Token {
        self.call("create_query", world, |w, _| w.create_query(components))
            .unwrap_or(Token::INVALID)
    }

    pub fn free_query(&self, world: Token, query: Token) -> bool {
        self.call("free_query", world, |w, _| w.free_query(query))
            .is_some()
    }

    pub fn query_set_required_components(&self, world: Token, query: Token, components: &[&str]) -> bool {
        self.call("query_set_required_components", world, |w, _| {
            w.query_set_required_components(query, components)
        })
        .is_some()
    }

    pub fn query_set_caching_strategy(&self, world: Token, query: Token, strategy: CachingStrategy) -> bool {
        self.call("query_set_caching_strategy", world, |w, _| {
            w.query_set_caching_strategy(query, strategy)
        })
        .is_some()
    }

    pub fn query_set_name_filter(&self, world: Token, query: Token, pattern: Option<&str>) -> bool {
        self.call("query_set_name_filter", world, |w, _| w.query_set_name_filter(query, pattern))
            .is_some()
    }

    pub fn query_force_cache_refresh(&self, world: Token, query: Token) -> bool {
        self.call("query_force_cache_refresh", world, |w, _| w.query_force_cache_refresh(query))
            .is_some()
    }

    pub fn query_get_entities(&self, world: Token, query: Token) -> Vec<Token> {
        self.call("query_get_entities", world, |w, _| w.query_get_entities(query))
            .unwrap_or_default()
    }

    pub fn query_get_entities_with_components(&self, world: Token, query: Token) -> Vec<EntityRecord> {
        self.call("query_get_entities_with_components", world, |w, _| {
            w.query_get_entities_with_components(query)
        })
        .unwrap_or_default()
    }

    pub fn query_get_entity_count(&self, world: Token, query: Token) -> usize {
        self.call("query_get_entity_count", world, |w, _| w.query_get_entity_count(query))
            .unwrap_or(0)
    }

    pub fn query_get_entities_limited(&self, world: Token, query: Token, max: usize, offset: usize) -> Vec<Token> {
        self.call("query_get_entities_limited", world, |w, _| {
            w.query_get_entities_limited(query, max, offset)
        })
        .unwrap_or_default()
    }

    pub fn query_get_entities_with_components_limited(
        &self,
        world: Token,
        query: Token,
        max: usize,
        offset: usize,
    ) -> Vec<EntityRecord> {
        self.call("query_get_entities_with_components_limited", world, |w, _| {
            w.query_get_entities_with_components_limited(query, max, offset)
        })
        .unwrap_or_default()
    }

    pub fn query_stats(&self, world: Token, query: Token) -> QueryStats {
        self.call("query_stats", world, |w, _| w.query_stats(query))
            .unwrap_or_default()
    }

    pub fn query_reset_stats(&self, world: Token, query: Token) -> bool {
        self.call("query_reset_stats", world, |w, _| w.query_reset_stats(query))
            .is_some()
    }

    pub fn query_descriptor(&self, world: Token, query: Token) -> Option<QueryDescriptor> {
        self.call("query_descriptor", world, |w, _| w.query_descriptor(query))
    }

    // ------------------------------------------------------------------
    // Script systems
    // ------------------------------------------------------------------

    pub fn create_script_system(
        &self,
        world: Token,
        name: &str,
        components: &[&str],
        callback: SystemCallback,
    ) -> Token {
        self.call("create_script_system", world, |w, s| s.create_system(w, name, components, callback))
            .unwrap_or(Token::INVALID)
    }

    pub fn free_system(&self, world: Token, system: Token) -> bool {
        self.call("free_system", world, |w, s| s.free_system(w, system))
            .is_some()
    }

    pub fn system_set_dispatch_mode(&self, world: Token, system: Token, mode: DispatchMode) -> bool {
        self.call("system_set_dispatch_mode", world, |w, s| s.set_dispatch_mode(w, system, mode))
            .is_some()
    }

    pub fn system_set_change_only(&self, world: Token, system: Token, enabled: bool) -> bool {
        self.call("system_set_change_only", world, |w, s| s.set_change_only(w, system, enabled))
            .is_some()
    }

    pub fn system_set_observe_add_and_set(&self, world: Token, system: Token, enabled: bool) -> bool {
        self.call("system_set_observe_add_and_set", world, |w, s| {
            s.set_observe_add_and_set(w, system, enabled)
        })
        .is_some()
    }

    pub fn system_set_observe_remove(&self, world: Token, system: Token, enabled: bool) -> bool {
        self.call("system_set_observe_remove", world, |w, s| s.set_observe_remove(w, system, enabled))
            .is_some()
    }

    pub fn system_set_batch_flush(
        &self,
        world: Token,
        system: Token,
        flush_size: usize,
        min_flush_interval: Duration,
    ) -> bool {
        self.call("system_set_batch_flush", world, |w, s| {
            s.set_batch_flush(w, system, flush_size, min_flush_interval)
        })
        .is_some()
    }

    pub fn system_set_dependency(&self, world: Token, system: Token, dependency: Option<Token>) -> bool {
        self.call("system_set_dependency", world, |w, s| s.set_dependency(w, system, dependency))
            .is_some()
    }

    pub fn system_set_paused(&self, world: Token, system: Token, paused: bool) -> bool {
        self.call("system_set_paused", world, |w, s| s.set_paused(w, system, paused))
            .is_some()
    }

    pub fn system_set_instrumentation(&self, world: Token, system: Token, enabled: bool) -> bool {
        self.call("system_set_instrumentation", world, |w, s| s.set_instrumentation(w, system, enabled))
            .is_some()
    }

    pub fn system_set_detailed_timing(&self, world: Token, system: Token, enabled: bool) -> bool {
        self.call("system_set_detailed_timing", world, |w, s| s.set_detailed_timing(w, system, enabled))
            .is_some()
    }

    pub fn system_stats(&self, world: Token, system: Token) -> Option<SystemStats> {
        self.call("system_stats", world, |w, s| s.stats(w, system))
    }

    pub fn system_reset_instrumentation(&self, world: Token, system: Token) -> bool {
        self.call("system_reset_instrumentation", world, |w, s| s.reset_instrumentation(w, system))
            .is_some()
    }

    pub fn systems(&self, world: Token) -> Vec<SystemInfo> {
        self.call("systems", world, |_, s| Ok(s.systems()))
            .unwrap_or_default()
    }
}
