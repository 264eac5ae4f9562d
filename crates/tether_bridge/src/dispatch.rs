// dispatch.rs - Script systems run once per frame against matching entities
//
// Systems live in a slot vector indexed by the native id behind their token.
// Each frame the scheduler orders running systems so that a system's
// dependency goes first, then hands each system the tokens of its matched
// entities. Change-only systems collect entities from observers between
// frames instead of matching the whole world.

use crate::error::BridgeError;
use crate::instrumentation::SystemStats;
use crate::query_cache::{CachingStrategy, QueryCache};
use crate::token::{Token, TokenKind};
use crate::world::BridgeWorld;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tether_core::ecs::{ComponentId, EntityId, ObserverEvent, ObserverId, World};

/// Callback invoked with the world, the matched entities and the frame delta
/// in seconds.
pub type SystemCallback = Box<dyn FnMut(&mut BridgeWorld, &[Token], f32) + Send>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// One invocation per matched entity.
    #[default]
    PerEntity,
    /// One invocation per flush with the matched set.
    Batch,
}

/// Summary of one `run`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub systems_run: usize,
    pub systems_paused: usize,
    /// Batch systems held back by their flush interval.
    pub systems_deferred: usize,
    pub invocations: usize,
    pub entities_dispatched: usize,
}

/// Listing entry for `DispatchScheduler::systems`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemInfo {
    pub token: Token,
    pub name: String,
    pub mode: DispatchMode,
    pub change_only: bool,
    pub paused: bool,
    pub depends_on: Option<Token>,
}

/// Entities changed since the last dispatch, first-change order.
#[derive(Default)]
struct PendingSet {
    order: Vec<EntityId>,
    seen: HashSet<EntityId>,
}

impl PendingSet {
    fn push(&mut self, entity: EntityId) {
        if self.seen.insert(entity) {
            self.order.push(entity);
        }
    }

    fn drain(&mut self) -> Vec<EntityId> {
        self.seen.clear();
        std::mem::take(&mut self.order)
    }
}

type SharedPending = Arc<Mutex<PendingSet>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, PendingSet> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ScriptSystem {
    token: Token,
    name: String,
    query: QueryCache,
    callback: SystemCallback,
    mode: DispatchMode,
    /// Entities per batch invocation; `0` sends the whole set at once.
    flush_size: usize,
    min_flush_interval: Duration,
    last_flush: Option<Instant>,
    change_only: bool,
    observe_add_and_set: bool,
    observe_remove: bool,
    observers: Vec<ObserverId>,
    pending: SharedPending,
    depends_on: Option<Token>,
    paused: bool,
    stats: SystemStats,
}

impl ScriptSystem {
    fn required(&self) -> Vec<ComponentId> {
        self.query.required().to_vec()
    }

    fn install_observers(&mut self, world: &mut World) {
        self.remove_observers(world);
        if !self.change_only {
            return;
        }
        let required = self.required();
        if required.is_empty() {
            tracing::warn!(system = %self.name, "change-only system has no components to observe");
            return;
        }

        let mut events = Vec::with_capacity(3);
        if self.observe_add_and_set {
            events.extend([ObserverEvent::OnAdd, ObserverEvent::OnSet]);
        }
        if self.observe_remove {
            events.push(ObserverEvent::OnRemove);
        }
        for event in events {
            let pending = Arc::clone(&self.pending);
            let id = world.observe(
                event,
                &required,
                Arc::new(move |trigger| lock(&pending).push(trigger.entity)),
            );
            self.observers.push(id);
        }
    }

    fn remove_observers(&mut self, world: &mut World) {
        for id in self.observers.drain(..) {
            world.remove_observer(id);
        }
    }

    fn flush_due(&self, now: Instant) -> bool {
        self.mode != DispatchMode::Batch
            || self.min_flush_interval.is_zero()
            || self
                .last_flush
                .map_or(true, |last| now.duration_since(last) >= self.min_flush_interval)
    }

    fn collect(&mut self, world: &BridgeWorld) -> Vec<Token> {
        let native = world.native();
        let entities: Vec<EntityId> = if self.change_only {
            lock(&self.pending)
                .drain()
                .into_iter()
                .filter(|&entity| native.is_alive(entity))
                .collect()
        } else {
            let mut matched = Vec::new();
            self.query.for_each_match_while(native, |entity| {
                matched.push(entity);
                true
            });
            matched
        };

        entities
            .into_iter()
            .filter_map(|entity| match world.entity_token(entity) {
                Ok(token) => Some(token),
                Err(err) => {
                    tracing::warn!(system = %self.name, %entity, %err, "skipping entity");
                    None
                }
            })
            .collect()
    }

    /// Returns the number of callback invocations.
    fn dispatch(&mut self, world: &mut BridgeWorld, tokens: &[Token], delta: f32) -> usize {
        if tokens.is_empty() {
            return 0;
        }
        let chunk = match self.mode {
            DispatchMode::PerEntity => 1,
            DispatchMode::Batch if self.flush_size == 0 => tokens.len(),
            DispatchMode::Batch => self.flush_size,
        };
        let mut invocations = 0;
        for batch in tokens.chunks(chunk) {
            let start = Instant::now();
            (self.callback)(world, batch, delta);
            self.stats.record_invocation(start.elapsed());
            invocations += 1;
        }
        invocations
    }
}

/// Per-world owner of script systems.
pub struct DispatchScheduler {
    systems: Vec<Option<ScriptSystem>>,
    free: Vec<usize>,
    sample_capacity: usize,
    instrument_by_default: bool,
}

impl DispatchScheduler {
    pub fn new(sample_capacity: usize, instrument_by_default: bool) -> Self {
        Self {
            systems: Vec::new(),
            free: Vec::new(),
            sample_capacity,
            instrument_by_default,
        }
    }

    pub fn len(&self) -> usize {
        self.systems.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, world: &BridgeWorld, token: Token) -> Result<usize, BridgeError> {
        let index = world.handles().validate(token, TokenKind::System)? as usize;
        match self.systems.get(index) {
            Some(Some(_)) => Ok(index),
            _ => Err(BridgeError::InvalidToken { token }),
        }
    }

    fn system_mut(&mut self, world: &BridgeWorld, token: Token) -> Result<&mut ScriptSystem, BridgeError> {
        let index = self.index(world, token)?;
        self.systems[index]
            .as_mut()
            .ok_or(BridgeError::InvalidToken { token })
    }

    fn system(&self, world: &BridgeWorld, token: Token) -> Result<&ScriptSystem, BridgeError> {
        let index = self.index(world, token)?;
        self.systems[index]
            .as_ref()
            .ok_or(BridgeError::InvalidToken { token })
    }

    /// Register a system over `components`; it runs every frame in
    /// `PerEntity` mode until configured otherwise.
    pub fn create_system(
        &mut self,
        world: &mut BridgeWorld,
        name: &str,
        components: &[&str],
        callback: SystemCallback,
    ) -> Result<Token, BridgeError> {
        let required = world.component_ids(components)?;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.systems.push(None);
                self.systems.len() - 1
            }
        };
        let token = match world.handles().mint(TokenKind::System, index as u64) {
            Ok(token) => token,
            Err(err) => {
                self.free.push(index);
                return Err(err);
            }
        };

        let query = QueryCache::new(world.native_mut(), &required, CachingStrategy::NoCache);
        self.systems[index] = Some(ScriptSystem {
            token,
            name: name.to_string(),
            query,
            callback,
            mode: DispatchMode::PerEntity,
            flush_size: 0,
            min_flush_interval: Duration::ZERO,
            last_flush: None,
            change_only: false,
            observe_add_and_set: true,
            observe_remove: false,
            observers: Vec::new(),
            pending: SharedPending::default(),
            depends_on: None,
            paused: false,
            stats: SystemStats::new(self.sample_capacity, self.instrument_by_default),
        });
        tracing::debug!(world = world.id(), system = name, %token, "script system created");
        Ok(token)
    }

    pub fn free_system(&mut self, world: &mut BridgeWorld, token: Token) -> Result<(), BridgeError> {
        let index = self.index(world, token)?;
        if let Some(mut system) = self.systems[index].take() {
            system.remove_observers(world.native_mut());
            system.query.release(world.native_mut());
            tracing::debug!(world = world.id(), system = %system.name, "script system freed");
        }
        world.handles().free(token);
        self.free.push(index);
        Ok(())
    }

    pub fn set_dispatch_mode(&mut self, world: &BridgeWorld, token: Token, mode: DispatchMode) -> Result<(), BridgeError> {
        self.system_mut(world, token)?.mode = mode;
        Ok(())
    }

    /// Switch between every-frame matching and observer-driven change sets.
    pub fn set_change_only(&mut self, world: &mut BridgeWorld, token: Token, enabled: bool) -> Result<(), BridgeError> {
        let system = self.system_mut(world, token)?;
        if system.change_only == enabled {
            return Ok(());
        }
        system.change_only = enabled;
        lock(&system.pending).drain();
        system.install_observers(world.native_mut());
        Ok(())
    }

    pub fn set_observe_add_and_set(
        &mut self,
        world: &mut BridgeWorld,
        token: Token,
        enabled: bool,
    ) -> Result<(), BridgeError> {
        let system = self.system_mut(world, token)?;
        system.observe_add_and_set = enabled;
        system.install_observers(world.native_mut());
        Ok(())
    }

    pub fn set_observe_remove(&mut self, world: &mut BridgeWorld, token: Token, enabled: bool) -> Result<(), BridgeError> {
        let system = self.system_mut(world, token)?;
        system.observe_remove = enabled;
        system.install_observers(world.native_mut());
        Ok(())
    }

    /// Batch chunking and rate limiting. A zero `flush_size` sends the whole
    /// set; a zero interval flushes every frame.
    pub fn set_batch_flush(
        &mut self,
        world: &BridgeWorld,
        token: Token,
        flush_size: usize,
        min_flush_interval: Duration,
    ) -> Result<(), BridgeError> {
        let system = self.system_mut(world, token)?;
        system.flush_size = flush_size;
        system.min_flush_interval = min_flush_interval;
        Ok(())
    }

    /// Run after `dependency` within a frame; `None` clears it.
    pub fn set_dependency(
        &mut self,
        world: &BridgeWorld,
        token: Token,
        dependency: Option<Token>,
    ) -> Result<(), BridgeError> {
        if let Some(dependency) = dependency {
            self.index(world, dependency)?;
        }
        self.system_mut(world, token)?.depends_on = dependency;
        Ok(())
    }

    pub fn set_paused(&mut self, world: &BridgeWorld, token: Token, paused: bool) -> Result<(), BridgeError> {
        self.system_mut(world, token)?.paused = paused;
        Ok(())
    }

    pub fn set_instrumentation(&mut self, world: &BridgeWorld, token: Token, enabled: bool) -> Result<(), BridgeError> {
        self.system_mut(world, token)?.stats.enabled = enabled;
        Ok(())
    }

    pub fn set_detailed_timing(&mut self, world: &BridgeWorld, token: Token, enabled: bool) -> Result<(), BridgeError> {
        self.system_mut(world, token)?.stats.detailed = enabled;
        Ok(())
    }

    pub fn stats(&self, world: &BridgeWorld, token: Token) -> Result<SystemStats, BridgeError> {
        Ok(self.system(world, token)?.stats.clone())
    }

    pub fn reset_instrumentation(&mut self, world: &BridgeWorld, token: Token) -> Result<(), BridgeError> {
        self.system_mut(world, token)?.stats.reset();
        Ok(())
    }

    /// Live systems in registration slot order.
    pub fn systems(&self) -> Vec<SystemInfo> {
        self.systems
            .iter()
            .flatten()
            .map(|system| SystemInfo {
                token: system.token,
                name: system.name.clone(),
                mode: system.mode,
                change_only: system.change_only,
                paused: system.paused,
                depends_on: system.depends_on,
            })
            .collect()
    }

    /// Slot indices in dispatch order. Each system follows its dependency;
    /// ties keep slot order. Cycles and dangling dependencies fall back to
    /// slot order.
    fn order(&self, world: &BridgeWorld) -> Vec<usize> {
        let live: Vec<usize> = (0..self.systems.len())
            .filter(|&i| self.systems[i].is_some())
            .collect();
        let mut dependency = vec![None; self.systems.len()];
        for &i in &live {
            let Some(system) = &self.systems[i] else {
                continue;
            };
            let Some(dep) = system.depends_on else {
                continue;
            };
            match self.index(world, dep) {
                Ok(d) if d != i => dependency[i] = Some(d),
                _ => {
                    tracing::warn!(system = %system.name, dependency = %dep, "ignoring unusable dependency");
                }
            }
        }

        let mut placed = vec![false; self.systems.len()];
        let mut order = Vec::with_capacity(live.len());
        loop {
            let before = order.len();
            for &i in &live {
                if !placed[i] && dependency[i].map_or(true, |d| placed[d]) {
                    placed[i] = true;
                    order.push(i);
                }
            }
            if order.len() == live.len() {
                break;
            }
            if order.len() == before {
                tracing::warn!(remaining = live.len() - order.len(), "dependency cycle, using registration order");
                order.extend(live.iter().copied().filter(|&i| !placed[i]));
                break;
            }
        }
        order
    }

    /// Dispatch every running system once.
    pub fn run(&mut self, world: &mut BridgeWorld, delta: f32) -> FrameReport {
        let mut report = FrameReport::default();
        for index in self.order(world) {
            let Some(system) = self.systems[index].as_mut() else {
                continue;
            };
            if system.paused {
                report.systems_paused += 1;
                continue;
            }
            let now = Instant::now();
            if !system.flush_due(now) {
                report.systems_deferred += 1;
                continue;
            }

            let start = Instant::now();
            let tokens = system.collect(world);
            let invocations = system.dispatch(world, &tokens, delta);
            if system.mode == DispatchMode::Batch && invocations > 0 {
                system.last_flush = Some(now);
            }
            system.stats.record_frame(tokens.len(), start.elapsed());

            report.systems_run += 1;
            report.invocations += invocations;
            report.entities_dispatched += tokens.len();
        }
        report
    }

    /// Free every system, removing its observers.
    pub fn clear(&mut self, world: &mut BridgeWorld) {
        for slot in &mut self.systems {
            if let Some(mut system) = slot.take() {
                system.remove_observers(world.native_mut());
                system.query.release(world.native_mut());
                world.handles().free(system.token);
            }
        }
        self.systems.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{self, SceneNodeComponent, Transform2DComponent};
    use crate::config::BridgeConfig;
    use crate::meta::{ComponentMetaRegistry, ComponentType};
    use crate::value::Value;

    fn world() -> BridgeWorld {
        let registry = ComponentMetaRegistry::new();
        components::register_all(&registry).unwrap();
        BridgeWorld::new(2, &BridgeConfig::default(), &registry).unwrap()
    }

    fn spawn(world: &mut BridgeWorld, n: usize) -> Vec<Token> {
        (0..n)
            .map(|_| {
                let e = world.create_entity().unwrap();
                world.add_component(e, Transform2DComponent::NAME, &Value::map()).unwrap();
                e
            })
            .collect()
    }

    type Log = Arc<Mutex<Vec<Vec<Token>>>>;

    fn recorder(log: &Log) -> SystemCallback {
        let log = Arc::clone(log);
        Box::new(move |_: &mut BridgeWorld, tokens: &[Token], _: f32| {
            log.lock().unwrap().push(tokens.to_vec())
        })
    }

    #[test]
    fn test_per_entity_and_batch() {
        let mut world = world();
        let entities = spawn(&mut world, 5);
        let mut scheduler = DispatchScheduler::new(16, false);
        let log = Log::default();
        let system = scheduler
            .create_system(&mut world, "move", &[Transform2DComponent::NAME], recorder(&log))
            .unwrap();

        let report = scheduler.run(&mut world, 0.016);
        assert_eq!(report.invocations, 5);
        assert_eq!(report.entities_dispatched, 5);
        assert!(log.lock().unwrap().iter().all(|call| call.len() == 1));

        log.lock().unwrap().clear();
        scheduler.set_dispatch_mode(&world, system, DispatchMode::Batch).unwrap();
        scheduler.set_batch_flush(&world, system, 2, Duration::ZERO).unwrap();
        let report = scheduler.run(&mut world, 0.016);
        assert_eq!(report.invocations, 3);
        let calls = log.lock().unwrap().clone();
        assert_eq!(calls.concat(), entities);
        assert_eq!(calls.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn test_flush_interval_defers() {
        let mut world = world();
        spawn(&mut world, 3);
        let mut scheduler = DispatchScheduler::new(16, false);
        let log = Log::default();
        let system = scheduler
            .create_system(&mut world, "batch", &[Transform2DComponent::NAME], recorder(&log))
            .unwrap();
        scheduler.set_dispatch_mode(&world, system, DispatchMode::Batch).unwrap();
        scheduler.set_batch_flush(&world, system, 0, Duration::from_secs(3600)).unwrap();

        assert_eq!(scheduler.run(&mut world, 0.0).invocations, 1);
        let report = scheduler.run(&mut world, 0.0);
        assert_eq!(report.systems_deferred, 1);
        assert_eq!(report.invocations, 0);
    }

    #[test]
    fn test_change_only_reports_changed_entities_once() {
        let mut world = world();
        let entities = spawn(&mut world, 4);
        let mut scheduler = DispatchScheduler::new(16, false);
        let log = Log::default();
        let system = scheduler
            .create_system(&mut world, "changes", &[Transform2DComponent::NAME], recorder(&log))
            .unwrap();
        scheduler.set_dispatch_mode(&world, system, DispatchMode::Batch).unwrap();
        scheduler.set_change_only(&mut world, system, true).unwrap();

        assert_eq!(scheduler.run(&mut world, 0.0).invocations, 0);

        world.set_component(entities[2], Transform2DComponent::NAME, &Value::map()).unwrap();
        world.set_component(entities[2], Transform2DComponent::NAME, &Value::map()).unwrap();
        world.set_component(entities[0], Transform2DComponent::NAME, &Value::map()).unwrap();
        scheduler.run(&mut world, 0.0);
        assert_eq!(log.lock().unwrap().last().unwrap(), &vec![entities[2], entities[0]]);

        log.lock().unwrap().clear();
        assert_eq!(scheduler.run(&mut world, 0.0).invocations, 0);
    }

    #[test]
    fn test_change_only_remove_toggle() {
        let mut world = world();
        let entities = spawn(&mut world, 2);
        let mut scheduler = DispatchScheduler::new(16, false);
        let log = Log::default();
        let system = scheduler
            .create_system(&mut world, "removals", &[Transform2DComponent::NAME], recorder(&log))
            .unwrap();
        scheduler.set_change_only(&mut world, system, true).unwrap();
        scheduler.set_observe_add_and_set(&mut world, system, false).unwrap();
        scheduler.set_observe_remove(&mut world, system, true).unwrap();

        world.set_component(entities[0], Transform2DComponent::NAME, &Value::map()).unwrap();
        world.remove_component(entities[1], Transform2DComponent::NAME).unwrap();
        world.destroy_entity(entities[0]).unwrap();
        scheduler.run(&mut world, 0.0);
        // entities[0] fired OnRemove on destroy but is gone by dispatch time.
        assert_eq!(log.lock().unwrap().concat(), vec![entities[1]]);
    }

    #[test]
    fn test_dependency_order_and_pause() {
        let mut world = world();
        spawn(&mut world, 1);
        let mut scheduler = DispatchScheduler::new(16, false);
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut make = |name: &'static str| {
            let order = Arc::clone(&order);
            scheduler
                .create_system(
                    &mut world,
                    name,
                    &[Transform2DComponent::NAME],
                    Box::new(move |_, _, _| order.lock().unwrap().push(name)),
                )
                .unwrap()
        };
        let render = make("render");
        let physics = make("physics");
        let input = make("input");
        scheduler.set_dependency(&world, render, Some(physics)).unwrap();
        scheduler.set_dependency(&world, physics, Some(input)).unwrap();

        scheduler.run(&mut world, 0.0);
        assert_eq!(*order.lock().unwrap(), vec!["input", "physics", "render"]);

        order.lock().unwrap().clear();
        scheduler.set_paused(&world, physics, true).unwrap();
        let report = scheduler.run(&mut world, 0.0);
        assert_eq!(report.systems_paused, 1);
        assert_eq!(*order.lock().unwrap(), vec!["input", "render"]);
    }

    #[test]
    fn test_cycle_falls_back_to_registration_order() {
        let mut world = world();
        spawn(&mut world, 1);
        let mut scheduler = DispatchScheduler::new(16, false);
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let mut make = |name: &'static str| {
            let order = Arc::clone(&order);
            scheduler
                .create_system(
                    &mut world,
                    name,
                    &[Transform2DComponent::NAME],
                    Box::new(move |_, _, _| order.lock().unwrap().push(name)),
                )
                .unwrap()
        };
        let a = make("a");
        let b = make("b");
        scheduler.set_dependency(&world, a, Some(b)).unwrap();
        scheduler.set_dependency(&world, b, Some(a)).unwrap();
        scheduler.run(&mut world, 0.0);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_instrumentation() {
        let mut world = world();
        spawn(&mut world, 3);
        let mut scheduler = DispatchScheduler::new(4, false);
        let system = scheduler
            .create_system(&mut world, "timed", &[Transform2DComponent::NAME], Box::new(|_, _, _| {}))
            .unwrap();
        scheduler.run(&mut world, 0.0);
        assert_eq!(scheduler.stats(&world, system).unwrap().invocations, 0);

        scheduler.set_instrumentation(&world, system, true).unwrap();
        scheduler.set_detailed_timing(&world, system, true).unwrap();
        scheduler.run(&mut world, 0.0);
        scheduler.run(&mut world, 0.0);
        let stats = scheduler.stats(&world, system).unwrap();
        assert_eq!(stats.invocations, 6);
        assert_eq!(stats.last_entity_count, 3);
        assert_eq!(stats.sample_count(), 4);

        scheduler.reset_instrumentation(&world, system).unwrap();
        let stats = scheduler.stats(&world, system).unwrap();
        assert_eq!(stats.invocations, 0);
        assert_eq!(stats.sample_count(), 0);
    }

    #[test]
    fn test_callback_writes_through_world() {
        let mut world = world();
        let e = world.create_entity().unwrap();
        world.add_component(e, SceneNodeComponent::NAME, &Value::map()).unwrap();
        let mut scheduler = DispatchScheduler::new(16, false);
        scheduler
            .create_system(
                &mut world,
                "tag",
                &[SceneNodeComponent::NAME],
                Box::new(|world: &mut BridgeWorld, tokens: &[Token], _: f32| {
                    for &token in tokens {
                        let value: Value = [("class_name", Value::StringName("Sprite2D".into()))]
                            .into_iter()
                            .collect();
                        world.set_component(token, SceneNodeComponent::NAME, &value).unwrap();
                    }
                }),
            )
            .unwrap();
        scheduler.run(&mut world, 0.0);
        let value = world.get_component(e, SceneNodeComponent::NAME).unwrap();
        assert_eq!(value.get("class_name"), Some(&Value::StringName("Sprite2D".into())));
    }

    #[test]
    fn test_free_and_clear() {
        let mut world = world();
        let mut scheduler = DispatchScheduler::new(16, false);
        let a = scheduler
            .create_system(&mut world, "a", &[Transform2DComponent::NAME], Box::new(|_, _, _| {}))
            .unwrap();
        scheduler.set_change_only(&mut world, a, true).unwrap();
        assert_eq!(world.native().observer_count(), 2);
        scheduler.free_system(&mut world, a).unwrap();
        assert_eq!(world.native().observer_count(), 0);
        assert!(scheduler.stats(&world, a).is_err());

        scheduler
            .create_system(&mut world, "b", &[], Box::new(|_, _, _| {}))
            .unwrap();
        assert_eq!(scheduler.systems().len(), 1);
        scheduler.clear(&mut world);
        assert!(scheduler.is_empty());
        assert_eq!(world.handles().live_count(TokenKind::System), 0);
    }
}
