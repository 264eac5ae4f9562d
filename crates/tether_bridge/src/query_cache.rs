// query_cache.rs - Cached query results kept coherent by change observers
//
// A cached query installs OnAdd/OnSet/OnRemove observers over its required
// components. The observers only flip a shared dirty flag; the next read
// sees the flag, drops the cached arrays and re-executes. Reads never serve
// cached data while the flag is set.

use crate::token::Token;
use crate::value::Dictionary;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::ecs::{ComponentId, EntityId, ObserverEvent, ObserverId, Query, World};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachingStrategy {
    /// Re-execute on every read.
    NoCache,
    /// Cache matched entity tokens.
    #[default]
    CacheEntities,
    /// Cache entity tokens and their component values.
    CacheFull,
}

/// Entity-name filter: `"Prefix*"` or an exact name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameFilter {
    Exact(String),
    Prefix(String),
}

impl NameFilter {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => NameFilter::Prefix(prefix.to_string()),
            None => NameFilter::Exact(pattern.to_string()),
        }
    }

    /// Unnamed entities never match.
    pub fn matches(&self, name: Option<&str>) -> bool {
        match (self, name) {
            (NameFilter::Exact(exact), Some(name)) => name == exact,
            (NameFilter::Prefix(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (_, None) => false,
        }
    }

    pub fn pattern(&self) -> String {
        match self {
            NameFilter::Exact(exact) => exact.clone(),
            NameFilter::Prefix(prefix) => format!("{prefix}*"),
        }
    }
}

/// One entity with all of its marshalled components, keyed by component name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity: Token,
    pub components: Dictionary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QueryStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub last_fetch_time: Duration,
    pub last_result_count: usize,
}

pub struct QueryCache {
    query: Query,
    name_filter: Option<NameFilter>,
    strategy: CachingStrategy,
    dirty: Arc<AtomicBool>,
    observers: Vec<ObserverId>,
    entities: Option<Vec<Token>>,
    full: Option<Vec<EntityRecord>>,
    stats: QueryStats,
}

impl QueryCache {
    pub fn new(world: &mut World, required: &[ComponentId], strategy: CachingStrategy) -> Self {
        let mut cache = Self {
            query: Query::new(required.iter().copied()),
            name_filter: None,
            strategy,
            dirty: Arc::new(AtomicBool::new(true)),
            observers: Vec::new(),
            entities: None,
            full: None,
            stats: QueryStats::default(),
        };
        cache.install_observers(world);
        cache
    }

    pub fn required(&self) -> &[ComponentId] {
        self.query.terms()
    }

    pub fn strategy(&self) -> CachingStrategy {
        self.strategy
    }

    pub fn name_filter(&self) -> Option<&NameFilter> {
        self.name_filter.as_ref()
    }

    pub fn stats(&self) -> QueryStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = QueryStats::default();
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn force_cache_refresh(&self) {
        self.mark_dirty();
    }

    fn install_observers(&mut self, world: &mut World) {
        if self.strategy == CachingStrategy::NoCache || self.query.is_empty() {
            return;
        }
        for event in [ObserverEvent::OnAdd, ObserverEvent::OnSet, ObserverEvent::OnRemove] {
            let flag = Arc::clone(&self.dirty);
            let id = world.observe(
                event,
                self.query.terms(),
                Arc::new(move |_| flag.store(true, Ordering::Release)),
            );
            self.observers.push(id);
        }
    }

    fn remove_observers(&mut self, world: &mut World) {
        for id in self.observers.drain(..) {
            world.remove_observer(id);
        }
    }

    /// Replace the required components; rebuilds the query and its observers.
    pub fn set_required(&mut self, world: &mut World, required: &[ComponentId]) {
        self.remove_observers(world);
        self.query = Query::new(required.iter().copied());
        self.entities = None;
        self.full = None;
        self.install_observers(world);
        self.mark_dirty();
    }

    pub fn set_strategy(&mut self, world: &mut World, strategy: CachingStrategy) {
        if strategy == self.strategy {
            return;
        }
        self.remove_observers(world);
        self.entities = None;
        self.full = None;
        self.strategy = strategy;
        self.install_observers(world);
        self.mark_dirty();
    }

    pub fn set_name_filter(&mut self, pattern: Option<&str>) {
        self.name_filter = pattern.map(NameFilter::parse);
        self.mark_dirty();
    }

    /// Uninstall observers; the cache must not be used afterwards.
    pub fn release(&mut self, world: &mut World) {
        self.remove_observers(world);
        self.entities = None;
        self.full = None;
    }

    /// Visit matches in iteration order until `f` returns `false`.
    ///
    /// With no required components every live entity matches.
    pub fn for_each_match_while<F>(&self, world: &World, mut f: F)
    where
        F: FnMut(EntityId) -> bool,
    {
        let filter = self.name_filter.as_ref();
        let mut visit = |entity: EntityId| match filter {
            Some(filter) if !filter.matches(world.name(entity)) => true,
            _ => f(entity),
        };
        if self.query.is_empty() {
            world.each_raw_while(&mut visit);
        } else {
            self.query.each_while(world, &mut visit);
        }
    }

    pub fn count(&self, world: &World) -> usize {
        let mut count = 0;
        self.for_each_match_while(world, |_| {
            count += 1;
            true
        });
        count
    }

    fn caches(&self) -> bool {
        self.strategy != CachingStrategy::NoCache
    }

    /// Clear cached arrays if an observer fired since the last fetch.
    fn take_dirty(&mut self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.entities = None;
            self.full = None;
        }
    }

    fn record(&mut self, start: Instant, count: usize, hit: Option<bool>) {
        match hit {
            Some(true) => self.stats.cache_hits += 1,
            Some(false) => self.stats.cache_misses += 1,
            None => {}
        }
        self.stats.last_fetch_time = start.elapsed();
        self.stats.last_result_count = count;
    }

    pub fn get_entities<T>(&mut self, world: &World, mut tokenize: T) -> Vec<Token>
    where
        T: FnMut(EntityId) -> Option<Token>,
    {
        let start = Instant::now();
        if self.caches() {
            self.take_dirty();
            let cached = self
                .entities
                .clone()
                .or_else(|| self.full.as_ref().map(|full| full.iter().map(|r| r.entity).collect()));
            if let Some(cached) = cached {
                self.record(start, cached.len(), Some(true));
                return cached;
            }
        }

        let mut result = Vec::new();
        self.for_each_match_while(world, |entity| {
            if let Some(token) = tokenize(entity) {
                result.push(token);
            }
            true
        });
        if self.caches() {
            self.entities = Some(result.clone());
        }
        self.record(start, result.len(), Some(false));
        result
    }

    pub fn get_entities_with_components<R>(&mut self, world: &World, mut record: R) -> Vec<EntityRecord>
    where
        R: FnMut(EntityId) -> Option<EntityRecord>,
    {
        let start = Instant::now();
        let cache_full = self.strategy == CachingStrategy::CacheFull;
        if cache_full {
            self.take_dirty();
            if let Some(cached) = &self.full {
                let cached = cached.clone();
                self.record(start, cached.len(), Some(true));
                return cached;
            }
        }

        let mut result = Vec::new();
        self.for_each_match_while(world, |entity| {
            if let Some(rec) = record(entity) {
                result.push(rec);
            }
            true
        });
        if cache_full {
            self.entities = Some(result.iter().map(|r| r.entity).collect());
            self.full = Some(result.clone());
        }
        self.record(start, result.len(), Some(false));
        result
    }

    /// `max` matches after skipping `offset`, in the unlimited iteration
    /// order. Bypasses the cache; skipped entities are never tokenized.
    pub fn get_entities_limited<T>(&mut self, world: &World, max: usize, offset: usize, mut tokenize: T) -> Vec<Token>
    where
        T: FnMut(EntityId) -> Option<Token>,
    {
        let start = Instant::now();
        let result = page(self, world, max, offset, |e| tokenize(e));
        self.record(start, result.len(), None);
        result
    }

    pub fn get_entities_with_components_limited<R>(
        &mut self,
        world: &World,
        max: usize,
        offset: usize,
        mut record: R,
    ) -> Vec<EntityRecord>
    where
        R: FnMut(EntityId) -> Option<EntityRecord>,
    {
        let start = Instant::now();
        let result = page(self, world, max, offset, |e| record(e));
        self.record(start, result.len(), None);
        result
    }
}

fn page<T>(cache: &QueryCache, world: &World, max: usize, offset: usize, mut map: impl FnMut(EntityId) -> Option<T>) -> Vec<T> {
    let mut out = Vec::new();
    if max == 0 {
        return out;
    }
    let mut seen = 0usize;
    cache.for_each_match_while(world, |entity| {
        if seen >= offset {
            if let Some(item) = map(entity) {
                out.push(item);
            }
        }
        seen += 1;
        out.len() < max
    });
    out
}
