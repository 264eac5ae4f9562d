// world.rs - One bridged world
//
// A BridgeWorld owns the native `World` plus everything the bridge keeps
// per world: the handle registry, the bound component types, the object pool
// and the query caches. All operations here take and return tokens and
// `Value`s and report failures as `BridgeError`; the manager turns those into
// benign defaults.
//
// Queries with no required components (and queries with a name filter) are
// not covered by component observers, so the mutating operations below mark
// them dirty directly. Full-record caches over components with `entity`
// fields are also dirtied when any entity is destroyed.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, MarshalError};
use crate::handles::HandleRegistry;
use crate::marshal::{self, MarshalOutcome, ReadContext, Truncation, WriteContext};
use crate::meta::{self, BoundType, BoundTypes, ComponentMeta, ComponentMetaRegistry, ComponentType};
use crate::objects::ObjectPool;
use crate::query_cache::{CachingStrategy, EntityRecord, QueryCache, QueryStats};
use crate::token::{Token, TokenKind};
use crate::value::{Dictionary, Value};
use std::sync::Arc;
use tether_core::ecs::{ComponentId, EntityId, Query, World};

/// Everything needed to rebuild a query elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub required: Vec<String>,
    pub strategy: CachingStrategy,
    pub name_filter: Option<String>,
}

pub struct BridgeWorld {
    id: u16,
    token: Token,
    world: World,
    handles: HandleRegistry,
    types: BoundTypes,
    objects: ObjectPool,
    queries: Vec<Option<QueryCache>>,
    free_queries: Vec<usize>,
    default_strategy: CachingStrategy,
}

impl BridgeWorld {
    /// Build a world and bind every type in `registry` to it.
    pub fn new(id: u16, config: &BridgeConfig, registry: &ComponentMetaRegistry) -> Result<Self, BridgeError> {
        Self::build(id, 0, HandleRegistry::new(id, &config.handles), config, registry)
    }

    /// Build a new incarnation of a destroyed world id. `handles` is the
    /// previous incarnation's registry after `teardown`, whose bumped slot
    /// generations keep its tokens from validating here.
    pub(crate) fn recycled(
        id: u16,
        generation: u16,
        handles: HandleRegistry,
        config: &BridgeConfig,
        registry: &ComponentMetaRegistry,
    ) -> Result<Self, BridgeError> {
        Self::build(id, generation, handles, config, registry)
    }

    fn build(
        id: u16,
        generation: u16,
        handles: HandleRegistry,
        config: &BridgeConfig,
        registry: &ComponentMetaRegistry,
    ) -> Result<Self, BridgeError> {
        let mut world = Self {
            id,
            token: Token::world(id, generation),
            world: World::new(),
            handles,
            types: BoundTypes::new(),
            objects: ObjectPool::new(),
            queries: Vec::new(),
            free_queries: Vec::new(),
            default_strategy: config.queries.default_strategy,
        };
        for meta in registry.all() {
            world.bind(meta)?;
        }
        tracing::debug!(world = id, generation, types = world.types.len(), "world created");
        Ok(world)
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn native(&self) -> &World {
        &self.world
    }

    pub(crate) fn native_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn types(&self) -> &BoundTypes {
        &self.types
    }

    pub fn objects(&self) -> &ObjectPool {
        &self.objects
    }

    // ------------------------------------------------------------------
    // Component types
    // ------------------------------------------------------------------

    fn bind(&mut self, meta: Arc<ComponentMeta>) -> Result<Token, BridgeError> {
        if let Some(bound) = self.types.lookup_by_name(&meta.name) {
            if bound.meta.size == meta.size && bound.meta.align == meta.align {
                return Ok(bound.token);
            }
        }
        let native_id = meta::bind_native(&mut self.world, &meta)?;
        let token = self.handles.mint(TokenKind::ComponentType, native_id as u64)?;
        self.types.bind_to_world(meta, native_id, token);
        Ok(token)
    }

    fn bound(&self, name: &str) -> Result<&BoundType, BridgeError> {
        self.types
            .lookup_by_name(name)
            .ok_or_else(|| BridgeError::ComponentNotBound { name: name.to_string() })
    }

    /// Token of a bound component type.
    pub fn component_type(&self, name: &str) -> Result<Token, BridgeError> {
        self.bound(name).map(|bound| bound.token)
    }

    /// Resolve component names to native ids.
    pub fn component_ids(&self, names: &[&str]) -> Result<Vec<ComponentId>, BridgeError> {
        names
            .iter()
            .map(|name| self.bound(name).map(|bound| bound.native_id))
            .collect()
    }

    /// Declare a component type from `(field, type name)` pairs, bound to this
    /// world only.
    pub fn register_script_component(
        &mut self,
        name: &str,
        fields: &[(String, String)],
    ) -> Result<Token, BridgeError> {
        let layout = meta::script_component_layout(name, fields, &self.types)?;
        let meta = Arc::new(ComponentMeta {
            name: name.to_string(),
            size: layout.size,
            align: layout.align,
            layout: Some(Arc::new(layout)),
            codec: None,
            type_id: None,
        });
        let token = self.bind(meta)?;
        tracing::debug!(world = self.id, component = name, fields = fields.len(), "script component registered");
        Ok(token)
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    fn entity(&self, token: Token) -> Result<EntityId, BridgeError> {
        let entity = EntityId::from_bits(self.handles.validate(token, TokenKind::Entity)?);
        if !self.world.is_alive(entity) {
            return Err(BridgeError::InvalidToken { token });
        }
        Ok(entity)
    }

    /// Token for a native entity, reusing the one it was minted under.
    pub fn entity_token(&self, entity: EntityId) -> Result<Token, BridgeError> {
        self.handles.get_or_create_token_for_native(entity.to_bits())
    }

    pub fn create_entity(&mut self) -> Result<Token, BridgeError> {
        let entity = self.world.spawn();
        self.finish_spawn(entity)
    }

    pub fn create_entity_with_name(&mut self, name: &str) -> Result<Token, BridgeError> {
        let entity = self.world.spawn_named(name);
        self.finish_spawn(entity)
    }

    fn finish_spawn(&mut self, entity: EntityId) -> Result<Token, BridgeError> {
        match self.handles.mint(TokenKind::Entity, entity.to_bits()) {
            Ok(token) => {
                self.touch_unscoped_queries();
                Ok(token)
            }
            Err(err) => {
                self.world.despawn(entity);
                Err(err)
            }
        }
    }

    /// Destroy an entity, invalidating its token and releasing its pooled
    /// objects and strings.
    pub fn destroy_entity(&mut self, token: Token) -> Result<(), BridgeError> {
        let entity = self.entity(token)?;
        for cid in self.world.components_of(entity) {
            self.release_row_refs(entity, cid);
        }
        self.world.despawn(entity);
        self.handles.free(token);
        self.touch_unscoped_queries();
        self.touch_filtered_queries();
        self.touch_entity_ref_queries();
        Ok(())
    }

    pub fn entity_exists(&self, token: Token) -> bool {
        self.entity(token).is_ok()
    }

    pub fn entity_count(&self) -> usize {
        self.world.entity_count()
    }

    pub fn set_entity_name(&mut self, token: Token, name: Option<&str>) -> Result<(), BridgeError> {
        let entity = self.entity(token)?;
        self.world.set_name(entity, name.map(str::to_string));
        self.touch_filtered_queries();
        Ok(())
    }

    pub fn entity_name(&self, token: Token) -> Result<Option<String>, BridgeError> {
        let entity = self.entity(token)?;
        Ok(self.world.name(entity).map(str::to_string))
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn has_component(&self, entity: Token, name: &str) -> Result<bool, BridgeError> {
        let entity = self.entity(entity)?;
        let bound = self.bound(name)?;
        Ok(self.world.has_component(entity, bound.native_id))
    }

    /// Names of the bound components an entity carries.
    pub fn component_names(&self, entity: Token) -> Result<Vec<String>, BridgeError> {
        let entity = self.entity(entity)?;
        Ok(self
            .world
            .components_of(entity)
            .into_iter()
            .filter_map(|cid| self.types.lookup_by_native_id(cid))
            .map(|bound| bound.meta.name.clone())
            .collect())
    }

    /// Add a component (if absent) and write `value` into it.
    pub fn add_component(&mut self, entity: Token, name: &str, value: &Value) -> Result<Vec<Truncation>, BridgeError> {
        let entity = self.entity(entity)?;
        let bound = self.bound(name)?.clone();
        self.write_component(entity, &bound, value)
    }

    /// Overwrite a component the entity already has.
    pub fn set_component(&mut self, entity: Token, name: &str, value: &Value) -> Result<Vec<Truncation>, BridgeError> {
        let token = entity;
        let entity = self.entity(token)?;
        let bound = self.bound(name)?.clone();
        if !self.world.has_component(entity, bound.native_id) {
            return Err(BridgeError::ComponentNotFound {
                entity: token,
                name: name.to_string(),
            });
        }
        self.write_component(entity, &bound, value)
    }

    fn write_component(
        &mut self,
        entity: EntityId,
        bound: &BoundType,
        value: &Value,
    ) -> Result<Vec<Truncation>, BridgeError> {
        let id = bound.native_id;
        let mut scratch = match self.world.component_bytes(entity, id) {
            Some(bytes) => bytes.to_vec(),
            None => vec![0u8; bound.meta.size],
        };
        let ctx = WriteContext::new(self.world.strings_mut(), &self.objects, &self.handles);
        let truncations = marshal::write(&bound.meta, value, &mut scratch, ctx)?;
        self.world.set_component(entity, id, &scratch)?;
        self.touch_unscoped_queries();
        Ok(truncations)
    }

    /// Apply `f` to every row of a native component type in parallel and
    /// return the number of rows visited. `OnSet` fires for each row.
    ///
    /// `f` sees the raw struct, so types with string or container fields are
    /// rejected.
    pub fn update_components<T, F>(&mut self, f: F) -> Result<usize, BridgeError>
    where
        T: ComponentType,
        F: Fn(&mut T) + Send + Sync,
    {
        let bound = self.bound(T::NAME)?;
        let size = std::mem::size_of::<T>();
        if bound.meta.size != size {
            return Err(MarshalError::BufferSize {
                component: T::NAME.to_string(),
                expected: bound.meta.size,
                actual: size,
            }
            .into());
        }
        if bound.meta.layout.as_deref().is_some_and(marshal::holds_pool_refs) {
            return Err(BridgeError::PooledFields {
                name: T::NAME.to_string(),
            });
        }
        let id = bound.native_id;
        let rows = Query::new([id]).count(&self.world);
        self.world.par_for_each_component_mut(id, |row| {
            let mut component: T = bytemuck::pod_read_unaligned(row);
            f(&mut component);
            row.copy_from_slice(bytemuck::bytes_of(&component));
        });
        self.touch_unscoped_queries();
        Ok(rows)
    }

    /// Read a component as a `Value`. A component the entity does not carry
    /// reads as an empty map.
    pub fn get_component(&self, entity: Token, name: &str) -> Result<Value, BridgeError> {
        self.read_component(entity, name).map(|outcome| outcome.value)
    }

    /// Like `get_component`, keeping truncation diagnostics.
    pub fn read_component(&self, entity: Token, name: &str) -> Result<MarshalOutcome, BridgeError> {
        let entity = self.entity(entity)?;
        let bound = self.bound(name)?;
        let value = read_row(&self.world, &self.objects, &self.handles, bound, entity)?;
        Ok(value.unwrap_or_else(|| MarshalOutcome::complete(Value::map())))
    }

    pub fn remove_component(&mut self, entity: Token, name: &str) -> Result<bool, BridgeError> {
        let entity = self.entity(entity)?;
        let id = self.bound(name)?.native_id;
        if !self.world.has_component(entity, id) {
            return Ok(false);
        }
        self.release_row_refs(entity, id);
        let removed = self.world.remove_component(entity, id)?;
        self.touch_unscoped_queries();
        Ok(removed)
    }

    /// Drop the pool references a row holds before it goes away.
    fn release_row_refs(&mut self, entity: EntityId, id: ComponentId) {
        let Some(layout) = self.world.component_info(id).and_then(|info| info.layout.clone()) else {
            return;
        };
        let Some(bytes) = self.world.component_bytes(entity, id) else {
            return;
        };
        let refs = marshal::row_refs(&layout, bytes);
        for object in refs.objects {
            self.objects.remove(object);
        }
        let strings = self.world.strings_mut();
        for string in refs.strings {
            strings.release(string);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn touch_unscoped_queries(&self) {
        for cache in self.queries.iter().flatten() {
            if cache.required().is_empty() {
                cache.mark_dirty();
            }
        }
    }

    fn touch_filtered_queries(&self) {
        for cache in self.queries.iter().flatten() {
            if cache.name_filter().is_some() {
                cache.mark_dirty();
            }
        }
    }

    /// Full-record caches may hold encoded references to the entity just
    /// destroyed; those must re-read so the reference decodes as nil.
    fn touch_entity_ref_queries(&self) {
        for cache in self.queries.iter().flatten() {
            if cache.strategy() != CachingStrategy::CacheFull {
                continue;
            }
            let refers = cache
                .required()
                .iter()
                .any(|&cid| self.types.lookup_by_native_id(cid).is_some_and(|bound| bound.holds_entities));
            if refers {
                cache.mark_dirty();
            }
        }
    }

    fn query_index(&self, token: Token) -> Result<usize, BridgeError> {
        let index = self.handles.validate(token, TokenKind::Query)? as usize;
        match self.queries.get(index) {
            Some(Some(_)) => Ok(index),
            _ => Err(BridgeError::InvalidToken { token }),
        }
    }

    fn query(&self, token: Token) -> Result<&QueryCache, BridgeError> {
        let index = self.query_index(token)?;
        self.queries[index]
            .as_ref()
            .ok_or(BridgeError::InvalidToken { token })
    }

    /// Build a query over `components` with the configured default strategy.
    pub fn create_query(&mut self, components: &[&str]) -> Result<Token, BridgeError> {
        let ids = self.component_ids(components)?;
        let cache = QueryCache::new(&mut self.world, &ids, self.default_strategy);
        let index = match self.free_queries.pop() {
            Some(index) => index,
            None => {
                self.queries.push(None);
                self.queries.len() - 1
            }
        };
        match self.handles.mint(TokenKind::Query, index as u64) {
            Ok(token) => {
                self.queries[index] = Some(cache);
                Ok(token)
            }
            Err(err) => {
                let mut cache = cache;
                cache.release(&mut self.world);
                self.free_queries.push(index);
                Err(err)
            }
        }
    }

    pub fn free_query(&mut self, token: Token) -> Result<(), BridgeError> {
        let index = self.query_index(token)?;
        if let Some(mut cache) = self.queries[index].take() {
            cache.release(&mut self.world);
        }
        self.handles.free(token);
        self.free_queries.push(index);
        Ok(())
    }

    pub fn query_count(&self) -> usize {
        self.queries.iter().flatten().count()
    }

    pub fn query_set_required_components(&mut self, token: Token, components: &[&str]) -> Result<(), BridgeError> {
        let ids = self.component_ids(components)?;
        let index = self.query_index(token)?;
        if let Some(cache) = self.queries[index].as_mut() {
            cache.set_required(&mut self.world, &ids);
        }
        Ok(())
    }

    pub fn query_set_caching_strategy(&mut self, token: Token, strategy: CachingStrategy) -> Result<(), BridgeError> {
        let index = self.query_index(token)?;
        if let Some(cache) = self.queries[index].as_mut() {
            cache.set_strategy(&mut self.world, strategy);
        }
        Ok(())
    }

    pub fn query_set_name_filter(&mut self, token: Token, pattern: Option<&str>) -> Result<(), BridgeError> {
        let index = self.query_index(token)?;
        if let Some(cache) = self.queries[index].as_mut() {
            cache.set_name_filter(pattern);
        }
        Ok(())
    }

    pub fn query_force_cache_refresh(&self, token: Token) -> Result<(), BridgeError> {
        self.query(token)?.force_cache_refresh();
        Ok(())
    }

    pub fn query_stats(&self, token: Token) -> Result<QueryStats, BridgeError> {
        Ok(self.query(token)?.stats())
    }

    pub fn query_reset_stats(&mut self, token: Token) -> Result<(), BridgeError> {
        let index = self.query_index(token)?;
        if let Some(cache) = self.queries[index].as_mut() {
            cache.reset_stats();
        }
        Ok(())
    }

    pub fn query_descriptor(&self, token: Token) -> Result<QueryDescriptor, BridgeError> {
        let cache = self.query(token)?;
        let required = cache
            .required()
            .iter()
            .filter_map(|&cid| self.types.lookup_by_native_id(cid))
            .map(|bound| bound.meta.name.clone())
            .collect();
        Ok(QueryDescriptor {
            required,
            strategy: cache.strategy(),
            name_filter: cache.name_filter().map(|filter| filter.pattern()),
        })
    }

    pub fn query_get_entity_count(&self, token: Token) -> Result<usize, BridgeError> {
        Ok(self.query(token)?.count(&self.world))
    }

    pub fn query_get_entities(&mut self, token: Token) -> Result<Vec<Token>, BridgeError> {
        let index = self.query_index(token)?;
        let Self { world, handles, queries, .. } = self;
        let cache = queries[index].as_mut().ok_or(BridgeError::InvalidToken { token })?;
        Ok(cache.get_entities(world, |entity| tokenize(handles, entity)))
    }

    pub fn query_get_entities_limited(
        &mut self,
        token: Token,
        max: usize,
        offset: usize,
    ) -> Result<Vec<Token>, BridgeError> {
        let index = self.query_index(token)?;
        let Self { world, handles, queries, .. } = self;
        let cache = queries[index].as_mut().ok_or(BridgeError::InvalidToken { token })?;
        Ok(cache.get_entities_limited(world, max, offset, |entity| tokenize(handles, entity)))
    }

    pub fn query_get_entities_with_components(&mut self, token: Token) -> Result<Vec<EntityRecord>, BridgeError> {
        let index = self.query_index(token)?;
        let Self {
            world,
            handles,
            types,
            objects,
            queries,
            ..
        } = self;
        let world: &World = world;
        let cache = queries[index].as_mut().ok_or(BridgeError::InvalidToken { token })?;
        let required = cache.required().to_vec();
        Ok(cache.get_entities_with_components(world, |entity| {
            entity_record(world, objects, handles, types, &required, entity)
        }))
    }

    pub fn query_get_entities_with_components_limited(
        &mut self,
        token: Token,
        max: usize,
        offset: usize,
    ) -> Result<Vec<EntityRecord>, BridgeError> {
        let index = self.query_index(token)?;
        let Self {
            world,
            handles,
            types,
            objects,
            queries,
            ..
        } = self;
        let world: &World = world;
        let cache = queries[index].as_mut().ok_or(BridgeError::InvalidToken { token })?;
        let required = cache.required().to_vec();
        Ok(cache.get_entities_with_components_limited(world, max, offset, |entity| {
            entity_record(world, objects, handles, types, &required, entity)
        }))
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Release every query and invalidate every token this world minted.
    pub fn teardown(&mut self) {
        for slot in &mut self.queries {
            if let Some(mut cache) = slot.take() {
                cache.release(&mut self.world);
            }
        }
        self.queries.clear();
        self.free_queries.clear();
        self.handles.clear();
        self.objects.clear();
        self.types.clear();
        self.world = World::new();
        tracing::debug!(world = self.id, "world torn down");
    }

    /// Hand the torn-down registry to the next incarnation of this id,
    /// leaving an empty one behind.
    pub(crate) fn take_handles(&mut self, config: &BridgeConfig) -> HandleRegistry {
        std::mem::replace(&mut self.handles, HandleRegistry::new(self.id, &config.handles))
    }
}

fn tokenize(handles: &HandleRegistry, entity: EntityId) -> Option<Token> {
    match handles.get_or_create_token_for_native(entity.to_bits()) {
        Ok(token) => Some(token),
        Err(err) => {
            tracing::warn!(%entity, %err, "dropping entity from query result");
            None
        }
    }
}

/// Marshal one row; `None` when the entity does not carry the component.
fn read_row(
    world: &World,
    objects: &ObjectPool,
    handles: &HandleRegistry,
    bound: &BoundType,
    entity: EntityId,
) -> Result<Option<MarshalOutcome>, MarshalError> {
    if !world.has_component(entity, bound.native_id) {
        return Ok(None);
    }
    let Some(bytes) = world.component_bytes(entity, bound.native_id) else {
        tracing::error!(%entity, component = %bound.meta.name, "component reported present but has no data");
        return Ok(None);
    };
    let ctx = ReadContext {
        world,
        objects,
        refs: handles,
    };
    marshal::read(&bound.meta, bytes, &ctx).map(Some)
}

/// Entity record holding `required` (or every component when empty).
fn entity_record(
    world: &World,
    objects: &ObjectPool,
    handles: &HandleRegistry,
    types: &BoundTypes,
    required: &[ComponentId],
    entity: EntityId,
) -> Option<EntityRecord> {
    let token = tokenize(handles, entity)?;
    let ids = if required.is_empty() {
        world.components_of(entity)
    } else {
        required.to_vec()
    };
    let mut components = Dictionary::new();
    for cid in ids {
        let Some(bound) = types.lookup_by_native_id(cid) else {
            continue;
        };
        match read_row(world, objects, handles, bound, entity) {
            Ok(Some(outcome)) => {
                components.insert(bound.meta.name.clone(), outcome.value);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%entity, component = %bound.meta.name, %err, "skipping component in record");
            }
        }
    }
    Some(EntityRecord {
        entity: token,
        components,
    })
}
