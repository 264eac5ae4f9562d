//! Move-only ownership of a group of world resources.
//!
//! A `ResourceOwner` remembers the entities, queries and systems created on
//! behalf of one client so they can be freed together, or moved to another
//! world with `rehome`. Not `Clone`: each token has exactly one owner.

use crate::error::BridgeError;
use crate::manager::WorldManager;
use crate::marshal;
use crate::opaque::OpaqueKind;
use crate::token::{Token, TokenKind};
use crate::value::{Dictionary, Value};
use crate::world::{BridgeWorld, QueryDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::ecs::{PrimitiveKind, TypeDescriptor, TypeKind};
use thiserror::Error;

#[derive(Debug)]
pub struct ResourceOwner {
    world: Token,
    entities: Vec<Token>,
    queries: Vec<Token>,
    systems: Vec<Token>,
}

/// Outcome of a successful `rehome`.
#[derive(Debug)]
pub struct Rehomed {
    pub owner: ResourceOwner,
    /// Old entity token -> new entity token.
    pub entities: HashMap<Token, Token>,
    /// Old query token -> new query token.
    pub queries: HashMap<Token, Token>,
    /// Systems freed in the old world; callbacks cannot move.
    pub dropped_systems: Vec<Token>,
}

/// A failed `rehome` hands the untouched owner back.
#[derive(Debug, Error)]
#[error("rehome failed: {error}")]
pub struct RehomeFailed {
    pub owner: ResourceOwner,
    #[source]
    pub error: BridgeError,
}

struct ComponentSnapshot {
    name: String,
    value: Value,
    /// Reflection layout in the source world; `None` for codec components.
    layout: Option<Arc<TypeDescriptor>>,
}

struct EntitySnapshot {
    token: Token,
    name: Option<String>,
    components: Vec<ComponentSnapshot>,
}

impl ResourceOwner {
    pub fn new(world: Token) -> Self {
        Self {
            world,
            entities: Vec::new(),
            queries: Vec::new(),
            systems: Vec::new(),
        }
    }

    pub fn world(&self) -> Token {
        self.world
    }

    pub fn entities(&self) -> &[Token] {
        &self.entities
    }

    pub fn queries(&self) -> &[Token] {
        &self.queries
    }

    pub fn systems(&self) -> &[Token] {
        &self.systems
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.queries.is_empty() && self.systems.is_empty()
    }

    pub fn adopt_entity(&mut self, entity: Token) {
        self.entities.push(entity);
    }

    pub fn adopt_query(&mut self, query: Token) {
        self.queries.push(query);
    }

    pub fn adopt_system(&mut self, system: Token) {
        self.systems.push(system);
    }

    /// Create an entity in the owner's world and adopt it.
    pub fn create_entity(&mut self, manager: &WorldManager, name: Option<&str>) -> Token {
        let token = match name {
            Some(name) => manager.create_entity_with_name(self.world, name),
            None => manager.create_entity(self.world),
        };
        if token.is_valid() {
            self.entities.push(token);
        }
        token
    }

    /// Create a query in the owner's world and adopt it.
    pub fn create_query(&mut self, manager: &WorldManager, components: &[&str]) -> Token {
        let token = manager.create_query(self.world, components);
        if token.is_valid() {
            self.queries.push(token);
        }
        token
    }

    /// Free everything owned. Returns how many tokens were still live.
    pub fn release(mut self, manager: &WorldManager) -> usize {
        let (entities, queries, systems) = self.take();
        let freed = manager
            .with_world(self.world, |world, scheduler| {
                let mut freed = 0;
                for system in systems {
                    freed += usize::from(scheduler.free_system(world, system).is_ok());
                }
                for query in queries {
                    freed += usize::from(world.free_query(query).is_ok());
                }
                for entity in entities {
                    freed += usize::from(world.destroy_entity(entity).is_ok());
                }
                freed
            })
            .unwrap_or(0);
        tracing::debug!(world = %self.world, freed, "resource owner released");
        freed
    }

    fn take(&mut self) -> (Vec<Token>, Vec<Token>, Vec<Token>) {
        (
            std::mem::take(&mut self.entities),
            std::mem::take(&mut self.queries),
            std::mem::take(&mut self.systems),
        )
    }

    /// Recreate owned entities and queries in `target`, then free the
    /// originals.
    ///
    /// Entity names and component values are copied through the marshaller.
    /// Entity references between owned entities are rewritten to the new
    /// tokens and references to entities outside the owner become null.
    /// Owned systems are freed, not moved.
    pub fn rehome(self, manager: &WorldManager, target: Token) -> Result<Rehomed, Box<RehomeFailed>> {
        let snapshot = manager.with_world(self.world, |world, _| self.snapshot(world));
        let (entities, queries) = match snapshot {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(error)) | Err(error) => return Err(Box::new(RehomeFailed { owner: self, error })),
        };

        let source = self.world.world_id();
        let created = manager.with_world(target, |world, _| rebuild(world, source, &entities, &queries));
        let (entity_map, query_map) = match created {
            Ok(Ok(maps)) => maps,
            Ok(Err(error)) | Err(error) => return Err(Box::new(RehomeFailed { owner: self, error })),
        };

        let old = self;
        let dropped_systems = old.systems.clone();
        let from = old.world;
        old.release(manager);

        let mut owner = ResourceOwner::new(target);
        owner.entities = entities
            .iter()
            .filter_map(|snapshot| entity_map.get(&snapshot.token).copied())
            .collect();
        owner.queries = queries
            .iter()
            .filter_map(|(token, _)| query_map.get(token).copied())
            .collect();
        tracing::debug!(
            %from,
            to = %target,
            entities = owner.entities.len(),
            queries = owner.queries.len(),
            "resource owner rehomed"
        );
        Ok(Rehomed {
            owner,
            entities: entity_map,
            queries: query_map,
            dropped_systems,
        })
    }

    #[allow(clippy::type_complexity)]
    fn snapshot(
        &self,
        world: &BridgeWorld,
    ) -> Result<(Vec<EntitySnapshot>, Vec<(Token, QueryDescriptor)>), BridgeError> {
        let mut entities = Vec::with_capacity(self.entities.len());
        for &token in &self.entities {
            if !world.entity_exists(token) {
                tracing::warn!(entity = %token, "skipping dead entity during rehome");
                continue;
            }
            let mut components = Vec::new();
            for name in world.component_names(token)? {
                let value = world.get_component(token, &name)?;
                let layout = world
                    .types()
                    .lookup_by_name(&name)
                    .filter(|bound| bound.meta.codec.is_none())
                    .and_then(|bound| bound.meta.layout.clone());
                components.push(ComponentSnapshot { name, value, layout });
            }
            entities.push(EntitySnapshot {
                token,
                name: world.entity_name(token)?,
                components,
            });
        }

        let mut queries = Vec::with_capacity(self.queries.len());
        for &token in &self.queries {
            queries.push((token, world.query_descriptor(token)?));
        }
        Ok((entities, queries))
    }
}

impl Drop for ResourceOwner {
    fn drop(&mut self) {
        if !self.is_empty() {
            tracing::warn!(
                world = %self.world,
                entities = self.entities.len(),
                queries = self.queries.len(),
                systems = self.systems.len(),
                "resource owner dropped without release"
            );
        }
    }
}

type Rebuilt = (HashMap<Token, Token>, HashMap<Token, Token>);

/// Create snapshots in `world`; on failure everything created is destroyed.
fn rebuild(
    world: &mut BridgeWorld,
    source: u16,
    entities: &[EntitySnapshot],
    queries: &[(Token, QueryDescriptor)],
) -> Result<Rebuilt, BridgeError> {
    let mut entity_map = HashMap::new();
    let mut query_map = HashMap::new();
    let result = rebuild_into(world, source, entities, queries, &mut entity_map, &mut query_map);
    if let Err(err) = result {
        for &query in query_map.values() {
            if let Err(undo) = world.free_query(query) {
                tracing::warn!(%query, %undo, "rehome rollback could not free query");
            }
        }
        for &entity in entity_map.values() {
            if let Err(undo) = world.destroy_entity(entity) {
                tracing::warn!(%entity, %undo, "rehome rollback could not destroy entity");
            }
        }
        return Err(err);
    }
    Ok((entity_map, query_map))
}

fn rebuild_into(
    world: &mut BridgeWorld,
    source: u16,
    entities: &[EntitySnapshot],
    queries: &[(Token, QueryDescriptor)],
    entity_map: &mut HashMap<Token, Token>,
    query_map: &mut HashMap<Token, Token>,
) -> Result<(), BridgeError> {
    // All entities first so references between them can be rewritten.
    for snapshot in entities {
        let token = match &snapshot.name {
            Some(name) => world.create_entity_with_name(name)?,
            None => world.create_entity()?,
        };
        entity_map.insert(snapshot.token, token);
    }
    for snapshot in entities {
        let Some(&token) = entity_map.get(&snapshot.token) else {
            continue;
        };
        for component in &snapshot.components {
            let value = remap(&component.value, component.layout.as_deref(), entity_map, source);
            world.add_component(token, &component.name, &value)?;
        }
    }

    for (old, descriptor) in queries {
        let required: Vec<&str> = descriptor.required.iter().map(String::as_str).collect();
        let token = world.create_query(&required)?;
        query_map.insert(*old, token);
        world.query_set_caching_strategy(token, descriptor.strategy)?;
        world.query_set_name_filter(token, descriptor.name_filter.as_deref())?;
    }
    Ok(())
}

/// Rewrite the `entity` fields of a component value: references to owned
/// entities become their new token, the rest become `Nil`. Only members the
/// layout declares as `entity` are touched.
fn remap(value: &Value, layout: Option<&TypeDescriptor>, map: &HashMap<Token, Token>, source: u16) -> Value {
    let Some(layout) = layout.filter(|layout| marshal::holds_entities(layout)) else {
        return value.clone();
    };
    if !layout.is_struct() {
        if let Value::Dictionary(entries) = value {
            if let Some(inner) = entries.get(marshal::VALUE_KEY) {
                let mut entries = entries.clone();
                entries.insert(marshal::VALUE_KEY.to_string(), remap_field(inner, layout, map, source, 0));
                return Value::Dictionary(entries);
            }
        }
    }
    remap_field(value, layout, map, source, 0)
}

fn remap_field(value: &Value, ty: &TypeDescriptor, map: &HashMap<Token, Token>, source: u16, depth: usize) -> Value {
    if OpaqueKind::lookup(&ty.name).is_some() {
        return value.clone();
    }
    match (&ty.kind, value) {
        (TypeKind::Primitive(PrimitiveKind::Entity), _) => match Token::from_value(value) {
            Some(token) if token.kind() == TokenKind::Entity && token.world_id() == source => {
                map.get(&token).map_or(Value::Nil, |new| new.to_value())
            }
            _ => value.clone(),
        },
        (TypeKind::Struct(members), Value::Dictionary(entries)) if depth < marshal::MAX_DEPTH => {
            let mut out: Dictionary = entries.clone();
            for member in members {
                let Some(name) = member.name.as_deref() else {
                    continue;
                };
                if let Some(field) = entries.get(name) {
                    out.insert(name.to_string(), remap_field(field, &member.ty, map, source, depth + 1));
                }
            }
            Value::Dictionary(out)
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ParentComponent, Transform2DComponent};
    use crate::config::BridgeConfig;
    use crate::meta::ComponentType;
    use crate::query_cache::CachingStrategy;
    use glam::Vec2;

    fn manager() -> WorldManager {
        WorldManager::new(BridgeConfig::default()).unwrap()
    }

    fn position(x: f32) -> Value {
        [("position", Value::Vector2(Vec2::new(x, 1.0)))].into_iter().collect()
    }

    #[test]
    fn test_release_frees_everything() {
        let manager = manager();
        let world = manager.create_world();
        let mut owner = ResourceOwner::new(world);
        let e = owner.create_entity(&manager, Some("a"));
        owner.create_entity(&manager, None);
        let q = owner.create_query(&manager, &[Transform2DComponent::NAME]);
        assert_eq!(manager.entity_count(world), 2);

        assert_eq!(owner.release(&manager), 3);
        assert_eq!(manager.entity_count(world), 0);
        assert!(!manager.entity_exists(world, e));
        assert!(!manager.free_query(world, q));
    }

    #[test]
    fn test_rehome_moves_entities_and_queries() {
        let manager = manager();
        let from = manager.create_world();
        let to = manager.create_world();
        let mut owner = ResourceOwner::new(from);

        let parent = owner.create_entity(&manager, Some("parent"));
        let child = owner.create_entity(&manager, Some("child"));
        manager.add_component(from, parent, Transform2DComponent::NAME, &position(4.0));
        let link: Value = [("parent", parent.to_value())].into_iter().collect();
        manager.add_component(from, child, ParentComponent::NAME, &link);

        let query = owner.create_query(&manager, &[Transform2DComponent::NAME]);
        manager.query_set_caching_strategy(from, query, CachingStrategy::CacheFull);
        manager.query_set_name_filter(from, query, Some("par*"));

        let system = manager.create_script_system(from, "noop", &[], Box::new(|_, _, _| {}));
        owner.adopt_system(system);

        let rehomed = owner.rehome(&manager, to).unwrap();
        assert_eq!(manager.entity_count(from), 0);
        assert_eq!(manager.entity_count(to), 2);
        assert_eq!(rehomed.dropped_systems, vec![system]);
        assert!(manager.systems(from).is_empty());

        let new_parent = rehomed.entities[&parent];
        let new_child = rehomed.entities[&child];
        assert_eq!(manager.get_entity_name(to, new_child).as_deref(), Some("child"));
        assert_eq!(
            manager.get_component(to, new_parent, Transform2DComponent::NAME).get("position"),
            Some(&Value::Vector2(Vec2::new(4.0, 1.0)))
        );
        assert_eq!(
            manager.get_component(to, new_child, ParentComponent::NAME).get("parent"),
            Some(&new_parent.to_value())
        );

        let new_query = rehomed.queries[&query];
        let descriptor = manager.query_descriptor(to, new_query).unwrap();
        assert_eq!(descriptor.strategy, CachingStrategy::CacheFull);
        assert_eq!(descriptor.name_filter.as_deref(), Some("par*"));
        assert_eq!(manager.query_get_entities(to, new_query), vec![new_parent]);

        assert_eq!(rehomed.owner.release(&manager), 3);
    }

    #[test]
    fn test_rehome_only_rewrites_entity_fields() {
        let manager = manager();
        let from = manager.create_world();
        let to = manager.create_world();
        let fields = vec![
            ("points".to_string(), "int".to_string()),
            ("target".to_string(), "entity".to_string()),
        ];
        for world in [from, to] {
            assert!(manager.register_script_component(world, "Score", &fields).is_valid());
        }

        let mut owner = ResourceOwner::new(from);
        let marked = owner.create_entity(&manager, Some("marked"));
        let holder = owner.create_entity(&manager, Some("holder"));
        let score: Value = [("points", marked.to_value()), ("target", marked.to_value())]
            .into_iter()
            .collect();
        assert!(manager.add_component(from, holder, "Score", &score));

        let rehomed = owner.rehome(&manager, to).unwrap();
        let new_holder = rehomed.entities[&holder];
        let new_marked = rehomed.entities[&marked];
        let moved = manager.get_component(to, new_holder, "Score");
        assert_eq!(moved.get("points"), Some(&marked.to_value()));
        assert_eq!(moved.get("target"), Some(&new_marked.to_value()));
        assert_eq!(rehomed.owner.release(&manager), 2);
    }

    #[test]
    fn test_remap_leaves_codec_and_plain_values_alone() {
        let source = Token::pack(TokenKind::Entity, 4, 0, 9);
        let map = HashMap::from([(source, Token::pack(TokenKind::Entity, 5, 0, 1))]);
        let value: Value = [("parent", source.to_value())].into_iter().collect();
        assert_eq!(remap(&value, None, &map, 4), value);

        let layout = ParentComponent::layout();
        let expected: Value = [("parent", map[&source].to_value())].into_iter().collect();
        assert_eq!(remap(&value, Some(&layout), &map, 4), expected);

        let stranger = Token::pack(TokenKind::Entity, 4, 0, 10);
        let dangling: Value = [("parent", stranger.to_value())].into_iter().collect();
        let cleared: Value = [("parent", Value::Nil)].into_iter().collect();
        assert_eq!(remap(&dangling, Some(&layout), &map, 4), cleared);
    }

    #[test]
    fn test_rehome_to_missing_world_returns_owner() {
        let manager = manager();
        let from = manager.create_world();
        let mut owner = ResourceOwner::new(from);
        let e = owner.create_entity(&manager, None);

        let failed = owner.rehome(&manager, Token::INVALID).unwrap_err();
        assert!(matches!(failed.error, BridgeError::WrongKind { .. }));
        assert!(manager.entity_exists(from, e));
        assert_eq!(failed.owner.release(&manager), 1);
    }
}
