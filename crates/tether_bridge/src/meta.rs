// meta.rs - Component type metadata and per-world binding
//
// `ComponentMetaRegistry` holds one record per component name for the
// whole process. It is filled explicitly (see `components::register_all`)
// and shared by every world through an `Arc`. When a world is created each
// record is registered with the native world and the resulting native id is
// cached in that world's `BoundTypes`; later lookups never go back to the
// native type table by name.

use crate::error::{MarshalError, MetaError};
use crate::marshal;
use crate::opaque::OpaqueKind;
use crate::token::Token;
use crate::value::Value;
use bytemuck::Pod;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use tether_core::ecs::{ComponentId, PrimitiveKind, StructBuilder, TypeDescriptor, World};

/// Maximum number of fields in a script-defined component.
pub const MAX_SCRIPT_FIELDS: usize = 64;

/// A Rust component type with a fixed byte layout.
pub trait ComponentType: Pod + Send + Sync + 'static {
    const NAME: &'static str;

    /// Reflection layout; its size must equal `size_of::<Self>()`.
    fn layout() -> TypeDescriptor;
}

/// Typed conversion to and from `Value`, preferred over the layout walk.
pub trait Serializable: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, MarshalError>;
}

/// Type-erased codec stored on a `ComponentMeta`.
pub trait ComponentCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> Result<Value, MarshalError>;
    fn decode(&self, value: &Value, bytes: &mut [u8]) -> Result<(), MarshalError>;
}

struct TypedCodec<T>(PhantomData<fn() -> T>);

impl<T: ComponentType + Serializable> ComponentCodec for TypedCodec<T> {
    fn encode(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        let size = std::mem::size_of::<T>();
        if bytes.len() != size {
            return Err(MarshalError::BufferSize {
                component: T::NAME.to_string(),
                expected: size,
                actual: bytes.len(),
            });
        }
        let typed: T = bytemuck::pod_read_unaligned(bytes);
        Ok(typed.to_value())
    }

    fn decode(&self, value: &Value, bytes: &mut [u8]) -> Result<(), MarshalError> {
        let size = std::mem::size_of::<T>();
        if bytes.len() != size {
            return Err(MarshalError::BufferSize {
                component: T::NAME.to_string(),
                expected: size,
                actual: bytes.len(),
            });
        }
        let typed = T::from_value(value)?;
        bytes.copy_from_slice(bytemuck::bytes_of(&typed));
        Ok(())
    }
}

/// Everything the bridge knows about one component type.
pub struct ComponentMeta {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub layout: Option<Arc<TypeDescriptor>>,
    pub codec: Option<Arc<dyn ComponentCodec>>,
    pub type_id: Option<TypeId>,
}

impl fmt::Debug for ComponentMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentMeta")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("layout", &self.layout.as_ref().map(|l| l.name.as_str()))
            .field("codec", &self.codec.is_some())
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    metas: Vec<Arc<ComponentMeta>>,
    by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

/// Process-wide component type registry.
#[derive(Default)]
pub struct ComponentMetaRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentMetaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type by name.
    ///
    /// Idempotent: registering the same name again with the same size and
    /// alignment returns the existing record. A different size or alignment
    /// is rejected.
    pub fn register_type(
        &self,
        name: &str,
        size: usize,
        align: usize,
        layout: Option<Arc<TypeDescriptor>>,
        codec: Option<Arc<dyn ComponentCodec>>,
    ) -> Result<Arc<ComponentMeta>, MetaError> {
        self.insert(ComponentMeta {
            name: name.to_string(),
            size,
            align: align.max(1),
            layout,
            codec,
            type_id: None,
        })
    }

    /// Register a Rust component marshalled through its reflection layout.
    pub fn register<T: ComponentType>(&self) -> Result<Arc<ComponentMeta>, MetaError> {
        self.insert(ComponentMeta {
            name: T::NAME.to_string(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            layout: Some(Arc::new(T::layout())),
            codec: None,
            type_id: Some(TypeId::of::<T>()),
        })
    }

    /// Register a Rust component marshalled through its `Serializable` impl.
    pub fn register_serializable<T: ComponentType + Serializable>(
        &self,
    ) -> Result<Arc<ComponentMeta>, MetaError> {
        self.insert(ComponentMeta {
            name: T::NAME.to_string(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            layout: Some(Arc::new(T::layout())),
            codec: Some(Arc::new(TypedCodec::<T>(PhantomData))),
            type_id: Some(TypeId::of::<T>()),
        })
    }

    fn insert(&self, meta: ComponentMeta) -> Result<Arc<ComponentMeta>, MetaError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&index) = inner.by_name.get(&meta.name) {
            let existing = Arc::clone(&inner.metas[index]);
            if existing.size != meta.size || existing.align != meta.align {
                let err = MetaError::LayoutConflict {
                    name: meta.name,
                    size: existing.size,
                    align: existing.align,
                    new_size: meta.size,
                    new_align: meta.align,
                };
                tracing::error!(error = %err, "component registration rejected");
                return Err(err);
            }
            return Ok(existing);
        }

        let index = inner.metas.len();
        tracing::debug!(name = %meta.name, size = meta.size, align = meta.align, "registered component type");
        if let Some(type_id) = meta.type_id {
            inner.by_type.insert(type_id, index);
        }
        inner.by_name.insert(meta.name.clone(), index);
        let meta = Arc::new(meta);
        inner.metas.push(Arc::clone(&meta));
        Ok(meta)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ComponentMeta>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_name.get(name).map(|&i| Arc::clone(&inner.metas[i]))
    }

    pub fn get_typed<T: 'static>(&self) -> Option<Arc<ComponentMeta>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_type
            .get(&TypeId::of::<T>())
            .map(|&i| Arc::clone(&inner.metas[i]))
    }

    /// All records in registration order.
    pub fn all(&self) -> Vec<Arc<ComponentMeta>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .metas
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A component type as seen from one world.
#[derive(Clone, Debug)]
pub struct BoundType {
    pub meta: Arc<ComponentMeta>,
    pub native_id: ComponentId,
    pub token: Token,
    /// Some reflected field is an `entity` reference.
    pub holds_entities: bool,
}

/// Per-world binding table: name <-> native id <-> token <-> meta.
#[derive(Default)]
pub struct BoundTypes {
    by_name: HashMap<String, BoundType>,
    by_native: HashMap<ComponentId, String>,
    by_token: HashMap<Token, String>,
}

impl BoundTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_to_world(&mut self, meta: Arc<ComponentMeta>, native_id: ComponentId, token: Token) {
        let holds_entities = meta.codec.is_none() && meta.layout.as_deref().is_some_and(marshal::holds_entities);
        if let Some(replaced) = self.by_name.get(&meta.name) {
            self.by_token.remove(&replaced.token);
            self.by_native.remove(&replaced.native_id);
        }
        self.by_native.insert(native_id, meta.name.clone());
        self.by_token.insert(token, meta.name.clone());
        self.by_name.insert(
            meta.name.clone(),
            BoundType {
                meta,
                native_id,
                token,
                holds_entities,
            },
        );
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<&BoundType> {
        self.by_name.get(name)
    }

    pub fn lookup_by_native_id(&self, id: ComponentId) -> Option<&BoundType> {
        self.by_native.get(&id).and_then(|name| self.by_name.get(name))
    }

    pub fn lookup_by_token(&self, token: Token) -> Option<&BoundType> {
        self.by_token.get(&token).and_then(|name| self.by_name.get(name))
    }

    pub fn native_id(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).map(|bound| bound.native_id)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundType> {
        self.by_name.values()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_native.clear();
        self.by_token.clear();
    }
}

/// Register `meta` with a native world, returning the native id.
pub(crate) fn bind_native(world: &mut World, meta: &ComponentMeta) -> Result<ComponentId, MetaError> {
    world
        .register_component(&meta.name, meta.size, meta.align, meta.layout.clone())
        .map_err(|source| MetaError::Bind {
            name: meta.name.clone(),
            source,
        })
}

/// Compute a C-like layout for a script-declared component.
///
/// Field types are primitive names (`i32`, `f32`, `entity`, ...), opaque
/// catalogue names (`Vector3`, `String`, `Dictionary`, ...) or the name of an
/// already bound component that has a layout, which nests it as a struct.
pub fn script_component_layout(
    name: &str,
    fields: &[(String, String)],
    bound: &BoundTypes,
) -> Result<TypeDescriptor, MetaError> {
    if fields.len() > MAX_SCRIPT_FIELDS {
        return Err(MetaError::TypeTableTooLarge {
            name: name.to_string(),
            fields: fields.len(),
            limit: MAX_SCRIPT_FIELDS,
        });
    }

    let mut builder = StructBuilder::new(name);
    for (field, ty) in fields {
        let member = if let Some(kind) = OpaqueKind::lookup(ty) {
            kind.descriptor()
        } else if let Some(kind) = PrimitiveKind::from_name(ty) {
            TypeDescriptor::primitive(kind)
        } else if let Some(layout) = bound.lookup_by_name(ty).and_then(|b| b.meta.layout.clone()) {
            (*layout).clone()
        } else {
            return Err(MetaError::UnknownFieldType {
                component: name.to_string(),
                field: field.clone(),
                ty: ty.clone(),
            });
        };
        builder = builder.member(field.clone(), Arc::new(member));
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, t)| (f.to_string(), t.to_string()))
            .collect()
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ComponentMetaRegistry::new();
        let a = registry.register_type("Health", 8, 4, None, None).unwrap();
        let b = registry.register_type("Health", 8, 4, None, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_conflict_is_rejected() {
        let registry = ComponentMetaRegistry::new();
        registry.register_type("Health", 8, 4, None, None).unwrap();
        let err = registry.register_type("Health", 16, 4, None, None).unwrap_err();
        assert!(matches!(err, MetaError::LayoutConflict { new_size: 16, .. }));
    }

    #[test]
    fn test_binding_lookups_agree() {
        let registry = ComponentMetaRegistry::new();
        let meta = registry.register_type("Tag", 0, 1, None, None).unwrap();
        let mut world = World::new();
        let native = bind_native(&mut world, &meta).unwrap();

        let mut bound = BoundTypes::new();
        let token = Token::pack(TokenKind::ComponentType, 1, 0, 0);
        bound.bind_to_world(meta, native, token);

        let by_name = bound.lookup_by_name("Tag").unwrap();
        let by_id = bound.lookup_by_native_id(native).unwrap();
        assert!(Arc::ptr_eq(&by_name.meta, &by_id.meta));
        assert_eq!(bound.lookup_by_token(token).map(|b| b.native_id), Some(native));
        assert!(bound.lookup_by_name("Missing").is_none());
    }

    #[test]
    fn test_token_index_follows_rebinds() {
        let registry = ComponentMetaRegistry::new();
        let mut world = World::new();
        let mut bound = BoundTypes::new();
        let mut tokens = Vec::new();
        for i in 0..200u32 {
            let meta = registry.register_type(&format!("Tag{i}"), 0, 1, None, None).unwrap();
            let native = bind_native(&mut world, &meta).unwrap();
            let token = Token::pack(TokenKind::ComponentType, 1, 0, i);
            bound.bind_to_world(meta, native, token);
            tokens.push(token);
        }
        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(bound.lookup_by_token(*token).map(|b| b.meta.name.clone()), Some(format!("Tag{i}")));
        }

        let meta = registry.get("Tag7").unwrap();
        let native = bound.native_id("Tag7").unwrap();
        let moved = Token::pack(TokenKind::ComponentType, 1, 1, 7);
        bound.bind_to_world(meta, native, moved);
        assert!(bound.lookup_by_token(tokens[7]).is_none());
        assert_eq!(bound.lookup_by_token(moved).map(|b| b.native_id), Some(native));

        bound.clear();
        assert!(bound.lookup_by_token(tokens[0]).is_none());
    }

    #[test]
    fn test_entity_fields_are_flagged() {
        let registry = ComponentMetaRegistry::new();
        let link = Arc::new(
            TypeDescriptor::structure("Link")
                .member("target", Arc::new(TypeDescriptor::primitive(PrimitiveKind::Entity)))
                .build(),
        );
        let linked = registry.register_type("Link", 8, 8, Some(link), None).unwrap();
        let plain = registry.register_type("Tag", 0, 1, None, None).unwrap();
        let mut world = World::new();
        let mut bound = BoundTypes::new();
        for (i, meta) in [linked, plain].into_iter().enumerate() {
            let native = bind_native(&mut world, &meta).unwrap();
            bound.bind_to_world(meta, native, Token::pack(TokenKind::ComponentType, 1, 0, i as u32));
        }
        assert!(bound.lookup_by_name("Link").unwrap().holds_entities);
        assert!(!bound.lookup_by_name("Tag").unwrap().holds_entities);
    }

    #[test]
    fn test_script_layout() {
        let bound = BoundTypes::new();
        let layout = script_component_layout(
            "Stats",
            &fields(&[("alive", "bool"), ("speed", "f64"), ("dir", "Vector2")]),
            &bound,
        )
        .unwrap();
        let offsets: Vec<usize> = layout.members().iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_script_layout_limits() {
        let bound = BoundTypes::new();
        let many: Vec<(String, String)> = (0..=MAX_SCRIPT_FIELDS)
            .map(|i| (format!("f{i}"), "i32".to_string()))
            .collect();
        assert!(matches!(
            script_component_layout("Wide", &many, &bound),
            Err(MetaError::TypeTableTooLarge { fields: 65, .. })
        ));
        assert!(matches!(
            script_component_layout("Odd", &fields(&[("x", "quaternion")]), &bound),
            Err(MetaError::UnknownFieldType { .. })
        ));
    }
}
