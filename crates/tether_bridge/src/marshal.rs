// marshal.rs - Conversion between component bytes and `Value`
//
// Precedence per component: typed codec, then reflection layout walk, then
// raw bytes wrapped as {"value": PackedByteArray}.
//
// The layout walk checks the opaque catalogue before anything else, then
// primitives, then recurses into structs. Struct scopes are capped at
// MAX_DEPTH nesting and MAX_MEMBERS named members; hitting a cap yields a
// partial result plus a `Truncation` entry instead of an error.

use crate::error::MarshalError;
use crate::meta::ComponentMeta;
use crate::objects::{ObjectId, ObjectPool};
use crate::opaque::OpaqueKind;
use crate::value::{Dictionary, Value};
use std::sync::Arc;
use tether_core::ecs::{Cursor, EntityId, PrimitiveKind, StringId, StringPool, TypeDescriptor, TypeKind, World};

pub const MAX_DEPTH: usize = 32;
pub const MAX_MEMBERS: usize = 64;

/// Reserved key wrapping a non-struct top-level value.
pub const VALUE_KEY: &str = "value";

/// Stored in `entity` fields that reference nothing.
pub const NULL_ENTITY_BITS: u64 = u64::MAX;

/// Why part of a component was left out of a marshalled result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Truncation {
    /// Struct nested deeper than `MAX_DEPTH`; replaced by an empty map.
    Depth { path: String },
    /// Scope had more than `MAX_MEMBERS` named members.
    Members { path: String, dropped: usize },
    /// Member could not be read (offset outside the buffer, bad pool id).
    Corrupt { path: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarshalOutcome {
    pub value: Value,
    pub truncations: Vec<Truncation>,
}

impl MarshalOutcome {
    pub fn complete(value: Value) -> Self {
        Self {
            value,
            truncations: Vec::new(),
        }
    }

    pub fn is_truncated(&self) -> bool {
        !self.truncations.is_empty()
    }
}

/// Hook converting `entity` fields to and from the dynamic representation.
pub trait EntityRefs {
    /// Called only for live entities.
    fn encode(&self, entity: EntityId) -> Value;
    fn decode(&self, value: &Value) -> Option<EntityId>;
}

pub struct ReadContext<'a> {
    pub world: &'a World,
    pub objects: &'a ObjectPool,
    pub refs: &'a dyn EntityRefs,
}

/// Write-side state. Container objects created during a write are staged,
/// and so are string references, so a failed write leaves both pools as they
/// were. Ids the row stops referencing are released only on commit.
pub struct WriteContext<'a> {
    strings: &'a mut StringPool,
    pub objects: &'a ObjectPool,
    pub refs: &'a dyn EntityRefs,
    staged: Vec<ObjectId>,
    released: Vec<ObjectId>,
    staged_strings: Vec<StringId>,
    released_strings: Vec<StringId>,
}

impl<'a> WriteContext<'a> {
    pub fn new(strings: &'a mut StringPool, objects: &'a ObjectPool, refs: &'a dyn EntityRefs) -> Self {
        Self {
            strings,
            objects,
            refs,
            staged: Vec::new(),
            released: Vec::new(),
            staged_strings: Vec::new(),
            released_strings: Vec::new(),
        }
    }

    pub(crate) fn stage_object(&mut self, value: Value) -> ObjectId {
        let id = self.objects.insert(value);
        self.staged.push(id);
        id
    }

    pub(crate) fn release_object(&mut self, id: ObjectId) {
        self.released.push(id);
    }

    pub(crate) fn stage_string(&mut self, text: &str) -> StringId {
        let id = self.strings.intern(text);
        if id != 0 {
            self.staged_strings.push(id);
        }
        id
    }

    pub(crate) fn release_string(&mut self, id: StringId) {
        if id != 0 {
            self.released_strings.push(id);
        }
    }

    fn finish(self, committed: bool) {
        let (drop_ids, drop_strings) = if committed {
            (self.released, self.released_strings)
        } else {
            (self.staged, self.staged_strings)
        };
        for id in drop_ids {
            self.objects.remove(id);
        }
        for id in drop_strings {
            self.strings.release(id);
        }
    }
}

fn join(path: &str, member: &str) -> String {
    if path.is_empty() {
        member.to_string()
    } else {
        format!("{path}.{member}")
    }
}

fn wrap(value: Value) -> Value {
    let mut map = Dictionary::new();
    map.insert(VALUE_KEY.to_string(), value);
    Value::Dictionary(map)
}

/// Inverse of `wrap`; anything else passes through.
fn unwrap_scalar(value: &Value) -> &Value {
    match value {
        Value::Dictionary(map) if map.len() == 1 => map.get(VALUE_KEY).unwrap_or(value),
        _ => value,
    }
}

// ----------------------------------------------------------------------------
// Read
// ----------------------------------------------------------------------------

/// Convert a component row to a `Value`.
pub fn read(meta: &ComponentMeta, bytes: &[u8], ctx: &ReadContext<'_>) -> Result<MarshalOutcome, MarshalError> {
    if let Some(codec) = &meta.codec {
        return codec.encode(bytes).map(MarshalOutcome::complete);
    }

    let Some(layout) = &meta.layout else {
        return Ok(MarshalOutcome::complete(wrap(Value::PackedByteArray(bytes.to_vec()))));
    };

    let mut truncations = Vec::new();
    let value = read_layout(layout, bytes, ctx, &mut truncations);
    for truncation in &truncations {
        tracing::warn!(component = %meta.name, ?truncation, "component read truncated");
    }
    Ok(MarshalOutcome { value, truncations })
}

/// Walk raw bytes with an explicit descriptor.
pub fn read_layout(
    layout: &Arc<TypeDescriptor>,
    bytes: &[u8],
    ctx: &ReadContext<'_>,
    truncations: &mut Vec<Truncation>,
) -> Value {
    let mut cursor = Cursor::new(Arc::clone(layout), bytes);
    if layout.is_struct() {
        return read_struct(&mut cursor, ctx, "", truncations);
    }
    let value = read_node(&mut cursor, ctx, VALUE_KEY, truncations).unwrap_or(Value::Nil);
    if OpaqueKind::lookup(&layout.name).is_some() {
        value
    } else {
        wrap(value)
    }
}

fn read_node<B: AsRef<[u8]>>(
    cursor: &mut Cursor<B>,
    ctx: &ReadContext<'_>,
    path: &str,
    truncations: &mut Vec<Truncation>,
) -> Option<Value> {
    let ty = cursor.ty_arc();
    let corrupt = |truncations: &mut Vec<Truncation>, reason: String| {
        tracing::error!(path, %reason, "skipping unreadable member");
        truncations.push(Truncation::Corrupt {
            path: path.to_string(),
            reason,
        });
    };

    if let Some(kind) = OpaqueKind::lookup(&ty.name) {
        let read = cursor
            .raw()
            .map_err(MarshalError::from)
            .and_then(|bytes| kind.read(bytes, ctx, path));
        return match read {
            Ok(value) => Some(value),
            Err(err) => {
                corrupt(truncations, err.to_string());
                None
            }
        };
    }

    match &ty.kind {
        TypeKind::Primitive(kind) => match read_primitive(cursor, *kind, ctx) {
            Ok(value) => Some(value),
            Err(err) => {
                corrupt(truncations, err.to_string());
                None
            }
        },
        TypeKind::Opaque => match cursor.raw() {
            Ok(bytes) => Some(Value::PackedByteArray(bytes.to_vec())),
            Err(err) => {
                corrupt(truncations, err.to_string());
                None
            }
        },
        TypeKind::Struct(_) => Some(read_struct(cursor, ctx, path, truncations)),
    }
}

fn read_primitive<B: AsRef<[u8]>>(
    cursor: &Cursor<B>,
    kind: PrimitiveKind,
    ctx: &ReadContext<'_>,
) -> Result<Value, MarshalError> {
    Ok(match kind {
        PrimitiveKind::Bool => Value::Bool(cursor.get_bool()?),
        PrimitiveKind::F32 | PrimitiveKind::F64 => Value::Float(cursor.get_float()?),
        PrimitiveKind::String => {
            let id = cursor.get_string_id()?;
            Value::String(ctx.world.strings().get(id).unwrap_or_default().to_string())
        }
        PrimitiveKind::Entity => {
            let bits = cursor.get_entity()?;
            let entity = EntityId::from_bits(bits);
            if bits != NULL_ENTITY_BITS && ctx.world.is_alive(entity) {
                ctx.refs.encode(entity)
            } else {
                Value::Nil
            }
        }
        kind if kind.is_unsigned() => Value::Int(cursor.get_uint()? as i64),
        _ => Value::Int(cursor.get_int()?),
    })
}

fn read_struct<B: AsRef<[u8]>>(
    cursor: &mut Cursor<B>,
    ctx: &ReadContext<'_>,
    path: &str,
    truncations: &mut Vec<Truncation>,
) -> Value {
    if cursor.depth() >= MAX_DEPTH {
        truncations.push(Truncation::Depth {
            path: path.to_string(),
        });
        return Value::map();
    }

    let ty = cursor.ty_arc();
    if cursor.push().is_err() {
        return Value::map();
    }

    let mut map = Dictionary::new();
    let mut taken = 0;
    for (index, member) in ty.members().iter().enumerate() {
        let Some(name) = member.name.as_deref() else {
            continue;
        };
        if taken == MAX_MEMBERS {
            let dropped = ty.members()[index..]
                .iter()
                .filter(|m| m.name.is_some())
                .count();
            truncations.push(Truncation::Members {
                path: path.to_string(),
                dropped,
            });
            break;
        }
        taken += 1;

        if cursor.select(index).is_err() {
            break;
        }
        if let Some(value) = read_node(cursor, ctx, &join(path, name), truncations) {
            map.insert(name.to_string(), value);
        }
    }

    if let Err(err) = cursor.pop() {
        tracing::error!(path, %err, "cursor scope mismatch");
    }
    Value::Dictionary(map)
}

// ----------------------------------------------------------------------------
// Write
// ----------------------------------------------------------------------------

/// Apply `value` onto a component row.
///
/// `bytes` should hold the current row (or zeroes for a new component):
/// struct keys absent from `value` leave their members untouched. On error
/// the row may be partially written; callers write into a scratch copy.
pub fn write(
    meta: &ComponentMeta,
    value: &Value,
    bytes: &mut [u8],
    mut ctx: WriteContext<'_>,
) -> Result<Vec<Truncation>, MarshalError> {
    let result = write_with(meta, value, bytes, &mut ctx);
    ctx.finish(result.is_ok());
    if let Ok(truncations) = &result {
        for truncation in truncations {
            tracing::warn!(component = %meta.name, ?truncation, "component write truncated");
        }
    }
    result
}

fn write_with(
    meta: &ComponentMeta,
    value: &Value,
    bytes: &mut [u8],
    ctx: &mut WriteContext<'_>,
) -> Result<Vec<Truncation>, MarshalError> {
    if let Some(codec) = &meta.codec {
        codec.decode(value, bytes)?;
        return Ok(Vec::new());
    }

    let Some(layout) = &meta.layout else {
        return match unwrap_scalar(value) {
            Value::PackedByteArray(raw) if raw.len() == bytes.len() => {
                bytes.copy_from_slice(raw);
                Ok(Vec::new())
            }
            Value::PackedByteArray(raw) => Err(MarshalError::BufferSize {
                component: meta.name.clone(),
                expected: bytes.len(),
                actual: raw.len(),
            }),
            other => Err(MarshalError::TypeMismatch {
                path: meta.name.clone(),
                expected: "PackedByteArray",
                found: other.type_name(),
            }),
        };
    };

    let mut truncations = Vec::new();
    write_layout(layout, value, bytes, ctx, &mut truncations)?;
    Ok(truncations)
}

/// Write through an explicit descriptor.
pub fn write_layout(
    layout: &Arc<TypeDescriptor>,
    value: &Value,
    bytes: &mut [u8],
    ctx: &mut WriteContext<'_>,
    truncations: &mut Vec<Truncation>,
) -> Result<(), MarshalError> {
    let mut cursor = Cursor::new(Arc::clone(layout), bytes);
    if layout.is_struct() {
        return write_struct(&mut cursor, value, ctx, "", truncations);
    }
    let value = if OpaqueKind::lookup(&layout.name).is_some() {
        value
    } else {
        unwrap_scalar(value)
    };
    write_node(&mut cursor, value, ctx, VALUE_KEY, truncations)
}

fn mismatch(path: &str, expected: &'static str, value: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: value.type_name(),
    }
}

fn write_node<B: AsRef<[u8]> + AsMut<[u8]>>(
    cursor: &mut Cursor<B>,
    value: &Value,
    ctx: &mut WriteContext<'_>,
    path: &str,
    truncations: &mut Vec<Truncation>,
) -> Result<(), MarshalError> {
    let ty = cursor.ty_arc();
    if let Some(kind) = OpaqueKind::lookup(&ty.name) {
        let bytes = cursor.raw_mut()?;
        return kind.write(value, bytes, ctx, path);
    }

    match &ty.kind {
        TypeKind::Primitive(kind) => write_primitive(cursor, *kind, value, ctx, path),
        TypeKind::Opaque => match value {
            Value::PackedByteArray(raw) if raw.len() == ty.size => {
                cursor.raw_mut()?.copy_from_slice(raw);
                Ok(())
            }
            other => Err(mismatch(path, "PackedByteArray", other)),
        },
        TypeKind::Struct(_) => write_struct(cursor, value, ctx, path, truncations),
    }
}

fn write_primitive<B: AsRef<[u8]> + AsMut<[u8]>>(
    cursor: &mut Cursor<B>,
    kind: PrimitiveKind,
    value: &Value,
    ctx: &mut WriteContext<'_>,
    path: &str,
) -> Result<(), MarshalError> {
    match kind {
        PrimitiveKind::Bool => {
            let flag = value.as_bool().ok_or_else(|| mismatch(path, "bool", value))?;
            cursor.set_bool(flag)?;
        }
        PrimitiveKind::F32 | PrimitiveKind::F64 => {
            let number = value.as_float().ok_or_else(|| mismatch(path, "float", value))?;
            cursor.set_float(number)?;
        }
        PrimitiveKind::String => {
            let text = value.as_str().ok_or_else(|| mismatch(path, "String", value))?;
            let previous = cursor.get_string_id()?;
            let id = ctx.stage_string(text);
            cursor.set_string_id(id)?;
            ctx.release_string(previous);
        }
        PrimitiveKind::Entity => {
            let bits = if value.is_nil() {
                NULL_ENTITY_BITS
            } else {
                ctx.refs
                    .decode(value)
                    .ok_or_else(|| MarshalError::UnresolvedEntity {
                        path: path.to_string(),
                    })?
                    .to_bits()
            };
            cursor.set_entity(bits)?;
        }
        kind if kind.is_unsigned() => {
            let number = value.as_int().ok_or_else(|| mismatch(path, "int", value))?;
            cursor.set_uint(number as u64)?;
        }
        _ => {
            let number = value.as_int().ok_or_else(|| mismatch(path, "int", value))?;
            cursor.set_int(number)?;
        }
    }
    Ok(())
}

fn write_struct<B: AsRef<[u8]> + AsMut<[u8]>>(
    cursor: &mut Cursor<B>,
    value: &Value,
    ctx: &mut WriteContext<'_>,
    path: &str,
    truncations: &mut Vec<Truncation>,
) -> Result<(), MarshalError> {
    let map = match value {
        Value::Dictionary(map) => map,
        Value::Nil => return Ok(()),
        other => return Err(mismatch(path, "Dictionary", other)),
    };

    if cursor.depth() >= MAX_DEPTH {
        truncations.push(Truncation::Depth {
            path: path.to_string(),
        });
        return Ok(());
    }

    let ty = cursor.ty_arc();
    cursor.push()?;

    let mut taken = 0;
    for (index, member) in ty.members().iter().enumerate() {
        let Some(name) = member.name.as_deref() else {
            continue;
        };
        if taken == MAX_MEMBERS {
            let dropped = ty.members()[index..]
                .iter()
                .filter(|m| m.name.is_some())
                .count();
            truncations.push(Truncation::Members {
                path: path.to_string(),
                dropped,
            });
            break;
        }
        taken += 1;

        let Some(field) = map.get(name) else {
            continue;
        };
        cursor.select(index)?;
        write_node(cursor, field, ctx, &join(path, name), truncations)?;
    }

    for key in map.keys() {
        if !ty.members().iter().any(|m| m.name.as_deref() == Some(key.as_str())) {
            tracing::debug!(path, key, "ignoring unknown member");
        }
    }

    cursor.pop()?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Object ownership
// ----------------------------------------------------------------------------

/// Pool references held by one row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowRefs {
    pub objects: Vec<ObjectId>,
    pub strings: Vec<StringId>,
}

/// Object pool ids and interned string ids held by the fields of a row.
pub fn row_refs(layout: &TypeDescriptor, bytes: &[u8]) -> RowRefs {
    let mut refs = RowRefs::default();
    collect_refs(layout, 0, bytes, 0, &mut refs);
    refs
}

fn collect_refs(ty: &TypeDescriptor, base: usize, bytes: &[u8], depth: usize, out: &mut RowRefs) {
    if let Some(kind) = OpaqueKind::lookup(&ty.name) {
        if kind.is_pooled() {
            if let Some(raw) = bytes.get(base..base + 8) {
                let id: ObjectId = bytemuck::pod_read_unaligned(raw);
                if id != 0 {
                    out.objects.push(id);
                }
            }
        } else if kind.is_interned() {
            push_string_id(bytes, base, out);
        }
        return;
    }
    if let TypeKind::Primitive(PrimitiveKind::String) = ty.kind {
        push_string_id(bytes, base, out);
        return;
    }
    if depth >= MAX_DEPTH {
        return;
    }
    for member in ty.members() {
        collect_refs(&member.ty, base + member.offset, bytes, depth + 1, out);
    }
}

fn push_string_id(bytes: &[u8], base: usize, out: &mut RowRefs) {
    if let Some(raw) = bytes.get(base..base + 4) {
        let id: StringId = bytemuck::pod_read_unaligned(raw);
        if id != 0 {
            out.strings.push(id);
        }
    }
}

/// Whether any leaf reachable through `ty` lives in a pool rather than
/// inline in the row.
pub fn holds_pool_refs(ty: &TypeDescriptor) -> bool {
    any_leaf(ty, 0, &|ty| match OpaqueKind::lookup(&ty.name) {
        Some(kind) => kind.is_pooled() || kind.is_interned(),
        None => matches!(ty.kind, TypeKind::Primitive(PrimitiveKind::String)),
    })
}

/// Whether any leaf reachable through `ty` is an `entity` reference.
pub fn holds_entities(ty: &TypeDescriptor) -> bool {
    any_leaf(ty, 0, &|ty| {
        OpaqueKind::lookup(&ty.name).is_none() && matches!(ty.kind, TypeKind::Primitive(PrimitiveKind::Entity))
    })
}

fn any_leaf(ty: &TypeDescriptor, depth: usize, pred: &dyn Fn(&TypeDescriptor) -> bool) -> bool {
    if OpaqueKind::lookup(&ty.name).is_some() || !matches!(ty.kind, TypeKind::Struct(_)) {
        return pred(ty);
    }
    depth < MAX_DEPTH && ty.members().iter().any(|member| any_leaf(&member.ty, depth + 1, pred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ComponentMetaRegistry;
    use crate::value::Color;
    use glam::{Vec2, Vec3};

    struct NoRefs;

    impl EntityRefs for NoRefs {
        fn encode(&self, entity: EntityId) -> Value {
            Value::Int(entity.to_bits() as i64)
        }

        fn decode(&self, value: &Value) -> Option<EntityId> {
            value.as_int().map(|bits| EntityId::from_bits(bits as u64))
        }
    }

    fn prim(kind: PrimitiveKind) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor::primitive(kind))
    }

    fn leaf(kind: OpaqueKind) -> Arc<TypeDescriptor> {
        Arc::new(kind.descriptor())
    }

    fn round_trip(layout: Arc<TypeDescriptor>, value: &Value) -> MarshalOutcome {
        let registry = ComponentMetaRegistry::new();
        let meta = registry
            .register_type(&layout.name.clone(), layout.size, layout.align, Some(layout), None)
            .unwrap();
        let mut world = World::new();
        let objects = ObjectPool::new();
        let mut bytes = vec![0u8; meta.size];
        let ctx = WriteContext::new(world.strings_mut(), &objects, &NoRefs);
        write(&meta, value, &mut bytes, ctx).unwrap();
        let ctx = ReadContext {
            world: &world,
            objects: &objects,
            refs: &NoRefs,
        };
        read(&meta, &bytes, &ctx).unwrap()
    }

    #[test]
    fn test_struct_with_leaves() {
        let layout = Arc::new(
            TypeDescriptor::structure("Sprite")
                .member("visible", prim(PrimitiveKind::Bool))
                .member("layer", prim(PrimitiveKind::I8))
                .member("offset", leaf(OpaqueKind::Vector2))
                .member("tint", leaf(OpaqueKind::Color))
                .member("label", leaf(OpaqueKind::String))
                .member("frames", leaf(OpaqueKind::PackedInt32Array))
                .build(),
        );
        let value: Value = [
            ("visible", Value::Bool(true)),
            ("layer", Value::Int(-7)),
            ("offset", Value::Vector2(Vec2::new(0.5, -1.5))),
            ("tint", Value::Color(Color::rgba(1.0, 0.5, 0.25, 1.0))),
            ("label", Value::String("hero".into())),
            ("frames", Value::PackedInt32Array(vec![1, 2, 3])),
        ]
        .into_iter()
        .collect();
        let outcome = round_trip(layout, &value);
        assert_eq!(outcome.value, value);
        assert!(!outcome.is_truncated());
    }

    #[test]
    fn test_scalar_is_wrapped() {
        let outcome = round_trip(prim(PrimitiveKind::U16), &Value::Int(65535));
        assert_eq!(outcome.value, wrap(Value::Int(65535)));

        // The bare value is accepted as well.
        let outcome = round_trip(prim(PrimitiveKind::I32), &wrap(Value::Int(-3)));
        assert_eq!(outcome.value.get(VALUE_KEY), Some(&Value::Int(-3)));
    }

    #[test]
    fn test_catalogue_leaf_is_not_wrapped() {
        let outcome = round_trip(leaf(OpaqueKind::Vector3), &Value::Vector3(Vec3::X));
        assert_eq!(outcome.value, Value::Vector3(Vec3::X));
    }

    #[test]
    fn test_one_field_struct_named_value_is_a_struct() {
        let layout = Arc::new(
            TypeDescriptor::structure("Boxed")
                .member("value", prim(PrimitiveKind::I64))
                .build(),
        );
        let value = wrap(Value::Int(i64::MIN));
        assert_eq!(round_trip(layout, &value).value, value);
    }

    #[test]
    fn test_unnamed_members_are_skipped() {
        let layout = Arc::new(
            TypeDescriptor::structure("Padded")
                .member("a", prim(PrimitiveKind::U32))
                .unnamed(prim(PrimitiveKind::U32))
                .build(),
        );
        let value: Value = [("a", Value::Int(9))].into_iter().collect();
        assert_eq!(round_trip(layout, &value).value, value);
    }

    #[test]
    fn test_float_narrowing() {
        let layout = Arc::new(
            TypeDescriptor::structure("Speed")
                .member("value32", prim(PrimitiveKind::F32))
                .member("value64", prim(PrimitiveKind::F64))
                .build(),
        );
        let value: Value = [("value32", Value::Float(0.1)), ("value64", Value::Int(3))]
            .into_iter()
            .collect();
        let out = round_trip(layout, &value).value;
        assert_eq!(out.get("value32"), Some(&Value::Float(0.1f32 as f64)));
        assert_eq!(out.get("value64"), Some(&Value::Float(3.0)));
    }

    #[test]
    fn test_type_mismatch_rolls_back_objects() {
        let layout = Arc::new(
            TypeDescriptor::structure("Bag")
                .member("items", leaf(OpaqueKind::Array))
                .member("count", prim(PrimitiveKind::I32))
                .build(),
        );
        let registry = ComponentMetaRegistry::new();
        let meta = registry
            .register_type("Bag", layout.size, layout.align, Some(layout), None)
            .unwrap();
        let mut world = World::new();
        let objects = ObjectPool::new();
        let mut bytes = vec![0u8; meta.size];
        let value: Value = [
            ("items", Value::Array(vec![Value::Int(1)])),
            ("count", Value::String("one".into())),
        ]
        .into_iter()
        .collect();
        let ctx = WriteContext::new(world.strings_mut(), &objects, &NoRefs);
        let err = write(&meta, &value, &mut bytes, ctx).unwrap_err();
        assert!(matches!(err, MarshalError::TypeMismatch { expected: "int", .. }));
        assert!(objects.is_empty());
    }

    #[test]
    fn test_raw_fallback() {
        let registry = ComponentMetaRegistry::new();
        let meta = registry.register_type("Blob", 4, 1, None, None).unwrap();
        let world = World::new();
        let objects = ObjectPool::new();
        let ctx = ReadContext {
            world: &world,
            objects: &objects,
            refs: &NoRefs,
        };
        let outcome = read(&meta, &[1, 2, 3, 4], &ctx).unwrap();
        assert_eq!(outcome.value, wrap(Value::PackedByteArray(vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_object_ids_found_in_nested_members() {
        let inner = Arc::new(
            TypeDescriptor::structure("Inner")
                .member("data", leaf(OpaqueKind::Dictionary))
                .build(),
        );
        let outer = TypeDescriptor::structure("Outer")
            .member("id", prim(PrimitiveKind::U32))
            .member("inner", inner)
            .build();
        let mut bytes = vec![0u8; outer.size];
        bytes[8..16].copy_from_slice(&42u64.to_ne_bytes());
        assert_eq!(row_refs(&outer, &bytes).objects, vec![42]);
    }

    #[test]
    fn test_string_ids_found_in_primitive_and_interned_fields() {
        let outer = TypeDescriptor::structure("Tagged")
            .member("label", prim(PrimitiveKind::String))
            .member("tag", leaf(OpaqueKind::StringName))
            .member("count", prim(PrimitiveKind::U32))
            .build();
        let mut bytes = vec![0u8; outer.size];
        bytes[0..4].copy_from_slice(&7u32.to_ne_bytes());
        bytes[4..8].copy_from_slice(&9u32.to_ne_bytes());
        bytes[8..12].copy_from_slice(&5u32.to_ne_bytes());
        let refs = row_refs(&outer, &bytes);
        assert_eq!(refs.strings, vec![7, 9]);
        assert!(refs.objects.is_empty());
        assert!(holds_pool_refs(&outer));
        assert!(!holds_entities(&outer));
    }

    #[test]
    fn test_entity_leaves_detected_through_nesting() {
        let inner = Arc::new(
            TypeDescriptor::structure("Link")
                .member("target", prim(PrimitiveKind::Entity))
                .build(),
        );
        let outer = TypeDescriptor::structure("Holder")
            .member("weight", prim(PrimitiveKind::F32))
            .member("link", inner)
            .build();
        assert!(holds_entities(&outer));
        assert!(!holds_pool_refs(&outer));
    }
}
