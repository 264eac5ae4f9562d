// opaque.rs - Closed catalogue of leaf types marshalled by direct cast
//
// A descriptor whose name appears here is read and written as a whole,
// never walked as a struct. Inline kinds are little packs of f32/i32; text
// lives in the world's string pool (u32 id) and containers live in the
// world's object pool (u64 id, 0 = empty).

use crate::error::MarshalError;
use crate::marshal::{ReadContext, WriteContext};
use crate::objects::ObjectId;
use crate::value::{Aabb, Color, Plane, Rect2, Rect2i, Transform3D, Value};
use bytemuck::Pod;
use glam::{Affine2, IVec2, IVec3, IVec4, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tether_core::ecs::{StringId, TypeDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpaqueKind {
    Bool,
    Int,
    Float,
    String,
    StringName,
    Variant,
    Array,
    Dictionary,
    PackedByteArray,
    PackedInt32Array,
    PackedInt64Array,
    PackedFloat32Array,
    PackedFloat64Array,
    PackedStringArray,
    PackedVector2Array,
    PackedVector3Array,
    PackedColorArray,
    Vector2,
    Vector2i,
    Vector3,
    Vector3i,
    Vector4,
    Vector4i,
    Rect2,
    Rect2i,
    Transform2D,
    Transform3D,
    Basis,
    Quaternion,
    Color,
    Aabb,
    Plane,
    Projection,
    Rid,
}

const ALL: [OpaqueKind; 34] = [
    OpaqueKind::Bool,
    OpaqueKind::Int,
    OpaqueKind::Float,
    OpaqueKind::String,
    OpaqueKind::StringName,
    OpaqueKind::Variant,
    OpaqueKind::Array,
    OpaqueKind::Dictionary,
    OpaqueKind::PackedByteArray,
    OpaqueKind::PackedInt32Array,
    OpaqueKind::PackedInt64Array,
    OpaqueKind::PackedFloat32Array,
    OpaqueKind::PackedFloat64Array,
    OpaqueKind::PackedStringArray,
    OpaqueKind::PackedVector2Array,
    OpaqueKind::PackedVector3Array,
    OpaqueKind::PackedColorArray,
    OpaqueKind::Vector2,
    OpaqueKind::Vector2i,
    OpaqueKind::Vector3,
    OpaqueKind::Vector3i,
    OpaqueKind::Vector4,
    OpaqueKind::Vector4i,
    OpaqueKind::Rect2,
    OpaqueKind::Rect2i,
    OpaqueKind::Transform2D,
    OpaqueKind::Transform3D,
    OpaqueKind::Basis,
    OpaqueKind::Quaternion,
    OpaqueKind::Color,
    OpaqueKind::Aabb,
    OpaqueKind::Plane,
    OpaqueKind::Projection,
    OpaqueKind::Rid,
];

static CATALOGUE: Lazy<HashMap<&'static str, OpaqueKind>> =
    Lazy::new(|| ALL.iter().map(|&kind| (kind.name(), kind)).collect());

enum Storage {
    Inline,
    Interned,
    Pooled,
}

impl OpaqueKind {
    /// Catalogue lookup by descriptor name.
    pub fn lookup(name: &str) -> Option<Self> {
        CATALOGUE.get(name).copied()
    }

    pub fn all() -> &'static [OpaqueKind] {
        &ALL
    }

    pub const fn name(self) -> &'static str {
        match self {
            OpaqueKind::Bool => "bool",
            OpaqueKind::Int => "int",
            OpaqueKind::Float => "float",
            OpaqueKind::String => "String",
            OpaqueKind::StringName => "StringName",
            OpaqueKind::Variant => "Variant",
            OpaqueKind::Array => "Array",
            OpaqueKind::Dictionary => "Dictionary",
            OpaqueKind::PackedByteArray => "PackedByteArray",
            OpaqueKind::PackedInt32Array => "PackedInt32Array",
            OpaqueKind::PackedInt64Array => "PackedInt64Array",
            OpaqueKind::PackedFloat32Array => "PackedFloat32Array",
            OpaqueKind::PackedFloat64Array => "PackedFloat64Array",
            OpaqueKind::PackedStringArray => "PackedStringArray",
            OpaqueKind::PackedVector2Array => "PackedVector2Array",
            OpaqueKind::PackedVector3Array => "PackedVector3Array",
            OpaqueKind::PackedColorArray => "PackedColorArray",
            OpaqueKind::Vector2 => "Vector2",
            OpaqueKind::Vector2i => "Vector2i",
            OpaqueKind::Vector3 => "Vector3",
            OpaqueKind::Vector3i => "Vector3i",
            OpaqueKind::Vector4 => "Vector4",
            OpaqueKind::Vector4i => "Vector4i",
            OpaqueKind::Rect2 => "Rect2",
            OpaqueKind::Rect2i => "Rect2i",
            OpaqueKind::Transform2D => "Transform2D",
            OpaqueKind::Transform3D => "Transform3D",
            OpaqueKind::Basis => "Basis",
            OpaqueKind::Quaternion => "Quaternion",
            OpaqueKind::Color => "Color",
            OpaqueKind::Aabb => "AABB",
            OpaqueKind::Plane => "Plane",
            OpaqueKind::Projection => "Projection",
            OpaqueKind::Rid => "RID",
        }
    }

    fn storage(self) -> Storage {
        match self {
            _ if self.is_interned() => Storage::Interned,
            _ if self.is_pooled() => Storage::Pooled,
            _ => Storage::Inline,
        }
    }

    /// Bytes occupied inside a component row.
    pub const fn size(self) -> usize {
        match self {
            OpaqueKind::Bool => 1,
            OpaqueKind::String | OpaqueKind::StringName => 4,
            OpaqueKind::Int | OpaqueKind::Float | OpaqueKind::Rid => 8,
            OpaqueKind::Vector2 | OpaqueKind::Vector2i => 8,
            OpaqueKind::Vector3 | OpaqueKind::Vector3i => 12,
            OpaqueKind::Vector4
            | OpaqueKind::Vector4i
            | OpaqueKind::Rect2
            | OpaqueKind::Rect2i
            | OpaqueKind::Quaternion
            | OpaqueKind::Color
            | OpaqueKind::Plane => 16,
            OpaqueKind::Transform2D | OpaqueKind::Aabb => 24,
            OpaqueKind::Basis => 36,
            OpaqueKind::Transform3D => 48,
            OpaqueKind::Projection => 64,
            // Object pool ids.
            _ => 8,
        }
    }

    pub const fn align(self) -> usize {
        match self {
            OpaqueKind::Bool => 1,
            OpaqueKind::Int | OpaqueKind::Float | OpaqueKind::Rid => 8,
            _ if self.is_pooled() => 8,
            _ => 4,
        }
    }

    pub(crate) const fn is_interned(self) -> bool {
        matches!(self, OpaqueKind::String | OpaqueKind::StringName)
    }

    pub(crate) const fn is_pooled(self) -> bool {
        matches!(
            self,
            OpaqueKind::Variant
                | OpaqueKind::Array
                | OpaqueKind::Dictionary
                | OpaqueKind::PackedByteArray
                | OpaqueKind::PackedInt32Array
                | OpaqueKind::PackedInt64Array
                | OpaqueKind::PackedFloat32Array
                | OpaqueKind::PackedFloat64Array
                | OpaqueKind::PackedStringArray
                | OpaqueKind::PackedVector2Array
                | OpaqueKind::PackedVector3Array
                | OpaqueKind::PackedColorArray
        )
    }

    /// Descriptor to use when declaring a member of this kind.
    pub fn descriptor(self) -> TypeDescriptor {
        TypeDescriptor::opaque(self.name(), self.size(), self.align())
    }

    /// Value read from an all-zero field.
    pub fn default_value(self) -> Value {
        match self {
            OpaqueKind::Bool => Value::Bool(false),
            OpaqueKind::Int => Value::Int(0),
            OpaqueKind::Float => Value::Float(0.0),
            OpaqueKind::String => Value::String(String::new()),
            OpaqueKind::StringName => Value::StringName(String::new()),
            OpaqueKind::Variant => Value::Nil,
            OpaqueKind::Array => Value::Array(Vec::new()),
            OpaqueKind::Dictionary => Value::map(),
            OpaqueKind::PackedByteArray => Value::PackedByteArray(Vec::new()),
            OpaqueKind::PackedInt32Array => Value::PackedInt32Array(Vec::new()),
            OpaqueKind::PackedInt64Array => Value::PackedInt64Array(Vec::new()),
            OpaqueKind::PackedFloat32Array => Value::PackedFloat32Array(Vec::new()),
            OpaqueKind::PackedFloat64Array => Value::PackedFloat64Array(Vec::new()),
            OpaqueKind::PackedStringArray => Value::PackedStringArray(Vec::new()),
            OpaqueKind::PackedVector2Array => Value::PackedVector2Array(Vec::new()),
            OpaqueKind::PackedVector3Array => Value::PackedVector3Array(Vec::new()),
            OpaqueKind::PackedColorArray => Value::PackedColorArray(Vec::new()),
            other => read_inline(other, &[0u8; 64]),
        }
    }

    /// Whether `value` may be stored in a pooled field of this kind.
    fn accepts_pooled(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (OpaqueKind::Variant, _)
                | (OpaqueKind::Array, Value::Array(_))
                | (OpaqueKind::Dictionary, Value::Dictionary(_))
                | (OpaqueKind::PackedByteArray, Value::PackedByteArray(_))
                | (OpaqueKind::PackedInt32Array, Value::PackedInt32Array(_))
                | (OpaqueKind::PackedInt64Array, Value::PackedInt64Array(_))
                | (OpaqueKind::PackedFloat32Array, Value::PackedFloat32Array(_))
                | (OpaqueKind::PackedFloat64Array, Value::PackedFloat64Array(_))
                | (OpaqueKind::PackedStringArray, Value::PackedStringArray(_))
                | (OpaqueKind::PackedVector2Array, Value::PackedVector2Array(_))
                | (OpaqueKind::PackedVector3Array, Value::PackedVector3Array(_))
                | (OpaqueKind::PackedColorArray, Value::PackedColorArray(_))
        )
    }

    /// Decode a field. `bytes` is exactly the field span.
    pub(crate) fn read(self, bytes: &[u8], ctx: &ReadContext<'_>, path: &str) -> Result<Value, MarshalError> {
        check_len(self, bytes, path)?;
        Ok(match self.storage() {
            Storage::Inline => read_inline(self, bytes),
            Storage::Interned => {
                let id: StringId = load(bytes);
                let text = match ctx.world.strings().get(id) {
                    Some(text) => text.to_string(),
                    None => {
                        tracing::error!(path, id, "string field refers to unknown pool entry");
                        String::new()
                    }
                };
                match self {
                    OpaqueKind::StringName => Value::StringName(text),
                    _ => Value::String(text),
                }
            }
            Storage::Pooled => {
                let id: ObjectId = load(bytes);
                if id == 0 {
                    return Ok(self.default_value());
                }
                match ctx.objects.get(id) {
                    Some(value) => value,
                    None => {
                        tracing::error!(path, id, "container field refers to unknown object");
                        self.default_value()
                    }
                }
            }
        })
    }

    /// Encode `value` into a field. `bytes` is exactly the field span.
    pub(crate) fn write(
        self,
        value: &Value,
        bytes: &mut [u8],
        ctx: &mut WriteContext<'_>,
        path: &str,
    ) -> Result<(), MarshalError> {
        check_len(self, bytes, path)?;
        let mismatch = || MarshalError::TypeMismatch {
            path: path.to_string(),
            expected: self.name(),
            found: value.type_name(),
        };

        match self.storage() {
            Storage::Inline => write_inline(self, value, bytes).ok_or_else(mismatch),
            Storage::Interned => {
                let text = value.as_str().ok_or_else(mismatch)?;
                let previous: StringId = load(bytes);
                let id = ctx.stage_string(text);
                store(bytes, &id);
                ctx.release_string(previous);
                Ok(())
            }
            Storage::Pooled => {
                if !value.is_nil() && !self.accepts_pooled(value) {
                    return Err(mismatch());
                }
                let previous: ObjectId = load(bytes);
                let id = if value.is_nil() { 0 } else { ctx.stage_object(value.clone()) };
                if previous != 0 {
                    ctx.release_object(previous);
                }
                store(bytes, &id);
                Ok(())
            }
        }
    }
}

fn check_len(kind: OpaqueKind, bytes: &[u8], path: &str) -> Result<(), MarshalError> {
    if bytes.len() < kind.size() {
        return Err(MarshalError::BufferSize {
            component: path.to_string(),
            expected: kind.size(),
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[inline]
fn load<T: Pod>(bytes: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()])
}

#[inline]
fn store<T: Pod>(bytes: &mut [u8], value: &T) {
    let src = bytemuck::bytes_of(value);
    bytes[..src.len()].copy_from_slice(src);
}

fn read_inline(kind: OpaqueKind, bytes: &[u8]) -> Value {
    match kind {
        OpaqueKind::Bool => Value::Bool(bytes[0] != 0),
        OpaqueKind::Int => Value::Int(load::<i64>(bytes)),
        OpaqueKind::Float => Value::Float(load::<f64>(bytes)),
        OpaqueKind::Vector2 => Value::Vector2(Vec2::from_array(load(bytes))),
        OpaqueKind::Vector2i => Value::Vector2i(IVec2::from_array(load(bytes))),
        OpaqueKind::Vector3 => Value::Vector3(Vec3::from_array(load(bytes))),
        OpaqueKind::Vector3i => Value::Vector3i(IVec3::from_array(load(bytes))),
        OpaqueKind::Vector4 => Value::Vector4(Vec4::from_array(load(bytes))),
        OpaqueKind::Vector4i => Value::Vector4i(IVec4::from_array(load(bytes))),
        OpaqueKind::Rect2 => {
            let [px, py, sx, sy]: [f32; 4] = load(bytes);
            Value::Rect2(Rect2 {
                position: Vec2::new(px, py),
                size: Vec2::new(sx, sy),
            })
        }
        OpaqueKind::Rect2i => {
            let [px, py, sx, sy]: [i32; 4] = load(bytes);
            Value::Rect2i(Rect2i {
                position: IVec2::new(px, py),
                size: IVec2::new(sx, sy),
            })
        }
        OpaqueKind::Transform2D => {
            let cols: [f32; 6] = load(bytes);
            Value::Transform2D(Affine2::from_cols_array(&cols))
        }
        OpaqueKind::Transform3D => {
            let raw: [f32; 12] = load(bytes);
            let mut basis = [0f32; 9];
            basis.copy_from_slice(&raw[..9]);
            Value::Transform3D(Transform3D {
                basis: Mat3::from_cols_array(&basis),
                origin: Vec3::new(raw[9], raw[10], raw[11]),
            })
        }
        OpaqueKind::Basis => {
            let cols: [f32; 9] = load(bytes);
            Value::Basis(Mat3::from_cols_array(&cols))
        }
        OpaqueKind::Quaternion => Value::Quaternion(Quat::from_array(load(bytes))),
        OpaqueKind::Color => Value::Color(Color::from_array(load(bytes))),
        OpaqueKind::Aabb => {
            let [px, py, pz, sx, sy, sz]: [f32; 6] = load(bytes);
            Value::Aabb(Aabb {
                position: Vec3::new(px, py, pz),
                size: Vec3::new(sx, sy, sz),
            })
        }
        OpaqueKind::Plane => {
            let [nx, ny, nz, d]: [f32; 4] = load(bytes);
            Value::Plane(Plane {
                normal: Vec3::new(nx, ny, nz),
                d,
            })
        }
        OpaqueKind::Projection => {
            let cols: [f32; 16] = load(bytes);
            Value::Projection(Mat4::from_cols_array(&cols))
        }
        OpaqueKind::Rid => Value::Rid(load::<u64>(bytes)),
        // Interned and pooled kinds never reach here.
        other => other.default_value(),
    }
}

/// `None` when `value` has the wrong shape for `kind`.
fn write_inline(kind: OpaqueKind, value: &Value, bytes: &mut [u8]) -> Option<()> {
    match (kind, value) {
        (OpaqueKind::Bool, v) => store(bytes, &(v.as_bool()? as u8)),
        (OpaqueKind::Int, v) => store(bytes, &v.as_int()?),
        (OpaqueKind::Float, v) => store(bytes, &v.as_float()?),
        (OpaqueKind::Vector2, Value::Vector2(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Vector2i, Value::Vector2i(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Vector3, Value::Vector3(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Vector3i, Value::Vector3i(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Vector4, Value::Vector4(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Vector4i, Value::Vector4i(v)) => store(bytes, &v.to_array()),
        (OpaqueKind::Rect2, Value::Rect2(r)) => {
            store(bytes, &[r.position.x, r.position.y, r.size.x, r.size.y])
        }
        (OpaqueKind::Rect2i, Value::Rect2i(r)) => {
            store(bytes, &[r.position.x, r.position.y, r.size.x, r.size.y])
        }
        (OpaqueKind::Transform2D, Value::Transform2D(t)) => store(bytes, &t.to_cols_array()),
        (OpaqueKind::Transform3D, Value::Transform3D(t)) => {
            let mut raw = [0f32; 12];
            raw[..9].copy_from_slice(&t.basis.to_cols_array());
            raw[9..].copy_from_slice(&t.origin.to_array());
            store(bytes, &raw)
        }
        (OpaqueKind::Basis, Value::Basis(m)) => store(bytes, &m.to_cols_array()),
        (OpaqueKind::Quaternion, Value::Quaternion(q)) => store(bytes, &q.to_array()),
        (OpaqueKind::Color, Value::Color(c)) => store(bytes, &c.to_array()),
        (OpaqueKind::Aabb, Value::Aabb(b)) => store(
            bytes,
            &[b.position.x, b.position.y, b.position.z, b.size.x, b.size.y, b.size.z],
        ),
        (OpaqueKind::Plane, Value::Plane(p)) => {
            store(bytes, &[p.normal.x, p.normal.y, p.normal.z, p.d])
        }
        (OpaqueKind::Projection, Value::Projection(m)) => store(bytes, &m.to_cols_array()),
        (OpaqueKind::Rid, Value::Rid(rid)) => store(bytes, rid),
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_lookup() {
        assert_eq!(OpaqueKind::lookup("Vector3"), Some(OpaqueKind::Vector3));
        assert_eq!(OpaqueKind::lookup("AABB"), Some(OpaqueKind::Aabb));
        assert_eq!(OpaqueKind::lookup("RID"), Some(OpaqueKind::Rid));
        assert_eq!(OpaqueKind::lookup("Position"), None);
        assert_eq!(OpaqueKind::all().len(), CATALOGUE.len());
    }

    #[test]
    fn test_inline_sizes_hold_their_payload() {
        for &kind in OpaqueKind::all() {
            let mut bytes = vec![0u8; kind.size()];
            let value = kind.default_value();
            if matches!(kind.storage(), Storage::Inline) {
                assert!(write_inline(kind, &value, &mut bytes).is_some(), "{kind:?}");
                assert_eq!(read_inline(kind, &bytes), value, "{kind:?}");
            }
            assert_eq!(kind.size() % kind.align(), 0, "{kind:?}");
        }
    }

    #[test]
    fn test_inline_rejects_wrong_shape() {
        let mut bytes = [0u8; 16];
        assert!(write_inline(OpaqueKind::Vector2, &Value::Vector3(Vec3::ONE), &mut bytes).is_none());
        assert!(write_inline(OpaqueKind::Int, &Value::String("1".into()), &mut bytes).is_none());
        assert!(write_inline(OpaqueKind::Float, &Value::Int(3), &mut bytes).is_some());
        assert_eq!(load::<f64>(&bytes), 3.0);
    }
}
