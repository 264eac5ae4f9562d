//! Dynamically-typed value container.
//!
//! `Value` is what the dynamic layer reads and writes: scalars, strings,
//! string-keyed maps, arrays and a closed set of geometric leaf types backed
//! by `glam`. It serializes through serde, so any value can be exported as
//! JSON with `serde_json`.

use glam::{Affine2, IVec2, IVec3, IVec4, Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-keyed map; ordered so exports are stable.
pub type Dictionary = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect2i {
    pub position: IVec2,
    pub size: IVec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub basis: Mat3,
    pub origin: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self {
            basis: Mat3::IDENTITY,
            origin: Vec3::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub position: Vec3,
    pub size: Vec3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StringName(String),
    Vector2(Vec2),
    Vector2i(IVec2),
    Vector3(Vec3),
    Vector3i(IVec3),
    Vector4(Vec4),
    Vector4i(IVec4),
    Rect2(Rect2),
    Rect2i(Rect2i),
    Transform2D(Affine2),
    Transform3D(Transform3D),
    Basis(Mat3),
    Quaternion(Quat),
    Color(Color),
    Aabb(Aabb),
    Plane(Plane),
    Projection(Mat4),
    Rid(u64),
    Array(Vec<Value>),
    Dictionary(Dictionary),
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
    PackedStringArray(Vec<String>),
    PackedVector2Array(Vec<Vec2>),
    PackedVector3Array(Vec<Vec3>),
    PackedColorArray(Vec<Color>),
}

impl Value {
    /// Empty dictionary.
    pub fn map() -> Self {
        Value::Dictionary(Dictionary::new())
    }

    /// Variant name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "String",
            Value::StringName(_) => "StringName",
            Value::Vector2(_) => "Vector2",
            Value::Vector2i(_) => "Vector2i",
            Value::Vector3(_) => "Vector3",
            Value::Vector3i(_) => "Vector3i",
            Value::Vector4(_) => "Vector4",
            Value::Vector4i(_) => "Vector4i",
            Value::Rect2(_) => "Rect2",
            Value::Rect2i(_) => "Rect2i",
            Value::Transform2D(_) => "Transform2D",
            Value::Transform3D(_) => "Transform3D",
            Value::Basis(_) => "Basis",
            Value::Quaternion(_) => "Quaternion",
            Value::Color(_) => "Color",
            Value::Aabb(_) => "AABB",
            Value::Plane(_) => "Plane",
            Value::Projection(_) => "Projection",
            Value::Rid(_) => "RID",
            Value::Array(_) => "Array",
            Value::Dictionary(_) => "Dictionary",
            Value::PackedByteArray(_) => "PackedByteArray",
            Value::PackedInt32Array(_) => "PackedInt32Array",
            Value::PackedInt64Array(_) => "PackedInt64Array",
            Value::PackedFloat32Array(_) => "PackedFloat32Array",
            Value::PackedFloat64Array(_) => "PackedFloat64Array",
            Value::PackedStringArray(_) => "PackedStringArray",
            Value::PackedVector2Array(_) => "PackedVector2Array",
            Value::PackedVector3Array(_) => "PackedVector3Array",
            Value::PackedColorArray(_) => "PackedColorArray",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Integer view; floats truncate toward zero.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Text of a `String` or `StringName`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::StringName(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Value::Dictionary(map) => Some(map),
            _ => None,
        }
    }

    /// Lookup in a dictionary value; `None` for other variants.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dictionary()?.get(key)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Value> {
        serde_json::from_str(text)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec2> for Value {
    fn from(v: Vec2) -> Self {
        Value::Vector2(v)
    }
}

impl From<Vec3> for Value {
    fn from(v: Vec3) -> Self {
        Value::Vector3(v)
    }
}

impl From<Dictionary> for Value {
    fn from(v: Dictionary) -> Self {
        Value::Dictionary(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Value::Dictionary(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
