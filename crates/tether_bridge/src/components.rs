// components.rs - Built-in component types
//
// Every built-in type is listed in `register_all`, which the world manager
// calls once when it is constructed. Layout descriptors must match the
// `repr(C)` structs exactly; the tests below check sizes and offsets.

use crate::error::{MarshalError, MetaError};
use crate::meta::{ComponentMetaRegistry, ComponentType, Serializable};
use crate::opaque::OpaqueKind;
use crate::value::{Transform3D, Value};
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec2, Vec3};
use std::sync::Arc;
use tether_core::ecs::{PrimitiveKind, TypeDescriptor};

fn leaf(kind: OpaqueKind) -> Arc<TypeDescriptor> {
    Arc::new(kind.descriptor())
}

fn prim(kind: PrimitiveKind) -> Arc<TypeDescriptor> {
    Arc::new(TypeDescriptor::primitive(kind))
}

/// 2D placement.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transform2DComponent {
    pub position: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

impl ComponentType for Transform2DComponent {
    const NAME: &'static str = "Transform2DComponent";

    fn layout() -> TypeDescriptor {
        TypeDescriptor::structure(Self::NAME)
            .member("position", leaf(OpaqueKind::Vector2))
            .member("rotation", prim(PrimitiveKind::F32))
            .member("scale", leaf(OpaqueKind::Vector2))
            .build()
    }
}

/// 3D placement, marshalled through its `Serializable` impl.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Transform3DComponent {
    pub basis: [f32; 9],
    pub origin: [f32; 3],
}

impl Default for Transform3DComponent {
    fn default() -> Self {
        Self {
            basis: Mat3::IDENTITY.to_cols_array(),
            origin: [0.0; 3],
        }
    }
}

impl ComponentType for Transform3DComponent {
    const NAME: &'static str = "Transform3DComponent";

    fn layout() -> TypeDescriptor {
        TypeDescriptor::structure(Self::NAME)
            .member("basis", leaf(OpaqueKind::Basis))
            .member("origin", leaf(OpaqueKind::Vector3))
            .build()
    }
}

impl Serializable for Transform3DComponent {
    fn to_value(&self) -> Value {
        Value::Transform3D(Transform3D {
            basis: Mat3::from_cols_array(&self.basis),
            origin: Vec3::from_array(self.origin),
        })
    }

    fn from_value(value: &Value) -> Result<Self, MarshalError> {
        match value {
            Value::Transform3D(t) => Ok(Self {
                basis: t.basis.to_cols_array(),
                origin: t.origin.to_array(),
            }),
            Value::Nil => Ok(Self::default()),
            other => Err(MarshalError::TypeMismatch {
                path: Self::NAME.to_string(),
                expected: "Transform3D",
                found: other.type_name(),
            }),
        }
    }
}

/// Link to an external scene node.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SceneNodeComponent {
    pub node_id: u64,
    /// `StringName` pool id.
    pub class_name: u32,
    pub _pad: u32,
}

impl ComponentType for SceneNodeComponent {
    const NAME: &'static str = "SceneNodeComponent";

    fn layout() -> TypeDescriptor {
        TypeDescriptor::structure(Self::NAME)
            .member("node_id", prim(PrimitiveKind::U64))
            .member("class_name", leaf(OpaqueKind::StringName))
            .unnamed(prim(PrimitiveKind::U32))
            .build()
    }
}

/// Handle to an external resource.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceComponent {
    pub rid: u64,
    /// `String` pool id.
    pub path: u32,
    pub _pad: u32,
    /// Object pool id of a `Dictionary`.
    pub metadata: u64,
}

impl ComponentType for ResourceComponent {
    const NAME: &'static str = "ResourceComponent";

    fn layout() -> TypeDescriptor {
        TypeDescriptor::structure(Self::NAME)
            .member("rid", leaf(OpaqueKind::Rid))
            .member("path", leaf(OpaqueKind::String))
            .unnamed(prim(PrimitiveKind::U32))
            .member("metadata", leaf(OpaqueKind::Dictionary))
            .build()
    }
}

/// Hierarchy link; `parent` holds packed entity bits.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ParentComponent {
    pub parent: u64,
}

impl ComponentType for ParentComponent {
    const NAME: &'static str = "ParentComponent";

    fn layout() -> TypeDescriptor {
        TypeDescriptor::structure(Self::NAME)
            .member("parent", prim(PrimitiveKind::Entity))
            .build()
    }
}

/// Register every built-in component type.
pub fn register_all(registry: &ComponentMetaRegistry) -> Result<(), MetaError> {
    registry.register::<Transform2DComponent>()?;
    registry.register_serializable::<Transform3DComponent>()?;
    registry.register::<SceneNodeComponent>()?;
    registry.register::<ResourceComponent>()?;
    registry.register::<ParentComponent>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_layout<T: ComponentType>() {
        let layout = T::layout();
        assert_eq!(layout.size, std::mem::size_of::<T>(), "{}", T::NAME);
        assert_eq!(layout.align, std::mem::align_of::<T>(), "{}", T::NAME);
        assert!(OpaqueKind::lookup(T::NAME).is_none(), "{} shadows a leaf type", T::NAME);
    }

    #[test]
    fn test_layouts_match_structs() {
        assert_layout::<Transform2DComponent>();
        assert_layout::<Transform3DComponent>();
        assert_layout::<SceneNodeComponent>();
        assert_layout::<ResourceComponent>();
        assert_layout::<ParentComponent>();
    }

    #[test]
    fn test_register_all_twice_is_harmless() {
        let registry = ComponentMetaRegistry::new();
        register_all(&registry).unwrap();
        let count = registry.len();
        register_all(&registry).unwrap();
        assert_eq!(registry.len(), count);
        assert!(registry.get(Transform3DComponent::NAME).unwrap().codec.is_some());
        assert!(registry.get_typed::<ParentComponent>().is_some());
    }

    #[test]
    fn test_transform3d_codec() {
        let component = Transform3DComponent {
            basis: Mat3::from_rotation_z(0.5).to_cols_array(),
            origin: [1.0, 2.0, 3.0],
        };
        let value = component.to_value();
        assert_eq!(Transform3DComponent::from_value(&value).unwrap(), component);
        assert!(Transform3DComponent::from_value(&Value::Int(1)).is_err());
    }
}
