// component.rs - Per-world component type table
//
// Components are identified by u32 ids local to one world, not Rust TypeIds.
// This lets script-defined components coexist with Rust components, and lets
// two worlds bind the same component name to different ids.

use crate::ecs::{TypeDescriptor, WorldError};
use std::collections::HashMap;
use std::sync::Arc;

/// World-local component id. `0` is never assigned.
pub type ComponentId = u32;

/// Metadata describing a component's memory layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub layout: Option<Arc<TypeDescriptor>>,
}

/// Registry of the component types known to one world.
#[derive(Default)]
pub struct ComponentTable {
    infos: Vec<ComponentInfo>,
    by_name: HashMap<String, ComponentId>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type, or return the existing id for `name`.
    ///
    /// Re-registration must match the previous layout.
    pub fn register(
        &mut self,
        name: &str,
        size: usize,
        align: usize,
        layout: Option<Arc<TypeDescriptor>>,
    ) -> Result<ComponentId, WorldError> {
        let align = align.max(1);
        if let Some(&id) = self.by_name.get(name) {
            let prev = &self.infos[(id - 1) as usize];
            if prev.size != size || prev.align != align {
                return Err(WorldError::LayoutConflict {
                    name: name.to_string(),
                    size: prev.size,
                    align: prev.align,
                    new_size: size,
                    new_align: align,
                });
            }
            return Ok(id);
        }

        if let Some(layout) = &layout {
            if layout.size != size {
                return Err(WorldError::LayoutSizeMismatch {
                    name: name.to_string(),
                    size,
                    layout_size: layout.size,
                });
            }
        }

        let id = ComponentId::try_from(self.infos.len() + 1)
            .map_err(|_| WorldError::ComponentTableFull)?;
        self.infos.push(ComponentInfo {
            id,
            name: name.to_string(),
            size,
            align,
            layout,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentInfo> {
        if id == 0 {
            return None;
        }
        self.infos.get((id - 1) as usize)
    }

    pub fn id_of(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentInfo> {
        self.infos.iter()
    }
}
