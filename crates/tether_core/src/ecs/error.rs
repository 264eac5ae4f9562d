use crate::ecs::{ComponentId, EntityId};
use thiserror::Error;

/// Errors reported by `World` operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {entity} is not alive")]
    EntityNotAlive { entity: EntityId },

    #[error("component id {component} is not registered")]
    ComponentNotRegistered { component: ComponentId },

    #[error("component id {component} expects {expected} bytes but received {actual} bytes")]
    SizeMismatch {
        component: ComponentId,
        expected: usize,
        actual: usize,
    },

    #[error(
        "component '{name}' already registered with size {size}/align {align}, \
         refusing size {new_size}/align {new_align}"
    )]
    LayoutConflict {
        name: String,
        size: usize,
        align: usize,
        new_size: usize,
        new_align: usize,
    },

    #[error("component '{name}' declares size {size} but its layout is {layout_size} bytes")]
    LayoutSizeMismatch {
        name: String,
        size: usize,
        layout_size: usize,
    },

    #[error("component table is full")]
    ComponentTableFull,

    #[error("entity table is full")]
    EntityTableFull,
}
