use crate::token::{Token, TokenKind};
use tether_core::ecs::{CursorError, WorldError};
use thiserror::Error;

/// Errors surfaced by bridge operations.
///
/// `WorldManager` converts these into benign defaults at its boundary after
/// logging them; `BridgeWorld` returns them as-is.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("token {token} is invalid or stale")]
    InvalidToken { token: Token },

    #[error("token {token} belongs to world {owner}, not world {world}")]
    CrossWorldMisuse { token: Token, owner: u16, world: u16 },

    #[error("token {token} is not a {expected:?} token")]
    WrongKind { token: Token, expected: TokenKind },

    #[error("world {world} does not exist")]
    WorldNotFound { world: Token },

    #[error("component '{name}' is not bound to this world")]
    ComponentNotBound { name: String },

    #[error("entity {entity} has no component '{name}'")]
    ComponentNotFound { entity: Token, name: String },

    #[error("{kind:?} capacity of {capacity} exhausted")]
    CapacityExceeded { kind: TokenKind, capacity: u64 },

    #[error("component '{name}' has pooled fields and cannot be updated in place")]
    PooledFields { name: String },

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    World(#[from] WorldError),
}

/// Component type registration failures (setup time).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetaError {
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

    #[error("component '{name}' declares {fields} fields, limit is {limit}")]
    TypeTableTooLarge {
        name: String,
        fields: usize,
        limit: usize,
    },

    #[error("field '{field}' of component '{component}' has unknown type '{ty}'")]
    UnknownFieldType {
        component: String,
        field: String,
        ty: String,
    },

    #[error("failed to bind component '{name}': {source}")]
    Bind { name: String, source: WorldError },
}

/// Conversion failures between `Value` and component bytes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarshalError {
    #[error("'{path}' expects {expected}, got {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{path}' references an entity that does not resolve in this world")]
    UnresolvedEntity { path: String },

    #[error("codec for '{component}' failed: {message}")]
    Codec { component: String, message: String },

    #[error("component '{component}' expects {expected} bytes, buffer holds {actual}")]
    BufferSize {
        component: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Cursor(#[from] CursorError),
}
