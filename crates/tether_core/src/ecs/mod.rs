//! Entity Component System core types.
//!
//! Component data is stored as raw bytes in one column per component type.
//! Every component type carries its size and alignment, and optionally a
//! reflection layout (`TypeDescriptor`) describing its fields so that
//! dynamically-typed callers can walk it with a `Cursor`.
//!
//! Component ids are local to a `World`: the same component name may be
//! bound to different ids in different worlds.

mod component;
mod cursor;
mod entity;
mod error;
mod observer;
mod query;
mod reflect;
mod storage;
mod strings;
mod world;

pub use component::{ComponentId, ComponentInfo, ComponentTable};
pub use cursor::{Cursor, CursorError};
pub use entity::EntityId;
pub use error::WorldError;
pub use observer::{ObserverCallback, ObserverEvent, ObserverId, ObserverTrigger};
pub use query::Query;
pub use reflect::{Member, PrimitiveKind, StructBuilder, TypeDescriptor, TypeKind};
pub use storage::Column;
pub use strings::{StringId, StringPool};
pub use world::World;
