//! Tether Bridge
//!
//! Lets a dynamically-typed value layer drive `tether_core` worlds:
//! - Kind-tagged, generation-checked tokens for worlds, entities, component
//!   types, queries and systems
//! - Component type registry with typed codecs and reflection layouts
//! - Recursive marshalling between component bytes and `Value`
//! - Observer-invalidated query caches
//! - Per-frame script system dispatch with instrumentation
//! - `WorldManager`, the boundary that turns errors into logged defaults

pub mod components;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handles;
pub mod instrumentation;
pub mod manager;
pub mod marshal;
pub mod meta;
pub mod objects;
pub mod opaque;
pub mod owner;
pub mod query_cache;
pub mod token;
pub mod value;
pub mod world;

pub use config::{BridgeConfig, ConfigError};
pub use dispatch::{DispatchMode, DispatchScheduler, FrameReport, SystemCallback, SystemInfo};
pub use error::{BridgeError, MarshalError, MetaError};
pub use instrumentation::SystemStats;
pub use manager::WorldManager;
pub use meta::{ComponentMetaRegistry, ComponentType, Serializable};
pub use owner::{RehomeFailed, Rehomed, ResourceOwner};
pub use query_cache::{CachingStrategy, EntityRecord, QueryStats};
pub use token::{Token, TokenKind};
pub use value::{Dictionary, Value};
pub use world::{BridgeWorld, QueryDescriptor};

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
