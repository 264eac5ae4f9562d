//! Tether Core
//!
//! The columnar entity-component store the bridge talks to:
//! - Generational entity handles
//! - Per-world component type table with reflection layouts
//! - Change observers (add / set / remove)
//! - Structured queries and raw full-table iteration
//! - Reflective cursor over raw component bytes

pub mod ecs;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
