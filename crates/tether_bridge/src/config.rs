//! Bridge configuration

use crate::query_cache::CachingStrategy;
use crate::token::MAX_WORLD_ID;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub handles: HandleConfig,
    pub max_worlds: u16,
    pub queries: QueryConfig,
    pub instrumentation: InstrumentationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandleConfig {
    pub chunk_size: usize,
    pub entity_capacity: u64,
    pub component_type_capacity: u64,
    pub query_capacity: u64,
    pub system_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_strategy: CachingStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Ring size for detailed per-invocation timing.
    pub sample_capacity: usize,
    pub enabled_by_default: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handles: HandleConfig::default(),
            max_worlds: MAX_WORLD_ID,
            queries: QueryConfig::default(),
            instrumentation: InstrumentationConfig::default(),
        }
    }
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            entity_capacity: u32::MAX as u64,
            component_type_capacity: 1 << 16,
            query_capacity: 1 << 16,
            system_capacity: 1 << 16,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_strategy: CachingStrategy::CacheEntities,
        }
    }
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 256,
            enabled_by_default: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handles.chunk_size == 0 {
            return Err(ConfigError::Invalid("handles.chunk_size must be positive".into()));
        }
        if self.max_worlds == 0 || self.max_worlds > MAX_WORLD_ID {
            return Err(ConfigError::Invalid(format!(
                "max_worlds must be in 1..={MAX_WORLD_ID}, got {}",
                self.max_worlds
            )));
        }
        if self.handles.entity_capacity > u32::MAX as u64 {
            return Err(ConfigError::Invalid(
                "handles.entity_capacity exceeds the 32-bit token index".into(),
            ));
        }
        if self.instrumentation.sample_capacity == 0 {
            return Err(ConfigError::Invalid(
                "instrumentation.sample_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BridgeConfig::from_json_str(
            r#"{ "max_worlds": 8, "queries": { "default_strategy": "CacheFull" } }"#,
        )
        .unwrap();
        assert_eq!(config.max_worlds, 8);
        assert_eq!(config.queries.default_strategy, CachingStrategy::CacheFull);
        assert_eq!(config.handles.chunk_size, 1024);
        assert_eq!(config.instrumentation.sample_capacity, 256);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "max_worlds": 5000 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "handles": { "chunk_size": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_default_round_trips() {
        let text = serde_json::to_string(&BridgeConfig::default()).unwrap();
        assert_eq!(BridgeConfig::from_json_str(&text).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            BridgeConfig::from_path("/nonexistent/tether.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
