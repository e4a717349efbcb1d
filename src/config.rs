//! Cache Configuration
//!
//! Declarative description of a layer sequence, loadable from YAML:
//!
//! ```yaml
//! layers:
//!   - kind: memory
//!     name: l1
//!     expires_in_secs: 300
//!     capacity: 16777216
//!   - kind: memory
//!     name: l2
//!     expires_in_secs: 86400
//! ```
//!
//! Omitting `layers` yields the default two memory layers. The no-op layer
//! kind must be quoted (`kind: "null"`) so YAML does not read it as null.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::{
    MemoryLayerConfig, DEFAULT_L1_CAPACITY, DEFAULT_L1_EXPIRES_IN, DEFAULT_L2_CAPACITY,
    DEFAULT_L2_EXPIRES_IN,
};
use crate::error::{Error, Result};

/// Layered cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Layers in lookup order; the last one is authoritative
    #[serde(default = "CacheConfig::default_layers")]
    pub layers: Vec<LayerConfig>,
}

/// A single layer definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerConfig {
    Memory(MemoryLayerConfig),
    Null { name: String },
}

impl LayerConfig {
    pub fn name(&self) -> &str {
        match self {
            LayerConfig::Memory(c) => &c.name,
            LayerConfig::Null { name } => name,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            layers: Self::default_layers(),
        }
    }
}

impl CacheConfig {
    /// `l1` (5 minutes, 16MB) in front of `l2` (1 day, 32MB)
    pub fn default_memory_layers() -> Vec<MemoryLayerConfig> {
        vec![
            MemoryLayerConfig::named("l1")
                .with_expires_in(DEFAULT_L1_EXPIRES_IN)
                .with_capacity(DEFAULT_L1_CAPACITY),
            MemoryLayerConfig::named("l2")
                .with_expires_in(DEFAULT_L2_EXPIRES_IN)
                .with_capacity(DEFAULT_L2_CAPACITY),
        ]
    }

    fn default_layers() -> Vec<LayerConfig> {
        Self::default_memory_layers()
            .into_iter()
            .map(LayerConfig::Memory)
            .collect()
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Check the configuration before any layer is built
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::Config(
                "at least one layer must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for layer in &self.layers {
            let name = layer.name();
            if name.is_empty() {
                return Err(Error::Config("layer name must not be empty".to_string()));
            }
            if !names.insert(name) {
                return Err(Error::Config(format!("duplicate layer name '{}'", name)));
            }

            if let LayerConfig::Memory(c) = layer {
                if c.capacity == 0 {
                    return Err(Error::Config(format!(
                        "layer '{}': capacity must be greater than zero",
                        name
                    )));
                }
                let watermarks_ok = c.low_watermark > 0.0
                    && c.low_watermark < c.high_watermark
                    && c.high_watermark <= 1.0;
                if !watermarks_ok {
                    return Err(Error::Config(format!(
                        "layer '{}': watermarks must satisfy 0 < low ({}) < high ({}) <= 1",
                        name, c.low_watermark, c.high_watermark
                    )));
                }
                if c.eviction_batch_size == 0 {
                    return Err(Error::Config(format!(
                        "layer '{}': eviction_batch_size must be greater than zero",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Serde adapter for `Option<Duration>` stored as whole seconds
pub(crate) mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

// =============================================================================
// Tests
// =============================================================================
