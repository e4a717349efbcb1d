//! Layered Cache - Tiered Cache Coordinator
//!
//! Presents an ordered sequence of independent key-value stores as one
//! logical cache. Reads promote values from slower tiers into faster ones,
//! writes propagate to every tier with per-tier expiration limits, and
//! counters stay consistent by living only in the last, authoritative tier.
//!
//! # Example
//!
//! ```no_run
//! use layered_cache::{LayeredCache, Options, Value};
//!
//! # async fn demo() -> layered_cache::Result<()> {
//! let cache = LayeredCache::with_defaults();
//! let opts = Options::default();
//!
//! cache.write("greeting", "hello", &opts).await?;
//! let value = cache
//!     .fetch("answer", &opts, |_key| async { Ok(Value::from("42")) })
//!     .await?;
//! assert_eq!(value.as_str(), Some("42"));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Coordinator, layer contract and provided layers
//! - [`config`] - YAML-backed layer configuration
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{
    Layer, LayeredCache, MemoryLayer, MemoryLayerConfig, MetricsSnapshot, NullLayer, Options,
    Value,
};
pub use config::{CacheConfig, LayerConfig};
pub use error::{Error, Result};
