//! Layered Cache System
//!
//! One logical cache composed from an ordered sequence of independent layers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          LayeredCache                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Layer 0 (fastest)    │ Layer 1             │ Layer N-1 (authoritative) │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────────┐    │
//! │  │ MemoryLayer    │   │ │ MemoryLayer    │  │ │ any `Layer` impl   │    │
//! │  │ short TTL      │   │ │ longer TTL     │  │ │ counters live here │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────────┘    │
//! │         ▲             │         ▲           │           │               │
//! │         └─────────────┴─────────┴───────────┴───────────┘               │
//! │                      read-through promotion                             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Behaviour
//!
//! - Reads go front to back; the first hit is promoted into every layer that
//!   missed it
//! - Writes go to every layer, with expirations negotiated against each
//!   layer's own maximum
//! - Counters change only on the authoritative layer; faster layers drop the
//!   key and re-promote it on the next read
//! - A failing non-authoritative layer degrades to a miss or a skipped write

mod layer;
mod layered;
mod memory;
mod metrics;
mod null;
mod options;
mod shard;
mod value;

#[cfg(test)]
mod proptest;

use std::time::Duration;

pub use layer::{Instrumentation, Layer};
pub use layered::LayeredCache;
pub use memory::{MemoryLayer, MemoryLayerConfig, MemoryLayerStats};
pub use metrics::{CacheMetrics, LayerMetricsSnapshot, MetricsSnapshot};
pub use null::NullLayer;
pub use options::{negotiate, Options};
pub use shard::ShardedMap;
pub use value::Value;

/// Default capacity for a memory layer without an explicit one (32MB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 32 * 1024 * 1024;

/// Default front layer TTL
pub const DEFAULT_L1_EXPIRES_IN: Duration = Duration::from_secs(5 * 60);

/// Default front layer capacity (16MB)
pub const DEFAULT_L1_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default back layer TTL
pub const DEFAULT_L2_EXPIRES_IN: Duration = Duration::from_secs(24 * 60 * 60);

/// Default back layer capacity (32MB)
pub const DEFAULT_L2_CAPACITY: u64 = 32 * 1024 * 1024;

// =============================================================================
// Tests
// =============================================================================
