//! Memory Layer - In-Process Cache Tier
//!
//! Low-latency layer backed by a sharded hashmap, bounded by both a default
//! TTL and a byte capacity.
//!
//! # Design
//!
//! - ShardedMap for minimal lock contention
//! - Expired entries are misses, removed lazily and by `cleanup`
//! - Capacity-based LRU eviction with configurable high/low watermarks
//! - Counters are updated under the owning shard's write lock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::layer::{Instrumentation, Layer};
use super::options::Options;
use super::shard::ShardedMap;
use super::value::Value;
use super::DEFAULT_MEMORY_CAPACITY;
use crate::error::{Error, Result};

/// Memory layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLayerConfig {
    /// Layer name for logs and metrics
    pub name: String,
    /// Default (and maximum advertised) TTL
    #[serde(with = "crate::config::opt_secs", rename = "expires_in_secs")]
    pub expires_in: Option<Duration>,
    /// Maximum capacity in bytes
    pub capacity: u64,
    /// High watermark percentage (trigger eviction)
    pub high_watermark: f64,
    /// Low watermark percentage (stop eviction)
    pub low_watermark: f64,
    /// Eviction batch size
    pub eviction_batch_size: usize,
}

impl Default for MemoryLayerConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            expires_in: None,
            capacity: DEFAULT_MEMORY_CAPACITY,
            high_watermark: 0.90, // Start eviction at 90%
            low_watermark: 0.80,  // Stop eviction at 80%
            eviction_batch_size: 1000,
        }
    }
}

impl MemoryLayerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    deadline: Option<Instant>,
    size: u64,
    last_access: Arc<AtomicU64>,
}

impl StoredEntry {
    fn new(key: &str, value: Value, deadline: Option<Instant>, tick: u64) -> Self {
        let size = key.len() as u64 + value.size();
        Self {
            value,
            deadline,
            size,
            last_access: Arc::new(AtomicU64::new(tick)),
        }
    }

    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    #[inline]
    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }
}

/// Memory layer - in-process TTL + capacity bounded store
pub struct MemoryLayer {
    /// Sharded storage
    storage: ShardedMap<StoredEntry>,
    /// Configuration
    config: MemoryLayerConfig,
    /// Current size in bytes
    current_size: AtomicU64,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    instrumentation: Instrumentation,
}

impl MemoryLayer {
    /// Create a memory layer with default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryLayerConfig::default())
    }

    /// Create a memory layer with custom configuration
    pub fn with_config(config: MemoryLayerConfig) -> Self {
        Self {
            storage: ShardedMap::new(),
            config,
            current_size: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            instrumentation: Instrumentation::new(),
        }
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    // Additions happen under the shard lock so a later removal never
    // subtracts bytes that were not added yet.
    #[inline]
    fn reserve(&self, bytes: u64) {
        self.current_size.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    fn release(&self, bytes: u64) {
        self.current_size.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn instrument(&self, op: &'static str, key: &str) {
        if !self.instrumentation.is_quiet() {
            debug!(layer = %self.config.name, op, key, "cache operation");
        }
    }

    /// Deadline for a new entry: the caller's TTL, else this layer's default
    ///
    /// A TTL too large to represent as an instant never expires.
    fn deadline_for(&self, options: &Options, now: Instant) -> Option<Instant> {
        options
            .effective_ttl(Utc::now())
            .or(self.config.expires_in)
            .and_then(|ttl| now.checked_add(ttl))
    }

    /// Live entry lookup; expired entries are dropped on the way
    fn lookup(&self, key: &str) -> Option<StoredEntry> {
        let now = Instant::now();
        let entry = self.storage.get(key)?;
        if entry.is_expired(now) {
            self.remove_if_expired(key, now);
            return None;
        }
        entry.touch(self.tick());
        Some(entry)
    }

    fn remove_if_expired(&self, key: &str, now: Instant) {
        let removed = self.storage.modify(key, |current| match current {
            Some(e) if e.is_expired(now) => (None, Some(e.size)),
            other => (other, None),
        });
        if let Some(size) = removed {
            self.release(size);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn store(&self, key: &str, entry: StoredEntry) {
        self.storage.modify(key, |old| {
            self.reserve(entry.size);
            if let Some(old) = old {
                self.release(old.size);
            }
            (Some(entry), ())
        });
        if self.should_evict() {
            self.evict();
        }
    }

    /// Check if eviction should be triggered
    fn should_evict(&self) -> bool {
        let current = self.size() as f64;
        let capacity = self.config.capacity as f64;
        current / capacity >= self.config.high_watermark
    }

    /// Check if eviction should continue
    fn should_continue_eviction(&self) -> bool {
        let current = self.size() as f64;
        let capacity = self.config.capacity as f64;
        current / capacity > self.config.low_watermark
    }

    /// Evict expired entries, then least recently used, until the low watermark
    fn evict(&self) {
        let now = Instant::now();
        let mut candidates: Vec<(String, bool, u64)> = self
            .storage
            .entries()
            .into_iter()
            .map(|(key, e)| {
                let expired = e.is_expired(now);
                (key, expired, e.last_access.load(Ordering::Relaxed))
            })
            .collect();

        // Expired first, then oldest access
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        let mut evicted = 0;
        for (key, _, _) in candidates {
            if !self.should_continue_eviction() {
                break;
            }
            if let Some(removed) = self.storage.remove(&key) {
                self.release(removed.size);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                evicted += 1;
                if evicted >= self.config.eviction_batch_size {
                    break;
                }
            }
        }

        if evicted > 0 && !self.instrumentation.is_quiet() {
            debug!(layer = %self.config.name, evicted, size = self.size(), "evicted entries");
        }
    }

    /// Apply `op` to the counter at `key` under the shard write lock
    fn update_counter<F>(&self, op_name: &'static str, key: &str, options: &Options, op: F) -> Result<i64>
    where
        F: FnOnce(i64) -> Option<i64>,
    {
        let key = options.namespaced_key(key);
        self.instrument(op_name, &key);

        let now = Instant::now();
        let fresh_deadline = self.deadline_for(options, now);
        let tick = self.tick();

        let outcome = self.storage.modify(&key, |current| {
            let live = match current {
                Some(e) if e.is_expired(now) => {
                    self.release(e.size);
                    None
                }
                other => other,
            };

            let parsed = match &live {
                None => Ok(0),
                Some(e) if e.value.is_nil() => Ok(0),
                Some(e) => e
                    .value
                    .as_counter()
                    .ok_or_else(|| Error::NonNumeric { key: key.to_string() }),
            };
            let base = match parsed {
                Ok(n) => n,
                Err(e) => return (live, Err(e)),
            };
            let next = match op(base) {
                Some(n) => n,
                None => return (live, Err(Error::layer(&self.config.name, "counter overflow"))),
            };

            // Existing counters keep their deadline
            let deadline = live.as_ref().map_or(fresh_deadline, |e| e.deadline);
            let entry = StoredEntry::new(&key, Value::from_counter(next), deadline, tick);
            self.reserve(entry.size);
            if let Some(old) = live {
                self.release(old.size);
            }
            (Some(entry), Ok(next))
        });

        if outcome.is_ok() && self.should_evict() {
            self.evict();
        }
        outcome
    }

    /// Get current size in bytes
    pub fn size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Number of stored entries, including not-yet-purged expired ones
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn config(&self) -> &MemoryLayerConfig {
        &self.config
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Get utilization percentage
    pub fn utilization(&self) -> f64 {
        self.size() as f64 / self.capacity() as f64
    }

    /// Get layer statistics
    pub fn stats(&self) -> MemoryLayerStats {
        MemoryLayerStats {
            size: self.size(),
            capacity: self.capacity(),
            entries: self.len(),
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions(),
            expirations: self.expirations(),
            utilization: self.utilization(),
        }
    }
}

impl Default for MemoryLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory layer statistics
#[derive(Debug, Clone, Serialize)]
pub struct MemoryLayerStats {
    pub size: u64,
    pub capacity: u64,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Utilization percentage (0.0 - 1.0)
    pub utilization: f64,
}

#[async_trait]
impl Layer for MemoryLayer {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn max_expiration(&self) -> Option<Duration> {
        self.config.expires_in
    }

    fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    async fn read(&self, key: &str, options: &Options) -> Result<Option<Value>> {
        let key = options.namespaced_key(key);
        self.instrument("read", &key);
        match self.lookup(&key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, value: Value, options: &Options) -> Result<bool> {
        let key = options.namespaced_key(key);
        self.instrument("write", &key);

        let now = Instant::now();
        let entry = StoredEntry::new(&key, value, self.deadline_for(options, now), self.tick());
        if entry.size > self.config.capacity {
            debug!(layer = %self.config.name, key = %key, size = entry.size, "entry exceeds layer capacity");
            return Ok(false);
        }

        self.store(&key, entry);
        Ok(true)
    }

    async fn delete(&self, key: &str, options: &Options) -> Result<bool> {
        let key = options.namespaced_key(key);
        self.instrument("delete", &key);
        match self.storage.remove(&key) {
            Some(removed) => {
                self.release(removed.size);
                Ok(!removed.is_expired(Instant::now()))
            }
            None => Ok(false),
        }
    }

    async fn delete_matched(&self, pattern: &Regex, options: &Options) -> Result<usize> {
        self.instrument("delete_matched", pattern.as_str());
        let prefix = options.namespace.as_ref().map(|ns| format!("{}:", ns));

        let removed = self.storage.retain(|key, _| {
            let candidate = match &prefix {
                Some(p) => match key.strip_prefix(p.as_str()) {
                    Some(rest) => rest,
                    None => return true,
                },
                None => key,
            };
            !pattern.is_match(candidate)
        });

        for (_, entry) in &removed {
            self.release(entry.size);
        }
        Ok(removed.len())
    }

    async fn exists(&self, key: &str, options: &Options) -> Result<bool> {
        let key = options.namespaced_key(key);
        self.instrument("exists", &key);
        Ok(self.lookup(&key).is_some())
    }

    async fn increment(&self, key: &str, amount: i64, options: &Options) -> Result<i64> {
        self.update_counter("increment", key, options, |n| n.checked_add(amount))
    }

    async fn decrement(&self, key: &str, amount: i64, options: &Options) -> Result<i64> {
        self.update_counter("decrement", key, options, |n| n.checked_sub(amount))
    }

    async fn clear(&self, _options: &Options) -> Result<()> {
        self.instrument("clear", "*");
        let removed = self.storage.retain(|_, _| false);
        for (_, entry) in &removed {
            self.release(entry.size);
        }
        Ok(())
    }

    async fn cleanup(&self, _options: &Options) -> Result<usize> {
        self.instrument("cleanup", "*");
        let now = Instant::now();
        let removed = self.storage.retain(|_, entry| !entry.is_expired(now));
        for (_, entry) in &removed {
            self.release(entry.size);
        }
        self.expirations
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        Ok(removed.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
