//! Layered Cache - Unified Multi-Layer Cache
//!
//! Composes an ordered, frozen sequence of layers into one logical cache.
//! Index 0 is consulted first on every read; the last index is the
//! authoritative tier and the sole source of truth for counters.
//!
//! Layer operations are awaited one after another: first-hit-wins ordering
//! is part of the contract. There is no single-flight protection, so
//! concurrent `fetch` calls for the same cold key may each run `compute`.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, warn};

use super::layer::{Layer, MuteGuard};
use super::memory::MemoryLayer;
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::null::NullLayer;
use super::options::{negotiate, Options};
use super::value::Value;
use crate::config::{CacheConfig, LayerConfig};
use crate::error::{Error, Result};

/// Unified multi-layer cache coordinator
#[derive(Clone)]
pub struct LayeredCache {
    /// Ordered layers, fastest first
    layers: Arc<[Arc<dyn Layer>]>,
    /// Metrics collector
    metrics: Arc<CacheMetrics>,
}

impl std::fmt::Debug for LayeredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredCache")
            .field("layers", &self.layer_names())
            .finish()
    }
}

impl LayeredCache {
    /// Create a cache over the given layers, fastest first
    ///
    /// A single layer is accepted and behaves as a pass-through.
    pub fn new(layers: Vec<Arc<dyn Layer>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::Config(
                "a layered cache needs at least one layer".to_string(),
            ));
        }

        let names = layers.iter().map(|l| l.name().to_string()).collect();
        debug!(layers = ?layers.iter().map(|l| l.name()).collect::<Vec<_>>(), "layered cache created");

        Ok(Self {
            layers: layers.into(),
            metrics: Arc::new(CacheMetrics::new(names)),
        })
    }

    /// Build the layers described by `config`
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let layers = config
            .layers
            .iter()
            .map(|layer| -> Arc<dyn Layer> {
                match layer {
                    LayerConfig::Memory(c) => Arc::new(MemoryLayer::with_config(c.clone())),
                    LayerConfig::Null { name } => Arc::new(NullLayer::named(name.clone())),
                }
            })
            .collect();
        Self::new(layers)
    }

    /// Two memory layers: short-lived `l1` in front of longer-lived `l2`
    pub fn with_defaults() -> Self {
        let layers: Vec<Arc<dyn Layer>> = CacheConfig::default_memory_layers()
            .into_iter()
            .map(|c| Arc::new(MemoryLayer::with_config(c)) as Arc<dyn Layer>)
            .collect();
        Self {
            metrics: Arc::new(CacheMetrics::new(
                layers.iter().map(|l| l.name().to_string()).collect(),
            )),
            layers: layers.into(),
        }
    }

    pub fn layers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&Arc<dyn Layer>> {
        self.layers.get(index)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// The last, most durable layer
    pub fn authoritative(&self) -> &Arc<dyn Layer> {
        &self.layers[self.authoritative_index()]
    }

    #[inline]
    fn authoritative_index(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Always false: construction rejects an empty layer list
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Options as layer `index` should see them on a write
    fn options_for<'a>(&self, index: usize, options: &'a Options) -> Cow<'a, Options> {
        negotiate(
            options,
            self.layers[index].max_expiration(),
            index == self.authoritative_index(),
            Utc::now(),
        )
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Write a value into every layer
    ///
    /// Each layer receives its negotiated expiration. A failing layer does not
    /// stop the remaining writes; the authoritative layer's outcome is the
    /// result.
    pub async fn write(&self, key: &str, value: impl Into<Value>, options: &Options) -> Result<bool> {
        let value = value.into();
        self.fan_out_write(0..self.layers.len(), options, |layer, opts| {
            let value = value.clone();
            async move { layer.write(key, value, &opts).await }
        })
        .await
    }

    /// Write several entries into every layer
    pub async fn write_multi(&self, entries: &[(String, Value)], options: &Options) -> Result<bool> {
        if entries.is_empty() {
            return Ok(true);
        }
        self.fan_out_write(0..self.layers.len(), options, |layer, opts| async move {
            layer.write_multi(entries, &opts).await
        })
        .await
    }

    async fn fan_out_write<'a, F, Fut>(
        &'a self,
        indices: std::ops::Range<usize>,
        options: &'a Options,
        mut op: F,
    ) -> Result<bool>
    where
        F: FnMut(&'a Arc<dyn Layer>, Cow<'a, Options>) -> Fut,
        Fut: Future<Output = Result<bool>> + 'a,
    {
        let authoritative = self.authoritative_index();
        let mut outcome = Ok(false);

        for index in indices {
            let layer = &self.layers[index];
            let tracker = LatencyTracker::start();
            let result = op(layer, self.options_for(index, options)).await;
            self.metrics.record_write_latency(index, tracker.elapsed());

            match result {
                Ok(written) => {
                    if index == authoritative {
                        outcome = Ok(written);
                    }
                }
                Err(e) => {
                    warn!(layer = %layer.name(), error = %e, "layer write failed");
                    self.metrics.record_write_error(index);
                    if index == authoritative {
                        outcome = Err(e);
                    }
                }
            }
        }
        outcome
    }

    /// Promote entries into the layers that missed them
    ///
    /// `cold` maps a layer index to the entries it should receive. Failures are
    /// logged and never surface to the reader.
    async fn backfill(&self, cold: Vec<(usize, Vec<(String, Value)>)>, options: &Options) {
        for (index, entries) in cold {
            if entries.is_empty() {
                continue;
            }
            let layer = &self.layers[index];
            let opts = self.options_for(index, options);
            let result = match entries.as_slice() {
                [(key, value)] => layer.write(key, value.clone(), &opts).await,
                _ => layer.write_multi(&entries, &opts).await,
            };

            match result {
                Ok(_) => {
                    debug!(layer = %layer.name(), count = entries.len(), "backfilled entries");
                    self.metrics.record_backfill(index, entries.len() as u64);
                }
                Err(e) => {
                    warn!(layer = %layer.name(), error = %e, "backfill failed");
                    self.metrics.record_write_error(index);
                }
            }
        }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Read through the layers, promoting a hit into every faster layer
    ///
    /// A failing layer counts as a miss for that layer.
    pub async fn read(&self, key: &str, options: &Options) -> Option<Value> {
        for (index, layer) in self.layers.iter().enumerate() {
            let tracker = LatencyTracker::start();
            let result = layer.read(key, options).await;
            self.metrics.record_read_latency(index, tracker.elapsed());

            match result {
                Ok(Some(value)) => {
                    self.metrics.record_hit(index);
                    if index > 0 {
                        let cold = (0..index)
                            .map(|i| (i, vec![(key.to_string(), value.clone())]))
                            .collect();
                        self.backfill(cold, options).await;
                    }
                    return Some(value);
                }
                Ok(None) => self.metrics.record_miss(index),
                Err(e) => {
                    warn!(layer = %layer.name(), key, error = %e, "layer read failed, treating as miss");
                    self.metrics.record_read_error(index);
                    self.metrics.record_miss(index);
                }
            }
        }

        self.metrics.record_final_miss();
        None
    }

    /// Batch read with per-key promotion
    ///
    /// Each layer is asked only for keys still unresolved. A key found in
    /// layer `i` is written back into layers `0..i`, which all missed it.
    /// Returns the found entries in the caller's key order.
    pub async fn read_multi<K: AsRef<str>>(&self, keys: &[K], options: &Options) -> IndexMap<String, Value> {
        let requested = unique_keys(keys);
        let mut found: HashMap<String, Value> = HashMap::with_capacity(requested.len());
        let mut remaining = requested.clone();
        // Entries resolved by each layer
        let mut resolved: Vec<Vec<(String, Value)>> = vec![Vec::new(); self.layers.len()];

        for (index, layer) in self.layers.iter().enumerate() {
            if remaining.is_empty() {
                break;
            }

            let tracker = LatencyTracker::start();
            let result = layer.read_multi(&remaining, options).await;
            self.metrics.record_read_latency(index, tracker.elapsed());

            let mut hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(layer = %layer.name(), error = %e, "layer read_multi failed, treating as miss");
                    self.metrics.record_read_error(index);
                    HashMap::new()
                }
            };

            let mut still_missing = Vec::with_capacity(remaining.len());
            for key in remaining {
                match hits.remove(&key) {
                    Some(value) => {
                        self.metrics.record_hit(index);
                        resolved[index].push((key.clone(), value.clone()));
                        found.insert(key, value);
                    }
                    None => {
                        self.metrics.record_miss(index);
                        still_missing.push(key);
                    }
                }
            }
            remaining = still_missing;
        }

        for _ in &remaining {
            self.metrics.record_final_miss();
        }

        // Layer i is cold for everything resolved below it
        let cold = (0..self.layers.len())
            .map(|i| {
                let entries: Vec<(String, Value)> =
                    resolved[i + 1..].iter().flatten().cloned().collect();
                (i, entries)
            })
            .collect();
        self.backfill(cold, options).await;

        requested
            .into_iter()
            .filter_map(|key| found.remove(&key).map(|v| (key, v)))
            .collect()
    }

    /// Read through the layers, computing and storing the value on a miss
    ///
    /// With `force` the read is skipped and `compute` always runs. With
    /// `skip_nil` a nil result is returned but not cached. Compute errors
    /// propagate and nothing is written.
    pub async fn fetch<F, Fut>(&self, key: &str, options: &Options, compute: F) -> Result<Value>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if !options.force {
            if let Some(value) = self.read(key, options).await {
                return Ok(value);
            }
        }

        let value = compute(key.to_string()).await?;
        self.metrics.record_computes(1);

        if options.skip_nil && value.is_nil() {
            debug!(key, "skipping nil result");
            return Ok(value);
        }

        self.write(key, value.clone(), options).await?;
        Ok(value)
    }

    /// Fetch without a compute function
    ///
    /// Equivalent to [`read`](Self::read); `force` is a usage error because
    /// there is nothing to recompute with.
    pub async fn fetch_existing(&self, key: &str, options: &Options) -> Result<Option<Value>> {
        if options.force {
            return Err(Error::Usage(
                "fetch with force requires a compute function".to_string(),
            ));
        }
        Ok(self.read(key, options).await)
    }

    /// Batch fetch: read what is cached, compute the rest
    ///
    /// Computed keys missed every layer, so they are written to every layer.
    /// The result holds every requested key in the caller's order, with
    /// `Value::Nil` for absent computed values.
    pub async fn fetch_multi<K, F, Fut>(
        &self,
        keys: &[K],
        options: &Options,
        mut compute: F,
    ) -> Result<IndexMap<String, Value>>
    where
        K: AsRef<str>,
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let requested = unique_keys(keys);
        let mut found = if options.force {
            IndexMap::new()
        } else {
            self.read_multi(&requested, options).await
        };

        let mut computed: Vec<(String, Value)> = Vec::new();
        for key in requested.iter().filter(|k| !found.contains_key(k.as_str())) {
            let value = compute(key.clone()).await?;
            computed.push((key.clone(), value));
        }
        self.metrics.record_computes(computed.len() as u64);

        let to_write: Vec<(String, Value)> = computed
            .iter()
            .filter(|(_, v)| !(options.skip_nil && v.is_nil()))
            .cloned()
            .collect();
        self.write_multi(&to_write, options).await?;

        found.extend(computed);
        Ok(requested
            .into_iter()
            .filter_map(|key| found.swap_remove(&key).map(|v| (key, v)))
            .collect())
    }

    /// Batch fetch without a compute function
    pub async fn fetch_multi_existing<K: AsRef<str>>(
        &self,
        keys: &[K],
        options: &Options,
    ) -> Result<IndexMap<String, Value>> {
        if options.force {
            return Err(Error::Usage(
                "fetch_multi with force requires a compute function".to_string(),
            ));
        }
        Ok(self.read_multi(keys, options).await)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Add `amount` on the authoritative layer and invalidate faster layers
    ///
    /// Faster layers lose the key instead of receiving the new number, so a
    /// concurrent increment can never be overwritten by a stale value.
    pub async fn increment(&self, key: &str, amount: i64, options: &Options) -> Result<i64> {
        let index = self.authoritative_index();
        let value = self.layers[index].increment(key, amount, options).await?;
        self.invalidate_faster_layers(key, options).await;
        Ok(value)
    }

    /// Subtract `amount` on the authoritative layer and invalidate faster layers
    pub async fn decrement(&self, key: &str, amount: i64, options: &Options) -> Result<i64> {
        let index = self.authoritative_index();
        let value = self.layers[index].decrement(key, amount, options).await?;
        self.invalidate_faster_layers(key, options).await;
        Ok(value)
    }

    async fn invalidate_faster_layers(&self, key: &str, options: &Options) {
        for (index, layer) in self.layers[..self.authoritative_index()].iter().enumerate() {
            match layer.delete(key, options).await {
                Ok(_) => {
                    self.metrics.record_invalidation(index);
                    debug!(layer = %layer.name(), key, "invalidated counter");
                }
                Err(e) => {
                    warn!(layer = %layer.name(), key, error = %e, "counter invalidation failed");
                    self.metrics.record_write_error(index);
                }
            }
        }
    }

    // =========================================================================
    // Existence / deletion / lifecycle
    // =========================================================================

    /// True if any layer has the key; never promotes
    pub async fn exists(&self, key: &str, options: &Options) -> bool {
        for (index, layer) in self.layers.iter().enumerate() {
            match layer.exists(key, options).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(layer = %layer.name(), key, error = %e, "layer exists check failed");
                    self.metrics.record_read_error(index);
                }
            }
        }
        false
    }

    /// Remove a key from every layer
    ///
    /// Best effort: `true` if any layer held the key.
    pub async fn delete(&self, key: &str, options: &Options) -> Result<bool> {
        let removed = self
            .fan_out("delete", |layer| async move { layer.delete(key, options).await })
            .await?;
        Ok(removed.into_iter().any(|r| r))
    }

    /// Remove several keys from every layer
    ///
    /// Returns the largest per-layer removal count.
    pub async fn delete_multi<K: AsRef<str>>(&self, keys: &[K], options: &Options) -> Result<usize> {
        let keys = unique_keys(keys);
        let keys = keys.as_slice();
        let counts = self
            .fan_out("delete_multi", |layer| async move {
                layer.delete_multi(keys, options).await
            })
            .await?;
        Ok(counts.into_iter().max().unwrap_or(0))
    }

    /// Remove every key matching a regular expression from every layer
    ///
    /// Returns the largest per-layer removal count. An invalid pattern is
    /// rejected before any layer is touched.
    pub async fn delete_matched(&self, pattern: &str, options: &Options) -> Result<usize> {
        let pattern = Regex::new(pattern)?;
        let pattern = &pattern;
        let counts = self
            .fan_out("delete_matched", |layer| async move {
                layer.delete_matched(pattern, options).await
            })
            .await?;
        Ok(counts.into_iter().max().unwrap_or(0))
    }

    /// Remove every entry from every layer
    pub async fn clear(&self, options: &Options) -> Result<()> {
        self.fan_out("clear", |layer| async move { layer.clear(options).await })
            .await?;
        Ok(())
    }

    /// Purge expired entries everywhere, returning the total purged
    pub async fn cleanup(&self, options: &Options) -> Result<usize> {
        let purged = self
            .fan_out("cleanup", |layer| async move { layer.cleanup(options).await })
            .await?;
        Ok(purged.into_iter().sum())
    }

    /// Run `op` against every layer in order
    ///
    /// Collects the results of layers that succeeded. Failures are logged; the
    /// authoritative layer's failure is returned after all layers ran.
    async fn fan_out<'a, T, F, Fut>(&'a self, op_name: &'static str, mut op: F) -> Result<Vec<T>>
    where
        F: FnMut(&'a Arc<dyn Layer>) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let authoritative = self.authoritative_index();
        let mut results = Vec::with_capacity(self.layers.len());
        let mut failure = None;

        for (index, layer) in self.layers.iter().enumerate() {
            match op(layer).await {
                Ok(value) => results.push(value),
                Err(e) => {
                    warn!(layer = %layer.name(), op = op_name, error = %e, "layer operation failed");
                    self.metrics.record_write_error(index);
                    if index == authoritative {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Permanently silence instrumentation on every layer
    pub fn silence(&self) {
        for layer in self.layers.iter() {
            layer.silence();
        }
    }

    /// Run `work` with every layer's instrumentation muted
    ///
    /// The mute lifts when `work` completes, is dropped, or panics.
    pub async fn mute<Fut: Future>(&self, work: Fut) -> Fut::Output {
        let _guard = MuteGuard::enter(Arc::clone(&self.layers));
        work.await
    }
}

/// Caller keys with duplicates removed, first occurrence wins
fn unique_keys<K: AsRef<str>>(keys: &[K]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .map(|k| k.as_ref())
        .filter(|k| seen.insert(*k))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
