//! Layer Capability Contract
//!
//! A layer is one independent key-value store inside a [`LayeredCache`].
//! The coordinator depends only on this trait; concrete stores (in-process
//! memory, remote services, no-op) implement it.
//!
//! [`LayeredCache`]: super::LayeredCache

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::options::Options;
use super::value::Value;
use crate::error::{Error, Result};

/// Instrumentation switches shared by every layer
///
/// `silence` is permanent; `mute` nests, so overlapping mutes only lift once
/// the outermost one exits.
#[derive(Debug, Default)]
pub struct Instrumentation {
    silenced: AtomicBool,
    mute_depth: AtomicUsize,
}

impl Instrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permanently suppress instrumentation
    pub fn silence(&self) {
        self.silenced.store(true, Ordering::Relaxed);
    }

    pub fn enter_mute(&self) {
        self.mute_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exit_mute(&self) {
        // Never underflow on an unbalanced exit
        let _ = self
            .mute_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.mute_depth.load(Ordering::Acquire) > 0
    }

    /// Whether instrumentation events should be suppressed right now
    #[inline]
    pub fn is_quiet(&self) -> bool {
        self.is_silenced() || self.is_muted()
    }
}

/// Key-value store participating in a layered cache
#[async_trait]
pub trait Layer: Send + Sync {
    /// Human-readable layer name used in logs and metrics
    fn name(&self) -> &str;

    /// Longest TTL this layer is configured to hold an entry, if capped
    fn max_expiration(&self) -> Option<Duration>;

    /// Mute/silence switches for this layer
    fn instrumentation(&self) -> &Instrumentation;

    /// Read a key; `None` is a miss, `Some(Value::Nil)` is a cached nil
    async fn read(&self, key: &str, options: &Options) -> Result<Option<Value>>;

    /// Read several keys, returning only the ones found
    async fn read_multi(&self, keys: &[String], options: &Options) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key, options).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn write(&self, key: &str, value: Value, options: &Options) -> Result<bool>;

    async fn write_multi(&self, entries: &[(String, Value)], options: &Options) -> Result<bool> {
        let mut all = true;
        for (key, value) in entries {
            all &= self.write(key, value.clone(), options).await?;
        }
        Ok(all)
    }

    /// Remove a key; `true` if it was present
    async fn delete(&self, key: &str, options: &Options) -> Result<bool>;

    /// Remove several keys, returning how many were present
    async fn delete_multi(&self, keys: &[String], options: &Options) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key, options).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every key matching `pattern`, returning how many were removed
    async fn delete_matched(&self, pattern: &Regex, options: &Options) -> Result<usize>;

    async fn exists(&self, key: &str, options: &Options) -> Result<bool>;

    /// Atomically add `amount`, returning the new counter value
    async fn increment(&self, key: &str, amount: i64, options: &Options) -> Result<i64>;

    /// Atomically subtract `amount`, returning the new counter value
    ///
    /// The default negates `amount`, so `i64::MIN` is rejected; layers that
    /// can subtract directly should override this.
    async fn decrement(&self, key: &str, amount: i64, options: &Options) -> Result<i64> {
        match amount.checked_neg() {
            Some(negated) => self.increment(key, negated, options).await,
            None => Err(Error::layer(self.name(), "counter overflow")),
        }
    }

    /// Remove every entry
    async fn clear(&self, options: &Options) -> Result<()>;

    /// Purge expired entries, returning how many were purged
    async fn cleanup(&self, options: &Options) -> Result<usize>;

    fn silence(&self) {
        self.instrumentation().silence();
    }

    fn enter_mute(&self) {
        self.instrumentation().enter_mute();
    }

    fn exit_mute(&self) {
        self.instrumentation().exit_mute();
    }
}

/// Keeps a set of layers muted until dropped
pub(crate) struct MuteGuard {
    layers: Arc<[Arc<dyn Layer>]>,
}

impl MuteGuard {
    pub(crate) fn enter(layers: Arc<[Arc<dyn Layer>]>) -> Self {
        for layer in layers.iter() {
            layer.enter_mute();
        }
        Self { layers }
    }
}

impl Drop for MuteGuard {
    fn drop(&mut self) {
        for layer in self.layers.iter().rev() {
            layer.exit_mute();
        }
    }
}
