//! Cache Metrics Collection
//!
//! Per-layer counters maintained by the coordinator, independent of whatever
//! statistics each layer keeps for itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct LayerCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    read_errors: AtomicU64,
    write_errors: AtomicU64,
    backfills: AtomicU64,
    invalidations: AtomicU64,
    // Exponential moving averages, microseconds
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
}

/// Coordinator metrics collector
#[derive(Debug)]
pub struct CacheMetrics {
    names: Vec<String>,
    layers: Vec<LayerCounters>,
    /// Reads that missed every layer
    final_misses: AtomicU64,
    /// Values produced by fetch compute functions
    computes: AtomicU64,
}

impl CacheMetrics {
    /// Create a collector for the given layer names, in layer order
    pub fn new(names: Vec<String>) -> Self {
        let layers = names.iter().map(|_| LayerCounters::default()).collect();
        Self {
            names,
            layers,
            final_misses: AtomicU64::new(0),
            computes: AtomicU64::new(0),
        }
    }

    #[inline]
    fn layer(&self, index: usize) -> Option<&LayerCounters> {
        self.layers.get(index)
    }

    pub fn record_hit(&self, index: usize) {
        if let Some(l) = self.layer(index) {
            l.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self, index: usize) {
        if let Some(l) = self.layer(index) {
            l.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read_error(&self, index: usize) {
        if let Some(l) = self.layer(index) {
            l.read_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_write_error(&self, index: usize) {
        if let Some(l) = self.layer(index) {
            l.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record `count` entries promoted into layer `index`
    pub fn record_backfill(&self, index: usize, count: u64) {
        if let Some(l) = self.layer(index) {
            l.backfills.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_invalidation(&self, index: usize) {
        if let Some(l) = self.layer(index) {
            l.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_final_miss(&self) {
        self.final_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computes(&self, count: u64) {
        self.computes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_read_latency(&self, index: usize, duration: Duration) {
        if let Some(l) = self.layer(index) {
            update_latency_ema(&l.read_latency_us, duration);
        }
    }

    pub fn record_write_latency(&self, index: usize, duration: Duration) {
        if let Some(l) = self.layer(index) {
            update_latency_ema(&l.write_latency_us, duration);
        }
    }

    pub fn hits(&self, index: usize) -> u64 {
        self.layer(index).map_or(0, |l| l.hits.load(Ordering::Relaxed))
    }

    pub fn misses(&self, index: usize) -> u64 {
        self.layer(index).map_or(0, |l| l.misses.load(Ordering::Relaxed))
    }

    pub fn backfills(&self, index: usize) -> u64 {
        self.layer(index)
            .map_or(0, |l| l.backfills.load(Ordering::Relaxed))
    }

    pub fn final_misses(&self) -> u64 {
        self.final_misses.load(Ordering::Relaxed)
    }

    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::Relaxed)
    }

    /// Hits in any layer over all logical lookups
    pub fn overall_hit_ratio(&self) -> f64 {
        let total_hits: u64 = (0..self.layers.len()).map(|i| self.hits(i)).sum();
        let total = total_hits + self.final_misses();
        if total == 0 {
            0.0
        } else {
            total_hits as f64 / total as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let layers = self
            .names
            .iter()
            .zip(&self.layers)
            .map(|(name, l)| {
                let hits = l.hits.load(Ordering::Relaxed);
                let misses = l.misses.load(Ordering::Relaxed);
                LayerMetricsSnapshot {
                    name: name.clone(),
                    hits,
                    misses,
                    hit_ratio: ratio(hits, misses),
                    read_errors: l.read_errors.load(Ordering::Relaxed),
                    write_errors: l.write_errors.load(Ordering::Relaxed),
                    backfills: l.backfills.load(Ordering::Relaxed),
                    invalidations: l.invalidations.load(Ordering::Relaxed),
                    read_latency: Duration::from_micros(l.read_latency_us.load(Ordering::Relaxed)),
                    write_latency: Duration::from_micros(
                        l.write_latency_us.load(Ordering::Relaxed),
                    ),
                }
            })
            .collect();

        MetricsSnapshot {
            layers,
            final_misses: self.final_misses(),
            computes: self.computes(),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1; // EMA smoothing factor

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Snapshot of a single layer's counters
#[derive(Debug, Clone, Serialize)]
pub struct LayerMetricsSnapshot {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub read_errors: u64,
    pub write_errors: u64,
    pub backfills: u64,
    pub invalidations: u64,
    pub read_latency: Duration,
    pub write_latency: Duration,
}

/// Snapshot of all coordinator metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub layers: Vec<LayerMetricsSnapshot>,
    pub final_misses: u64,
    pub computes: u64,
    pub overall_hit_ratio: f64,
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounterVec> {
            let vec = IntCounterVec::new(Opts::new(name, help), &["layer"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let hits = counter("layered_cache_hits_total", "Reads served by a layer")?;
        let misses = counter("layered_cache_misses_total", "Reads a layer could not serve")?;
        let read_errors = counter("layered_cache_read_errors_total", "Layer read failures")?;
        let write_errors = counter("layered_cache_write_errors_total", "Layer write failures")?;
        let backfills = counter("layered_cache_backfills_total", "Entries promoted into a layer")?;
        let invalidations = counter(
            "layered_cache_invalidations_total",
            "Counter keys invalidated in a layer",
        )?;

        let latency = GaugeVec::new(
            Opts::new("layered_cache_latency_seconds", "EMA layer operation latency"),
            &["layer", "op"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        for layer in &self.layers {
            let name = layer.name.as_str();
            hits.with_label_values(&[name]).inc_by(layer.hits);
            misses.with_label_values(&[name]).inc_by(layer.misses);
            read_errors.with_label_values(&[name]).inc_by(layer.read_errors);
            write_errors.with_label_values(&[name]).inc_by(layer.write_errors);
            backfills.with_label_values(&[name]).inc_by(layer.backfills);
            invalidations.with_label_values(&[name]).inc_by(layer.invalidations);
            latency
                .with_label_values(&[name, "read"])
                .set(layer.read_latency.as_secs_f64());
            latency
                .with_label_values(&[name, "write"])
                .set(layer.write_latency.as_secs_f64());
        }

        let final_misses = IntCounter::new(
            "layered_cache_final_misses_total",
            "Reads that missed every layer",
        )?;
        final_misses.inc_by(self.final_misses);
        registry.register(Box::new(final_misses))?;

        let computes = IntCounter::new(
            "layered_cache_computes_total",
            "Values produced by fetch compute functions",
        )?;
        computes.inc_by(self.computes);
        registry.register(Box::new(computes))?;

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
