//! Layered Cache Integration Tests
//!
//! End-to-end behaviour of the coordinator against real layers:
//! - Feature 1: Read-through promotion and write-through propagation
//! - Feature 2: Expiration negotiation
//! - Feature 3: Fetch and batch operations
//! - Feature 4: Counters, existence and deletion
//! - Feature 5: Configuration and observability

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use layered_cache::{Layer, LayeredCache, MemoryLayer, MemoryLayerConfig, Options, Value};

/// Front layer holding entries for 1 second, back layer for 1 minute
fn two_tier() -> (LayeredCache, Arc<MemoryLayer>, Arc<MemoryLayer>) {
    let front = Arc::new(MemoryLayer::with_config(
        MemoryLayerConfig::named("l1")
            .with_expires_in(Duration::from_secs(1))
            .with_capacity(8 * 1024 * 1024),
    ));
    let back = Arc::new(MemoryLayer::with_config(
        MemoryLayerConfig::named("l2")
            .with_expires_in(Duration::from_secs(60))
            .with_capacity(64 * 1024 * 1024),
    ));
    let cache = LayeredCache::new(vec![front.clone(), back.clone()]).unwrap();
    (cache, front, back)
}

fn opts() -> Options {
    Options::default()
}

async fn layer_value(layer: &MemoryLayer, key: &str) -> Option<Value> {
    layer.read(key, &opts()).await.unwrap()
}

// =============================================================================
// Feature 1: Read-Through Promotion and Write-Through Propagation
// =============================================================================

mod promotion_tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let (cache, front, back) = two_tier();

        cache.write("test", "value", &opts()).await.unwrap();

        assert_eq!(cache.read("test", &opts()).await, Some(Value::from("value")));
        assert_eq!(layer_value(&front, "test").await, Some(Value::from("value")));
        assert_eq!(layer_value(&back, "test").await, Some(Value::from("value")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_rewrites_front_layer_after_expiry() {
        let (cache, front, back) = two_tier();
        cache.write("test", "value", &opts()).await.unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(layer_value(&front, "test").await, None);
        assert_eq!(layer_value(&back, "test").await, Some(Value::from("value")));

        assert_eq!(cache.read("test", &opts()).await, Some(Value::from("value")));
        assert_eq!(layer_value(&front, "test").await, Some(Value::from("value")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_across_three_layers() {
        let layers: Vec<Arc<MemoryLayer>> = [("hot", 1), ("warm", 10), ("cold", 100)]
            .into_iter()
            .map(|(name, secs)| {
                Arc::new(MemoryLayer::with_config(
                    MemoryLayerConfig::named(name).with_expires_in(Duration::from_secs(secs)),
                ))
            })
            .collect();
        let cache = LayeredCache::new(
            layers.iter().map(|l| l.clone() as Arc<dyn Layer>).collect(),
        )
        .unwrap();

        cache.write("k", "v", &opts()).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(layer_value(&layers[0], "k").await, None);
        assert_eq!(layer_value(&layers[1], "k").await, None);

        assert_eq!(cache.read("k", &opts()).await, Some(Value::from("v")));
        assert_eq!(layer_value(&layers[0], "k").await, Some(Value::from("v")));
        assert_eq!(layer_value(&layers[1], "k").await, Some(Value::from("v")));

        let snapshot = cache.metrics();
        assert_eq!(snapshot.layers[2].hits, 1);
        assert_eq!(snapshot.layers[0].backfills, 1);
        assert_eq!(snapshot.layers[1].backfills, 1);
    }
}

// =============================================================================
// Feature 2: Expiration Negotiation
// =============================================================================

mod expiration_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_longer_ttl_capped_in_front_layer() {
        let (cache, front, back) = two_tier();
        let long = Options::new().with_expires_in(Duration::from_secs(30));

        cache.write("k", "v", &long).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        // Front layer fell back to its own 1 second limit
        assert_eq!(layer_value(&front, "k").await, None);
        assert_eq!(layer_value(&back, "k").await, Some(Value::from("v")));

        // Authoritative layer keeps the requested 30 seconds, not its 60
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(layer_value(&back, "k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_write_keeps_authoritative_entry() {
        let (cache, front, back) = two_tier();
        let forever = Options::new().with_expires_in(Duration::MAX);

        assert!(cache.write("k", "v", &forever).await.unwrap());
        assert!(cache.increment("n", 1, &forever).await.is_ok());
        tokio::time::advance(Duration::from_secs(3_600)).await;

        // Front layer dropped the request and used its own limit
        assert_eq!(layer_value(&front, "k").await, None);
        assert_eq!(layer_value(&back, "k").await, Some(Value::from("v")));
        assert_eq!(layer_value(&back, "n").await, Some(Value::from("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_ttl_honored_in_front_layer() {
        let (cache, front, _back) = two_tier();
        let short = Options::new().with_expires_in(Duration::from_millis(300));

        cache.write("k", "v", &short).await.unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(layer_value(&front, "k").await.is_some());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(layer_value(&front, "k").await, None);
    }

    #[tokio::test]
    async fn test_caller_options_are_not_mutated() {
        let (cache, _front, _back) = two_tier();
        let long = Options::new().with_expires_in(Duration::from_secs(3600));
        let before = long.clone();

        cache.write("k", "v", &long).await.unwrap();
        cache.read("k", &long).await;

        assert_eq!(long, before);
    }
}

// =============================================================================
// Feature 3: Fetch and Batch Operations
// =============================================================================

mod fetch_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_single_compute() {
        let (cache, front, back) = two_tier();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value = cache
                .fetch("test", &opts(), |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Value::from("value")) }
                })
                .await
                .unwrap();
            assert_eq!(value, Value::from("value"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(layer_value(&front, "test").await, Some(Value::from("value")));
        assert_eq!(layer_value(&back, "test").await, Some(Value::from("value")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_rewrites_front_layer_after_expiry() {
        let (cache, front, _back) = two_tier();
        cache.write("test", "value", &opts()).await.unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(layer_value(&front, "test").await, None);

        let value = cache
            .fetch("test", &opts(), |_| async { Ok(Value::from("recomputed")) })
            .await
            .unwrap();

        // Served from the back layer, compute never ran
        assert_eq!(value, Value::from("value"));
        assert_eq!(layer_value(&front, "test").await, Some(Value::from("value")));
    }

    #[tokio::test]
    async fn test_write_multi_and_read_multi() {
        let (cache, front, back) = two_tier();
        let entries: Vec<(String, Value)> = [("a", "1"), ("b", "2"), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect();

        cache.write_multi(&entries, &opts()).await.unwrap();

        let found = cache.read_multi(&["a", "b", "c"], &opts()).await;
        assert_eq!(found.into_iter().collect::<Vec<_>>(), entries);
        for layer in [&front, &back] {
            let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
            assert_eq!(layer.read_multi(&keys, &opts()).await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_batch_reconciliation() {
        let (cache, front, back) = two_tier();
        front.write("a", Value::from("1"), &opts()).await.unwrap();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            back.write(k, Value::from(v), &opts()).await.unwrap();
        }

        let found = cache.read_multi(&["a", "b", "c"], &opts()).await;
        assert_eq!(found.len(), 3);
        assert_eq!(found["b"], Value::from("2"));

        assert_eq!(layer_value(&front, "a").await, Some(Value::from("1")));
        assert_eq!(layer_value(&front, "b").await, Some(Value::from("2")));
        assert_eq!(layer_value(&front, "c").await, Some(Value::from("3")));
        assert_eq!(cache.metrics().layers[0].backfills, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_multi_rewrites_front_layer_after_expiry() {
        let (cache, front, _back) = two_tier();
        let entries = vec![
            ("a".to_string(), Value::from("1")),
            ("b".to_string(), Value::from("2")),
        ];
        cache.write_multi(&entries, &opts()).await.unwrap();

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(layer_value(&front, "a").await, None);

        assert_eq!(cache.read_multi(&["a", "b"], &opts()).await.len(), 2);
        assert_eq!(layer_value(&front, "a").await, Some(Value::from("1")));
        assert_eq!(layer_value(&front, "b").await, Some(Value::from("2")));
    }

    #[tokio::test]
    async fn test_fetch_multi_fills_gaps() {
        let (cache, _front, back) = two_tier();
        back.write("a", Value::from("cached"), &opts()).await.unwrap();

        let result = cache
            .fetch_multi(&["a", "b"], &opts(), |key| async move {
                Ok(Value::from(format!("computed-{}", key)))
            })
            .await
            .unwrap();

        assert_eq!(result["a"], Value::from("cached"));
        assert_eq!(result["b"], Value::from("computed-b"));
        assert_eq!(cache.read("b", &opts()).await, Some(Value::from("computed-b")));
    }
}

// =============================================================================
// Feature 4: Counters, Existence and Deletion
// =============================================================================

mod counter_tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_invalidates_and_repromotes() {
        let (cache, front, back) = two_tier();
        cache.write("n", "10", &opts()).await.unwrap();

        assert_eq!(cache.increment("n", 5, &opts()).await.unwrap(), 15);
        assert_eq!(layer_value(&front, "n").await, None);
        assert_eq!(layer_value(&back, "n").await, Some(Value::from("15")));

        let value = cache.read("n", &opts()).await.unwrap();
        assert_eq!(value.as_counter(), Some(15));
        assert_eq!(layer_value(&front, "n").await, Some(Value::from("15")));
    }

    #[tokio::test]
    async fn test_decrement_raw_written_value() {
        let (cache, _front, _back) = two_tier();
        cache.write("n", "3", &opts()).await.unwrap();

        assert_eq!(cache.decrement("n", 1, &opts()).await.unwrap(), 2);
        assert_eq!(cache.read("n", &opts()).await, Some(Value::from("2")));
    }

    #[tokio::test]
    async fn test_decrement_missing_key() {
        let (cache, _front, _back) = two_tier();

        assert_eq!(cache.decrement("fresh", 1, &opts()).await.unwrap(), -1);
        assert_eq!(cache.decrement("other", 100, &opts()).await.unwrap(), -100);
    }

    #[tokio::test]
    async fn test_concurrent_increments_through_coordinator() {
        let (cache, _front, back) = two_tier();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        cache.increment("hits", 1, &Options::default()).await.unwrap();
                    }
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(layer_value(&back, "hits").await, Some(Value::from("400")));
        assert_eq!(cache.read("hits", &opts()).await, Some(Value::from("400")));
    }

    #[tokio::test]
    async fn test_exists_in_any_layer_without_writes() {
        let (cache, front, back) = two_tier();
        back.write("k", Value::from("v"), &opts()).await.unwrap();

        assert!(cache.exists("k", &opts()).await);
        assert!(front.is_empty());
        assert_eq!(cache.metrics().layers[0].backfills, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let (cache, front, back) = two_tier();
        cache.write("test", "value", &opts()).await.unwrap();
        assert_eq!(cache.read("test", &opts()).await, Some(Value::from("value")));

        assert!(cache.delete("test", &opts()).await.unwrap());

        assert_eq!(cache.read("test", &opts()).await, None);
        assert_eq!(layer_value(&front, "test").await, None);
        assert_eq!(layer_value(&back, "test").await, None);
    }

    #[tokio::test]
    async fn test_namespaces_isolate_keys() {
        let (cache, _front, _back) = two_tier();
        let tenant = Options::new().with_namespace(uuid::Uuid::new_v4().to_string());

        cache.write("k", "tenant", &tenant).await.unwrap();
        cache.write("k", "global", &opts()).await.unwrap();

        assert_eq!(cache.read("k", &tenant).await, Some(Value::from("tenant")));
        assert_eq!(cache.delete_matched("^k$", &tenant).await.unwrap(), 1);
        assert_eq!(cache.read("k", &opts()).await, Some(Value::from("global")));
    }
}

// =============================================================================
// Feature 5: Configuration and Observability
// =============================================================================

mod config_tests {
    use super::*;
    use layered_cache::{CacheConfig, Error};

    #[tokio::test]
    async fn test_cache_from_yaml() {
        let config = CacheConfig::from_yaml_str(
            r#"
layers:
  - kind: memory
    name: hot
    expires_in_secs: 5
  - kind: memory
    name: warm
"#,
        )
        .unwrap();
        let cache = LayeredCache::from_config(&config).unwrap();

        assert_eq!(cache.layer_names(), vec!["hot", "warm"]);
        assert_eq!(cache.layers()[0].max_expiration(), Some(Duration::from_secs(5)));
        assert_eq!(cache.authoritative().max_expiration(), None);

        cache.write("k", "v", &opts()).await.unwrap();
        assert!(cache.exists("k", &opts()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_configured_ttl() {
        let config = CacheConfig::from_yaml_str(
            r#"
layers:
  - kind: memory
    name: hot
    expires_in_secs: 18446744073709551615
"#,
        )
        .unwrap();
        let cache = LayeredCache::from_config(&config).unwrap();

        assert!(cache.write("k", "v", &opts()).await.unwrap());
        assert!(cache
            .write("j", "w", &Options::new().with_expires_in(Duration::MAX))
            .await
            .unwrap());
        tokio::time::advance(Duration::from_secs(365 * 86_400)).await;

        assert_eq!(cache.read("k", &opts()).await, Some(Value::from("v")));
        assert_eq!(cache.read("j", &opts()).await, Some(Value::from("w")));
    }

    #[test]
    fn test_default_construction() {
        let cache = LayeredCache::from_config(&CacheConfig::default()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.layer(0).unwrap().max_expiration(), Some(Duration::from_secs(300)));
        assert_eq!(cache.layer(1).unwrap().max_expiration(), Some(Duration::from_secs(86_400)));
        assert!(cache.layer(2).is_none());
    }

    #[test]
    fn test_empty_configuration_fails_fast() {
        let config = CacheConfig { layers: Vec::new() };
        let err = LayeredCache::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_fail_fast());
    }

    #[tokio::test]
    async fn test_prometheus_snapshot() {
        let (cache, _front, _back) = two_tier();
        cache.write("k", "v", &opts()).await.unwrap();
        cache.read("k", &opts()).await;
        cache.read("missing", &opts()).await;

        let snapshot = cache.metrics();
        assert_eq!(snapshot.final_misses, 1);
        assert!((snapshot.overall_hit_ratio - 0.5).abs() < f64::EPSILON);

        let text = snapshot.to_prometheus().unwrap();
        assert!(text.contains("layered_cache_hits_total{layer=\"l1\"} 1"));
        assert!(text.contains("layered_cache_misses_total{layer=\"l2\"} 1"));
    }

    #[tokio::test]
    async fn test_mute_scopes_instrumentation() {
        let (cache, front, back) = two_tier();

        let inner = cache.clone();
        cache
            .mute(async move {
                assert!(inner.layers().iter().all(|l| l.instrumentation().is_muted()));
                inner.write("k", "v", &Options::default()).await.unwrap();
            })
            .await;

        assert!(!front.instrumentation().is_muted());
        assert!(!back.instrumentation().is_muted());
        assert!(cache.exists("k", &opts()).await);
    }
}
