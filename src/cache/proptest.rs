//! Property-Based Tests for Expiration Negotiation
//!
//! # Test Properties
//!
//! 1. **Authoritative Passthrough**: the last layer always sees the caller's options
//! 2. **Never Longer**: a capped layer never receives a TTL at or above its cap
//! 3. **Shorter Honored**: a TTL strictly below the cap reaches the layer unchanged
//! 4. **Immutability**: negotiation never changes the caller's options

#![cfg(test)]

use std::borrow::Cow;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use super::options::{negotiate, Options};

// =============================================================================
// Property Strategies
// =============================================================================

/// Caller TTLs from zero to two days, in seconds
fn ttl_strategy() -> impl Strategy<Value = Duration> {
    (0u64..172_800).prop_map(Duration::from_secs)
}

/// Layer caps from one second to one day
fn cap_strategy() -> impl Strategy<Value = Option<Duration>> {
    prop::option::of((1u64..=86_400).prop_map(Duration::from_secs))
}

/// Options with either a relative or an absolute expiration, or none
fn options_strategy() -> impl Strategy<Value = Options> {
    let now = Utc::now();
    (
        prop::option::of(ttl_strategy()),
        prop::option::of(-3_600i64..172_800),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(move |(expires_in, at_offset, force, skip_nil)| Options {
            expires_in,
            expires_at: at_offset.map(|s| now + chrono::Duration::seconds(s)),
            force,
            skip_nil,
            namespace: None,
        })
}

// =============================================================================
// Negotiation Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: The authoritative layer gets the caller's options verbatim.
    #[test]
    fn prop_authoritative_is_untouched(opts in options_strategy(), cap in cap_strategy()) {
        let adjusted = negotiate(&opts, cap, true, Utc::now());
        prop_assert!(matches!(adjusted, Cow::Borrowed(_)));
    }

    /// Property: A capped layer never receives an expiration at or above its cap.
    #[test]
    fn prop_capped_layer_never_gets_longer_ttl(opts in options_strategy(), cap in cap_strategy()) {
        let now = Utc::now();
        let adjusted = negotiate(&opts, cap, false, now);

        if let (Some(cap), Some(ttl)) = (cap, adjusted.effective_ttl(now)) {
            prop_assert!(ttl < cap, "ttl {:?} not below cap {:?}", ttl, cap);
        }
    }

    /// Property: A relative TTL strictly below the cap passes through.
    #[test]
    fn prop_shorter_ttl_is_honored(ttl in ttl_strategy(), cap in cap_strategy()) {
        let opts = Options::new().with_expires_in(ttl);
        let adjusted = negotiate(&opts, cap, false, Utc::now());

        match cap {
            Some(cap) if ttl >= cap => prop_assert_eq!(adjusted.expires_in, None),
            _ => prop_assert_eq!(adjusted.expires_in, Some(ttl)),
        }
    }

    /// Property: Only expiration fields ever change, and the caller's copy never does.
    #[test]
    fn prop_negotiation_preserves_other_fields(opts in options_strategy(), cap in cap_strategy()) {
        let before = opts.clone();
        let adjusted = negotiate(&opts, cap, false, Utc::now());

        prop_assert_eq!(&opts, &before);
        prop_assert_eq!(adjusted.force, opts.force);
        prop_assert_eq!(adjusted.skip_nil, opts.skip_nil);
        prop_assert_eq!(&adjusted.namespace, &opts.namespace);
    }
}
