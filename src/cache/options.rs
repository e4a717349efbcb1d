//! Per-call Cache Options
//!
//! Options are read-only input to every cache operation. The coordinator never
//! mutates a caller's options; when a layer needs a different expiration it
//! derives a new value with [`negotiate`].

use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Options for a single cache call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Relative time-to-live
    pub expires_in: Option<Duration>,
    /// Absolute deadline
    pub expires_at: Option<DateTime<Utc>>,
    /// Skip the read and always recompute (fetch only)
    pub force: bool,
    /// Do not cache nil results (fetch only)
    pub skip_nil: bool,
    /// Key namespace applied by layers as `"{namespace}:{key}"`
    pub namespace: Option<String>,
}

impl Options {
    /// Empty options: layer defaults everywhere
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn with_expires_at(mut self, deadline: DateTime<Utc>) -> Self {
        self.expires_at = Some(deadline);
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_skip_nil(mut self) -> Self {
        self.skip_nil = true;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Whether the caller asked for any explicit expiration
    #[inline]
    pub fn has_expiration(&self) -> bool {
        self.expires_in.is_some() || self.expires_at.is_some()
    }

    /// The caller's TTL relative to `now`
    ///
    /// `expires_in` wins over `expires_at`. A deadline already in the past
    /// yields a zero TTL.
    pub fn effective_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        if let Some(ttl) = self.expires_in {
            return Some(ttl);
        }
        self.expires_at
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Copy of these options with both expiration fields cleared
    pub fn without_expiration(&self) -> Self {
        Self {
            expires_in: None,
            expires_at: None,
            ..self.clone()
        }
    }

    /// Key as stored by a layer, with the namespace prefix applied
    pub fn namespaced_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.namespace {
            Some(ns) => Cow::Owned(format!("{}:{}", ns, key)),
            None => Cow::Borrowed(key),
        }
    }
}

/// Compute the options a layer receives on a write
///
/// The authoritative layer and layers without a configured maximum always get
/// the caller's options. Other layers keep the caller's TTL only when it is
/// strictly shorter than their own maximum; otherwise the TTL is stripped so
/// the layer falls back to its configured expiration.
pub fn negotiate<'a>(
    options: &'a Options,
    layer_max: Option<Duration>,
    authoritative: bool,
    now: DateTime<Utc>,
) -> Cow<'a, Options> {
    if authoritative {
        return Cow::Borrowed(options);
    }
    let Some(max) = layer_max else {
        return Cow::Borrowed(options);
    };
    if !options.has_expiration() {
        return Cow::Borrowed(options);
    }

    match options.effective_ttl(now) {
        Some(ttl) if ttl < max => Cow::Borrowed(options),
        _ => Cow::Owned(options.without_expiration()),
    }
}
