//! Null Layer
//!
//! A layer that stores nothing. Useful as a placeholder authoritative tier
//! and for disabling a tier without changing the layer sequence.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::layer::{Instrumentation, Layer};
use super::options::Options;
use super::value::Value;
use crate::error::Result;

/// No-op layer: reads miss, writes succeed, nothing is retained
pub struct NullLayer {
    name: String,
    instrumentation: Instrumentation,
}

impl NullLayer {
    pub fn new() -> Self {
        Self::named("null")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrumentation: Instrumentation::new(),
        }
    }
}

impl Default for NullLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Layer for NullLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_expiration(&self) -> Option<Duration> {
        None
    }

    fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    async fn read(&self, _key: &str, _options: &Options) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn write(&self, _key: &str, _value: Value, _options: &Options) -> Result<bool> {
        Ok(true)
    }

    async fn delete(&self, _key: &str, _options: &Options) -> Result<bool> {
        Ok(false)
    }

    async fn delete_matched(&self, _pattern: &Regex, _options: &Options) -> Result<usize> {
        Ok(0)
    }

    async fn exists(&self, _key: &str, _options: &Options) -> Result<bool> {
        Ok(false)
    }

    /// Nothing is stored, so every counter starts from zero
    async fn increment(&self, _key: &str, amount: i64, _options: &Options) -> Result<i64> {
        Ok(amount)
    }

    async fn clear(&self, _options: &Options) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, _options: &Options) -> Result<usize> {
        Ok(0)
    }
}
