//! Configuration for the two-tier cache
//!
//! Provides the recognized tuning options with sensible defaults,
//! validation, and environment variable overrides.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration
///
/// All durations are milliseconds. The dormant path selects where the
/// default file-backed store keeps its document; `None` picks a stable
/// per-type location under the OS temporary directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Hard bound on the active-tier size
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Per-entry TTL in the active tier
    #[serde(default = "default_active_ttl_ms")]
    pub active_ttl_ms: u64,

    /// Period of the background cleaner
    #[serde(default = "default_cleaner_period_ms")]
    pub cleaner_period_ms: u64,

    /// Logical TTL of dormant records
    #[serde(default = "default_dormant_ttl_ms")]
    pub dormant_ttl_ms: u64,

    /// Backing file for the default dormant store
    #[serde(default)]
    pub dormant_path: Option<PathBuf>,
}

// Default value functions
fn default_capacity() -> usize {
    1000
}
fn default_active_ttl_ms() -> u64 {
    300_000
}
fn default_cleaner_period_ms() -> u64 {
    400_000
}
fn default_dormant_ttl_ms() -> u64 {
    500_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            active_ttl_ms: default_active_ttl_ms(),
            cleaner_period_ms: default_cleaner_period_ms(),
            dormant_ttl_ms: default_dormant_ttl_ms(),
            dormant_path: None,
        }
    }
}

impl CacheConfig {
    /// Create a testing configuration with short intervals
    pub fn testing() -> Self {
        Self {
            capacity: 2,
            active_ttl_ms: 1_000,
            cleaner_period_ms: 2_000,
            dormant_ttl_ms: 10_000,
            dormant_path: None,
        }
    }

    /// Set the active-tier capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the active-tier per-entry TTL
    pub fn with_active_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.active_ttl_ms = ttl_ms;
        self
    }

    /// Set the cleaner period
    pub fn with_cleaner_period_ms(mut self, period_ms: u64) -> Self {
        self.cleaner_period_ms = period_ms;
        self
    }

    /// Set the logical TTL of dormant records
    pub fn with_dormant_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.dormant_ttl_ms = ttl_ms;
        self
    }

    /// Set the backing file of the default dormant store
    pub fn with_dormant_path(mut self, path: PathBuf) -> Self {
        self.dormant_path = Some(path);
        self
    }

    /// Active-tier TTL as a [`Duration`]
    pub fn active_ttl(&self) -> Duration {
        Duration::from_millis(self.active_ttl_ms)
    }

    /// Cleaner period as a [`Duration`]
    pub fn cleaner_period(&self) -> Duration {
        Duration::from_millis(self.cleaner_period_ms)
    }

    /// Load defaults and apply environment variable overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `EMBERCACHE_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("EMBERCACHE_CAPACITY") {
            if let Ok(c) = capacity.parse() {
                self.capacity = c;
            }
        }
        if let Ok(ttl) = std::env::var("EMBERCACHE_ACTIVE_TTL_MS") {
            if let Ok(t) = ttl.parse() {
                self.active_ttl_ms = t;
            }
        }
        if let Ok(period) = std::env::var("EMBERCACHE_CLEANER_PERIOD_MS") {
            if let Ok(p) = period.parse() {
                self.cleaner_period_ms = p;
            }
        }
        if let Ok(ttl) = std::env::var("EMBERCACHE_DORMANT_TTL_MS") {
            if let Ok(t) = ttl.parse() {
                self.dormant_ttl_ms = t;
            }
        }
        if let Ok(path) = std::env::var("EMBERCACHE_DORMANT_PATH") {
            self.dormant_path = Some(PathBuf::from(path));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.capacity == 0 {
            return Err(CacheError::Configuration(
                "capacity must be > 0".to_string(),
            ));
        }
        if self.active_ttl_ms == 0 {
            return Err(CacheError::Configuration(
                "active_ttl_ms must be > 0".to_string(),
            ));
        }
        if self.cleaner_period_ms == 0 {
            return Err(CacheError::Configuration(
                "cleaner_period_ms must be > 0".to_string(),
            ));
        }
        if self.dormant_ttl_ms == 0 {
            return Err(CacheError::Configuration(
                "dormant_ttl_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
