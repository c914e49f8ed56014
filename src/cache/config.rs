//! Cache configuration.
//!
//! Controls key namespacing, lock waiting and store selection via the `[cache]` section.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
pub const DEFAULT_PREFIX: &str = "rp";
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 10;
pub const DEFAULT_STORE: &str = "memory";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_ENTRY_LIMIT: usize = 10_000;

/// What a request does when the per-key lock cannot be taken in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockTimeoutPolicy {
    /// Surface `LockTimeout` to the caller (503).
    #[default]
    Error,
    /// Run the downstream handler without caching its response.
    Bypass,
}

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prefix for cache keys.
    pub prefix: String,
    /// Maximum seconds to wait for a per-key lock.
    pub lock_wait_seconds: u64,
    /// Identifier of the backing store in the store registry.
    pub store: String,
    /// Behaviour when the lock wait elapses.
    pub lock_timeout: LockTimeoutPolicy,
    /// Largest response body buffered for storage.
    pub max_body_bytes: usize,
    /// Maximum entries the in-process store keeps before evicting the least recently used.
    pub entry_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            lock_wait_seconds: DEFAULT_LOCK_WAIT_SECS,
            store: DEFAULT_STORE.to_string(),
            lock_timeout: LockTimeoutPolicy::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            entry_limit: DEFAULT_ENTRY_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            lock_wait_seconds: settings.lock_wait.as_secs(),
            store: settings.store.clone(),
            lock_timeout: settings.lock_timeout,
            max_body_bytes: settings.max_body_bytes.get(),
            entry_limit: settings.entry_limit.get(),
        }
    }
}

impl CacheConfig {
    /// Maximum lock wait as a duration.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_seconds)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.entry_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.prefix, "rp");
        assert_eq!(config.lock_wait_seconds, 10);
        assert_eq!(config.store, "memory");
        assert_eq!(config.lock_timeout, LockTimeoutPolicy::Error);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.entry_limit, 10_000);
    }

    #[test]
    fn zero_entry_limit_clamps_to_one() {
        let config = CacheConfig {
            entry_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.entry_limit_non_zero(), NonZeroUsize::MIN);
    }

    #[test]
    fn lock_wait_is_seconds() {
        let config = CacheConfig {
            lock_wait_seconds: 3,
            ..Default::default()
        };
        assert_eq!(config.lock_wait(), Duration::from_secs(3));
    }

    #[test]
    fn deserializes_partial_section() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"prefix":"api","lock_timeout":"bypass"}"#)
                .expect("valid config");
        assert_eq!(config.prefix, "api");
        assert_eq!(config.lock_timeout, LockTimeoutPolicy::Bypass);
        assert_eq!(config.lock_wait_seconds, DEFAULT_LOCK_WAIT_SECS);
    }
}
