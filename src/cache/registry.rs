//! Store registry.
//!
//! Maps store identifiers to constructed store clients and resolves the configured
//! one once at startup, checking the capabilities the response cache relies on.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::info;

use super::config::CacheConfig;
use super::error::CacheError;
use super::store::{CacheStore, MemoryStore};

/// Store clients known to the application, keyed by identifier.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn CacheStore>>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with an in-process [`MemoryStore`] under `"memory"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MemoryStore::NAME, Arc::new(MemoryStore::new()));
        registry
    }

    /// Registry whose in-process [`MemoryStore`] is bounded by `config.entry_limit`.
    pub fn for_config(config: &CacheConfig) -> Self {
        let mut registry = Self::new();
        registry.register(
            MemoryStore::NAME,
            Arc::new(MemoryStore::with_entry_limit(config.entry_limit_non_zero())),
        );
        registry
    }

    /// Register (or replace) a store under `name`.
    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn CacheStore>) {
        self.stores.insert(name.into(), store);
    }

    /// Resolve the store registered under `name`.
    ///
    /// Fails with `UnknownStore` for an unregistered name and `CapabilityUnsupported`
    /// when the store cannot tag entries or take atomic locks.
    pub fn resolve(&self, name: &str) -> Result<ResolvedStore, CacheError> {
        let store = self
            .stores
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::unknown_store(name))?;
        let resolved = ResolvedStore::new(store)?;
        info!(store = name, "response cache store resolved");
        Ok(resolved)
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Check if no store is registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// A store known to support both tagging and locking.
#[derive(Clone)]
pub struct ResolvedStore(Arc<dyn CacheStore>);

impl ResolvedStore {
    /// Check `store`'s capabilities and wrap it.
    pub fn new(store: Arc<dyn CacheStore>) -> Result<Self, CacheError> {
        if let Some(capability) = store.capabilities().missing() {
            return Err(CacheError::capability_unsupported(store.name(), capability));
        }
        Ok(Self(store))
    }
}

impl Deref for ResolvedStore {
    type Target = dyn CacheStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for ResolvedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolvedStore").field(&self.0.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::cache::error::Capability;
    use crate::cache::store::StoreCapabilities;

    /// Store that can hold values but cannot lock.
    struct FileLikeStore {
        capabilities: StoreCapabilities,
    }

    #[async_trait]
    impl CacheStore for FileLikeStore {
        fn name(&self) -> &str {
            "file"
        }

        fn capabilities(&self) -> StoreCapabilities {
            self.capabilities
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Bytes) -> Result<(), CacheError> {
            Ok(())
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: Bytes,
            _ttl: Duration,
        ) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[test]
    fn resolves_default_memory_store() {
        let registry = StoreRegistry::with_defaults();
        let store = registry.resolve("memory").expect("memory store resolves");
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn configured_memory_store_honours_entry_limit() {
        let config = CacheConfig {
            entry_limit: 1,
            ..CacheConfig::default()
        };
        let store = StoreRegistry::for_config(&config)
            .resolve("memory")
            .expect("memory store resolves");

        store.set("rp:a", Bytes::from("a")).await.expect("set");
        store.set("rp:b", Bytes::from("b")).await.expect("set");
        assert!(store.get("rp:a").await.expect("get").is_none());
        assert!(store.get("rp:b").await.expect("get").is_some());
    }

    #[test]
    fn unknown_store_is_rejected() {
        let registry = StoreRegistry::with_defaults();
        let err = registry.resolve("redis").expect_err("not registered");
        assert!(matches!(err, CacheError::UnknownStore { ref name } if name == "redis"));
    }

    #[test]
    fn store_without_tagging_fails_fast() {
        let mut registry = StoreRegistry::new();
        registry.register(
            "file",
            Arc::new(FileLikeStore {
                capabilities: StoreCapabilities::default(),
            }),
        );

        let err = registry.resolve("file").expect_err("no tagging");
        assert!(matches!(
            err,
            CacheError::CapabilityUnsupported {
                capability: Capability::Tagging,
                ..
            }
        ));
    }

    #[test]
    fn store_without_locks_fails_fast() {
        let mut registry = StoreRegistry::new();
        registry.register(
            "file",
            Arc::new(FileLikeStore {
                capabilities: StoreCapabilities {
                    tagging: true,
                    locking: false,
                },
            }),
        );

        let err = registry.resolve("file").expect_err("no locks");
        assert!(matches!(
            err,
            CacheError::CapabilityUnsupported {
                capability: Capability::Locking,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unsupported_operations_default_to_errors() {
        let store = FileLikeStore {
            capabilities: StoreCapabilities::default(),
        };
        assert!(
            store
                .acquire_lock("rp:k", Duration::from_secs(1))
                .await
                .is_err()
        );
        assert!(store.group_add("tag:a:entries", "rp:k", None).await.is_err());
    }
}
