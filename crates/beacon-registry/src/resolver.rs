//! Consumer entry point
//!
//! A resolver is a tiny factory: it pins the key prefix once and hands
//! out one independent [`Watcher`] per `resolve` call. The watchers do
//! all the actual work.

use crate::error::RegistryResult;
use crate::etcd::EtcdStore;
use crate::record::ServiceName;
use crate::store::RegistryStore;
use crate::watcher::Watcher;
use beacon_core::constants::REGISTRY_PREFIX_DEFAULT;
use std::sync::Arc;

/// Discovery-side factory for membership watchers
#[derive(Debug, Clone)]
pub struct Resolver {
    prefix: String,
}

impl Resolver {
    /// Resolver over the default key prefix
    pub fn new() -> Self {
        Self::with_prefix(REGISTRY_PREFIX_DEFAULT)
    }

    /// Resolver over a custom key prefix; empty falls back to the
    /// default, a trailing `/` is stripped
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            prefix: if prefix.is_empty() {
                REGISTRY_PREFIX_DEFAULT.to_string()
            } else {
                prefix.to_string()
            },
        }
    }

    /// Key prefix this resolver watches under
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Watch a service through an etcd cluster
    ///
    /// `endpoints` is a comma-separated list, e.g.
    /// `"http://127.0.0.1:2379"`.
    ///
    /// # Errors
    /// Returns error if the name fails validation or no usable
    /// endpoint is given.
    pub fn resolve(&self, name: &str, endpoints: &str) -> RegistryResult<Watcher> {
        let store = EtcdStore::connect(endpoints)?;
        self.resolve_with_store(name, Arc::new(store))
    }

    /// Watch a service through an already-built store client
    pub fn resolve_with_store(
        &self,
        name: &str,
        store: Arc<dyn RegistryStore>,
    ) -> RegistryResult<Watcher> {
        let name = ServiceName::new(name)?;
        Ok(Watcher::new(store, &self.prefix, &name))
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::memory::MemoryStore;

    #[test]
    fn test_default_prefix() {
        assert_eq!(Resolver::new().prefix(), REGISTRY_PREFIX_DEFAULT);
        assert_eq!(Resolver::with_prefix("").prefix(), REGISTRY_PREFIX_DEFAULT);
        assert_eq!(Resolver::with_prefix("custom/svc/").prefix(), "custom/svc");
    }

    #[test]
    fn test_resolve_rejects_invalid_name() {
        let resolver = Resolver::new();
        let store = Arc::new(MemoryStore::new());
        let result = resolver.resolve_with_store("a/b", store);
        assert!(matches!(
            result,
            Err(RegistryError::InvalidServiceName { .. })
        ));
    }

    #[test]
    fn test_resolve_rejects_empty_endpoints() {
        let resolver = Resolver::new();
        let result = resolver.resolve("hello", "");
        assert!(matches!(
            result,
            Err(RegistryError::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolved_watchers_are_independent() {
        let resolver = Resolver::with_prefix("test/service");
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());

        let mut a = resolver
            .resolve_with_store("hello", Arc::clone(&store) as _)
            .unwrap();
        let b = resolver
            .resolve_with_store("hello", Arc::clone(&store) as _)
            .unwrap();

        // Closing one watcher must not disturb the other.
        b.close();
        store
            .set(
                "test/service/hello/1",
                r#"{"id":1,"name":"hello","host":"127.0.0.1","port":9000}"#,
                Default::default(),
            )
            .await
            .unwrap();
        let changes = a.next().await.unwrap();
        assert_eq!(changes.len(), 1);
    }
}
