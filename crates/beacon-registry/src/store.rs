//! Coordination store abstraction
//!
//! The registry core talks to the store exclusively through this
//! trait: conditional writes, conditional deletes, TTL-bearing keys,
//! and a blocking watch over a key prefix. Backends are swappable;
//! correctness across processes comes entirely from the store's
//! compare-and-swap semantics, never from local locks.

use crate::error::RegistryResult;
use async_trait::async_trait;

/// A node in the store's key tree
///
/// Leaf nodes carry a value; directory nodes carry children.
#[derive(Debug, Clone, Default)]
pub struct StoreNode {
    /// Full key path
    pub key: String,
    /// Value for leaf nodes, empty for directories
    pub value: String,
    /// Whether this node is a directory
    pub dir: bool,
    /// Children (populated for recursive directory reads)
    pub nodes: Vec<StoreNode>,
    /// Store-assigned revision of the last modification
    pub modified_revision: u64,
}

/// Options for conditional, TTL-bearing writes
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Lease duration; the store reaps the key when it elapses
    /// without a refresh
    pub ttl_ms: Option<u64>,
    /// Write only if the current value equals this (CAS on value)
    pub prev_value: Option<String>,
    /// Write only if the current revision equals this (CAS on revision)
    pub prev_index: Option<u64>,
    /// `Some(true)`: key must exist; `Some(false)`: key must not exist
    pub prev_exist: Option<bool>,
    /// Renew the lease without changing the value
    pub refresh: bool,
}

impl SetOptions {
    /// Plain write with a lease
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            ..Default::default()
        }
    }

    /// Lease renewal for an existing key, value untouched
    pub fn refresh_lease(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            prev_exist: Some(true),
            refresh: true,
            ..Default::default()
        }
    }
}

/// Options for conditional deletes
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Delete only if the current revision equals this
    pub prev_index: Option<u64>,
}

/// Blocking watch over a key prefix
///
/// The only guarantee after `changed()` returns is that something
/// under the watched path changed; callers must reconcile from a
/// fresh full read because intermediate events may be coalesced.
#[async_trait]
pub trait StoreWatch: Send + Sync {
    /// Block until a change occurs under the watched path
    async fn changed(&mut self) -> RegistryResult<()>;
}

/// Coordination store client contract
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Read a key or directory tree
    ///
    /// # Errors
    /// `NotFound` if the path does not exist.
    async fn get(&self, path: &str, recursive: bool) -> RegistryResult<StoreNode>;

    /// Conditionally write a key, returning the new revision
    ///
    /// # Errors
    /// `CompareFailed` if a precondition in `opts` does not hold,
    /// `NotFound` if `prev_exist`/`refresh` require a missing key.
    async fn set(&self, path: &str, value: &str, opts: SetOptions) -> RegistryResult<u64>;

    /// Conditionally delete a key, returning the deletion revision
    async fn delete(&self, path: &str, opts: DeleteOptions) -> RegistryResult<u64>;

    /// Start a watch scoped to `path`
    async fn watch(&self, path: &str, recursive: bool) -> RegistryResult<Box<dyn StoreWatch>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_with_ttl() {
        let opts = SetOptions::with_ttl(10_000);
        assert_eq!(opts.ttl_ms, Some(10_000));
        assert!(!opts.refresh);
        assert!(opts.prev_exist.is_none());
    }

    #[test]
    fn test_set_options_refresh_lease() {
        let opts = SetOptions::refresh_lease(10_000);
        assert_eq!(opts.ttl_ms, Some(10_000));
        assert!(opts.refresh);
        assert_eq!(opts.prev_exist, Some(true));
        assert!(opts.prev_value.is_none());
    }
}
