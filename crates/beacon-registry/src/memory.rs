//! In-memory coordination store
//!
//! Implements [`RegistryStore`] with a process-local key tree. Used by
//! tests and single-process deployments; it honors the same contract
//! as the etcd backend: monotonic revisions, conditional writes and
//! deletes, TTL reaping against the injected clock, and prefix
//! watches.
//!
//! Expiry is lazy: every operation purges elapsed leases first, and
//! tests can force a purge with [`MemoryStore::sweep_expired`].

use crate::error::{RegistryError, RegistryResult};
use crate::store::{DeleteOptions, RegistryStore, SetOptions, StoreNode, StoreWatch};
use async_trait::async_trait;
use beacon_core::io::{TimeProvider, WallClockTime};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Capacity of the change-event channel; watchers that lag simply
/// observe a coalesced "something changed"
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    modified_revision: u64,
    expires_at_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, MemoryEntry>,
    dirs: BTreeSet<String>,
}

/// In-memory store backend
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    revision: AtomicU64,
    events: broadcast::Sender<String>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryStore {
    /// Create a store using the wall clock
    pub fn new() -> Self {
        Self::with_time(Arc::new(WallClockTime::new()))
    }

    /// Create a store with an injected time provider (for tests)
    pub fn with_time(time: Arc<dyn TimeProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            revision: AtomicU64::new(0),
            events,
            time,
        }
    }

    /// Purge expired leases now, returning how many keys were reaped
    pub async fn sweep_expired(&self) -> usize {
        let mut state = self.state.write().await;
        self.purge_expired(&mut state)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, path: &str) {
        // No receivers means no watchers; nothing to deliver.
        let _ = self.events.send(path.to_string());
    }

    fn purge_expired(&self, state: &mut MemoryState) -> usize {
        let now_ms = self.time.now_ms();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at_ms.is_some_and(|at| at <= now_ms))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            state.entries.remove(key);
            self.notify(key);
        }
        expired.len()
    }

    fn child_prefix(path: &str) -> String {
        format!("{}/", path)
    }

    fn children_of(state: &MemoryState, path: &str) -> Vec<StoreNode> {
        let prefix = Self::child_prefix(path);
        state
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, e)| StoreNode {
                key: k.clone(),
                value: e.value.clone(),
                dir: false,
                nodes: Vec::new(),
                modified_revision: e.modified_revision,
            })
            .collect()
    }

    fn register_parent_dirs(state: &mut MemoryState, path: &str) {
        for (i, c) in path.char_indices() {
            if c == '/' && i > 0 {
                state.dirs.insert(path[..i].to_string());
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn get(&self, path: &str, recursive: bool) -> RegistryResult<StoreNode> {
        let mut state = self.state.write().await;
        self.purge_expired(&mut state);

        if let Some(entry) = state.entries.get(path) {
            return Ok(StoreNode {
                key: path.to_string(),
                value: entry.value.clone(),
                dir: false,
                nodes: Vec::new(),
                modified_revision: entry.modified_revision,
            });
        }

        let children = Self::children_of(&state, path);
        if state.dirs.contains(path) || !children.is_empty() {
            let modified_revision = children
                .iter()
                .map(|n| n.modified_revision)
                .max()
                .unwrap_or(0);
            return Ok(StoreNode {
                key: path.to_string(),
                value: String::new(),
                dir: true,
                nodes: if recursive { children } else { Vec::new() },
                modified_revision,
            });
        }

        Err(RegistryError::not_found(path))
    }

    async fn set(&self, path: &str, value: &str, opts: SetOptions) -> RegistryResult<u64> {
        let mut state = self.state.write().await;
        self.purge_expired(&mut state);

        let existing = state.entries.get(path).cloned();

        if opts.prev_exist == Some(false) && existing.is_some() {
            return Err(RegistryError::compare_failed(path));
        }
        if (opts.prev_exist == Some(true) || opts.refresh) && existing.is_none() {
            return Err(RegistryError::not_found(path));
        }
        if let Some(ref prev_value) = opts.prev_value {
            match existing {
                None => return Err(RegistryError::not_found(path)),
                Some(ref e) if e.value != *prev_value => {
                    return Err(RegistryError::compare_failed(path));
                }
                Some(_) => {}
            }
        }
        if let Some(prev_index) = opts.prev_index {
            match existing {
                None => return Err(RegistryError::not_found(path)),
                Some(ref e) if e.modified_revision != prev_index => {
                    return Err(RegistryError::compare_failed(path));
                }
                Some(_) => {}
            }
        }

        let revision = self.next_revision();
        let stored_value = if opts.refresh {
            // Refresh renews the lease without touching the value.
            existing.map(|e| e.value).unwrap_or_default()
        } else {
            value.to_string()
        };
        let expires_at_ms = opts.ttl_ms.map(|ttl| self.time.now_ms().saturating_add(ttl));

        state.entries.insert(
            path.to_string(),
            MemoryEntry {
                value: stored_value,
                modified_revision: revision,
                expires_at_ms,
            },
        );
        Self::register_parent_dirs(&mut state, path);

        self.notify(path);
        Ok(revision)
    }

    async fn delete(&self, path: &str, opts: DeleteOptions) -> RegistryResult<u64> {
        let mut state = self.state.write().await;
        self.purge_expired(&mut state);

        if let Some(entry) = state.entries.get(path) {
            if let Some(prev_index) = opts.prev_index {
                if entry.modified_revision != prev_index {
                    return Err(RegistryError::compare_failed(path));
                }
            }
            state.entries.remove(path);
            let revision = self.next_revision();
            self.notify(path);
            return Ok(revision);
        }

        if state.dirs.contains(path) {
            if !Self::children_of(&state, path).is_empty() {
                return Err(RegistryError::DirectoryNotEmpty {
                    path: path.to_string(),
                });
            }
            state.dirs.remove(path);
            let revision = self.next_revision();
            self.notify(path);
            return Ok(revision);
        }

        Err(RegistryError::not_found(path))
    }

    async fn watch(&self, path: &str, _recursive: bool) -> RegistryResult<Box<dyn StoreWatch>> {
        Ok(Box::new(MemoryWatch {
            rx: self.events.subscribe(),
            path: path.to_string(),
        }))
    }
}

/// Watch over a prefix of the in-memory store
struct MemoryWatch {
    rx: broadcast::Receiver<String>,
    path: String,
}

#[async_trait]
impl StoreWatch for MemoryWatch {
    async fn changed(&mut self) -> RegistryResult<()> {
        let child_prefix = MemoryStore::child_prefix(&self.path);
        loop {
            match self.rx.recv().await {
                Ok(changed_path) => {
                    if changed_path == self.path || changed_path.starts_with(&child_prefix) {
                        return Ok(());
                    }
                }
                // Dropped events still mean "something changed"; the
                // watcher reconciles from a full listing anyway.
                Err(broadcast::error::RecvError::Lagged(_)) => return Ok(()),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(RegistryError::store_unavailable("store dropped"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::io::SimClock;

    fn sim_store() -> (MemoryStore, SimClock) {
        let clock = SimClock::default();
        let store = MemoryStore::with_time(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = MemoryStore::new();
        let rev = store
            .set("svc/hello/1", "payload", SetOptions::default())
            .await
            .unwrap();
        assert!(rev > 0);

        let node = store.get("svc/hello/1", false).await.unwrap();
        assert_eq!(node.value, "payload");
        assert_eq!(node.modified_revision, rev);
        assert!(!node.dir);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let result = store.get("svc/absent", false).await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let store = MemoryStore::new();
        store
            .set("svc/hello/1", "a", SetOptions::default())
            .await
            .unwrap();
        store
            .set("svc/hello/2", "b", SetOptions::default())
            .await
            .unwrap();

        let dir = store.get("svc/hello", true).await.unwrap();
        assert!(dir.dir);
        assert_eq!(dir.nodes.len(), 2);
        assert_eq!(dir.nodes[0].key, "svc/hello/1");
        assert_eq!(dir.nodes[1].key, "svc/hello/2");

        // Non-recursive read reports the directory without children.
        let flat = store.get("svc/hello", false).await.unwrap();
        assert!(flat.dir);
        assert!(flat.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_prev_exist_false_rejects_existing_key() {
        let store = MemoryStore::new();
        let opts = SetOptions {
            prev_exist: Some(false),
            ..Default::default()
        };
        store.set("svc/hello/ID", "1", opts.clone()).await.unwrap();

        let result = store.set("svc/hello/ID", "1", opts).await;
        assert!(matches!(result, Err(RegistryError::CompareFailed { .. })));
    }

    #[tokio::test]
    async fn test_prev_value_cas() {
        let store = MemoryStore::new();
        store
            .set("svc/hello/ID", "1", SetOptions::default())
            .await
            .unwrap();

        let stale = SetOptions {
            prev_value: Some("0".into()),
            ..Default::default()
        };
        let result = store.set("svc/hello/ID", "2", stale).await;
        assert!(matches!(result, Err(RegistryError::CompareFailed { .. })));

        let current = SetOptions {
            prev_value: Some("1".into()),
            ..Default::default()
        };
        store.set("svc/hello/ID", "2", current).await.unwrap();
        let node = store.get("svc/hello/ID", false).await.unwrap();
        assert_eq!(node.value, "2");
    }

    #[tokio::test]
    async fn test_prev_index_cas_on_set_and_delete() {
        let store = MemoryStore::new();
        let rev = store
            .set("svc/hello/1", "a", SetOptions::default())
            .await
            .unwrap();

        let stale = DeleteOptions {
            prev_index: Some(rev + 100),
        };
        let result = store.delete("svc/hello/1", stale).await;
        assert!(matches!(result, Err(RegistryError::CompareFailed { .. })));

        store
            .delete(
                "svc/hello/1",
                DeleteOptions {
                    prev_index: Some(rev),
                },
            )
            .await
            .unwrap();
        assert!(store.get("svc/hello/1", false).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_renews_without_changing_value() {
        let (store, clock) = sim_store();
        store
            .set("svc/hello/1", "payload", SetOptions::with_ttl(2_000))
            .await
            .unwrap();

        clock.advance_ms(1_500);
        store
            .set("svc/hello/1", "", SetOptions::refresh_lease(2_000))
            .await
            .unwrap();

        // Past the original expiry, alive thanks to the refresh.
        clock.advance_ms(1_000);
        let node = store.get("svc/hello/1", false).await.unwrap();
        assert_eq!(node.value, "payload");
    }

    #[tokio::test]
    async fn test_refresh_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let result = store
            .set("svc/hello/1", "", SetOptions::refresh_lease(2_000))
            .await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_ttl_expiry_reaps_key() {
        let (store, clock) = sim_store();
        store
            .set("svc/hello/1", "payload", SetOptions::with_ttl(2_000))
            .await
            .unwrap();

        clock.advance_ms(1_999);
        assert!(store.get("svc/hello/1", false).await.is_ok());

        clock.advance_ms(1);
        assert_eq!(store.sweep_expired().await, 1);
        let result = store.get("svc/hello/1", false).await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_empty_directory() {
        let store = MemoryStore::new();
        store
            .set("svc/hello/1", "a", SetOptions::default())
            .await
            .unwrap();

        let result = store.delete("svc/hello", DeleteOptions::default()).await;
        assert!(matches!(
            result,
            Err(RegistryError::DirectoryNotEmpty { .. })
        ));

        store
            .delete("svc/hello/1", DeleteOptions::default())
            .await
            .unwrap();
        store
            .delete("svc/hello", DeleteOptions::default())
            .await
            .unwrap();
        assert!(store.get("svc/hello", true).await.is_err());
    }

    #[tokio::test]
    async fn test_watch_sees_changes_under_prefix() {
        let store = Arc::new(MemoryStore::new());
        let mut watch = store.watch("svc/hello", true).await.unwrap();

        let writer = Arc::clone(&store);
        let handle = tokio::spawn(async move {
            writer
                .set("svc/hello/1", "a", SetOptions::default())
                .await
                .unwrap();
        });

        watch.changed().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_ignores_unrelated_paths() {
        let store = Arc::new(MemoryStore::new());
        let mut watch = store.watch("svc/hello", true).await.unwrap();

        store
            .set("svc/other/1", "x", SetOptions::default())
            .await
            .unwrap();
        store
            .set("svc/hello/1", "a", SetOptions::default())
            .await
            .unwrap();

        // Resolves on the second write only; if the unrelated write
        // leaked through, the channel would still hold the hello event
        // afterwards, which the next assertion would catch.
        watch.changed().await.unwrap();
        let drained = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            watch.changed(),
        )
        .await;
        assert!(drained.is_err(), "no further events expected");
    }
}
