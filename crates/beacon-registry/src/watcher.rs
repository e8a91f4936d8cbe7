//! Membership watcher
//!
//! Turns store-level change notifications for one service directory
//! into an ordered, deduplicated stream of Add/Delete events. The
//! watcher never trusts a notification payload: every wake-up
//! reconciles from a fresh full listing, since intermediate events
//! may be missed or coalesced.

use crate::diff::{diff, Change};
use crate::error::{RegistryError, RegistryResult};
use crate::record::{RecordPayload, ServiceName, StopListener, StopSignal, COUNTER_KEY};
use crate::store::{DeleteOptions, RegistryStore, StoreWatch};
use beacon_core::constants::WATCH_RETRY_BACKOFF_MS;
use beacon_core::io::{TimeProvider, WallClockTime};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Clonable handle that interrupts a blocked [`Watcher::next`]
#[derive(Debug, Clone)]
pub struct WatcherCloser(Arc<StopSignal>);

impl WatcherCloser {
    /// Close the watcher; an in-flight `next()` returns `Closed`
    pub fn close(&self) {
        self.0.signal();
    }
}

/// Incremental membership view of one service
///
/// Single-consumer: the snapshot state is owned by `next(&mut self)`
/// and never shared across watchers.
pub struct Watcher {
    store: Arc<dyn RegistryStore>,
    /// The service directory `{prefix}/{name}`
    dir: String,
    /// Last known address set; `None` until the first `next()`
    known: Option<HashSet<String>>,
    /// Persistent store watch, created on first need
    watch: Option<Box<dyn StoreWatch>>,
    stop: Arc<StopSignal>,
    closed: StopListener,
    time: Arc<dyn TimeProvider>,
}

impl Watcher {
    /// Create a watcher with an uninitialized snapshot
    pub fn new(store: Arc<dyn RegistryStore>, prefix: &str, name: &ServiceName) -> Self {
        Self::new_with_time(store, prefix, name, Arc::new(WallClockTime::new()))
    }

    /// Create a watcher with an injected time provider (for tests)
    pub fn new_with_time(
        store: Arc<dyn RegistryStore>,
        prefix: &str,
        name: &ServiceName,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let (stop, closed) = StopSignal::new();
        Self {
            store,
            dir: crate::record::service_dir(prefix, name),
            known: None,
            watch: None,
            stop: Arc::new(stop),
            closed,
            time,
        }
    }

    /// Handle for closing this watcher from another task
    pub fn closer(&self) -> WatcherCloser {
        WatcherCloser(Arc::clone(&self.stop))
    }

    /// Close the watcher and release its store watch
    pub fn close(self) {
        self.stop.signal();
    }

    /// Block until the membership changes, returning the delta
    ///
    /// The first call returns the full current membership as Add
    /// events. Later calls block on the store watch, reconcile from a
    /// full listing, and return only non-empty diffs: a notification
    /// that does not change the decoded address set keeps waiting
    /// instead of surfacing a spurious empty delta.
    pub async fn next(&mut self) -> RegistryResult<Vec<Change>> {
        if self.closed.is_stopped() {
            return Err(RegistryError::Closed);
        }

        if self.known.is_none() {
            let current = match self.list().await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!(dir = %self.dir, error = %e, "initial membership listing failed");
                    HashSet::new()
                }
            };

            if !current.is_empty() {
                let changes = diff(&HashSet::new(), &current);
                self.known = Some(current);
                return Ok(changes);
            }
            // Nothing there yet: fall through and wait for the first
            // instance to appear rather than returning an empty delta.
            self.known = Some(HashSet::new());
        }

        loop {
            if self.watch.is_none() {
                match self.store.watch(&self.dir, true).await {
                    Ok(watch) => self.watch = Some(watch),
                    Err(e) => {
                        warn!(dir = %self.dir, error = %e, "watch setup failed, retrying");
                        self.retry_pause().await?;
                        continue;
                    }
                }
            }

            let Some(watch) = self.watch.as_mut() else {
                continue;
            };
            let closed = &mut self.closed;
            let waited = tokio::select! {
                _ = closed.stopped() => return Err(RegistryError::Closed),
                result = watch.changed() => result,
            };

            if let Err(e) = waited {
                warn!(dir = %self.dir, error = %e, "watch failed, re-establishing");
                self.watch = None;
                self.retry_pause().await?;
                continue;
            }

            let current = match self.list().await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!(dir = %self.dir, error = %e, "membership listing failed");
                    continue;
                }
            };

            let previous = self.known.take().unwrap_or_default();
            let changes = diff(&previous, &current);
            self.known = Some(current);

            if !changes.is_empty() {
                return Ok(changes);
            }
            // Metadata-only change; membership is unchanged.
        }
    }

    /// Sleep before a retry, abandoning the wait if closed meanwhile
    async fn retry_pause(&mut self) -> RegistryResult<()> {
        let closed = &mut self.closed;
        tokio::select! {
            _ = closed.stopped() => Err(RegistryError::Closed),
            _ = self.time.sleep_ms(WATCH_RETRY_BACKOFF_MS) => Ok(()),
        }
    }

    /// Full listing of the directory, decoded to an address set
    ///
    /// A missing directory is an empty membership. Malformed children
    /// are skipped individually; the counter key and nested
    /// directories are never decoded.
    async fn list(&self) -> RegistryResult<HashSet<String>> {
        let node = match self.store.get(&self.dir, true).await {
            Ok(node) => node,
            Err(RegistryError::NotFound { .. }) => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };

        if node.nodes.is_empty() {
            self.drop_empty_dir().await;
            return Ok(HashSet::new());
        }

        let counter_suffix = format!("/{}", COUNTER_KEY);
        let mut addrs = HashSet::new();
        for child in &node.nodes {
            if child.dir || child.key.ends_with(&counter_suffix) {
                continue;
            }
            match RecordPayload::decode(&child.key, &child.value) {
                Ok(payload) => {
                    addrs.insert(payload.address());
                }
                Err(e) => {
                    warn!(key = %child.key, error = %e, "skipping malformed record");
                }
            }
        }
        Ok(addrs)
    }

    /// Best-effort removal of an empty directory marker
    async fn drop_empty_dir(&self) {
        if let Err(e) = self
            .store
            .delete(&self.dir, DeleteOptions::default())
            .await
        {
            debug!(dir = %self.dir, error = %e, "empty directory cleanup skipped");
        }
    }
}
