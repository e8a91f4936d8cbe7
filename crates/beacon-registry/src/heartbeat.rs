//! Lease heartbeat task
//!
//! One heartbeater runs per live service record, ticking at half the
//! lease TTL. Each tick issues a refresh-only write: value untouched,
//! lease renewed, conditioned on the key still existing. A failed
//! tick is logged and the loop continues; only the stop signal ends
//! it, and once stopped it cannot be restarted.

use crate::record::StopListener;
use crate::store::{RegistryStore, SetOptions};
use beacon_core::io::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Background task refreshing one record's lease
///
/// Obtained from [`crate::Registrar::heartbeater`]; holds the record's
/// single stop listener, which is what makes it the record's only
/// heartbeat task.
pub struct Heartbeater {
    store: Arc<dyn RegistryStore>,
    path: String,
    ttl_ms: u64,
    revision: Arc<AtomicU64>,
    stop: StopListener,
    time: Arc<dyn TimeProvider>,
}

impl Heartbeater {
    pub(crate) fn new(
        store: Arc<dyn RegistryStore>,
        path: String,
        ttl_ms: u64,
        revision: Arc<AtomicU64>,
        stop: StopListener,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        debug_assert!(ttl_ms >= 2, "ttl must give a non-zero tick interval");
        Self {
            store,
            path,
            ttl_ms,
            revision,
            stop,
            time,
        }
    }

    /// Interval between refresh ticks in milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.ttl_ms / 2
    }

    /// Run until the stop signal fires
    ///
    /// If the lease ever fully elapses (e.g. after a long partition),
    /// the key is gone and every further refresh fails with NotFound;
    /// the loop keeps trying and logging rather than re-registering.
    pub async fn run(mut self) {
        let interval_ms = self.ttl_ms / 2;
        debug!(path = %self.path, interval_ms, "heartbeat started");

        loop {
            tokio::select! {
                _ = self.stop.stopped() => {
                    debug!(path = %self.path, "heartbeat stopped");
                    return;
                }
                _ = self.time.sleep_ms(interval_ms) => {
                    let opts = SetOptions::refresh_lease(self.ttl_ms);
                    match self.store.set(&self.path, "", opts).await {
                        Ok(revision) => {
                            if revision > 0 {
                                self.revision.store(revision, Ordering::SeqCst);
                            }
                        }
                        Err(e) => {
                            // A single missed tick is survivable; the
                            // lease only lapses after ttl without any
                            // successful refresh.
                            warn!(path = %self.path, error = %e, "lease refresh failed");
                        }
                    }
                }
            }
        }
    }

    /// Spawn `run` on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
