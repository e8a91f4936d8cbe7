//! Registrar: publish, refresh, and withdraw service records
//!
//! Instance IDs are allocated through a compare-and-swap loop on the
//! per-service counter key. There is no local shared state and no
//! lock; concurrent registrants across processes are serialized
//! entirely by the store's conditional-write guarantee.

use crate::error::{RegistryError, RegistryResult};
use crate::heartbeat::Heartbeater;
use crate::record::{counter_path, record_path, ServiceName, ServiceRecord};
use crate::store::{DeleteOptions, RegistryStore, SetOptions};
use beacon_core::constants::{
    ID_ALLOC_ATTEMPTS_MAX_DEFAULT, ID_ALLOC_BACKOFF_MS_DEFAULT, ID_ALLOC_BACKOFF_MS_MAX,
    LEASE_TTL_MS_DEFAULT, LEASE_TTL_MS_MAX, LEASE_TTL_MS_MIN, REGISTRY_PREFIX_DEFAULT,
};
use beacon_core::io::{RngProvider, StdRngProvider, TimeProvider, WallClockTime};
use std::sync::Arc;
use tracing::{debug, info};

/// Registrar configuration
#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// Key prefix under which service directories live
    pub prefix: String,
    /// Lease TTL in milliseconds; heartbeats tick at half this
    pub ttl_ms: u64,
    /// Attempts before ID allocation gives up
    pub alloc_attempts_max: u32,
    /// Base backoff between allocation attempts in milliseconds;
    /// doubles per attempt up to `ID_ALLOC_BACKOFF_MS_MAX`, jittered
    pub alloc_backoff_ms: u64,
}

impl RegistrarConfig {
    /// Create a configuration with the given lease TTL
    ///
    /// Values outside bounds are clamped to the valid range.
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            prefix: REGISTRY_PREFIX_DEFAULT.to_string(),
            ttl_ms: ttl_ms.clamp(LEASE_TTL_MS_MIN, LEASE_TTL_MS_MAX),
            alloc_attempts_max: ID_ALLOC_ATTEMPTS_MAX_DEFAULT,
            alloc_backoff_ms: ID_ALLOC_BACKOFF_MS_DEFAULT,
        }
    }

    /// Set the key prefix; an empty prefix falls back to the default
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.prefix = prefix.trim_end_matches('/').to_string();
        }
        self
    }

    /// Configuration with short intervals for tests
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            prefix: "test/service".to_string(),
            ttl_ms: LEASE_TTL_MS_MIN,
            alloc_attempts_max: 4,
            alloc_backoff_ms: 1,
        }
    }
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self::new(LEASE_TTL_MS_DEFAULT)
    }
}

/// Publishes service records to the coordination store
pub struct Registrar {
    store: Arc<dyn RegistryStore>,
    config: RegistrarConfig,
    time: Arc<dyn TimeProvider>,
    rng: Arc<dyn RngProvider>,
}

impl Registrar {
    /// Create a registrar using production time and RNG
    pub fn new(store: Arc<dyn RegistryStore>, config: RegistrarConfig) -> Self {
        Self::new_with_io(
            store,
            config,
            Arc::new(WallClockTime::new()),
            Arc::new(StdRngProvider::new()),
        )
    }

    /// Create a registrar with injected time and RNG (for tests)
    pub fn new_with_io(
        store: Arc<dyn RegistryStore>,
        config: RegistrarConfig,
        time: Arc<dyn TimeProvider>,
        rng: Arc<dyn RngProvider>,
    ) -> Self {
        Self {
            store,
            config,
            time,
            rng,
        }
    }

    /// The configured key prefix
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Publish a record under a TTL lease
    ///
    /// Allocates an instance ID on first registration. The returned
    /// store revision is recorded on the record to guard later
    /// conditional writes. Registering does not start the heartbeat;
    /// obtain one via [`Registrar::heartbeater`] and spawn it.
    pub async fn register(&self, record: &mut ServiceRecord) -> RegistryResult<()> {
        if record.id == 0 {
            record.id = self.allocate_id(&record.name).await?;
        }

        let path = record_path(&self.config.prefix, &record.name, record.id);
        let mut opts = SetOptions::with_ttl(self.config.ttl_ms);
        if record.revision() > 0 {
            opts.prev_index = Some(record.revision());
        }

        let payload = record.payload().encode()?;
        let revision = self.store.set(&path, &payload, opts).await?;
        record.set_revision(revision);

        info!(
            name = %record.name,
            id = record.id,
            address = %record.address(),
            revision,
            "service registered"
        );
        Ok(())
    }

    /// Withdraw a record and stop its heartbeat task
    ///
    /// The delete is conditioned on the record's last known revision;
    /// losing that race surfaces as `CompareFailed`. The heartbeat
    /// stop signal fires regardless of the delete outcome, so a
    /// failed unregister never leaks a refresh loop.
    pub async fn unregister(&self, record: &ServiceRecord) -> RegistryResult<()> {
        if !record.is_registered() {
            record.stop();
            return Err(RegistryError::NotRegistered {
                name: record.name.as_str().to_string(),
            });
        }

        let path = record_path(&self.config.prefix, &record.name, record.id);
        let opts = DeleteOptions {
            prev_index: Some(record.revision()).filter(|r| *r > 0),
        };

        let result = self.store.delete(&path, opts).await;
        record.stop();

        let revision = result?;
        record.set_revision(revision);
        info!(name = %record.name, id = record.id, "service unregistered");
        Ok(())
    }

    /// Build the heartbeat task for a registered record
    ///
    /// At most one heartbeater exists per record; a second call
    /// returns `HeartbeatAlreadyStarted`.
    pub fn heartbeater(&self, record: &mut ServiceRecord) -> RegistryResult<Heartbeater> {
        if !record.is_registered() {
            return Err(RegistryError::NotRegistered {
                name: record.name.as_str().to_string(),
            });
        }

        let stop = record
            .take_stop_listener()
            .ok_or_else(|| RegistryError::HeartbeatAlreadyStarted {
                name: record.name.as_str().to_string(),
                id: record.id,
            })?;

        Ok(Heartbeater::new(
            Arc::clone(&self.store),
            record_path(&self.config.prefix, &record.name, record.id),
            self.config.ttl_ms,
            record.revision_handle(),
            stop,
            Arc::clone(&self.time),
        ))
    }

    /// Allocate the next instance ID for `name` via counter CAS
    ///
    /// Reads the counter, writes current+1 conditioned on the value
    /// read (or on absence for the first instance), and retries with
    /// jittered exponential backoff when a concurrent registrant wins
    /// the write. The ID is consumed only after a successful counter
    /// write, so contention never leaves gaps.
    async fn allocate_id(&self, name: &ServiceName) -> RegistryResult<u64> {
        let counter = counter_path(&self.config.prefix, name);

        for attempt in 1..=self.config.alloc_attempts_max {
            let (candidate, opts) = match self.store.get(&counter, false).await {
                Ok(node) => {
                    let current: u64 = node.value.parse().map_err(|_| {
                        RegistryError::malformed_record(
                            &counter,
                            format!("counter value {:?} is not an integer", node.value),
                        )
                    })?;
                    (
                        current + 1,
                        SetOptions {
                            prev_value: Some(node.value),
                            ..Default::default()
                        },
                    )
                }
                Err(RegistryError::NotFound { .. }) => (
                    1,
                    SetOptions {
                        prev_exist: Some(false),
                        ..Default::default()
                    },
                ),
                Err(e) => return Err(e),
            };

            match self.store.set(&counter, &candidate.to_string(), opts).await {
                Ok(_) => {
                    debug!(name = %name, id = candidate, attempt, "instance id allocated");
                    return Ok(candidate);
                }
                // Lost the race: counter moved (or appeared/vanished)
                // between our read and write. Back off and re-read.
                Err(RegistryError::CompareFailed { .. })
                | Err(RegistryError::NotFound { .. }) => {
                    debug!(name = %name, attempt, "id allocation conflict, retrying");
                    self.time.sleep_ms(self.backoff_ms(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(RegistryError::AllocationTimeout {
            name: name.as_str().to_string(),
            attempts: self.config.alloc_attempts_max,
        })
    }

    /// Exponential backoff with jitter in [base/2, base]
    fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = self
            .config
            .alloc_backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            .min(ID_ALLOC_BACKOFF_MS_MAX);
        if base < 2 {
            return base;
        }
        self.rng.gen_range(base / 2, base + 1)
    }
}
