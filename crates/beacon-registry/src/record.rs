//! Service records and their lifecycle primitives
//!
//! A [`ServiceRecord`] is created by the producer with the id unset;
//! the registrar fixes the id on first registration. The record owns
//! the single-use stop signal for its heartbeat task and the shared
//! revision cell that guards conditional writes.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Maximum length of a service name in bytes
pub const SERVICE_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Key name of the per-service instance-ID counter
pub const COUNTER_KEY: &str = "ID";

// =============================================================================
// ServiceName
// =============================================================================

/// Validated logical service name
///
/// Groups instances under one directory in the store, so it must not
/// contain path separators.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    /// Create a new ServiceName with validation
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, or contains `/`.
    pub fn new(name: impl Into<String>) -> RegistryResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(RegistryError::InvalidServiceName {
                name,
                reason: "service name cannot be empty".into(),
            });
        }

        if name.len() > SERVICE_NAME_LENGTH_BYTES_MAX {
            return Err(RegistryError::InvalidServiceName {
                reason: format!(
                    "service name length {} exceeds limit {}",
                    name.len(),
                    SERVICE_NAME_LENGTH_BYTES_MAX
                ),
                name,
            });
        }

        if name.contains('/') {
            return Err(RegistryError::InvalidServiceName {
                name,
                reason: "service name cannot contain '/'".into(),
            });
        }

        Ok(Self(name))
    }

    /// Get the name as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Key layout
// =============================================================================

/// Directory holding all instances of a service: `{prefix}/{name}`
pub fn service_dir(prefix: &str, name: &ServiceName) -> String {
    format!("{}/{}", prefix, name)
}

/// Path of one instance's record: `{prefix}/{name}/{id}`
pub fn record_path(prefix: &str, name: &ServiceName, id: u64) -> String {
    debug_assert!(id > 0, "record path requires an assigned id");
    format!("{}/{}/{}", prefix, name, id)
}

/// Path of the per-service instance-ID counter: `{prefix}/{name}/ID`
pub fn counter_path(prefix: &str, name: &ServiceName) -> String {
    format!("{}/{}/{}", prefix, name, COUNTER_KEY)
}

// =============================================================================
// Stop signal
// =============================================================================

/// Single-use stop signal for a record's heartbeat task
///
/// Signalling more than once, or after the task has already exited,
/// never blocks or panics.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

/// Receiving side of a [`StopSignal`], held by the heartbeat task
#[derive(Debug)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a signal and its listener
    pub fn new() -> (Self, StopListener) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, StopListener { rx })
    }

    /// Signal the task to stop
    pub fn signal(&self) {
        // Send only fails when the listener is gone, which means the
        // task already exited; nothing left to stop.
        let _ = self.tx.send(true);
    }
}

impl StopListener {
    /// Wait until the stop signal fires
    pub async fn stopped(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // Signal side dropped without firing; treat as stop so
                // the task does not outlive its record.
                return;
            }
        }
    }

    /// Check the signal without waiting
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

// =============================================================================
// RecordPayload (wire form)
// =============================================================================

/// JSON wire form of a registered instance: `{id, name, host, port}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Instance identifier, unique within `name`
    pub id: u64,
    /// Logical service name
    pub name: String,
    /// Instance host
    pub host: String,
    /// Instance port
    pub port: u16,
}

impl RecordPayload {
    /// Render the resolvable address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Encode to the stored JSON form
    pub fn encode(&self) -> RegistryResult<String> {
        serde_json::to_string(self)
            .map_err(|e| RegistryError::malformed_record(&self.name, e.to_string()))
    }

    /// Decode from the stored JSON form
    pub fn decode(path: &str, raw: &str) -> RegistryResult<Self> {
        serde_json::from_str(raw).map_err(|e| RegistryError::malformed_record(path, e.to_string()))
    }
}

// =============================================================================
// ServiceRecord
// =============================================================================

/// One registered (or to-be-registered) service instance
///
/// The revision cell is shared with the heartbeat task; it only
/// advances from store responses to this record's own writes. The
/// stop listener can be taken exactly once, which is what enforces
/// the at-most-one-heartbeat-task invariant.
#[derive(Debug)]
pub struct ServiceRecord {
    /// Instance identifier; 0 until assigned by the registrar
    pub id: u64,
    /// Logical service name
    pub name: ServiceName,
    /// Instance host
    pub host: String,
    /// Instance port
    pub port: u16,
    /// Last-seen store revision for this record's key
    revision: Arc<AtomicU64>,
    /// Stop signal owned by this record
    stop: StopSignal,
    /// Listener handed to the (single) heartbeat task
    stop_listener: Option<StopListener>,
}

impl ServiceRecord {
    /// Create an unregistered record
    ///
    /// # Errors
    /// Returns error if the service name fails validation or the host
    /// is empty.
    pub fn new(name: &str, host: &str, port: u16) -> RegistryResult<Self> {
        let name = ServiceName::new(name)?;

        if host.is_empty() {
            return Err(RegistryError::InvalidServiceName {
                name: name.as_str().to_string(),
                reason: "host cannot be empty".into(),
            });
        }

        let (stop, listener) = StopSignal::new();

        Ok(Self {
            id: 0,
            name,
            host: host.to_string(),
            port,
            revision: Arc::new(AtomicU64::new(0)),
            stop,
            stop_listener: Some(listener),
        })
    }

    /// Whether an instance id has been assigned
    pub fn is_registered(&self) -> bool {
        self.id > 0
    }

    /// Resolvable address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Last-seen store revision
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Record a revision returned by the store
    pub fn set_revision(&self, revision: u64) {
        self.revision.store(revision, Ordering::SeqCst);
    }

    /// Shared handle to the revision cell (for the heartbeat task)
    pub(crate) fn revision_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.revision)
    }

    /// Take the stop listener; `None` after the first call
    pub(crate) fn take_stop_listener(&mut self) -> Option<StopListener> {
        self.stop_listener.take()
    }

    /// Signal the heartbeat task (if any) to stop
    pub fn stop(&self) {
        self.stop.signal();
    }

    /// Wire form of this record
    pub fn payload(&self) -> RecordPayload {
        RecordPayload {
            id: self.id,
            name: self.name.as_str().to_string(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}
