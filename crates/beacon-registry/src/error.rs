//! Registry error types
//!
//! One enum covers the whole subsystem so callers match on variants
//! instead of downcasting. Background loops (heartbeat, watcher) log
//! and keep going; only the registration path surfaces errors.

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The coordination store could not be reached
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// Key does not exist in the store
    #[error("key not found: {path}")]
    NotFound { path: String },

    /// A conditional write or delete lost a race against a concurrent
    /// modification (value or revision precondition failed)
    #[error("conditional operation failed for {path}")]
    CompareFailed { path: String },

    /// A directory delete was rejected because it still has children
    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// Operation requires a registered record (id assigned)
    #[error("service {name} is not registered")]
    NotRegistered { name: String },

    /// The record's heartbeat task was already created
    #[error("heartbeat already started for {name}/{id}")]
    HeartbeatAlreadyStarted { name: String, id: u64 },

    /// Service name failed validation
    #[error("invalid service name {name:?}: {reason}")]
    InvalidServiceName { name: String, reason: String },

    /// A stored record could not be decoded
    #[error("malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    /// ID allocation gave up after the configured number of attempts
    #[error("id allocation for {name} timed out after {attempts} attempts")]
    AllocationTimeout { name: String, attempts: u32 },

    /// The watcher was closed while waiting for changes
    #[error("watcher closed")]
    Closed,
}

impl RegistryError {
    /// Create a store unavailable error
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a key not found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a compare failed error
    pub fn compare_failed(path: impl Into<String>) -> Self {
        Self::CompareFailed { path: path.into() }
    }

    /// Create a malformed record error
    pub fn malformed_record(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a transient condition worth retrying
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::CompareFailed { .. }
        )
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
