//! Registry-wide constants
//!
//! Every constant carries its unit in the name. Bounds exist so that
//! misconfiguration is clamped or rejected instead of silently
//! producing a registry that never refreshes its leases.

/// Default key prefix under which service directories live
pub const REGISTRY_PREFIX_DEFAULT: &str = "beacon/service/grpc";

/// Default lease TTL in milliseconds
pub const LEASE_TTL_MS_DEFAULT: u64 = 10_000;

/// Minimum lease TTL in milliseconds
///
/// Below this the refresh interval (ttl/2) races the store's reap
/// granularity and instances flap in and out of membership.
pub const LEASE_TTL_MS_MIN: u64 = 1_000;

/// Maximum lease TTL in milliseconds
pub const LEASE_TTL_MS_MAX: u64 = 300_000;

/// Default number of attempts for the instance-ID allocation loop
pub const ID_ALLOC_ATTEMPTS_MAX_DEFAULT: u32 = 16;

/// Default base backoff between ID allocation attempts in milliseconds
pub const ID_ALLOC_BACKOFF_MS_DEFAULT: u64 = 500;

/// Cap on the exponential ID allocation backoff in milliseconds
pub const ID_ALLOC_BACKOFF_MS_MAX: u64 = 8_000;

/// Per-request timeout for non-blocking store calls in milliseconds
pub const STORE_REQUEST_TIMEOUT_MS: u64 = 1_000;

/// Delay before re-creating a failed watch in milliseconds
pub const WATCH_RETRY_BACKOFF_MS: u64 = 1_000;

const _: () = {
    assert!(LEASE_TTL_MS_MIN >= 2, "ttl/2 tick must be non-zero");
    assert!(LEASE_TTL_MS_MIN <= LEASE_TTL_MS_DEFAULT);
    assert!(LEASE_TTL_MS_DEFAULT <= LEASE_TTL_MS_MAX);
    assert!(ID_ALLOC_BACKOFF_MS_DEFAULT <= ID_ALLOC_BACKOFF_MS_MAX);
};
