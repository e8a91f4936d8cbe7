//! Beacon Core
//!
//! Shared infrastructure for the beacon service registry:
//!
//! - I/O abstraction (time, randomness) so the same code runs against
//!   the wall clock in production and a simulated clock in tests
//! - Registry-wide constants with explicit units
//! - Telemetry bootstrap for structured logging

pub mod constants;
pub mod io;
pub mod telemetry;

pub use constants::*;
pub use io::{RngProvider, SimClock, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::TelemetryConfig;
