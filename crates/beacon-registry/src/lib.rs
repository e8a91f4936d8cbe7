//! Beacon Registry
//!
//! Service registration and discovery backed by a coordination store.
//!
//! # Overview
//!
//! A producer registers a [`ServiceRecord`] through the [`Registrar`],
//! which allocates a collision-free instance ID via a compare-and-swap
//! loop on a per-service counter key and writes the record under a
//! TTL lease. A [`Heartbeater`] task keeps the lease alive until the
//! record is unregistered.
//!
//! A consumer calls [`Resolver::resolve`] to obtain a [`Watcher`] for
//! a service name, then repeatedly calls [`Watcher::next`] to receive
//! incremental Add/Delete membership [`Change`]s suitable for feeding
//! a load-balancing pool.
//!
//! Store access goes through the [`RegistryStore`] trait; production
//! uses the etcd backend ([`EtcdStore`]), tests and single-process
//! setups use [`MemoryStore`].

pub mod diff;
pub mod error;
pub mod etcd;
pub mod heartbeat;
pub mod memory;
pub mod record;
pub mod registrar;
pub mod resolver;
pub mod store;
pub mod watcher;

pub use diff::{diff, Change, ChangeOp};
pub use error::{RegistryError, RegistryResult};
pub use etcd::EtcdStore;
pub use heartbeat::Heartbeater;
pub use memory::MemoryStore;
pub use record::{RecordPayload, ServiceName, ServiceRecord, StopListener, StopSignal};
pub use registrar::{Registrar, RegistrarConfig};
pub use resolver::Resolver;
pub use store::{DeleteOptions, RegistryStore, SetOptions, StoreNode, StoreWatch};
pub use watcher::{Watcher, WatcherCloser};
