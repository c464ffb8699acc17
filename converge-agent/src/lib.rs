//! converge-agent: hosts reconcilers over an in-memory control plane.
//!
//! - [`store`]: desired-state records, their status and change events
//! - [`queue`]: per-key serialised work queue with delayed requeue
//! - [`controller`]: one reconciler per kind, driven by a worker pool
//! - [`simulated`]: simulated backend with behaviour overrides
//! - [`config`]: manifest of records to seed

pub mod config;
pub mod controller;
pub mod queue;
pub mod simulated;
pub mod store;

pub use controller::{Controller, ControllerHandle};
pub use store::{CreateRecordRequest, MemoryStore, RecordData, StoreError, StoreEvent};
