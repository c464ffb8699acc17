//! converge-core: reconcile engine for declarative desired-state records.
//!
//! Resource-specific controllers supply an [`Adapter`]; the engine drives the
//! record through its lifecycle:
//! - [`dependency`] gates progress on owner and dependency readiness
//! - [`poller`] interprets verify results while async operations run
//! - [`machine`] computes the next [`Status`] and a requeue [`Directive`]
//! - [`requeue`] maps the outcome of a pass to a delay
//!
//! The engine never schedules anything itself. The host calls
//! [`Reconciler::reconcile`] at most once at a time per record and honours the
//! returned directive.

pub mod adapter;
pub mod dependency;
pub mod error;
pub mod machine;
pub mod params;
pub mod permissions;
pub mod poller;
pub mod requeue;
pub mod status;

pub use adapter::{Adapter, Completion, CompletionMode, Verification};
pub use dependency::{Dependencies, Readiness, ResourceRef, StatusLookup};
pub use error::{AdapterError, LookupError, ParamsError};
pub use machine::{PassResult, ReconcileRequest, Reconciler};
pub use params::ReconcileParameters;
pub use permissions::AccessPermissions;
pub use requeue::{Directive, OutcomeClass};
pub use status::{Drift, State, Status, StatusPayload, VerifyResult};
