//! Error types for the reconcile engine.

use thiserror::Error;

/// Errors an adapter reports back to the state machine.
///
/// The variant decides how the pass is classified: transient errors leave
/// the state untouched, fatal errors move the record to `Failed`. Both are
/// retried at the failure interval.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Backend temporarily unavailable (network, throttling, ...).
    #[error("transient: {0}")]
    Transient(String),

    /// Backend rejected the operation.
    #[error("{0}")]
    Fatal(String),
}

impl AdapterError {
    pub fn transient(msg: impl Into<String>) -> Self {
        AdapterError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        AdapterError::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

/// Errors from a dependency status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The lookup backend could not answer.
    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}

/// A reconcile state name that is not one of the known states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown reconcile state: {0}")]
pub struct StateParseError(pub String);

/// An access permission string containing something other than `C`, `R`, `U`, `D`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid access permission {0:?} (expected letters from \"CRUD\")")]
pub struct PermissionParseError(pub char);

/// Invalid reconcile parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("requeue_after must be greater than zero")]
    ZeroRequeueAfter,
}
