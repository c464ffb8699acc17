//! Adapter contract implemented once per resource kind.
//!
//! Every call receives the payload the engine stored after the previous pass
//! and returns the payload to store next. On error the engine keeps the old
//! payload, so an adapter never has to hand it back on failure.

use async_trait::async_trait;

use crate::dependency::ResourceRef;
use crate::error::AdapterError;
use crate::status::{Drift, StatusPayload, VerifyResult};

/// How a mutating call finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// The call blocked until the backend reached a terminal outcome.
    Sync,
    /// The backend accepted the operation; progress is observed via verify.
    Async,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub payload: StatusPayload,
    pub mode: CompletionMode,
}

impl Completion {
    pub fn sync(payload: StatusPayload) -> Self {
        Self {
            payload,
            mode: CompletionMode::Sync,
        }
    }

    pub fn started(payload: StatusPayload) -> Self {
        Self {
            payload,
            mode: CompletionMode::Async,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub result: VerifyResult,
    /// Only meaningful together with `VerifyResult::Ready`.
    pub drift: Drift,
    pub payload: StatusPayload,
}

impl Verification {
    pub fn new(result: VerifyResult, payload: StatusPayload) -> Self {
        Self {
            result,
            drift: Drift::InSync,
            payload,
        }
    }

    pub fn drifted(drift: Drift, payload: StatusPayload) -> Self {
        Self {
            result: VerifyResult::Ready,
            drift,
            payload,
        }
    }
}

/// Operations the engine performs against the external resource.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Resource-specific part of the desired state.
    type Spec: Send + Sync;

    async fn create(
        &self,
        target: &ResourceRef,
        spec: &Self::Spec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError>;

    async fn update(
        &self,
        target: &ResourceRef,
        spec: &Self::Spec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError>;

    async fn delete(
        &self,
        target: &ResourceRef,
        spec: &Self::Spec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError>;

    async fn verify(
        &self,
        target: &ResourceRef,
        spec: &Self::Spec,
        payload: &StatusPayload,
    ) -> Result<Verification, AdapterError>;

    /// Final touch before a record settles in `Succeeded`, e.g. dropping an
    /// async operation handle. Keeps the payload by default.
    async fn complete(
        &self,
        _target: &ResourceRef,
        _spec: &Self::Spec,
        payload: &StatusPayload,
    ) -> Result<StatusPayload, AdapterError> {
        Ok(payload.clone())
    }
}
