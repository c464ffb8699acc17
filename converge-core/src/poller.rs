//! Verification poller: one verify call per pass while an asynchronous
//! operation is outstanding.
//!
//! Synchronous operations never come through here, so no intermediate
//! `VerifyResult` is observed for them.

use tracing::debug;

use crate::adapter::{Adapter, Verification};
use crate::dependency::ResourceRef;
use crate::error::AdapterError;
use crate::status::{StatusPayload, VerifyResult};

/// What the record is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiting {
    /// An asynchronous create or update.
    Provisioning,
    /// An asynchronous delete (or the delete has yet to be issued).
    Deletion,
}

/// How to proceed after a verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Keep waiting, poll again at the default interval.
    Wait,
    /// Provisioning finished, resource confirmed present.
    Ready,
    /// Resource vanished while provisioning.
    Lost,
    /// Resource confirmed absent; deletion is complete.
    Gone,
    /// Resource still exists and no delete is running.
    DeleteRequired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polled {
    pub action: PollAction,
    pub verification: Verification,
}

impl Polled {
    pub fn result(&self) -> VerifyResult {
        self.verification.result
    }

    pub fn payload(&self) -> &StatusPayload {
        &self.verification.payload
    }
}

/// Map a verify result to an action for the given wait.
pub fn interpret(waiting: Waiting, result: VerifyResult) -> PollAction {
    match (waiting, result) {
        (Waiting::Provisioning, VerifyResult::InProgress) => PollAction::Wait,
        (Waiting::Provisioning, VerifyResult::Ready) => PollAction::Ready,
        (Waiting::Provisioning, VerifyResult::Missing) => PollAction::Lost,
        // a delete we did not ask for; wait for it to settle
        (Waiting::Provisioning, VerifyResult::Deleting) => PollAction::Wait,
        (Waiting::Deletion, VerifyResult::Deleting) => PollAction::Wait,
        (Waiting::Deletion, VerifyResult::Missing) => PollAction::Gone,
        (Waiting::Deletion, VerifyResult::Ready | VerifyResult::InProgress) => {
            PollAction::DeleteRequired
        }
    }
}

/// Run one verify call and interpret it.
pub async fn poll<A: Adapter>(
    adapter: &A,
    target: &ResourceRef,
    spec: &A::Spec,
    payload: &StatusPayload,
    waiting: Waiting,
) -> Result<Polled, AdapterError> {
    let verification = adapter.verify(target, spec, payload).await?;
    let action = interpret(waiting, verification.result);
    debug!(
        resource = %target,
        result = %verification.result,
        ?waiting,
        ?action,
        "Verified"
    );
    Ok(Polled {
        action,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_wait() {
        assert_eq!(
            interpret(Waiting::Provisioning, VerifyResult::InProgress),
            PollAction::Wait
        );
        assert_eq!(
            interpret(Waiting::Provisioning, VerifyResult::Ready),
            PollAction::Ready
        );
        assert_eq!(
            interpret(Waiting::Provisioning, VerifyResult::Missing),
            PollAction::Lost
        );
    }

    #[test]
    fn deletion_wait() {
        assert_eq!(
            interpret(Waiting::Deletion, VerifyResult::Deleting),
            PollAction::Wait
        );
        assert_eq!(
            interpret(Waiting::Deletion, VerifyResult::Missing),
            PollAction::Gone
        );
        assert_eq!(
            interpret(Waiting::Deletion, VerifyResult::Ready),
            PollAction::DeleteRequired
        );
        assert_eq!(
            interpret(Waiting::Deletion, VerifyResult::InProgress),
            PollAction::DeleteRequired
        );
    }
}
