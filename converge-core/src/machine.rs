//! Reconcile state machine.
//!
//! A pass reads the current `Status`, consults the dependency gate and at most
//! one mutating adapter call, and returns the next `Status` plus a requeue
//! directive. It never sleeps and never locks: the host serialises passes per
//! record and owns all timing.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, Completion, CompletionMode};
use crate::dependency::{self, Dependencies, ResourceRef, StatusLookup};
use crate::error::AdapterError;
use crate::params::ReconcileParameters;
use crate::permissions::AccessPermissions;
use crate::poller::{self, PollAction, Waiting};
use crate::requeue::{self, Directive, OutcomeClass};
use crate::status::{Drift, State, Status, VerifyResult};

/// Everything a pass needs to know about one record.
#[derive(Debug)]
pub struct ReconcileRequest<'a, S> {
    pub target: &'a ResourceRef,
    pub spec: &'a S,
    pub dependencies: &'a Dependencies,
    pub permissions: AccessPermissions,
    pub deletion_requested: bool,
    pub status: &'a Status,
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassResult {
    pub status: Status,
    pub directive: Directive,
}

impl PassResult {
    pub fn released(&self) -> bool {
        self.directive == Directive::Release
    }
}

/// Drives records of one kind through their lifecycle.
pub struct Reconciler<A: Adapter> {
    adapter: Arc<A>,
    lookup: Arc<dyn StatusLookup>,
    params: ReconcileParameters,
}

impl<A: Adapter> Reconciler<A> {
    pub fn new(
        adapter: Arc<A>,
        lookup: Arc<dyn StatusLookup>,
        params: ReconcileParameters,
    ) -> Self {
        Self {
            adapter,
            lookup,
            params,
        }
    }

    pub fn params(&self) -> &ReconcileParameters {
        &self.params
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Run a single pass. Adapter errors never escape; they end up in the
    /// returned status message.
    pub async fn reconcile(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let prev = req.status.state;

        let result = if req.deletion_requested && prev != State::Terminating {
            self.progress(req.status.transition(State::Terminating, "deletion requested"))
        } else {
            match prev {
                State::Pending => self.pending(req).await,
                State::Creating => self.creating(req).await,
                State::Verifying => self.verifying(req).await,
                State::Completing => self.completing(req).await,
                State::Succeeded => self.succeeded(req).await,
                State::Updating => self.updating(req).await,
                State::Failed => self.failed(req).await,
                State::Recreating => self.recreating(req).await,
                State::Terminating => self.terminating(req).await,
            }
        };

        let next = result.status.state;
        debug_assert!(
            prev.can_transition_to(next),
            "illegal transition {prev} -> {next}"
        );

        if result.released() {
            info!(resource = %req.target, from = %prev, "Released");
        } else if next != prev {
            info!(
                resource = %req.target,
                from = %prev,
                to = %next,
                message = %result.status.message,
                "State transition"
            );
        } else {
            debug!(resource = %req.target, state = %next, "No state change");
        }

        result
    }

    async fn pending(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let readiness = dependency::check(self.lookup.as_ref(), req.dependencies).await;
        if readiness.is_ready() {
            self.progress(req.status.transition(State::Creating, ""))
        } else {
            self.progress(req.status.transition(State::Pending, readiness.message()))
        }
    }

    async fn creating(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        if !req.permissions.create {
            return self.denied(req, "create");
        }

        match self
            .adapter
            .create(req.target, req.spec, &req.status.payload)
            .await
        {
            Ok(completion) => self.mutated(completion, "creating"),
            Err(e) => self.adapter_failure(req, "create", e),
        }
    }

    async fn updating(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        if !req.permissions.update {
            return self.denied(req, "update");
        }

        match self
            .adapter
            .update(req.target, req.spec, &req.status.payload)
            .await
        {
            Ok(completion) => self.mutated(completion, "updating"),
            Err(e) => self.adapter_failure(req, "update", e),
        }
    }

    /// Create or update went through: finish now or wait for the backend.
    fn mutated(&self, completion: Completion, what: &str) -> PassResult {
        match completion.mode {
            CompletionMode::Sync => {
                self.progress(Status::with_payload(State::Completing, "", completion.payload))
            }
            CompletionMode::Async => self.progress(Status::with_payload(
                State::Verifying,
                format!("{what} in progress"),
                completion.payload,
            )),
        }
    }

    async fn verifying(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let polled = match poller::poll(
            self.adapter.as_ref(),
            req.target,
            req.spec,
            &req.status.payload,
            Waiting::Provisioning,
        )
        .await
        {
            Ok(polled) => polled,
            Err(e) => return self.adapter_failure(req, "verify", e),
        };

        let payload = polled.payload().clone();
        match polled.action {
            PollAction::Ready => self.progress(Status::with_payload(State::Completing, "", payload)),
            PollAction::Lost | PollAction::Gone => self.progress(Status::with_payload(
                State::Creating,
                "resource missing, recreating",
                payload,
            )),
            PollAction::Wait | PollAction::DeleteRequired => self.progress(Status::with_payload(
                State::Verifying,
                format!("waiting for backend ({})", polled.result()),
                payload,
            )),
        }
    }

    async fn completing(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        match self
            .adapter
            .complete(req.target, req.spec, &req.status.payload)
            .await
        {
            Ok(payload) => self.pass(
                Status::with_payload(State::Succeeded, "", payload),
                OutcomeClass::Success,
            ),
            Err(e) => self.adapter_failure(req, "complete", e),
        }
    }

    async fn succeeded(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let readiness = dependency::check(self.lookup.as_ref(), req.dependencies).await;
        if !readiness.is_ready() {
            return self.progress(req.status.transition(State::Pending, readiness.message()));
        }

        let verification = match self
            .adapter
            .verify(req.target, req.spec, &req.status.payload)
            .await
        {
            Ok(verification) => verification,
            Err(e) => return self.adapter_failure(req, "verify", e),
        };

        let payload = verification.payload;
        match (verification.result, verification.drift) {
            (VerifyResult::Ready, Drift::InSync) => self.pass(
                Status::with_payload(State::Succeeded, "", payload),
                OutcomeClass::Success,
            ),
            (VerifyResult::Ready, Drift::UpdateRequired) => {
                if req.permissions.update {
                    self.progress(Status::with_payload(
                        State::Updating,
                        "update required",
                        payload,
                    ))
                } else {
                    self.pass(
                        Status::with_payload(
                            State::Succeeded,
                            "update required but not permitted",
                            payload,
                        ),
                        OutcomeClass::Success,
                    )
                }
            }
            (VerifyResult::Ready, Drift::RecreateRequired) => {
                if req.permissions.create && req.permissions.delete {
                    self.progress(Status::with_payload(
                        State::Recreating,
                        "recreate required",
                        payload,
                    ))
                } else {
                    self.pass(
                        Status::with_payload(
                            State::Succeeded,
                            "recreate required but not permitted",
                            payload,
                        ),
                        OutcomeClass::Success,
                    )
                }
            }
            (VerifyResult::Missing, _) => {
                warn!(resource = %req.target, "Resource missing after success");
                self.progress(Status::with_payload(
                    State::Pending,
                    "resource missing, recreating",
                    payload,
                ))
            }
            (result @ (VerifyResult::InProgress | VerifyResult::Deleting), _) => {
                self.progress(Status::with_payload(
                    State::Succeeded,
                    format!("backend reports {result}"),
                    payload,
                ))
            }
        }
    }

    /// Resume from whichever operation the backend state points at.
    async fn failed(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let verification = match self
            .adapter
            .verify(req.target, req.spec, &req.status.payload)
            .await
        {
            Ok(verification) => verification,
            Err(e) => return self.adapter_failure(req, "verify", e),
        };

        let payload = verification.payload;
        match verification.result {
            VerifyResult::Missing => {
                // Create again only once dependencies are ready
                let readiness = dependency::check(self.lookup.as_ref(), req.dependencies).await;
                if readiness.is_ready() {
                    self.progress(Status::with_payload(
                        State::Creating,
                        "retrying create",
                        payload,
                    ))
                } else {
                    self.progress(Status::with_payload(
                        State::Pending,
                        readiness.message(),
                        payload,
                    ))
                }
            }
            VerifyResult::Ready => self.progress(Status::with_payload(
                State::Updating,
                "retrying update",
                payload,
            )),
            VerifyResult::InProgress | VerifyResult::Deleting => self.pass(
                Status::with_payload(State::Failed, req.status.message.clone(), payload),
                OutcomeClass::Failure,
            ),
        }
    }

    /// Destroy the resource, then start over from `Creating`.
    async fn recreating(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        let polled = match poller::poll(
            self.adapter.as_ref(),
            req.target,
            req.spec,
            &req.status.payload,
            Waiting::Deletion,
        )
        .await
        {
            Ok(polled) => polled,
            Err(e) => return self.adapter_failure(req, "verify", e),
        };

        let payload = polled.payload().clone();
        match polled.action {
            PollAction::Gone | PollAction::Lost => {
                self.progress(Status::with_payload(State::Creating, "", payload))
            }
            PollAction::Wait | PollAction::Ready => self.progress(Status::with_payload(
                State::Recreating,
                "waiting for delete before recreate",
                payload,
            )),
            PollAction::DeleteRequired => {
                let staged = Status::with_payload(State::Recreating, "", payload);
                match self.adapter.delete(req.target, req.spec, &staged.payload).await {
                    Ok(completion) => match completion.mode {
                        CompletionMode::Sync => self.progress(Status::with_payload(
                            State::Creating,
                            "",
                            completion.payload,
                        )),
                        CompletionMode::Async => self.progress(Status::with_payload(
                            State::Recreating,
                            "deleting before recreate",
                            completion.payload,
                        )),
                    },
                    Err(e) => self.adapter_failure(
                        &ReconcileRequest {
                            status: &staged,
                            ..*req
                        },
                        "delete",
                        e,
                    ),
                }
            }
        }
    }

    /// Delete the external resource. The record is only released once the
    /// resource is confirmed gone or a synchronous delete returned.
    async fn terminating(&self, req: &ReconcileRequest<'_, A::Spec>) -> PassResult {
        if !req.permissions.delete {
            return PassResult {
                status: req
                    .status
                    .transition(State::Terminating, "delete not permitted, resource abandoned"),
                directive: Directive::Release,
            };
        }

        let polled = match poller::poll(
            self.adapter.as_ref(),
            req.target,
            req.spec,
            &req.status.payload,
            Waiting::Deletion,
        )
        .await
        {
            Ok(polled) => polled,
            Err(e) => return self.adapter_failure(req, "verify", e),
        };

        let payload = polled.payload().clone();
        match polled.action {
            PollAction::Gone | PollAction::Lost => PassResult {
                status: Status::with_payload(State::Terminating, "", payload),
                directive: Directive::Release,
            },
            PollAction::Wait | PollAction::Ready => self.progress(Status::with_payload(
                State::Terminating,
                "deletion in progress",
                payload,
            )),
            PollAction::DeleteRequired => {
                let staged = Status::with_payload(State::Terminating, "", payload);
                match self.adapter.delete(req.target, req.spec, &staged.payload).await {
                    Ok(completion) => match completion.mode {
                        CompletionMode::Sync => PassResult {
                            status: Status::with_payload(
                                State::Terminating,
                                "",
                                completion.payload,
                            ),
                            directive: Directive::Release,
                        },
                        CompletionMode::Async => self.progress(Status::with_payload(
                            State::Terminating,
                            "deletion in progress",
                            completion.payload,
                        )),
                    },
                    Err(e) => self.adapter_failure(
                        &ReconcileRequest {
                            status: &staged,
                            ..*req
                        },
                        "delete",
                        e,
                    ),
                }
            }
        }
    }

    fn denied(&self, req: &ReconcileRequest<'_, A::Spec>, op: &str) -> PassResult {
        self.pass(
            req.status.transition(
                State::Failed,
                format!("{op} not permitted (access permissions {})", req.permissions),
            ),
            OutcomeClass::Failure,
        )
    }

    /// Transient errors keep the state; fatal errors move to `Failed` where
    /// the table allows it. Either way the payload survives and the record is
    /// retried at the failure interval.
    fn adapter_failure(
        &self,
        req: &ReconcileRequest<'_, A::Spec>,
        op: &str,
        err: AdapterError,
    ) -> PassResult {
        let prev = req.status.state;
        let status = match &err {
            AdapterError::Transient(_) => {
                warn!(resource = %req.target, state = %prev, op, error = %err, "Transient adapter error");
                req.status.transition(prev, format!("{op} failed, retrying: {err}"))
            }
            AdapterError::Fatal(detail) => {
                error!(resource = %req.target, state = %prev, op, error = %err, "Adapter error");
                let next = if prev != State::Terminating && prev.can_transition_to(State::Failed) {
                    State::Failed
                } else {
                    prev
                };
                req.status.transition(next, format!("{op} failed: {detail}"))
            }
        };
        self.pass(status, OutcomeClass::Failure)
    }

    fn progress(&self, status: Status) -> PassResult {
        self.pass(status, OutcomeClass::Progress)
    }

    fn pass(&self, status: Status, outcome: OutcomeClass) -> PassResult {
        PassResult {
            status,
            directive: requeue::requeue(&self.params, outcome),
        }
    }
}
