//! Requeue policy: which interval a finished pass asks for.
//!
//! Nothing here sleeps. The host scheduling loop owns all timing and must
//! not run the record again before the returned delay.

use std::time::Duration;

use crate::params::ReconcileParameters;

/// Outcome class of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// Dependency wait, in-progress poll or intermediate step.
    Progress,
    /// Record settled in `Succeeded`.
    Success,
    /// Adapter error, transient or fatal.
    Failure,
}

/// What the host should do with the record after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Reconcile again no earlier than the given delay.
    Requeue(Duration),
    /// The external resource is gone (or abandoned); the record may be removed.
    Release,
}

impl Directive {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Directive::Requeue(delay) => Some(*delay),
            Directive::Release => None,
        }
    }
}

/// Map an outcome class to its requeue delay.
pub fn delay_for(params: &ReconcileParameters, outcome: OutcomeClass) -> Duration {
    match outcome {
        OutcomeClass::Progress => params.requeue_after(),
        OutcomeClass::Success => params.requeue_after_success(),
        OutcomeClass::Failure => params.requeue_after_failure(),
    }
}

/// Requeue directive for an outcome class.
pub fn requeue(params: &ReconcileParameters, outcome: OutcomeClass) -> Directive {
    Directive::Requeue(delay_for(params, outcome))
}
