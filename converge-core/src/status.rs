//! Status model persisted alongside every desired-state record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateParseError;

/// Reconcile state of a record.
///
/// Serialized as the plain variant name (`"Pending"`, `"Succeeded"`, ...) so
/// the control plane sees the same strings it always has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Creating,
    Updating,
    Verifying,
    Completing,
    Succeeded,
    Recreating,
    Failed,
    Terminating,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Pending,
        State::Creating,
        State::Updating,
        State::Verifying,
        State::Completing,
        State::Succeeded,
        State::Recreating,
        State::Failed,
        State::Terminating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "Pending",
            State::Creating => "Creating",
            State::Updating => "Updating",
            State::Verifying => "Verifying",
            State::Completing => "Completing",
            State::Succeeded => "Succeeded",
            State::Recreating => "Recreating",
            State::Failed => "Failed",
            State::Terminating => "Terminating",
        }
    }

    /// Terminal states as seen from outside the engine.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeeded | State::Failed)
    }

    /// Whether a single pass may move a record from `self` to `next`.
    ///
    /// Staying put is always allowed (transient errors, waiting polls).
    pub fn can_transition_to(&self, next: State) -> bool {
        use State::*;

        if *self == next {
            return true;
        }
        if next == Terminating {
            return true;
        }
        matches!(
            (*self, next),
            (Pending, Creating)
                | (Pending, Failed)
                | (Creating, Completing)
                | (Creating, Verifying)
                | (Creating, Failed)
                | (Verifying, Completing)
                | (Verifying, Creating)
                | (Verifying, Failed)
                | (Completing, Succeeded)
                | (Completing, Failed)
                | (Succeeded, Pending)
                | (Succeeded, Updating)
                | (Succeeded, Recreating)
                | (Updating, Completing)
                | (Updating, Verifying)
                | (Updating, Failed)
                | (Failed, Pending)
                | (Failed, Creating)
                | (Failed, Updating)
                | (Recreating, Creating)
                | (Recreating, Failed)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StateParseError(s.to_string()))
    }
}

/// Outcome of an adapter verify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyResult {
    /// An asynchronous create or update is still running.
    InProgress,
    /// Resource exists and matches the last applied operation.
    Ready,
    /// An asynchronous delete is still running.
    Deleting,
    /// Resource does not exist.
    Missing,
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerifyResult::InProgress => "InProgress",
            VerifyResult::Ready => "Ready",
            VerifyResult::Deleting => "Deleting",
            VerifyResult::Missing => "Missing",
        };
        f.write_str(s)
    }
}

/// Drift between the desired spec and the live resource, as judged by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Drift {
    #[default]
    InSync,
    /// Spec changed in a way the backend can apply in place.
    UpdateRequired,
    /// Spec changed in a way that needs destroy + create.
    RecreateRequired,
}

/// Adapter-owned data carried from one pass to the next.
///
/// The engine never looks inside: it stores whatever the adapter last
/// returned and hands it back on the next call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusPayload(serde_json::Value);

impl StatusPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_null()
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for StatusPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Persisted reconcile status of a record. Owned by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    pub state: State,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "StatusPayload::is_empty")]
    pub payload: StatusPayload,
}

impl Status {
    /// Status of a freshly declared record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same payload, new state and message.
    pub fn transition(&self, state: State, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            payload: self.payload.clone(),
        }
    }

    /// New state, message and payload.
    pub fn with_payload(state: State, message: impl Into<String>, payload: StatusPayload) -> Self {
        Self {
            state,
            message: message.into(),
            payload,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == State::Pending
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == State::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn is_terminating(&self) -> bool {
        self.state == State::Terminating
    }
}
