//! Reconcile parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ParamsError;

/// Requeue intervals for one reconciler instance, in milliseconds.
///
/// The success and failure overrides fall back to `requeue_after_ms` when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileParameters {
    pub requeue_after_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_after_success_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_after_failure_ms: Option<u64>,
}

impl ReconcileParameters {
    pub fn new(requeue_after: Duration) -> Self {
        Self {
            requeue_after_ms: requeue_after.as_millis() as u64,
            requeue_after_success_ms: None,
            requeue_after_failure_ms: None,
        }
    }

    pub fn with_success(mut self, after: Duration) -> Self {
        self.requeue_after_success_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn with_failure(mut self, after: Duration) -> Self {
        self.requeue_after_failure_ms = Some(after.as_millis() as u64);
        self
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.requeue_after_ms == 0 {
            return Err(ParamsError::ZeroRequeueAfter);
        }
        Ok(())
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_millis(self.requeue_after_ms)
    }

    pub fn requeue_after_success(&self) -> Duration {
        Duration::from_millis(self.requeue_after_success_ms.unwrap_or(self.requeue_after_ms))
    }

    pub fn requeue_after_failure(&self) -> Duration {
        Duration::from_millis(self.requeue_after_failure_ms.unwrap_or(self.requeue_after_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_default_to_requeue_after() {
        let params: ReconcileParameters =
            serde_json::from_value(json!({"requeue_after_ms": 100})).unwrap();
        assert_eq!(params.requeue_after(), Duration::from_millis(100));
        assert_eq!(params.requeue_after_success(), Duration::from_millis(100));
        assert_eq!(params.requeue_after_failure(), Duration::from_millis(100));
    }

    #[test]
    fn explicit_overrides_win() {
        let params = ReconcileParameters::new(Duration::from_millis(100))
            .with_success(Duration::from_secs(1))
            .with_failure(Duration::from_secs(2));
        assert_eq!(params.requeue_after_success(), Duration::from_secs(1));
        assert_eq!(params.requeue_after_failure(), Duration::from_secs(2));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let params = ReconcileParameters::new(Duration::ZERO);
        assert_eq!(params.validate(), Err(ParamsError::ZeroRequeueAfter));
    }
}
