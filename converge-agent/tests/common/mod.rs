//! Shared test utilities for converge-agent integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use converge_agent::simulated::{SimulatedAdapter, SimulatedBackend};
use converge_agent::{Controller, ControllerHandle, CreateRecordRequest, MemoryStore};
use converge_core::{ReconcileParameters, ResourceRef, State};
use serde_json::{Value, json};
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(120);
const POLL: Duration = Duration::from_millis(10);

pub fn a(id: &str) -> ResourceRef {
    ResourceRef::new("a", id)
}

pub fn b(id: &str) -> ResourceRef {
    ResourceRef::new("b", id)
}

pub fn initial_spec() -> Value {
    json!({ "int_data": 0, "string_data": "initial" })
}

/// Store, simulated backend and controllers for kinds `a` and `b`.
///
/// Kind `a` requeues every 100ms; kind `b` uses separate success and
/// failure intervals.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<SimulatedBackend>,
    controllers: Vec<ControllerHandle>,
}

impl TestHarness {
    pub fn spawn() -> Self {
        let store = Arc::new(MemoryStore::new());
        let backend = SimulatedBackend::new(1);

        let kinds = [
            ("a", ReconcileParameters::new(Duration::from_millis(100))),
            (
                "b",
                ReconcileParameters::new(Duration::from_millis(50))
                    .with_success(Duration::from_millis(200))
                    .with_failure(Duration::from_millis(300)),
            ),
        ];
        let controllers = kinds
            .into_iter()
            .map(|(kind, params)| {
                let adapter = Arc::new(SimulatedAdapter::new(Arc::clone(&backend)));
                Controller::new(kind, Arc::clone(&store), adapter, params, 2)
                    .expect("valid parameters")
                    .spawn()
            })
            .collect();

        Self {
            store,
            backend,
            controllers,
        }
    }

    pub async fn create(&self, reference: ResourceRef) -> ResourceRef {
        self.create_with(CreateRecordRequest::new(reference, initial_spec()))
            .await
    }

    pub async fn create_with(&self, req: CreateRecordRequest) -> ResourceRef {
        let reference = req.reference.clone();
        self.store.create(req).await.expect("Failed to create record");
        reference
    }

    pub async fn delete(&self, reference: &ResourceRef) {
        self.store
            .request_delete(reference)
            .await
            .expect("Failed to request delete");
    }

    pub async fn state(&self, reference: &ResourceRef) -> Option<State> {
        self.store.state_of(reference).await
    }

    pub async fn message(&self, reference: &ResourceRef) -> String {
        self.store
            .get(reference)
            .await
            .map(|r| r.status.message)
            .unwrap_or_default()
    }

    /// Wait for the record to reach `state`.
    pub async fn wait_until_state(&self, reference: &ResourceRef, state: State) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.state(reference).await == Some(state) {
                return true;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }

    /// Wait for the record to be removed from the store.
    pub async fn wait_until_missing(&self, reference: &ResourceRef) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if self.store.get(reference).await.is_none() {
                return true;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }

    /// Wait for a condition on the backend to hold.
    pub async fn eventually(&self, cond: impl Fn(&SimulatedBackend) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if cond(&self.backend) {
                return true;
            }
            tokio::time::sleep(POLL).await;
        }
        false
    }

    pub async fn shutdown(self) {
        for controller in self.controllers {
            controller.shutdown().await;
        }
    }
}
