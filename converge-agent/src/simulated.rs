//! Simulated backend and the adapter that drives it.
//!
//! The backend plays the external system: it keeps one resource per record,
//! moves it through `InProgress`/`Ready`/`Deleting`/`Missing` and remembers
//! every state it went through. Behaviour overrides force a given completion
//! mode or failure for one record and one event, optionally just once.
//!
//! Defaults: create and delete are asynchronous, update is synchronous.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use converge_core::{
    Adapter, AdapterError, Completion, Drift, ResourceRef, StatusPayload, Verification,
    VerifyResult,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// Spec understood by the simulated adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimulatedSpec {
    #[serde(default)]
    pub int_data: i64,
    #[serde(default)]
    pub string_data: String,
}

/// Event class a behaviour applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    Create,
    Update,
    Delete,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    CreateSync,
    CreateAsync,
    CreateFail,
    UpdateSync,
    UpdateAsync,
    UpdateFail,
    DeleteSync,
    DeleteAsync,
    DeleteFail,
    VerifyNeedsUpdate,
    VerifyNeedsRecreate,
    /// Backend loses the resource.
    VerifyMissing,
    /// Any event: answer with a transient error.
    TransientError,
}

impl Operation {
    /// The event this operation belongs to, `None` for any event.
    pub fn event(&self) -> Option<Event> {
        match self {
            Operation::CreateSync | Operation::CreateAsync | Operation::CreateFail => {
                Some(Event::Create)
            }
            Operation::UpdateSync | Operation::UpdateAsync | Operation::UpdateFail => {
                Some(Event::Update)
            }
            Operation::DeleteSync | Operation::DeleteAsync | Operation::DeleteFail => {
                Some(Event::Delete)
            }
            Operation::VerifyNeedsUpdate
            | Operation::VerifyNeedsRecreate
            | Operation::VerifyMissing => Some(Event::Get),
            Operation::TransientError => None,
        }
    }
}

/// Behaviour override for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behaviour {
    pub event: Event,
    pub operation: Operation,
    /// Consume the override after its first use.
    #[serde(default)]
    pub one_time: bool,
}

impl Behaviour {
    pub fn always(event: Event, operation: Operation) -> Self {
        Self {
            event,
            operation,
            one_time: false,
        }
    }

    pub fn once(event: Event, operation: Operation) -> Self {
        Self {
            event,
            operation,
            one_time: true,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.operation.event().is_none_or(|e| e == self.event)
    }
}

/// Mutation calls seen per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCounts {
    pub create: u32,
    pub update: u32,
    pub delete: u32,
    pub verify: u32,
}

impl CallCounts {
    pub fn mutations(&self) -> u32 {
        self.create + self.update + self.delete
    }
}

/// Deleted resources kept around for their history and call counts.
const RETIRED_LIMIT: usize = 256;

#[derive(Debug)]
struct SimResource {
    state: VerifyResult,
    polls_left: u32,
    applied: serde_json::Value,
    history: Vec<VerifyResult>,
    calls: CallCounts,
}

impl SimResource {
    fn missing() -> Self {
        Self {
            state: VerifyResult::Missing,
            polls_left: 0,
            applied: serde_json::Value::Null,
            history: Vec::new(),
            calls: CallCounts::default(),
        }
    }

    fn set(&mut self, state: VerifyResult) {
        if self.history.last() != Some(&state) {
            self.history.push(state);
        }
        self.state = state;
    }
}

#[derive(Default)]
struct BackendInner {
    /// Resources that exist on the backend (or are being created).
    resources: HashMap<ResourceRef, SimResource>,
    /// Most recently deleted resources, oldest first.
    retired: VecDeque<(ResourceRef, SimResource)>,
    behaviours: HashMap<ResourceRef, Vec<Behaviour>>,
}

impl BackendInner {
    fn find(&self, target: &ResourceRef) -> Option<&SimResource> {
        self.resources.get(target).or_else(|| {
            self.retired
                .iter()
                .rev()
                .find(|(r, _)| r == target)
                .map(|(_, res)| res)
        })
    }

    /// Live entry for the target, reviving a retired one.
    fn live(&mut self, target: &ResourceRef) -> &mut SimResource {
        let revived = if self.resources.contains_key(target) {
            None
        } else {
            self.retired
                .iter()
                .position(|(r, _)| r == target)
                .and_then(|pos| self.retired.remove(pos))
                .map(|(_, res)| res)
        };
        self.resources
            .entry(target.clone())
            .or_insert_with(|| revived.unwrap_or_else(SimResource::missing))
    }

    /// Move a resource that no longer exists out of the live set.
    fn settle(&mut self, target: &ResourceRef) {
        let missing = self
            .resources
            .get(target)
            .is_some_and(|r| r.state == VerifyResult::Missing);
        if !missing {
            return;
        }
        if let Some(res) = self.resources.remove(target) {
            self.retired.push_back((target.clone(), res));
        }
        while self.retired.len() > RETIRED_LIMIT {
            self.retired.pop_front();
        }
    }
}

pub struct SimulatedBackend {
    inner: Mutex<BackendInner>,
    /// Verify passes an async operation stays in progress.
    async_polls: u32,
}

impl SimulatedBackend {
    pub fn new(async_polls: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BackendInner::default()),
            async_polls,
        })
    }

    pub fn add_behaviour(&self, target: &ResourceRef, behaviour: Behaviour) {
        self.inner
            .lock()
            .unwrap()
            .behaviours
            .entry(target.clone())
            .or_default()
            .push(behaviour);
    }

    pub fn clear_behaviours(&self, target: &ResourceRef) {
        self.inner.lock().unwrap().behaviours.remove(target);
    }

    /// Every distinct backend state the resource went through.
    pub fn history(&self, target: &ResourceRef) -> Vec<VerifyResult> {
        self.inner
            .lock()
            .unwrap()
            .find(target)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    pub fn state(&self, target: &ResourceRef) -> VerifyResult {
        self.inner
            .lock()
            .unwrap()
            .find(target)
            .map(|r| r.state)
            .unwrap_or(VerifyResult::Missing)
    }

    /// Calls made against the resource; verifies of an absent resource are
    /// not counted.
    pub fn calls(&self, target: &ResourceRef) -> CallCounts {
        self.inner
            .lock()
            .unwrap()
            .find(target)
            .map(|r| r.calls)
            .unwrap_or_default()
    }

    /// Number of resources currently present on the backend.
    pub fn live_resources(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    /// First matching override for the event; one-time overrides are consumed.
    fn take_operation(
        inner: &mut BackendInner,
        target: &ResourceRef,
        event: Event,
    ) -> Option<Operation> {
        let behaviours = inner.behaviours.get_mut(target)?;
        let pos = behaviours.iter().position(|b| b.event == event)?;
        let behaviour = if behaviours[pos].one_time {
            behaviours.remove(pos)
        } else {
            behaviours[pos].clone()
        };
        debug!(resource = %target, ?event, operation = ?behaviour.operation, "Behaviour override");
        Some(behaviour.operation)
    }

    fn create(
        &self,
        target: &ResourceRef,
        spec: serde_json::Value,
    ) -> Result<(VerifyResult, bool), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        let op = Self::take_operation(&mut inner, target, Event::Create)
            .unwrap_or(Operation::CreateAsync);

        let res = inner.live(target);
        res.calls.create += 1;
        let result = match op {
            Operation::TransientError => Err(AdapterError::transient("backend unavailable")),
            Operation::CreateFail => Err(AdapterError::fatal("simulated create failure")),
            Operation::CreateSync => {
                res.applied = spec;
                res.set(VerifyResult::Ready);
                Ok((VerifyResult::Ready, false))
            }
            _ => {
                res.applied = spec;
                res.polls_left = self.async_polls;
                res.set(VerifyResult::InProgress);
                Ok((VerifyResult::InProgress, true))
            }
        };
        inner.settle(target);
        result
    }

    fn update(
        &self,
        target: &ResourceRef,
        spec: serde_json::Value,
    ) -> Result<(VerifyResult, bool), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        let op = Self::take_operation(&mut inner, target, Event::Update)
            .unwrap_or(Operation::UpdateSync);

        let res = inner.live(target);
        res.calls.update += 1;
        let result = if op == Operation::TransientError {
            Err(AdapterError::transient("backend unavailable"))
        } else if op == Operation::UpdateFail {
            Err(AdapterError::fatal("simulated update failure"))
        } else if res.state == VerifyResult::Missing {
            Err(AdapterError::fatal("resource does not exist"))
        } else if op == Operation::UpdateAsync {
            res.applied = spec;
            res.polls_left = self.async_polls;
            res.set(VerifyResult::InProgress);
            Ok((VerifyResult::InProgress, true))
        } else {
            res.applied = spec;
            res.set(VerifyResult::Ready);
            Ok((VerifyResult::Ready, false))
        };
        inner.settle(target);
        result
    }

    fn delete(&self, target: &ResourceRef) -> Result<(VerifyResult, bool), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        let op = Self::take_operation(&mut inner, target, Event::Delete)
            .unwrap_or(Operation::DeleteAsync);

        let res = inner.live(target);
        res.calls.delete += 1;
        let result = match op {
            Operation::TransientError => Err(AdapterError::transient("backend unavailable")),
            Operation::DeleteFail => Err(AdapterError::fatal("simulated delete failure")),
            Operation::DeleteSync => {
                res.set(VerifyResult::Missing);
                Ok((VerifyResult::Missing, false))
            }
            _ => {
                res.polls_left = self.async_polls;
                res.set(VerifyResult::Deleting);
                Ok((VerifyResult::Deleting, true))
            }
        };
        inner.settle(target);
        result
    }

    fn verify(
        &self,
        target: &ResourceRef,
        spec: &serde_json::Value,
    ) -> Result<(VerifyResult, Drift), AdapterError> {
        let mut inner = self.inner.lock().unwrap();
        let op = Self::take_operation(&mut inner, target, Event::Get);

        if op == Some(Operation::TransientError) {
            return Err(AdapterError::transient("backend unavailable"));
        }
        let Some(res) = inner.resources.get_mut(target) else {
            return Ok((VerifyResult::Missing, Drift::InSync));
        };
        res.calls.verify += 1;
        if op == Some(Operation::VerifyMissing) {
            res.set(VerifyResult::Missing);
        }

        match res.state {
            VerifyResult::InProgress | VerifyResult::Deleting if res.polls_left > 0 => {
                res.polls_left -= 1;
                return Ok((res.state, Drift::InSync));
            }
            VerifyResult::InProgress => res.set(VerifyResult::Ready),
            VerifyResult::Deleting => res.set(VerifyResult::Missing),
            VerifyResult::Ready | VerifyResult::Missing => {}
        }

        let drift = match (res.state, op) {
            (VerifyResult::Ready, Some(Operation::VerifyNeedsUpdate)) => Drift::UpdateRequired,
            (VerifyResult::Ready, Some(Operation::VerifyNeedsRecreate)) => Drift::RecreateRequired,
            (VerifyResult::Ready, _) if &res.applied != spec => Drift::UpdateRequired,
            _ => Drift::InSync,
        };
        let state = res.state;
        inner.settle(target);
        Ok((state, drift))
    }
}

/// Adapter over a shared [`SimulatedBackend`].
pub struct SimulatedAdapter {
    backend: Arc<SimulatedBackend>,
}

impl SimulatedAdapter {
    pub fn new(backend: Arc<SimulatedBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<SimulatedBackend> {
        &self.backend
    }
}

fn to_value(spec: &SimulatedSpec) -> Result<serde_json::Value, AdapterError> {
    serde_json::to_value(spec).map_err(|e| AdapterError::fatal(format!("invalid spec: {e}")))
}

/// Payload carrying the handle of an outstanding async operation.
fn operation_payload(kind: &str) -> StatusPayload {
    json!({ "operation": Uuid::new_v4().to_string(), "kind": kind }).into()
}

fn completion(payload: &StatusPayload, started: bool, kind: &str) -> Completion {
    if started {
        Completion::started(operation_payload(kind))
    } else {
        Completion::sync(payload.clone())
    }
}

#[async_trait]
impl Adapter for SimulatedAdapter {
    type Spec = SimulatedSpec;

    async fn create(
        &self,
        target: &ResourceRef,
        spec: &SimulatedSpec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError> {
        let (_, started) = self.backend.create(target, to_value(spec)?)?;
        Ok(completion(payload, started, "create"))
    }

    async fn update(
        &self,
        target: &ResourceRef,
        spec: &SimulatedSpec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError> {
        let (_, started) = self.backend.update(target, to_value(spec)?)?;
        Ok(completion(payload, started, "update"))
    }

    async fn delete(
        &self,
        target: &ResourceRef,
        _spec: &SimulatedSpec,
        payload: &StatusPayload,
    ) -> Result<Completion, AdapterError> {
        let (_, started) = self.backend.delete(target)?;
        Ok(completion(payload, started, "delete"))
    }

    async fn verify(
        &self,
        target: &ResourceRef,
        spec: &SimulatedSpec,
        payload: &StatusPayload,
    ) -> Result<Verification, AdapterError> {
        let (result, drift) = self.backend.verify(target, &to_value(spec)?)?;
        Ok(Verification {
            result,
            drift,
            payload: payload.clone(),
        })
    }

    /// Drop the operation handle once the record settles.
    async fn complete(
        &self,
        _target: &ResourceRef,
        _spec: &SimulatedSpec,
        _payload: &StatusPayload,
    ) -> Result<StatusPayload, AdapterError> {
        Ok(StatusPayload::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(id: &str) -> ResourceRef {
        ResourceRef::new("a", id)
    }

    fn spec() -> SimulatedSpec {
        SimulatedSpec {
            int_data: 0,
            string_data: "initial".into(),
        }
    }

    #[tokio::test]
    async fn async_create_then_delete_history() {
        let backend = SimulatedBackend::new(1);
        let adapter = SimulatedAdapter::new(Arc::clone(&backend));
        let empty = StatusPayload::empty();

        let c = adapter.create(&a("x"), &spec(), &empty).await.unwrap();
        assert_eq!(c.mode, converge_core::CompletionMode::Async);
        assert_eq!(c.payload.value()["kind"], "create");

        let v = adapter.verify(&a("x"), &spec(), &c.payload).await.unwrap();
        assert_eq!(v.result, VerifyResult::InProgress);
        let v = adapter.verify(&a("x"), &spec(), &c.payload).await.unwrap();
        assert_eq!(v.result, VerifyResult::Ready);
        assert_eq!(v.drift, Drift::InSync);

        adapter.delete(&a("x"), &spec(), &empty).await.unwrap();
        adapter.verify(&a("x"), &spec(), &empty).await.unwrap();
        let v = adapter.verify(&a("x"), &spec(), &empty).await.unwrap();
        assert_eq!(v.result, VerifyResult::Missing);

        assert_eq!(
            backend.history(&a("x")),
            vec![
                VerifyResult::InProgress,
                VerifyResult::Ready,
                VerifyResult::Deleting,
                VerifyResult::Missing
            ]
        );
    }

    #[tokio::test]
    async fn one_time_behaviour_is_consumed() {
        let backend = SimulatedBackend::new(0);
        let adapter = SimulatedAdapter::new(Arc::clone(&backend));
        let empty = StatusPayload::empty();
        backend.add_behaviour(&a("x"), Behaviour::once(Event::Create, Operation::CreateFail));

        let err = adapter.create(&a("x"), &spec(), &empty).await.unwrap_err();
        assert_eq!(err, AdapterError::fatal("simulated create failure"));

        let c = adapter.create(&a("x"), &spec(), &empty).await.unwrap();
        assert_eq!(c.mode, converge_core::CompletionMode::Async);
        assert_eq!(backend.calls(&a("x")).create, 2);
    }

    #[tokio::test]
    async fn spec_change_is_reported_as_drift() {
        let backend = SimulatedBackend::new(0);
        let adapter = SimulatedAdapter::new(Arc::clone(&backend));
        let empty = StatusPayload::empty();
        backend.add_behaviour(&a("x"), Behaviour::always(Event::Create, Operation::CreateSync));
        adapter.create(&a("x"), &spec(), &empty).await.unwrap();

        let changed = SimulatedSpec {
            int_data: 1,
            string_data: "Updated".into(),
        };
        let v = adapter.verify(&a("x"), &changed, &empty).await.unwrap();
        assert_eq!(v.drift, Drift::UpdateRequired);

        adapter.update(&a("x"), &changed, &empty).await.unwrap();
        let v = adapter.verify(&a("x"), &changed, &empty).await.unwrap();
        assert_eq!(v.drift, Drift::InSync);
        assert_eq!(backend.history(&a("x")), vec![VerifyResult::Ready]);
    }

    #[tokio::test]
    async fn unknown_resource_verifies_missing() {
        let backend = SimulatedBackend::new(0);
        let adapter = SimulatedAdapter::new(backend);
        let v = adapter
            .verify(&a("nope"), &spec(), &StatusPayload::empty())
            .await
            .unwrap();
        assert_eq!(v.result, VerifyResult::Missing);
    }

    #[tokio::test]
    async fn deleted_resources_are_retired() {
        let backend = SimulatedBackend::new(0);
        let adapter = SimulatedAdapter::new(Arc::clone(&backend));
        let empty = StatusPayload::empty();

        for i in 0..RETIRED_LIMIT + 10 {
            let r = a(&format!("churn-{i}"));
            backend.add_behaviour(&r, Behaviour::always(Event::Create, Operation::CreateSync));
            backend.add_behaviour(&r, Behaviour::always(Event::Delete, Operation::DeleteSync));
            adapter.create(&r, &spec(), &empty).await.unwrap();
            adapter.delete(&r, &spec(), &empty).await.unwrap();
        }
        assert_eq!(backend.live_resources(), 0);
        assert_eq!(backend.inner.lock().unwrap().retired.len(), RETIRED_LIMIT);

        let last = a(&format!("churn-{}", RETIRED_LIMIT + 9));
        assert_eq!(
            backend.history(&last),
            vec![VerifyResult::Ready, VerifyResult::Missing]
        );
        assert_eq!(backend.calls(&last).mutations(), 2);
        assert!(backend.history(&a("churn-0")).is_empty());
    }

    #[tokio::test]
    async fn recreated_resource_keeps_its_history() {
        let backend = SimulatedBackend::new(0);
        let adapter = SimulatedAdapter::new(Arc::clone(&backend));
        let empty = StatusPayload::empty();
        backend.add_behaviour(&a("x"), Behaviour::always(Event::Create, Operation::CreateSync));
        backend.add_behaviour(&a("x"), Behaviour::always(Event::Delete, Operation::DeleteSync));

        adapter.create(&a("x"), &spec(), &empty).await.unwrap();
        adapter.delete(&a("x"), &spec(), &empty).await.unwrap();
        assert_eq!(backend.live_resources(), 0);

        adapter.create(&a("x"), &spec(), &empty).await.unwrap();
        assert_eq!(backend.live_resources(), 1);
        assert_eq!(backend.calls(&a("x")).create, 2);
        assert_eq!(
            backend.history(&a("x")),
            vec![VerifyResult::Ready, VerifyResult::Missing, VerifyResult::Ready]
        );
    }

    #[test]
    fn behaviour_consistency() {
        assert!(Behaviour::always(Event::Update, Operation::UpdateFail).is_consistent());
        assert!(Behaviour::always(Event::Get, Operation::TransientError).is_consistent());
        assert!(!Behaviour::always(Event::Get, Operation::DeleteSync).is_consistent());
    }
}
