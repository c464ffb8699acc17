//! Controller: hosts a reconciler for one kind.
//!
//! A watcher task turns store events into queue keys; worker tasks pull keys,
//! run one pass each and schedule the next one from the pass directive.

use std::sync::Arc;

use converge_core::requeue::{self, OutcomeClass};
use converge_core::{
    Adapter, Directive, ParamsError, PassResult, ReconcileParameters, ReconcileRequest, Reconciler,
    ResourceRef, State, StatusLookup,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::WorkQueue;
use crate::store::{MemoryStore, StoreEvent};

pub struct Controller<A: Adapter> {
    kind: String,
    store: Arc<MemoryStore>,
    reconciler: Reconciler<A>,
    queue: Arc<WorkQueue<ResourceRef>>,
    workers: usize,
}

impl<A> Controller<A>
where
    A: Adapter + 'static,
    A::Spec: DeserializeOwned + 'static,
{
    pub fn new(
        kind: impl Into<String>,
        store: Arc<MemoryStore>,
        adapter: Arc<A>,
        params: ReconcileParameters,
        workers: usize,
    ) -> Result<Self, ParamsError> {
        params.validate()?;
        let lookup: Arc<dyn StatusLookup> = store.clone();
        Ok(Self {
            kind: kind.into(),
            reconciler: Reconciler::new(adapter, lookup, params),
            store,
            queue: WorkQueue::new(),
            workers: workers.max(1),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ResourceRef>> {
        &self.queue
    }

    /// Run one pass for a record and persist its outcome.
    ///
    /// Returns `None` when the record is gone, either because it was never
    /// there or because this pass released it.
    pub async fn reconcile_once(&self, reference: &ResourceRef) -> Option<PassResult> {
        let record = self.store.get(reference).await?;

        let result = match record.decode_spec::<A::Spec>() {
            Ok(spec) => {
                let req = ReconcileRequest {
                    target: &record.reference,
                    spec: &spec,
                    dependencies: &record.dependencies,
                    permissions: record.permissions,
                    deletion_requested: record.deletion_requested,
                    status: &record.status,
                };
                self.reconciler.reconcile(&req).await
            }
            Err(e) => {
                error!(resource = %reference, error = %e, "Spec decode failed");
                let prev = record.status.state;
                let next = if prev.can_transition_to(State::Failed) {
                    State::Failed
                } else {
                    prev
                };
                PassResult {
                    status: record.status.transition(next, e.to_string()),
                    directive: requeue::requeue(self.reconciler.params(), OutcomeClass::Failure),
                }
            }
        };

        if result.released() {
            match self.store.remove(reference).await {
                Ok(_) => info!(resource = %reference, "Record released"),
                Err(e) => warn!(resource = %reference, error = %e, "Failed to remove record"),
            }
            return None;
        }

        if let Err(e) = self.store.write_status(reference, result.status.clone()).await {
            // Removed while the pass was running
            debug!(resource = %reference, error = %e, "Status write skipped");
            return None;
        }
        Some(result)
    }

    /// Start the watcher and worker tasks.
    pub fn spawn(self) -> ControllerHandle {
        let this = Arc::new(self);
        let mut tasks = Vec::with_capacity(this.workers + 1);

        // Subscribe before listing so nothing falls between the two
        let events = this.store.subscribe();
        tasks.push(tokio::spawn(Arc::clone(&this).watch(events)));

        for worker in 0..this.workers {
            tasks.push(tokio::spawn(Arc::clone(&this).work(worker)));
        }

        info!(kind = %this.kind, workers = this.workers, "Controller started");
        ControllerHandle {
            kind: this.kind.clone(),
            queue: Arc::clone(&this.queue),
            tasks,
        }
    }

    async fn enqueue_all(&self) {
        for record in self.store.list(&self.kind).await {
            self.queue.add(record.reference);
        }
    }

    async fn watch(self: Arc<Self>, mut events: tokio::sync::broadcast::Receiver<StoreEvent>) {
        self.enqueue_all().await;

        loop {
            match events.recv().await {
                Ok(event) => {
                    let reference = event.reference();
                    if reference.kind != self.kind || !event.is_spec_event() {
                        continue;
                    }
                    if let StoreEvent::Removed(r) = &event {
                        self.queue.forget(r);
                    } else {
                        self.queue.add(reference.clone());
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(kind = %self.kind, missed, "Store events lagged, resyncing");
                    self.enqueue_all().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn work(self: Arc<Self>, worker: usize) {
        debug!(kind = %self.kind, worker, "Worker started");

        while let Some(reference) = self.queue.get().await {
            let result = self.reconcile_once(&reference).await;
            self.queue.done(&reference);

            match result.map(|r| r.directive) {
                Some(Directive::Requeue(delay)) => self.queue.add_after(reference, delay),
                Some(Directive::Release) | None => self.queue.forget(&reference),
            }
        }

        debug!(kind = %self.kind, worker, "Worker stopped");
    }
}

/// Running controller tasks.
pub struct ControllerHandle {
    kind: String,
    queue: Arc<WorkQueue<ResourceRef>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Stop the watcher and let workers finish their current pass.
    pub async fn shutdown(self) {
        self.queue.shutdown();
        let mut tasks = self.tasks.into_iter();
        if let Some(watcher) = tasks.next() {
            watcher.abort();
            let _ = watcher.await;
        }
        for task in tasks {
            if let Err(e) = task.await {
                warn!(kind = %self.kind, error = %e, "Worker task failed");
            }
        }
        info!(kind = %self.kind, "Controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Behaviour, Event, Operation, SimulatedAdapter, SimulatedBackend};
    use crate::store::CreateRecordRequest;
    use converge_core::VerifyResult;
    use serde_json::json;
    use std::time::Duration;

    fn a(id: &str) -> ResourceRef {
        ResourceRef::new("a", id)
    }

    fn controller(
        store: &Arc<MemoryStore>,
        backend: &Arc<SimulatedBackend>,
    ) -> Controller<SimulatedAdapter> {
        Controller::new(
            "a",
            Arc::clone(store),
            Arc::new(SimulatedAdapter::new(Arc::clone(backend))),
            ReconcileParameters::new(Duration::from_millis(100)),
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn passes_drive_record_to_succeeded_and_release() {
        let store = Arc::new(MemoryStore::new());
        let backend = SimulatedBackend::new(0);
        backend.add_behaviour(&a("x"), Behaviour::always(Event::Create, Operation::CreateSync));
        backend.add_behaviour(&a("x"), Behaviour::always(Event::Delete, Operation::DeleteSync));
        let controller = controller(&store, &backend);

        store
            .create(CreateRecordRequest::new(a("x"), json!({"string_data": "initial"})))
            .await
            .unwrap();

        // Pending -> Creating -> Completing -> Succeeded
        for _ in 0..3 {
            controller.reconcile_once(&a("x")).await.unwrap();
        }
        assert_eq!(store.state_of(&a("x")).await, Some(State::Succeeded));

        store.request_delete(&a("x")).await.unwrap();
        let terminating = controller.reconcile_once(&a("x")).await.unwrap();
        assert_eq!(terminating.status.state, State::Terminating);
        assert!(controller.reconcile_once(&a("x")).await.is_none());
        assert_eq!(store.get(&a("x")).await.map(|r| r.reference), None);
        assert_eq!(
            backend.history(&a("x")),
            vec![VerifyResult::Ready, VerifyResult::Missing]
        );
    }

    #[tokio::test]
    async fn undecodable_spec_fails_the_record() {
        let store = Arc::new(MemoryStore::new());
        let backend = SimulatedBackend::new(0);
        let controller = controller(&store, &backend);

        store
            .create(CreateRecordRequest::new(a("bad"), json!({"int_data": "nope"})))
            .await
            .unwrap();
        let result = controller.reconcile_once(&a("bad")).await.unwrap();
        assert_eq!(result.status.state, State::Failed);
        assert!(result.status.message.starts_with("cannot decode spec of a/bad"));
        assert_eq!(backend.calls(&a("bad")).mutations(), 0);
    }

    #[tokio::test]
    async fn missing_record_yields_nothing() {
        let store = Arc::new(MemoryStore::new());
        let backend = SimulatedBackend::new(0);
        let controller = controller(&store, &backend);
        assert!(controller.reconcile_once(&a("ghost")).await.is_none());
    }
}
