//! In-memory control plane: desired-state records plus their status.
//!
//! Every mutation is published on a broadcast channel so controllers can
//! enqueue the affected record.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use converge_core::{
    AccessPermissions, Dependencies, LookupError, ResourceRef, State, Status, StatusLookup,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(ResourceRef),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot decode spec of {reference}: {source}")]
    Decode {
        reference: ResourceRef,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A desired-state record as held by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordData {
    pub reference: ResourceRef,
    pub spec: serde_json::Value,
    pub dependencies: Dependencies,
    pub permissions: AccessPermissions,
    pub deletion_requested: bool,
    /// Bumped on every spec change.
    pub generation: u64,
    pub status: Status,
    pub created_at: String,
    pub updated_at: String,
}

impl RecordData {
    /// Decode the spec into the adapter's spec type.
    pub fn decode_spec<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.spec.clone()).map_err(|source| StoreError::Decode {
            reference: self.reference.clone(),
            source,
        })
    }
}

/// Request to declare a new record.
#[derive(Debug, Clone)]
pub struct CreateRecordRequest {
    pub reference: ResourceRef,
    pub spec: serde_json::Value,
    pub dependencies: Dependencies,
    pub permissions: AccessPermissions,
}

impl CreateRecordRequest {
    pub fn new(reference: ResourceRef, spec: serde_json::Value) -> Self {
        Self {
            reference,
            spec,
            dependencies: Dependencies::none(),
            permissions: AccessPermissions::ALL,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Dependencies) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_permissions(mut self, permissions: AccessPermissions) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Store mutations, as seen by watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Created(ResourceRef),
    SpecUpdated(ResourceRef),
    DeleteRequested(ResourceRef),
    StatusChanged {
        reference: ResourceRef,
        old: State,
        new: State,
    },
    Removed(ResourceRef),
}

impl StoreEvent {
    pub fn reference(&self) -> &ResourceRef {
        match self {
            StoreEvent::Created(r)
            | StoreEvent::SpecUpdated(r)
            | StoreEvent::DeleteRequested(r)
            | StoreEvent::Removed(r) => r,
            StoreEvent::StatusChanged { reference, .. } => reference,
        }
    }

    /// Events that represent a change to the desired state.
    pub fn is_spec_event(&self) -> bool {
        !matches!(self, StoreEvent::StatusChanged { .. })
    }
}

pub struct MemoryStore {
    records: RwLock<HashMap<ResourceRef, RecordData>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            records: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub async fn create(&self, req: CreateRecordRequest) -> Result<RecordData> {
        let mut records = self.records.write().await;
        if records.contains_key(&req.reference) {
            return Err(StoreError::Conflict(format!(
                "{} already exists",
                req.reference
            )));
        }

        let now = Utc::now().to_rfc3339();
        let record = RecordData {
            reference: req.reference.clone(),
            spec: req.spec,
            dependencies: req.dependencies,
            permissions: req.permissions,
            deletion_requested: false,
            generation: 1,
            status: Status::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        records.insert(req.reference.clone(), record.clone());
        drop(records);

        debug!(resource = %req.reference, "Record created");
        self.publish(StoreEvent::Created(req.reference));
        Ok(record)
    }

    pub async fn update_spec(
        &self,
        reference: &ResourceRef,
        spec: serde_json::Value,
    ) -> Result<RecordData> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
        if record.deletion_requested {
            return Err(StoreError::Conflict(format!("{reference} is being deleted")));
        }

        record.spec = spec;
        record.generation += 1;
        record.updated_at = Utc::now().to_rfc3339();
        let record = record.clone();
        drop(records);

        self.publish(StoreEvent::SpecUpdated(reference.clone()));
        Ok(record)
    }

    /// Mark a record for deletion. The record stays until its controller
    /// releases it.
    pub async fn request_delete(&self, reference: &ResourceRef) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;
        if record.deletion_requested {
            return Ok(());
        }
        record.deletion_requested = true;
        record.updated_at = Utc::now().to_rfc3339();
        drop(records);

        self.publish(StoreEvent::DeleteRequested(reference.clone()));
        Ok(())
    }

    pub async fn get(&self, reference: &ResourceRef) -> Option<RecordData> {
        self.records.read().await.get(reference).cloned()
    }

    pub async fn state_of(&self, reference: &ResourceRef) -> Option<State> {
        self.records
            .read()
            .await
            .get(reference)
            .map(|r| r.status.state)
    }

    /// Replace the status of a record in one step.
    pub async fn write_status(&self, reference: &ResourceRef, status: Status) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;

        let old = record.status.state;
        let new = status.state;
        record.status = status;
        drop(records);

        if old != new {
            self.publish(StoreEvent::StatusChanged {
                reference: reference.clone(),
                old,
                new,
            });
        }
        Ok(())
    }

    pub async fn remove(&self, reference: &ResourceRef) -> Result<RecordData> {
        let removed = self
            .records
            .write()
            .await
            .remove(reference)
            .ok_or_else(|| StoreError::NotFound(reference.clone()))?;

        debug!(resource = %reference, "Record removed");
        self.publish(StoreEvent::Removed(reference.clone()));
        Ok(removed)
    }

    /// All records of one kind, ordered by id.
    pub async fn list(&self, kind: &str) -> Vec<RecordData> {
        let mut records: Vec<RecordData> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.reference.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.reference.id.cmp(&b.reference.id));
        records
    }

    pub async fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .records
            .read()
            .await
            .keys()
            .map(|r| r.kind.clone())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusLookup for MemoryStore {
    async fn resolve_status(
        &self,
        target: &ResourceRef,
    ) -> std::result::Result<Option<State>, LookupError> {
        Ok(self.state_of(target).await)
    }
}
