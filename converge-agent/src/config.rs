//! Manifest of records the agent seeds its store with.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use converge_core::{AccessPermissions, Dependencies, ReconcileParameters, ResourceRef};
use serde::Deserialize;
use tracing::info;

use crate::simulated::{Behaviour, SimulatedBackend};
use crate::store::{CreateRecordRequest, MemoryStore};

/// One declared record.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRecord {
    pub kind: String,
    pub id: String,
    #[serde(default = "empty_spec")]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub owner: Option<ResourceRef>,
    #[serde(default)]
    pub dependencies: Vec<ResourceRef>,
    #[serde(default)]
    pub permissions: AccessPermissions,
    #[serde(default)]
    pub behaviours: Vec<Behaviour>,
    /// Request deletion this many seconds after start.
    #[serde(default)]
    pub delete_after_secs: Option<u64>,
}

fn empty_spec() -> serde_json::Value {
    serde_json::json!({})
}

impl ManifestRecord {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.kind, &self.id)
    }

    pub fn dependencies(&self) -> Dependencies {
        Dependencies {
            owner: self.owner.clone(),
            additional: self.dependencies.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Per-kind parameter overrides.
    #[serde(default)]
    pub parameters: HashMap<String, ReconcileParameters>,
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        for (kind, params) in &self.parameters {
            params
                .validate()
                .with_context(|| format!("invalid parameters for kind {kind}"))?;
        }
        for record in &self.records {
            if let Some(b) = record.behaviours.iter().find(|b| !b.is_consistent()) {
                bail!(
                    "{}: behaviour {:?} does not apply to {:?}",
                    record.reference(),
                    b.operation,
                    b.event
                );
            }
        }
        Ok(())
    }

    /// Kinds declared by the manifest, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.records.iter().map(|r| r.kind.clone()).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn parameters_for(&self, kind: &str, default: &ReconcileParameters) -> ReconcileParameters {
        self.parameters.get(kind).cloned().unwrap_or_else(|| default.clone())
    }

    /// Create every record in the store and register its behaviours.
    pub async fn seed(&self, store: &MemoryStore, backend: &SimulatedBackend) -> Result<()> {
        for record in &self.records {
            let reference = record.reference();
            for behaviour in &record.behaviours {
                backend.add_behaviour(&reference, behaviour.clone());
            }
            store
                .create(
                    CreateRecordRequest::new(reference.clone(), record.spec.clone())
                        .with_dependencies(record.dependencies())
                        .with_permissions(record.permissions),
                )
                .await
                .with_context(|| format!("failed to seed {reference}"))?;
        }
        info!(records = self.records.len(), "Store seeded from manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Event, Operation, SimulatedSpec};
    use std::io::Write;
    use std::time::Duration;

    fn write_manifest(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_manifest() {
        let file = write_manifest(
            r#"{
                "parameters": { "b": { "requeue_after_ms": 50, "requeue_after_failure_ms": 500 } },
                "records": [
                    { "kind": "a", "id": "owner", "spec": { "int_data": 1 } },
                    {
                        "kind": "b", "id": "child",
                        "owner": { "kind": "a", "id": "owner" },
                        "permissions": "CR",
                        "behaviours": [ { "event": "Delete", "operation": "DeleteSync", "one_time": true } ]
                    }
                ]
            }"#,
        );
        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.kinds(), vec!["a".to_string(), "b".to_string()]);

        let child = &manifest.records[1];
        assert_eq!(
            child.dependencies().owner,
            Some(ResourceRef::new("a", "owner"))
        );
        assert!(child.permissions.create);
        assert!(!child.permissions.delete);
        assert_eq!(
            child.behaviours,
            vec![Behaviour::once(Event::Delete, Operation::DeleteSync)]
        );

        let default = ReconcileParameters::new(Duration::from_secs(1));
        let b = manifest.parameters_for("b", &default);
        assert_eq!(b.requeue_after(), Duration::from_millis(50));
        assert_eq!(b.requeue_after_failure(), Duration::from_millis(500));
        assert_eq!(manifest.parameters_for("a", &default), default);
    }

    #[test]
    fn record_without_spec_decodes() {
        let manifest: Manifest =
            serde_json::from_str(r#"{ "records": [ { "kind": "a", "id": "bare" } ] }"#).unwrap();
        let spec = &manifest.records[0].spec;
        assert_eq!(spec, &serde_json::json!({}));

        let decoded: SimulatedSpec = serde_json::from_value(spec.clone()).unwrap();
        assert_eq!(decoded, SimulatedSpec::default());
    }

    #[test]
    fn mismatched_behaviour_is_rejected() {
        let file = write_manifest(
            r#"{ "records": [ { "kind": "a", "id": "x",
                 "behaviours": [ { "event": "Create", "operation": "DeleteSync" } ] } ] }"#,
        );
        let err = Manifest::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("does not apply"));
    }

    #[test]
    fn missing_file_has_context() {
        let err = Manifest::load(Path::new("/nonexistent/manifest.json")).unwrap_err();
        assert!(err.to_string().starts_with("failed to read manifest"));
    }

    #[tokio::test]
    async fn seed_creates_records() {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "records": [ { "kind": "a", "id": "x" }, { "kind": "a", "id": "x" } ] }"#,
        )
        .unwrap();
        let store = MemoryStore::new();
        let backend = SimulatedBackend::new(1);

        // duplicate id
        let err = manifest.seed(&store, &backend).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to seed a/x");
        assert!(store.get(&ResourceRef::new("a", "x")).await.is_some());
    }
}
