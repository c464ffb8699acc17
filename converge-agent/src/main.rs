//! converge-agent: seeds an in-memory control plane from a manifest and
//! reconciles every record against the simulated backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use converge_agent::config::Manifest;
use converge_agent::simulated::{SimulatedAdapter, SimulatedBackend};
use converge_agent::{Controller, MemoryStore};
use converge_core::{ReconcileParameters, ResourceRef};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// converge reconcile agent
#[derive(Parser, Debug)]
#[command(name = "converge-agent", version, about)]
struct Args {
    /// JSON manifest of records to seed
    #[arg(long)]
    manifest: PathBuf,

    /// Worker tasks per kind
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Default requeue delay in milliseconds
    #[arg(long, default_value = "1000")]
    requeue_after_ms: u64,

    /// Requeue delay after a successful pass (defaults to --requeue-after-ms)
    #[arg(long)]
    requeue_after_success_ms: Option<u64>,

    /// Requeue delay after a failed pass (defaults to --requeue-after-ms)
    #[arg(long)]
    requeue_after_failure_ms: Option<u64>,

    /// Verify passes an async backend operation stays in progress
    #[arg(long, default_value = "1")]
    async_polls: u32,

    /// Status report interval in seconds
    #[arg(long, default_value = "5")]
    report_interval_secs: u64,
}

impl Args {
    fn parameters(&self) -> ReconcileParameters {
        ReconcileParameters {
            requeue_after_ms: self.requeue_after_ms,
            requeue_after_success_ms: self.requeue_after_success_ms,
            requeue_after_failure_ms: self.requeue_after_failure_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "converge_agent=info,converge_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let defaults = args.parameters();
    defaults.validate().context("invalid requeue parameters")?;

    let manifest = Manifest::load(&args.manifest)?;
    info!("Starting converge-agent with {}", args.manifest.display());

    let store = Arc::new(MemoryStore::new());
    let backend = SimulatedBackend::new(args.async_polls);
    manifest.seed(&store, &backend).await?;

    let mut controllers = Vec::new();
    for kind in manifest.kinds() {
        let params = manifest.parameters_for(&kind, &defaults);
        let adapter = Arc::new(SimulatedAdapter::new(Arc::clone(&backend)));
        let controller = Controller::new(&kind, Arc::clone(&store), adapter, params, args.workers)
            .with_context(|| format!("invalid parameters for kind {kind}"))?;
        controllers.push(controller.spawn());
    }

    for record in &manifest.records {
        if let Some(secs) = record.delete_after_secs {
            schedule_delete(Arc::clone(&store), record.reference(), Duration::from_secs(secs));
        }
    }

    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = report.tick() => report_status(&store).await,
            res = &mut shutdown => {
                res.context("failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    for controller in controllers {
        controller.shutdown().await;
    }
    report_status(&store).await;
    Ok(())
}

fn schedule_delete(store: Arc<MemoryStore>, reference: ResourceRef, after: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        match store.request_delete(&reference).await {
            Ok(()) => info!(resource = %reference, "Deletion requested"),
            Err(e) => warn!(resource = %reference, error = %e, "Deletion request failed"),
        }
    });
}

async fn report_status(store: &MemoryStore) {
    for kind in store.kinds().await {
        for record in store.list(&kind).await {
            info!(
                resource = %record.reference,
                state = %record.status.state,
                generation = record.generation,
                deleting = record.deletion_requested,
                "{}",
                record.status.message
            );
        }
    }
}
