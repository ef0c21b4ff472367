//! Runs one queue's migration worker.
//!
//! Opens the queue (recovering any interrupted structural operation),
//! prepares the import destination and imports the migration files named
//! on the command line. The worker then keeps serving until ctrl-c.
//!
//! Configuration comes from the environment, see `JobsDbConfig::from_env`
//! and `StorageConfig::from_env`. `MIGRATION_FROM_NODE` names the node the
//! files came from.

use std::sync::Arc;

use actors::{MigrationMessage, request, start_migration_worker};
use jobsdb::{JobsDb, JobsDbConfig, MigrationCoordinator};
use storage::FileStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = JobsDbConfig::from_env()?;
    let files = FileStore::from_env()?;
    let from_node = std::env::var("MIGRATION_FROM_NODE").unwrap_or_else(|_| "unknown".into());
    let file_keys: Vec<String> = std::env::args().skip(1).collect();

    let jobsdb = Arc::new(JobsDb::open(config).await?);
    let coordinator = Arc::new(MigrationCoordinator::new(jobsdb.clone()));
    let (worker, mut handle) = start_migration_worker(coordinator, files).await?;

    if !file_keys.is_empty() {
        let setup = request(&worker, |reply| MigrationMessage::SetupForImport { reply }, None);
        let dataset = setup.await?;
        tracing::info!("Importing {} files into dataset {}", file_keys.len(), dataset.index);

        for file_key in file_keys {
            let event = request(
                &worker,
                |reply| MigrationMessage::ImportFile {
                    file_key: file_key.clone(),
                    from_node: from_node.clone(),
                    reply,
                },
                None,
            )
            .await?;
            tracing::info!(
                "{}: {} jobs, checkpoint {} ({})",
                file_key,
                event.job_count,
                event.id,
                event.status
            );
        }
    }

    let stored = jobsdb.count().await?;
    tracing::info!("{} jobs stored in {} datasets", stored, jobsdb.datasets().len());

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        result = &mut handle => {
            result?;
            false
        }
    };

    if interrupted {
        tracing::info!("Interrupt received");
        let _ = worker.cast(MigrationMessage::Shutdown);
        handle.await?;
    } else {
        tracing::error!("Migration worker stopped on its own");
    }

    Ok(())
}
