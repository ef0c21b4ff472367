//! Migration worker actor.
//!
//! Requests from the orchestrator are handled one at a time on the
//! worker's own task. A fatal error is replied to the caller and then stops
//! the actor, so whoever owns the join handle sees the termination.

use std::sync::Arc;
use std::time::Duration;

use jobsdb::{JobsDbError, MigrationCoordinator};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use storage::FileStore;

use crate::messages::{ActorError, MigrationMessage, Reply};

/// State for the migration actor.
pub struct MigrationActorState {
    pub coordinator: Arc<MigrationCoordinator>,
    pub files: FileStore,
}

impl MigrationActorState {
    pub fn new(coordinator: Arc<MigrationCoordinator>, files: FileStore) -> Self {
        Self { coordinator, files }
    }
}

/// Actor serializing migration requests for one queue.
pub struct MigrationActor;

/// Send `result` to the caller; stop the actor if it was fatal.
fn respond<T>(
    myself: &ActorRef<MigrationMessage>,
    reply: Reply<T>,
    result: Result<T, JobsDbError>,
) {
    let result = result.map_err(ActorError::from);
    let fatal = match &result {
        Err(e) if e.is_fatal() => Some(e.to_string()),
        Err(e) => {
            tracing::warn!("Migration request failed: {}", e);
            None
        }
        Ok(_) => None,
    };

    let _ = reply.send(result);

    if let Some(reason) = fatal {
        tracing::error!("Migration worker stopping: {}", reason);
        myself.stop(Some(reason));
    }
}

impl Actor for MigrationActor {
    type Msg = MigrationMessage;
    type State = MigrationActorState;
    type Arguments = MigrationActorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting migration worker for {} ({} files)",
            args.coordinator.jobsdb().prefix(),
            args.files.kind().as_str()
        );
        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            MigrationMessage::SetupForImport { reply } => {
                let result = state.coordinator.setup_for_import().await;
                respond(&myself, reply, result);
            }

            MigrationMessage::ImportFile {
                file_key,
                from_node,
                reply,
            } => {
                let result = state
                    .coordinator
                    .import_file(&state.files, &file_key, &from_node)
                    .await;
                respond(&myself, reply, result);
            }

            MigrationMessage::ExportJobs {
                query,
                to_node,
                file_key,
                reply,
            } => {
                let result = state
                    .coordinator
                    .export_jobs(&state.files, &query, &to_node, &file_key)
                    .await;
                respond(&myself, reply, result);
            }

            MigrationMessage::GetCheckpoints { op, status, reply } => {
                let result = state.coordinator.get_checkpoints(op, status).await;
                respond(&myself, reply, result);
            }

            MigrationMessage::Shutdown => {
                tracing::info!("Migration worker shutting down");
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Migration worker for {} stopped",
            state.coordinator.jobsdb().prefix()
        );
        Ok(())
    }
}

/// Spawn the migration worker, registered as `migration-{node}-{prefix}`.
pub async fn start_migration_worker(
    coordinator: Arc<MigrationCoordinator>,
    files: FileStore,
) -> Result<(ActorRef<MigrationMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let jobsdb = coordinator.jobsdb();
    let name = format!("migration-{}-{}", jobsdb.config().node_id, jobsdb.prefix());
    let (actor, handle) = Actor::spawn(
        Some(name),
        MigrationActor,
        MigrationActorState::new(coordinator, files),
    )
    .await?;

    Ok((actor, handle))
}

/// Send a request built by `build` and wait for the reply.
pub async fn request<T>(
    worker: &ActorRef<MigrationMessage>,
    build: impl FnOnce(Reply<T>) -> MigrationMessage,
    timeout: Option<Duration>,
) -> Result<T, ActorError>
where
    T: Send + 'static,
{
    match ractor::rpc::call(worker, build, timeout).await {
        Ok(CallResult::Success(result)) => result,
        Ok(CallResult::Timeout) => Err(ActorError::Unavailable("request timed out".into())),
        Ok(CallResult::SenderError) => {
            Err(ActorError::Unavailable("worker dropped the request".into()))
        }
        Err(e) => Err(ActorError::Unavailable(e.to_string())),
    }
}
