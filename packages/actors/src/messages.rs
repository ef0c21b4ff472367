//! Message types for the migration worker.

use jobsdb::{JobQuery, JobsDbError};
use jobsdb_core::{Dataset, MigrationEvent, MigrationOp, MigrationStatus};
use ractor::RpcReplyPort;

/// Error returned to callers of the migration worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    /// The worker hit an invariant violation and stopped.
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("database: {0}")]
    Database(String),
    #[error("migration file: {0}")]
    File(String),
    /// The worker is gone or did not answer.
    #[error("worker unavailable: {0}")]
    Unavailable(String),
}

impl ActorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActorError::Fatal(_))
    }
}

impl From<JobsDbError> for ActorError {
    fn from(e: JobsDbError) -> Self {
        if e.is_fatal() {
            return ActorError::Fatal(e.to_string());
        }
        match e {
            JobsDbError::File(_) => ActorError::File(e.to_string()),
            _ => ActorError::Database(e.to_string()),
        }
    }
}

pub type Reply<T> = RpcReplyPort<Result<T, ActorError>>;

/// Messages for the MigrationActor.
#[derive(Debug)]
pub enum MigrationMessage {
    /// Resolve the import and new-events destinations.
    SetupForImport { reply: Reply<Dataset> },

    /// Import the jobs file stored under `file_key`.
    ImportFile {
        file_key: String,
        from_node: String,
        reply: Reply<MigrationEvent>,
    },

    /// Export the selected jobs to `file_key` for `to_node`.
    ExportJobs {
        query: Box<JobQuery>,
        to_node: String,
        file_key: String,
        reply: Reply<MigrationEvent>,
    },

    /// Checkpoints of one operation at one status, ordered by id.
    GetCheckpoints {
        op: MigrationOp,
        status: MigrationStatus,
        reply: Reply<Vec<MigrationEvent>>,
    },

    /// Stop after the messages already queued.
    Shutdown,
}
