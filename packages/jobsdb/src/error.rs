use db::DbError;
use jobsdb_core::SequenceError;
use storage::StorageError;
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum JobsDbError {
    /// Persisted state contradicts itself; continuing could break ordering
    /// or reuse IDs.
    #[error("Invariant violated: {0}")]
    Invariant(String),
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
    #[error("Migration file error: {0}")]
    File(#[from] StorageError),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobsDbError {
    /// Whether the process must stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobsDbError::Invariant(_) | JobsDbError::Sequence(_) | JobsDbError::Config(_)
        )
    }
}

pub type Result<T, E = JobsDbError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(JobsDbError::Invariant("x".into()).is_fatal());
        assert!(JobsDbError::Sequence(SequenceError::NotInitialized).is_fatal());
        assert!(!JobsDbError::Storage(DbError::Query("timeout".into())).is_fatal());
        assert!(!JobsDbError::File(StorageError::InvalidConfig("x".into())).is_fatal());
    }
}
