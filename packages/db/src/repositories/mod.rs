//! Repository implementations for database operations.

mod checkpoint_repo;
mod job_repo;
mod journal_repo;
mod sequence_repo;

pub use checkpoint_repo::CheckpointRepository;
pub use job_repo::{JobQuery, JobRepository, StatusFilter};
pub use journal_repo::JournalRepository;
pub use sequence_repo::SequenceRepository;
