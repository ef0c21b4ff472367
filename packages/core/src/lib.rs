//! Core domain types for the job queue storage engine.
//!
//! This crate contains types shared across all packages:
//! - Job and JobStatus rows
//! - Dataset and DatasetIndex for queue partitions
//! - MigrationEvent checkpoints and journal entries
//! - SequenceAllocator for imported job ID ranges

mod dataset;
mod job;
mod journal;
mod migration;
mod sequence;

pub use dataset::{Dataset, DatasetIndex, ParseIndexError, TableKind};
pub use job::{Job, JobId, JobState, JobStatus, StatusId};
pub use journal::{JournalEntry, JournalOp};
pub use migration::{MigrationEvent, MigrationOp, MigrationStatus};
pub use sequence::{SequenceAllocator, SequenceError};
