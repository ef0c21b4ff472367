//! Partitioned job-queue storage with cluster migration.
//!
//! A queue is an ordered list of datasets (partitions). Producers append
//! jobs to the last dataset; processors record statuses; the migration
//! coordinator moves contiguous job ranges between nodes through files
//! while keeping the global order `(dataset index, job id)` intact.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use jobsdb::{JobsDb, JobsDbConfig, MigrationCoordinator};
//!
//! let jobsdb = Arc::new(JobsDb::open(JobsDbConfig::from_env()?).await?);
//! let ids = jobsdb.store(jobs).await?;
//!
//! let coordinator = MigrationCoordinator::new(jobsdb.clone());
//! coordinator.setup_for_import().await?;
//! ```

mod config;
mod error;
mod handle;
mod migration;
mod recovery;
mod setup;

pub use config::{EPOCH_SPAN, JobsDbConfig};
pub use error::{JobsDbError, Result};
pub use handle::JobsDb;
pub use migration::{MigrationCoordinator, MigrationPhase};
pub use recovery::RecoveryReport;

pub use db::repositories::{JobQuery, StatusFilter};
