//! Export/import state machine.
//!
//! An import runs `NotStarted -> SetupDone -> PreparedForImport`, then
//! each source file moves to `Imported` independently. Every step is
//! derived from persisted checkpoints, so a restarted node resumes where
//! the previous one stopped and a file is never imported twice.

use std::sync::Arc;

use db::Transaction;
use db::repositories::{JobQuery, StatusFilter};
use jobsdb_core::{
    Dataset, Job, JobId, JobState, JobStatus, MigrationEvent, MigrationOp, MigrationStatus,
    SequenceAllocator, StatusId,
};
use serde_json::json;
use storage::FileStore;
use tokio::sync::Mutex;

use crate::{JobsDb, JobsDbError, Result};

/// Progress of the import side on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationPhase {
    NotStarted,
    SetupDone,
    PreparedForImport,
}

#[derive(Clone)]
struct ImportTarget {
    dataset: Dataset,
    allocator: Arc<SequenceAllocator>,
}

/// Cached destinations. Rebuilt from checkpoints after a restart.
struct MigrationSession {
    phase: MigrationPhase,
    new_events: Option<Dataset>,
    import: Option<ImportTarget>,
}

impl Default for MigrationSession {
    fn default() -> Self {
        Self {
            phase: MigrationPhase::NotStarted,
            new_events: None,
            import: None,
        }
    }
}

/// Moves jobs between nodes through migration files.
pub struct MigrationCoordinator {
    jobsdb: Arc<JobsDb>,
    session: Mutex<MigrationSession>,
}

impl MigrationCoordinator {
    pub fn new(jobsdb: Arc<JobsDb>) -> Self {
        Self {
            jobsdb,
            session: Mutex::new(MigrationSession::default()),
        }
    }

    pub fn jobsdb(&self) -> &Arc<JobsDb> {
        &self.jobsdb
    }

    pub async fn phase(&self) -> MigrationPhase {
        self.session.lock().await.phase
    }

    /// Dataset receiving new events, once set up.
    pub async fn new_events_dataset(&self) -> Option<Dataset> {
        self.session.lock().await.new_events.clone()
    }

    /// Resolve both destinations and prepare the import allocator.
    ///
    /// Idempotent: repeated calls, in this process or after a restart,
    /// return the same import dataset.
    pub async fn setup_for_import(&self) -> Result<Dataset> {
        let mut session = self.session.lock().await;
        Ok(self.prepare(&mut session).await?.dataset)
    }

    async fn prepare(&self, session: &mut MigrationSession) -> Result<ImportTarget> {
        if let Some(target) = &session.import {
            if self.jobsdb.directory().get(&target.dataset.index).is_none() {
                return Err(JobsDbError::Invariant(format!(
                    "import destination {} disappeared",
                    target.dataset.index
                )));
            }
            return Ok(target.clone());
        }

        let (new_events, _, _) = self
            .jobsdb
            .find_or_create_checkpointed(MigrationOp::AcceptNewEvents)
            .await?;
        let (import, _, _) = self
            .jobsdb
            .find_or_create_checkpointed(MigrationOp::Import)
            .await?;
        if import.index >= new_events.index {
            return Err(JobsDbError::Invariant(format!(
                "import dataset {} does not precede new events dataset {}",
                import.index, new_events.index
            )));
        }
        session.new_events = Some(new_events);
        session.phase = MigrationPhase::SetupDone;

        let allocator = self.initialize_allocator(&import).await?;
        let target = ImportTarget {
            dataset: import,
            allocator,
        };
        session.import = Some(target.clone());
        session.phase = MigrationPhase::PreparedForImport;
        Ok(target)
    }

    /// Highest ID an import reservation must stay above.
    ///
    /// Covers jobs already in the destination, the dataset before it and
    /// every range reserved by earlier import checkpoints, written or not.
    pub async fn import_floor(&self, import: &Dataset) -> Result<i64> {
        let jobsdb = &self.jobsdb;
        let mut floor = jobsdb.jobs().max_job_id(import).await?;

        if let Some(previous) = jobsdb.directory().previous(&import.index) {
            floor = floor.max(jobsdb.highest_used_id(&previous).await?);
        }

        for status in [MigrationStatus::PreparedForImport, MigrationStatus::Imported] {
            for checkpoint in jobsdb.get_checkpoints(MigrationOp::Import, status).await? {
                floor = floor.max(checkpoint.last_job_id());
            }
        }
        Ok(floor)
    }

    async fn initialize_allocator(&self, import: &Dataset) -> Result<Arc<SequenceAllocator>> {
        let ceiling = self.jobsdb.new_events_start().await?.ok_or_else(|| {
            JobsDbError::Invariant("new events setup has no start sequence".into())
        })?;
        let floor = self.import_floor(import).await?;

        let allocator = SequenceAllocator::with_ceiling(ceiling);
        allocator.initialize(floor);
        tracing::info!(
            "[{}] Import allocator for {} starts after {} (ceiling {})",
            self.jobsdb.prefix(),
            import.index,
            floor,
            ceiling
        );
        Ok(Arc::new(allocator))
    }

    /// Import one source file's jobs into the import dataset.
    ///
    /// The persisted checkpoint for the file wins over the caller's copy of
    /// `event`. A file already `Imported` is a no-op. A file with a
    /// reservation reuses it; otherwise a fresh range is reserved and
    /// persisted first. Jobs, their embedded statuses and the `Imported`
    /// checkpoint are then written in one transaction.
    pub async fn store_imported_jobs_and_job_statuses(
        &self,
        mut jobs: Vec<Job>,
        source_file: &str,
        event: MigrationEvent,
    ) -> Result<MigrationEvent> {
        let mut session = self.session.lock().await;
        let target = self.prepare(&mut session).await?;
        let checkpoints = self.jobsdb.checkpoints();

        let mut current = self.resolve_checkpoint(source_file, event).await?;
        if current.status == MigrationStatus::Imported {
            tracing::info!(
                "[{}] {} already imported (checkpoint {})",
                self.jobsdb.prefix(),
                source_file,
                current.id
            );
            return Ok(current);
        }

        let count = jobs.len() as i64;
        if current.has_reservation() {
            if current.job_count != count {
                return Err(JobsDbError::Invariant(format!(
                    "{} holds {} jobs but checkpoint {} reserved {}",
                    source_file, count, current.id, current.job_count
                )));
            }
            self.check_reservation(&target, &current).await?;
            target.allocator.initialize(current.last_job_id());
        } else if count > 0 {
            let start = target.allocator.reserve(count)?;
            current.reserve(start, count);
            current = checkpoints.checkpoint(&current).await?;
            tracing::debug!(
                "[{}] Reserved {}..={} for {}",
                self.jobsdb.prefix(),
                current.start_seq,
                current.last_job_id(),
                source_file
            );
        }
        checkpoints.assign_id(&mut current).await?;

        let start = JobId(current.start_seq);
        for (i, job) in jobs.iter_mut().enumerate() {
            job.assign_id(start.offset(i as i64));
        }
        let statuses: Vec<JobStatus> = jobs
            .iter()
            .filter_map(|job| job.last_status.clone())
            .map(|status| JobStatus {
                status_id: StatusId::new(),
                ..status
            })
            .collect();

        current.status = MigrationStatus::Imported;
        let mut txn = Transaction::new();
        self.jobsdb
            .jobs()
            .store_jobs_in(&mut txn, &target.dataset, &jobs)?;
        self.jobsdb.jobs().update_statuses_in(
            &mut txn,
            &target.dataset,
            &statuses,
            &StatusFilter::default(),
        )?;
        checkpoints.checkpoint_in(&mut txn, &current)?;
        txn.commit(self.jobsdb.database()).await?;

        tracing::info!(
            "[{}] Imported {} jobs ({} statuses) from {} into {}",
            self.jobsdb.prefix(),
            count,
            statuses.len(),
            source_file,
            target.dataset.index
        );
        Ok(current)
    }

    /// A persisted reservation must sit above the dataset before the import
    /// destination and below the new-events range.
    async fn check_reservation(
        &self,
        target: &ImportTarget,
        event: &MigrationEvent,
    ) -> Result<()> {
        let directory = self.jobsdb.directory();
        let below = match directory.previous(&target.dataset.index) {
            Some(previous) => self.jobsdb.highest_used_id(&previous).await?,
            None => 0,
        };
        let ceiling = target.allocator.ceiling().unwrap_or(i64::MAX);
        if event.start_seq <= below || event.last_job_id() >= ceiling {
            return Err(JobsDbError::Invariant(format!(
                "checkpoint {} reserves {}..={} outside ({}, {})",
                event.id,
                event.start_seq,
                event.last_job_id(),
                below,
                ceiling
            )));
        }
        Ok(())
    }

    async fn resolve_checkpoint(
        &self,
        source_file: &str,
        event: MigrationEvent,
    ) -> Result<MigrationEvent> {
        let checkpoints = self.jobsdb.checkpoints();
        let mut persisted = None;
        if event.is_persisted() {
            persisted = checkpoints.get(event.id).await?;
        }
        if persisted.is_none() {
            persisted = checkpoints
                .find_for_file(MigrationOp::Import, source_file)
                .await?;
        }

        // Only a persisted checkpoint can carry a reservation; the caller's
        // copy may be stale or come from another node.
        let mut current = match persisted {
            Some(persisted) => persisted,
            None => {
                let mut fresh = event;
                if fresh.has_reservation() || fresh.is_persisted() {
                    tracing::warn!(
                        "[{}] Ignoring unpersisted checkpoint {} for {} (start {}, {} jobs)",
                        self.jobsdb.prefix(),
                        fresh.id,
                        source_file,
                        fresh.start_seq,
                        fresh.job_count
                    );
                }
                fresh.id = 0;
                fresh.start_seq = 0;
                fresh.job_count = 0;
                fresh.status = MigrationStatus::Exported;
                fresh
            }
        };
        if current.migration_type != MigrationOp::Import {
            return Err(JobsDbError::Invariant(format!(
                "checkpoint {} is {}, not import",
                current.id, current.migration_type
            )));
        }
        if current.file_location.is_empty() {
            current.file_location = source_file.to_string();
        } else if current.file_location != source_file {
            return Err(JobsDbError::Invariant(format!(
                "checkpoint {} tracks {}, not {}",
                current.id, current.file_location, source_file
            )));
        }
        Ok(current)
    }

    /// Read `file_key` from `files` and import it.
    pub async fn import_file(
        &self,
        files: &FileStore,
        file_key: &str,
        from_node: &str,
    ) -> Result<MigrationEvent> {
        let jobs = files.read_jobs(file_key).await?;
        let event = MigrationEvent::new(
            MigrationOp::Import,
            from_node,
            &self.jobsdb.config().node_id,
            file_key,
            MigrationStatus::Exported,
        );
        self.store_imported_jobs_and_job_statuses(jobs, file_key, event)
            .await
    }

    /// Write the jobs selected by `query` to `file_key` for `to_node`.
    ///
    /// Exported jobs get a `migrated` status and the file an `Exported`
    /// checkpoint, together. Exporting a key that is already `Exported` is
    /// a no-op.
    pub async fn export_jobs(
        &self,
        files: &FileStore,
        query: &JobQuery,
        to_node: &str,
        file_key: &str,
    ) -> Result<MigrationEvent> {
        let checkpoints = self.jobsdb.checkpoints();
        let existing = checkpoints
            .find_for_file(MigrationOp::Export, file_key)
            .await?;
        if let Some(existing) = &existing
            && existing.status == MigrationStatus::Exported
        {
            tracing::info!(
                "[{}] {} already exported (checkpoint {})",
                self.jobsdb.prefix(),
                file_key,
                existing.id
            );
            return Ok(existing.clone());
        }

        let jobs = self.jobsdb.get_jobs(query).await?;
        files.write_jobs(file_key, &jobs).await?;

        let first = jobs.first().map_or(0, |j| j.job_id.0);
        let last = jobs.last().map_or(0, |j| j.job_id.0);
        let mut event = existing.unwrap_or_else(|| {
            MigrationEvent::new(
                MigrationOp::Export,
                &self.jobsdb.config().node_id,
                to_node,
                file_key,
                MigrationStatus::Exported,
            )
        });
        event.status = MigrationStatus::Exported;
        event.to_node = to_node.to_string();
        event.job_count = jobs.len() as i64;
        event.payload = json!({ "first_job_id": first, "last_job_id": last });
        checkpoints.assign_id(&mut event).await?;

        let statuses: Vec<JobStatus> = jobs
            .iter()
            .map(|job| JobStatus::new(job.job_id, JobState::Migrated))
            .collect();
        let mut txn = Transaction::new();
        self.jobsdb
            .update_job_statuses_in(&mut txn, &statuses, &StatusFilter::default())
            .await?;
        checkpoints.checkpoint_in(&mut txn, &event)?;
        txn.commit(self.jobsdb.database()).await?;

        tracing::info!(
            "[{}] Exported {} jobs to {} for {}",
            self.jobsdb.prefix(),
            jobs.len(),
            file_key,
            to_node
        );
        Ok(event)
    }

    /// Checkpoints of `op` at `status`, ordered by id.
    pub async fn get_checkpoints(
        &self,
        op: MigrationOp,
        status: MigrationStatus,
    ) -> Result<Vec<MigrationEvent>> {
        self.jobsdb.get_checkpoints(op, status).await
    }
}
