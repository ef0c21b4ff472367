//! The engine handle used by ingestion, processors and the migration
//! coordinator.

use db::repositories::{
    CheckpointRepository, JobQuery, JobRepository, JournalRepository, SequenceRepository,
    StatusFilter,
};
use db::{CreateMode, Database, DatasetDirectory, DbError, Tables, Transaction};
use jobsdb_core::{
    Dataset, Job, JobId, JobStatus, JournalOp, MigrationEvent, MigrationOp, MigrationStatus,
};
use tokio::sync::Mutex;

use crate::{JobsDbConfig, JobsDbError, Result};

/// One queue's storage: its datasets, checkpoints and journal.
///
/// Opening a handle runs crash recovery before any other operation can
/// observe the catalog.
pub struct JobsDb {
    pub(crate) config: JobsDbConfig,
    pub(crate) db: Database,
    pub(crate) directory: DatasetDirectory,
    pub(crate) jobs: JobRepository,
    pub(crate) checkpoints: CheckpointRepository,
    pub(crate) journal: JournalRepository,
    pub(crate) sequences: SequenceRepository,
    /// Held while native writes pick their dataset, and by anything that
    /// changes which dataset is last.
    pub(crate) appends: Mutex<()>,
}

impl JobsDb {
    /// Connect to the configured database and open the queue.
    pub async fn open(config: JobsDbConfig) -> Result<Self> {
        let db = db::connect(&config.db).await?;
        Self::with_database(config, db).await
    }

    /// Open the queue on an existing connection.
    pub async fn with_database(config: JobsDbConfig, db: Database) -> Result<Self> {
        let tables = Tables::new(config.table_prefix.as_str())
            .map_err(|e| JobsDbError::Config(e.to_string()))?;
        db::init_schema(&db, &tables).await?;

        let directory = DatasetDirectory::load(db.clone(), tables.clone()).await?;
        let jobsdb = Self {
            jobs: JobRepository::new(db.clone()),
            checkpoints: CheckpointRepository::new(db.clone(), &tables),
            journal: JournalRepository::new(db.clone(), &tables),
            sequences: SequenceRepository::new(db.clone(), &tables),
            appends: Mutex::new(()),
            directory,
            config,
            db,
        };

        let report = jobsdb.recover().await?;
        tracing::info!(
            "[{}] Jobsdb open: {} datasets, recovery {:?}",
            jobsdb.prefix(),
            jobsdb.directory.list().len(),
            report
        );
        Ok(jobsdb)
    }

    pub fn config(&self) -> &JobsDbConfig {
        &self.config
    }

    pub fn prefix(&self) -> &str {
        &self.config.table_prefix
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn directory(&self) -> &DatasetDirectory {
        &self.directory
    }

    pub fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    pub fn checkpoints(&self) -> &CheckpointRepository {
        &self.checkpoints
    }

    pub fn sequences(&self) -> &SequenceRepository {
        &self.sequences
    }

    /// Snapshot of the datasets in global order.
    pub fn datasets(&self) -> Vec<Dataset> {
        self.directory.list().as_ref().clone()
    }

    /// Append `jobs` to the last dataset with native IDs, in input order.
    ///
    /// Embedded latest statuses are stored too. Creates the first dataset
    /// when the queue has none.
    pub async fn store(&self, mut jobs: Vec<Job>) -> Result<Vec<JobId>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let _append = self.appends.lock().await;
        let dataset = match self.directory.last() {
            Some(dataset) => dataset,
            None => self.add_dataset_locked().await?,
        };

        let start = JobId(
            self.sequences
                .next(&dataset.jobs_table, jobs.len() as i64)
                .await?,
        );
        for (i, job) in jobs.iter_mut().enumerate() {
            job.assign_id(start.offset(i as i64));
        }
        let statuses: Vec<JobStatus> = jobs.iter().filter_map(|j| j.last_status.clone()).collect();

        let mut txn = Transaction::new();
        self.jobs.store_jobs_in(&mut txn, &dataset, &jobs)?;
        self.jobs
            .update_statuses_in(&mut txn, &dataset, &statuses, &StatusFilter::default())?;
        txn.commit(&self.db).await?;

        tracing::debug!("[{}] Stored {} jobs in {}", self.prefix(), jobs.len(), dataset);
        Ok(jobs.iter().map(|j| j.job_id).collect())
    }

    /// Append a new dataset; later native writes go there.
    pub async fn add_dataset(&self) -> Result<Dataset> {
        let _append = self.appends.lock().await;
        self.add_dataset_locked().await
    }

    async fn add_dataset_locked(&self) -> Result<Dataset> {
        let guard = self.directory.exclusive().await;
        let counter_floor = match self.directory.last() {
            Some(previous) => self.highest_used_id(&previous).await?,
            None => 0,
        };
        let (dataset, _) = self
            .create_journaled(
                &guard,
                JournalOp::AddDataset,
                &CreateMode::Append,
                serde_json::Map::new(),
                counter_floor,
                None,
            )
            .await?;
        Ok(dataset)
    }

    /// Highest ID stored in or handed out for `dataset`.
    pub(crate) async fn highest_used_id(&self, dataset: &Dataset) -> Result<i64> {
        let stored = self.jobs.max_job_id(dataset).await?;
        let counted = self.sequences.current(&dataset.jobs_table).await?;
        Ok(stored.max(counted))
    }

    /// Record latest statuses, each in the dataset holding its job.
    ///
    /// All updates commit in one transaction. Statuses for unknown jobs
    /// are skipped.
    pub async fn update_job_statuses(
        &self,
        statuses: &[JobStatus],
        filter: &StatusFilter,
    ) -> Result<()> {
        let mut txn = Transaction::new();
        self.update_job_statuses_in(&mut txn, statuses, filter).await?;
        txn.commit(&self.db).await?;
        Ok(())
    }

    /// Add routed status updates to `txn`.
    pub async fn update_job_statuses_in(
        &self,
        txn: &mut Transaction,
        statuses: &[JobStatus],
        filter: &StatusFilter,
    ) -> Result<()> {
        let bounds = self.dataset_bounds().await?;
        let mut routed: Vec<Vec<JobStatus>> = vec![Vec::new(); bounds.len()];

        for status in statuses {
            match bounds.iter().position(|(_, max)| *max >= status.job_id.0) {
                Some(i) => routed[i].push(status.clone()),
                None => tracing::warn!(
                    "[{}] No dataset holds job {}, status skipped",
                    self.prefix(),
                    status.job_id
                ),
            }
        }

        for ((dataset, _), group) in bounds.iter().zip(routed) {
            self.jobs.update_statuses_in(txn, dataset, &group, filter)?;
        }
        Ok(())
    }

    /// Datasets in order with their highest stored ID.
    async fn dataset_bounds(&self) -> Result<Vec<(Dataset, i64)>> {
        let datasets = self.directory.list();
        let mut bounds = Vec::with_capacity(datasets.len());
        for dataset in datasets.iter() {
            bounds.push((dataset.clone(), self.jobs.max_job_id(dataset).await?));
        }
        Ok(bounds)
    }

    async fn dataset_of(&self, job_id: JobId) -> Result<Dataset> {
        self.dataset_bounds()
            .await?
            .into_iter()
            .find(|(_, max)| *max >= job_id.0)
            .map(|(dataset, _)| dataset)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job_id)).into())
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        let dataset = self.dataset_of(job_id).await?;
        Ok(self.jobs.get(&dataset, job_id).await?)
    }

    pub async fn status_history(&self, job_id: JobId) -> Result<Vec<JobStatus>> {
        let dataset = self.dataset_of(job_id).await?;
        Ok(self.jobs.status_history(&dataset, job_id).await?)
    }

    /// Jobs matching `query` across all datasets, in global order.
    pub async fn get_jobs(&self, query: &JobQuery) -> Result<Vec<Job>> {
        let mut found = Vec::new();
        for dataset in self.directory.list().iter() {
            let remaining = match query.limit {
                Some(limit) if found.len() >= limit => break,
                Some(limit) => Some(limit - found.len()),
                None => None,
            };
            let page = JobQuery {
                limit: remaining,
                ..query.clone()
            };
            found.extend(self.jobs.get_jobs(dataset, &page).await?);
        }
        Ok(found)
    }

    /// Number of jobs across all datasets.
    pub async fn count(&self) -> Result<u64> {
        let mut total = 0;
        for dataset in self.directory.list().iter() {
            total += self.jobs.count(dataset).await?;
        }
        Ok(total)
    }

    /// Create or advance a checkpoint.
    pub async fn checkpoint(&self, event: &MigrationEvent) -> Result<MigrationEvent> {
        Ok(self.checkpoints.checkpoint(event).await?)
    }

    /// Checkpoints of `op` at `status`, ordered by id.
    pub async fn get_checkpoints(
        &self,
        op: MigrationOp,
        status: MigrationStatus,
    ) -> Result<Vec<MigrationEvent>> {
        Ok(self.checkpoints.get_checkpoints(op, status).await?)
    }
}
