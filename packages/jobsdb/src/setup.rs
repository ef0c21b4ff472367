//! Journaled dataset creation and migration destinations.

use db::{CreateMode, DirectoryGuard};
use jobsdb_core::{Dataset, JournalOp, MigrationEvent, MigrationOp, MigrationStatus};
use serde_json::{Map, Value, json};

use crate::{JobsDb, JobsDbError, Result};

impl JobsDb {
    /// Create a dataset bracketed by journal markers.
    ///
    /// The dataset's native counter is raised to `counter_floor` and, for
    /// migration setups, the `Setup` checkpoint for `setup_op` is written
    /// before the dataset becomes visible and the journal entry is closed.
    pub(crate) async fn create_journaled(
        &self,
        guard: &DirectoryGuard<'_>,
        operation: JournalOp,
        mode: &CreateMode,
        extra: Map<String, Value>,
        counter_floor: i64,
        setup_op: Option<MigrationOp>,
    ) -> Result<(Dataset, Option<MigrationEvent>)> {
        let dataset = self.directory.plan(guard, mode).await?;

        let mut payload = extra;
        let recorded = serde_json::to_value(&dataset).map_err(db::DbError::from)?;
        payload.insert("dataset".into(), recorded);
        let mut journal_payload = payload.clone();
        journal_payload.insert("counter_floor".into(), json!(counter_floor));

        let op_id = self
            .journal
            .mark_start(operation, Value::Object(journal_payload))
            .await?;

        if let Err(e) = self.directory.create_tables(guard, &dataset).await {
            // The DDL transaction left nothing behind.
            if let Err(mark) = self.journal.mark_done(op_id).await {
                tracing::warn!(
                    "[{}] Journal entry {} left open: {}",
                    self.prefix(),
                    op_id,
                    mark
                );
            }
            return Err(e.into());
        }

        let setup = match self
            .seed_created(&dataset, Value::Object(payload), counter_floor, setup_op)
            .await
        {
            Ok(setup) => setup,
            Err(e) => {
                self.compensate(guard, &dataset, op_id).await;
                return Err(e);
            }
        };

        self.directory.register(guard, dataset.clone());
        self.journal.mark_done(op_id).await?;

        tracing::info!(
            "[{}] Dataset {} created ({})",
            self.prefix(),
            dataset.index,
            operation
        );
        Ok((dataset, setup))
    }

    /// Raise the counter of a freshly created dataset and write its setup
    /// checkpoint.
    async fn seed_created(
        &self,
        dataset: &Dataset,
        payload: Value,
        counter_floor: i64,
        setup_op: Option<MigrationOp>,
    ) -> Result<Option<MigrationEvent>> {
        if counter_floor > 0 {
            self.sequences
                .raise_to(&dataset.jobs_table, counter_floor)
                .await?;
        }
        match setup_op {
            Some(op) => Ok(Some(
                self.checkpoints
                    .checkpoint(&self.setup_event(op, payload))
                    .await?,
            )),
            None => Ok(None),
        }
    }

    /// Undo a creation that failed after its tables were made. If the undo
    /// fails too, the journal entry stays open for recovery.
    async fn compensate(&self, guard: &DirectoryGuard<'_>, dataset: &Dataset, op_id: i64) {
        let undone = async {
            self.directory.drop_dataset(guard, &dataset.index).await?;
            self.sequences.remove(&dataset.jobs_table).await?;
            self.journal.mark_done(op_id).await
        };
        match undone.await {
            Ok(()) => tracing::warn!(
                "[{}] Creation of dataset {} undone",
                self.prefix(),
                dataset.index
            ),
            Err(e) => tracing::warn!(
                "[{}] Dataset {} left for recovery (journal entry {}): {}",
                self.prefix(),
                dataset.index,
                op_id,
                e
            ),
        }
    }

    pub(crate) fn setup_event(&self, op: MigrationOp, payload: Value) -> MigrationEvent {
        MigrationEvent::new(
            op,
            &self.config.node_id,
            &self.config.node_id,
            "",
            MigrationStatus::Setup,
        )
        .with_payload(payload)
    }

    /// The dataset a setup checkpoint points at. It must be in the catalog.
    pub(crate) fn recorded_dataset(&self, setup: &MigrationEvent) -> Result<Dataset> {
        let recorded = setup.dataset().ok_or_else(|| {
            JobsDbError::Invariant(format!("setup checkpoint {} names no dataset", setup.id))
        })?;
        self.directory.get(&recorded.index).ok_or_else(|| {
            JobsDbError::Invariant(format!(
                "{} destination {} recorded by checkpoint {} is missing",
                setup.migration_type, recorded.index, setup.id
            ))
        })
    }

    /// Resolve the destination dataset for `op`, creating it on first use.
    ///
    /// Returns the dataset, its setup checkpoint and whether the dataset
    /// was created by this call. Once a destination is recorded it is always
    /// reused; if it disappeared the result is an invariant violation.
    pub async fn find_or_create_checkpointed(
        &self,
        op: MigrationOp,
    ) -> Result<(Dataset, MigrationEvent, bool)> {
        let _append = self.appends.lock().await;
        let guard = self.directory.exclusive().await;

        if let Some(setup) = self.checkpoints.find_setup(op).await? {
            let dataset = self.recorded_dataset(&setup)?;
            return Ok((dataset, setup, false));
        }

        match op {
            MigrationOp::AcceptNewEvents => self.create_new_events(&guard).await,
            MigrationOp::Import => self.create_import(&guard).await,
            MigrationOp::Export => Err(JobsDbError::Invariant(
                "export has no destination dataset".into(),
            )),
        }
    }

    /// Destination for events arriving after the migration.
    ///
    /// The last dataset is reused when it is still empty; otherwise a new
    /// one is appended. Its native counter jumps to the epoch start.
    async fn create_new_events(
        &self,
        guard: &DirectoryGuard<'_>,
    ) -> Result<(Dataset, MigrationEvent, bool)> {
        let datasets = self.directory.list();
        let mut global_max = 0;
        for dataset in datasets.iter() {
            global_max = global_max.max(self.highest_used_id(dataset).await?);
        }
        let start_seq = self.config.new_events_start(global_max);

        if let Some(last) = datasets.last()
            && self.jobs.count(last).await? == 0
        {
            self.sequences
                .raise_to(&last.jobs_table, start_seq - 1)
                .await?;
            let payload = json!({ "dataset": last, "start_seq": start_seq });
            let setup = self
                .checkpoints
                .checkpoint(&self.setup_event(MigrationOp::AcceptNewEvents, payload))
                .await?;
            tracing::info!(
                "[{}] New events reuse empty dataset {} from id {}",
                self.prefix(),
                last.index,
                start_seq
            );
            return Ok((last.clone(), setup, false));
        }

        let mut extra = Map::new();
        extra.insert("start_seq".into(), json!(start_seq));
        let (dataset, setup) = self
            .create_journaled(
                guard,
                JournalOp::NewEventsSetup,
                &CreateMode::Append,
                extra,
                start_seq - 1,
                Some(MigrationOp::AcceptNewEvents),
            )
            .await?;
        let setup = setup.ok_or_else(|| {
            JobsDbError::Invariant("new events setup wrote no checkpoint".into())
        })?;
        tracing::info!(
            "[{}] New events go to dataset {} from id {}",
            self.prefix(),
            dataset.index,
            start_seq
        );
        Ok((dataset, setup, true))
    }

    /// Import destination, inserted right before the new-events dataset.
    async fn create_import(
        &self,
        guard: &DirectoryGuard<'_>,
    ) -> Result<(Dataset, MigrationEvent, bool)> {
        let new_events = self
            .checkpoints
            .find_setup(MigrationOp::AcceptNewEvents)
            .await?
            .ok_or_else(|| {
                JobsDbError::Invariant(
                    "import destination needs the new events dataset first".into(),
                )
            })?;
        let before = self.recorded_dataset(&new_events)?;

        let (dataset, setup) = self
            .create_journaled(
                guard,
                JournalOp::ImportSetup,
                &CreateMode::InsertBefore(before.index.clone()),
                Map::new(),
                0,
                Some(MigrationOp::Import),
            )
            .await?;
        let setup = setup
            .ok_or_else(|| JobsDbError::Invariant("import setup wrote no checkpoint".into()))?;
        tracing::info!(
            "[{}] Imports go to dataset {} before {}",
            self.prefix(),
            dataset.index,
            before.index
        );
        Ok((dataset, setup, true))
    }

    /// First ID of the new-events dataset, if it has been set up.
    pub async fn new_events_start(&self) -> Result<Option<i64>> {
        let setup = self
            .checkpoints
            .find_setup(MigrationOp::AcceptNewEvents)
            .await?;
        Ok(setup.and_then(|s| s.payload.get("start_seq").and_then(Value::as_i64)))
    }
}
