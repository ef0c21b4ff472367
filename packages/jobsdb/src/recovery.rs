//! Startup reconciliation of interrupted structural operations.

use db::{DirectoryGuard, StorageScan};
use jobsdb_core::{Dataset, JournalEntry, JournalOp, MigrationOp};
use serde_json::Value;

use crate::{JobsDb, Result};

/// What recovery did on open.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted operations whose dataset was kept.
    pub completed: usize,
    /// Interrupted operations undone.
    pub compensated: usize,
    /// Interrupted operations that never created anything.
    pub no_op: usize,
    /// Lone empty tables removed.
    pub orphans_dropped: usize,
    /// Lone tables holding rows, left for an operator.
    pub orphans_kept: usize,
}

impl JobsDb {
    /// Close every journal entry left open by a crash.
    ///
    /// For each entry the state of its dataset decides the outcome:
    /// nothing created means nothing to do; a single table is dropped; both
    /// tables are kept when the dataset is checkpointed or already holds
    /// jobs, and dropped otherwise.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let guard = self.directory.exclusive().await;
        let mut report = RecoveryReport::default();

        for entry in self.journal.pending().await? {
            let scan = self.directory.scan().await?;
            self.recover_entry(&guard, &scan, &entry, &mut report).await?;
            self.journal.mark_done(entry.op_id).await?;
        }

        let scan = self.directory.refresh().await?;
        for (kind, index, table) in scan.orphans {
            if self.directory.row_count(&table).await? == 0 {
                self.directory.drop_table(&guard, &table).await?;
                tracing::warn!("[{}] Dropped empty orphan table {}", self.prefix(), table);
                report.orphans_dropped += 1;
            } else {
                tracing::warn!(
                    "[{}] Orphan {:?} table {} of dataset {} holds rows, left in place",
                    self.prefix(),
                    kind,
                    table,
                    index
                );
                report.orphans_kept += 1;
            }
        }

        Ok(report)
    }

    async fn recover_entry(
        &self,
        guard: &DirectoryGuard<'_>,
        scan: &StorageScan,
        entry: &JournalEntry,
        report: &mut RecoveryReport,
    ) -> Result<()> {
        let recorded = entry
            .payload
            .get("dataset")
            .and_then(|v| serde_json::from_value::<Dataset>(v.clone()).ok());
        let Some(dataset) = recorded else {
            tracing::warn!(
                "[{}] Journal entry {} ({}) names no dataset",
                self.prefix(),
                entry.op_id,
                entry.operation
            );
            report.no_op += 1;
            return Ok(());
        };

        let complete = scan.datasets.iter().any(|d| d.index == dataset.index);
        let orphan = scan
            .orphans
            .iter()
            .find(|(_, index, _)| *index == dataset.index);

        if let Some((_, _, table)) = orphan {
            self.directory.drop_table(guard, table).await?;
            tracing::warn!(
                "[{}] Recovery dropped half-created table {} ({})",
                self.prefix(),
                table,
                entry.operation
            );
            report.compensated += 1;
            return Ok(());
        }

        if !complete {
            tracing::info!(
                "[{}] Interrupted {} for dataset {} created nothing",
                self.prefix(),
                entry.operation,
                dataset.index
            );
            report.no_op += 1;
            return Ok(());
        }

        let setup_op = match entry.operation {
            JournalOp::AddDataset => None,
            JournalOp::ImportSetup => Some(MigrationOp::Import),
            JournalOp::NewEventsSetup => Some(MigrationOp::AcceptNewEvents),
        };
        let existing_setup = match setup_op {
            Some(op) => self.checkpoints.find_setup(op).await?,
            None => None,
        };
        let checkpointed = existing_setup
            .as_ref()
            .and_then(|s| s.dataset())
            .is_some_and(|d| d.index == dataset.index);
        let has_jobs = self.jobs.count(&dataset).await? > 0;

        if checkpointed || has_jobs {
            if let Some(op) = setup_op
                && existing_setup.is_none()
            {
                let mut payload = entry.payload.clone();
                if let Value::Object(map) = &mut payload {
                    map.remove("counter_floor");
                }
                self.checkpoints
                    .checkpoint(&self.setup_event(op, payload))
                    .await?;
            }
            let recorded_floor = entry
                .payload
                .get("counter_floor")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let floor = recorded_floor.max(self.jobs.max_job_id(&dataset).await?);
            if floor > 0 {
                self.sequences.raise_to(&dataset.jobs_table, floor).await?;
            }
            self.directory.register(guard, dataset.clone());
            tracing::warn!(
                "[{}] Recovery completed {} for dataset {}",
                self.prefix(),
                entry.operation,
                dataset.index
            );
            report.completed += 1;
        } else {
            self.directory.drop_dataset(guard, &dataset.index).await?;
            self.sequences.remove(&dataset.jobs_table).await?;
            tracing::warn!(
                "[{}] Recovery undid {} for empty dataset {}",
                self.prefix(),
                entry.operation,
                dataset.index
            );
            report.compensated += 1;
        }
        Ok(())
    }
}
