//! Migration checkpoint repository.

use chrono::{DateTime, Utc};
use jobsdb_core::{MigrationEvent, MigrationOp, MigrationStatus};
use serde::{Deserialize, Serialize};

use super::SequenceRepository;
use crate::{Database, DbError, Tables, Transaction};

const CHECKPOINT_SEQUENCE: &str = "migration_checkpoint";

/// Repository for migration checkpoint persistence.
#[derive(Clone)]
pub struct CheckpointRepository {
    db: Database,
    table: String,
    sequences: SequenceRepository,
}

/// Stored form of a [`MigrationEvent`]; the record id is the checkpoint id.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    checkpoint_id: i64,
    migration_type: MigrationOp,
    from_node: String,
    to_node: String,
    file_location: String,
    status: MigrationStatus,
    start_seq: i64,
    job_count: i64,
    #[serde(default)]
    payload: serde_json::Value,
    time_stamp: DateTime<Utc>,
}

impl CheckpointRecord {
    fn from_event(event: &MigrationEvent) -> Self {
        Self {
            checkpoint_id: event.id,
            migration_type: event.migration_type,
            from_node: event.from_node.clone(),
            to_node: event.to_node.clone(),
            file_location: event.file_location.clone(),
            status: event.status,
            start_seq: event.start_seq,
            job_count: event.job_count,
            payload: event.payload.clone(),
            time_stamp: event.time_stamp,
        }
    }

    fn into_event(self) -> MigrationEvent {
        MigrationEvent {
            id: self.checkpoint_id,
            migration_type: self.migration_type,
            from_node: self.from_node,
            to_node: self.to_node,
            file_location: self.file_location,
            status: self.status,
            start_seq: self.start_seq,
            job_count: self.job_count,
            payload: self.payload,
            time_stamp: self.time_stamp,
        }
    }
}

impl CheckpointRepository {
    pub fn new(db: Database, tables: &Tables) -> Self {
        Self {
            sequences: SequenceRepository::new(db.clone(), tables),
            table: tables.checkpoints(),
            db,
        }
    }

    /// Give `event` a store-wide unique id if it has none yet.
    pub async fn assign_id(&self, event: &mut MigrationEvent) -> Result<(), DbError> {
        if !event.is_persisted() {
            event.id = self.sequences.next(CHECKPOINT_SEQUENCE, 1).await?;
        }
        Ok(())
    }

    /// Create or update a checkpoint and return it as stored.
    pub async fn checkpoint(&self, event: &MigrationEvent) -> Result<MigrationEvent, DbError> {
        let mut event = event.clone();
        self.assign_id(&mut event).await?;
        event.time_stamp = Utc::now();

        self.db
            .query("UPSERT type::thing($table, $id) CONTENT $record")
            .bind(("table", self.table.clone()))
            .bind(("id", event.id))
            .bind(("record", CheckpointRecord::from_event(&event)))
            .await?
            .check()?;

        tracing::debug!(
            "Checkpoint {} {} {} -> {}",
            event.id,
            event.migration_type,
            event.file_location,
            event.status
        );
        Ok(event)
    }

    /// Add a checkpoint write to `txn`. The event must already have an id.
    pub fn checkpoint_in(
        &self,
        txn: &mut Transaction,
        event: &MigrationEvent,
    ) -> Result<(), DbError> {
        if !event.is_persisted() {
            return Err(DbError::Query(
                "checkpoint written in a transaction needs an assigned id".into(),
            ));
        }
        let mut record = CheckpointRecord::from_event(event);
        record.time_stamp = Utc::now();

        let table = txn.bind(&self.table)?;
        let id = txn.bind(event.id)?;
        let record = txn.bind(record)?;
        txn.push(format!("UPSERT type::thing({table}, {id}) CONTENT {record}"));
        Ok(())
    }

    /// Get a checkpoint by id.
    pub async fn get(&self, id: i64) -> Result<Option<MigrationEvent>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::thing($table, $id)")
            .bind(("table", self.table.clone()))
            .bind(("id", id))
            .await?;

        let records: Vec<CheckpointRecord> = result.take(0)?;
        Ok(records.into_iter().next().map(CheckpointRecord::into_event))
    }

    /// Checkpoints of `op` currently at `status`, oldest first.
    pub async fn get_checkpoints(
        &self,
        op: MigrationOp,
        status: MigrationStatus,
    ) -> Result<Vec<MigrationEvent>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM type::table($table)
                WHERE migration_type = $op AND status = $status
                ORDER BY checkpoint_id ASC
                "#,
            )
            .bind(("table", self.table.clone()))
            .bind(("op", op.as_str()))
            .bind(("status", status.as_str()))
            .await?;

        let records: Vec<CheckpointRecord> = result.take(0)?;
        Ok(records.into_iter().map(CheckpointRecord::into_event).collect())
    }

    /// All checkpoints of `op`, oldest first.
    pub async fn list_by_op(&self, op: MigrationOp) -> Result<Vec<MigrationEvent>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::table($table) WHERE migration_type = $op \
                 ORDER BY checkpoint_id ASC",
            )
            .bind(("table", self.table.clone()))
            .bind(("op", op.as_str()))
            .await?;

        let records: Vec<CheckpointRecord> = result.take(0)?;
        Ok(records.into_iter().map(CheckpointRecord::into_event).collect())
    }

    /// The checkpoint tracking `file_location` for `op`, if any.
    pub async fn find_for_file(
        &self,
        op: MigrationOp,
        file_location: &str,
    ) -> Result<Option<MigrationEvent>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM type::table($table)
                WHERE migration_type = $op AND file_location = $file
                ORDER BY checkpoint_id DESC
                LIMIT 1
                "#,
            )
            .bind(("table", self.table.clone()))
            .bind(("op", op.as_str()))
            .bind(("file", file_location.to_string()))
            .await?;

        let records: Vec<CheckpointRecord> = result.take(0)?;
        Ok(records.into_iter().next().map(CheckpointRecord::into_event))
    }

    /// The setup checkpoint recording the destination chosen for `op`.
    pub async fn find_setup(&self, op: MigrationOp) -> Result<Option<MigrationEvent>, DbError> {
        Ok(self
            .get_checkpoints(op, MigrationStatus::Setup)
            .await?
            .into_iter()
            .next())
    }
}
