//! Migration checkpoint types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Dataset, JobId};

/// Kind of migration operation a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOp {
    Export,
    Import,
    /// Preparing the dataset that receives new events while importing.
    AcceptNewEvents,
}

impl MigrationOp {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationOp::Export => "export",
            MigrationOp::Import => "import",
            MigrationOp::AcceptNewEvents => "accept_new_events",
        }
    }
}

impl std::fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one checkpoint. Variants are declared in progression order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Setup,
    Exported,
    PreparedForImport,
    Imported,
}

impl MigrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationStatus::Setup => "setup",
            MigrationStatus::Exported => "exported",
            MigrationStatus::PreparedForImport => "prepared_for_import",
            MigrationStatus::Imported => "imported",
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one step of one migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationEvent {
    /// Store-assigned ID; `0` until first persisted.
    #[serde(default)]
    pub id: i64,
    pub migration_type: MigrationOp,
    pub from_node: String,
    pub to_node: String,
    /// Source (import) or target (export) file; empty for setup checkpoints.
    #[serde(default)]
    pub file_location: String,
    pub status: MigrationStatus,
    /// First job ID reserved for the file, `0` when nothing is reserved yet.
    #[serde(default)]
    pub start_seq: i64,
    /// Number of IDs reserved from `start_seq`.
    #[serde(default)]
    pub job_count: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub time_stamp: DateTime<Utc>,
}

impl MigrationEvent {
    pub fn new(
        migration_type: MigrationOp,
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        file_location: impl Into<String>,
        status: MigrationStatus,
    ) -> Self {
        Self {
            id: 0,
            migration_type,
            from_node: from_node.into(),
            to_node: to_node.into(),
            file_location: file_location.into(),
            status,
            start_seq: 0,
            job_count: 0,
            payload: serde_json::Value::Null,
            time_stamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Whether a job ID range has been reserved for this checkpoint.
    pub fn has_reservation(&self) -> bool {
        self.start_seq > 0
    }

    /// Record the reserved range `[start, start + count)`.
    pub fn reserve(&mut self, start: JobId, count: i64) {
        self.start_seq = start.0;
        self.job_count = count;
        self.status = MigrationStatus::PreparedForImport;
    }

    /// Last job ID covered by the reservation, `0` when there is none.
    pub fn last_job_id(&self) -> i64 {
        if !self.has_reservation() {
            return 0;
        }
        self.start_seq + self.job_count.max(1) - 1
    }

    /// Dataset recorded by a setup checkpoint.
    pub fn dataset(&self) -> Option<Dataset> {
        let value = self.payload.get("dataset")?;
        serde_json::from_value(value.clone()).ok()
    }
}
