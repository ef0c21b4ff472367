//! Journal repository.

use chrono::Utc;
use jobsdb_core::{JournalEntry, JournalOp};

use super::SequenceRepository;
use crate::{Database, DbError, Tables};

const JOURNAL_SEQUENCE: &str = "journal_op";

/// Append-only log bracketing structural operations.
#[derive(Clone)]
pub struct JournalRepository {
    db: Database,
    table: String,
    sequences: SequenceRepository,
}

impl JournalRepository {
    pub fn new(db: Database, tables: &Tables) -> Self {
        Self {
            sequences: SequenceRepository::new(db.clone(), tables),
            table: tables.journal(),
            db,
        }
    }

    /// Record the start of `operation` and return its op id.
    pub async fn mark_start(
        &self,
        operation: JournalOp,
        payload: serde_json::Value,
    ) -> Result<i64, DbError> {
        let op_id = self.sequences.next(JOURNAL_SEQUENCE, 1).await?;
        let entry = JournalEntry {
            op_id,
            operation,
            payload,
            started_at: Utc::now(),
            done_at: None,
        };

        self.db
            .query("CREATE type::thing($table, $id) CONTENT $entry")
            .bind(("table", self.table.clone()))
            .bind(("id", op_id))
            .bind(("entry", entry))
            .await?
            .check()?;

        tracing::debug!("Journal start {} ({})", op_id, operation);
        Ok(op_id)
    }

    /// Record completion of `op_id`.
    pub async fn mark_done(&self, op_id: i64) -> Result<(), DbError> {
        let mut result = self
            .db
            .query("UPDATE type::thing($table, $id) SET done_at = $now")
            .bind(("table", self.table.clone()))
            .bind(("id", op_id))
            .bind(("now", Utc::now()))
            .await?;

        let updated: Vec<JournalEntry> = result.take(0)?;
        if updated.is_empty() {
            return Err(DbError::NotFound(format!("Journal entry not found: {}", op_id)));
        }

        tracing::debug!("Journal done {}", op_id);
        Ok(())
    }

    /// Get an entry by op id.
    pub async fn get(&self, op_id: i64) -> Result<Option<JournalEntry>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::thing($table, $id)")
            .bind(("table", self.table.clone()))
            .bind(("id", op_id))
            .await?;

        let entries: Vec<JournalEntry> = result.take(0)?;
        Ok(entries.into_iter().next())
    }

    /// Started operations without a done marker, oldest first.
    pub async fn pending(&self) -> Result<Vec<JournalEntry>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM type::table($table)
                WHERE done_at = NONE OR done_at = NULL
                ORDER BY op_id ASC
                "#,
            )
            .bind(("table", self.table.clone()))
            .await?;

        let entries: Vec<JournalEntry> = result.take(0)?;
        Ok(entries)
    }
}
