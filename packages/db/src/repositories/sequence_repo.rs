//! Store-backed named counters.

use serde::Deserialize;

use crate::{Database, DbError, Tables};

/// Repository for monotonic counters persisted in the database.
///
/// Used where an ID must be unique across processes sharing the store:
/// native job IDs, checkpoint IDs and journal operation IDs.
#[derive(Clone)]
pub struct SequenceRepository {
    db: Database,
    table: String,
}

#[derive(Debug, Deserialize)]
struct SequenceRecord {
    value: i64,
}

impl SequenceRepository {
    pub fn new(db: Database, tables: &Tables) -> Self {
        Self {
            db,
            table: tables.sequences(),
        }
    }

    /// Advance counter `name` by `count` and return the first value of the
    /// consumed range.
    pub async fn next(&self, name: &str, count: i64) -> Result<i64, DbError> {
        if count <= 0 {
            return Err(DbError::Query(format!("invalid sequence step {count}")));
        }

        let mut result = self
            .db
            .query(
                "UPSERT type::thing($table, $name) SET value = (value ?? 0) + $count RETURN AFTER",
            )
            .bind(("table", self.table.clone()))
            .bind(("name", name.to_string()))
            .bind(("count", count))
            .await?;

        let records: Vec<SequenceRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(|r| r.value - count + 1)
            .ok_or_else(|| DbError::Query(format!("sequence {name} did not advance")))
    }

    /// Raise counter `name` so that the next value handed out is above
    /// `value`. Never lowers it. Returns the counter after the update.
    pub async fn raise_to(&self, name: &str, value: i64) -> Result<i64, DbError> {
        let mut result = self
            .db
            .query(
                "UPSERT type::thing($table, $name) \
                 SET value = math::max([(value ?? 0), $value]) RETURN AFTER",
            )
            .bind(("table", self.table.clone()))
            .bind(("name", name.to_string()))
            .bind(("value", value))
            .await?;

        let records: Vec<SequenceRecord> = result.take(0)?;
        records
            .into_iter()
            .next()
            .map(|r| r.value)
            .ok_or_else(|| DbError::Query(format!("sequence {name} was not updated")))
    }

    /// Last value handed out by counter `name`, `0` if never used.
    pub async fn current(&self, name: &str) -> Result<i64, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::thing($table, $name)")
            .bind(("table", self.table.clone()))
            .bind(("name", name.to_string()))
            .await?;

        let records: Vec<SequenceRecord> = result.take(0)?;
        Ok(records.into_iter().next().map_or(0, |r| r.value))
    }

    /// Forget counter `name`.
    pub async fn remove(&self, name: &str) -> Result<(), DbError> {
        self.db
            .query("DELETE type::thing($table, $name)")
            .bind(("table", self.table.clone()))
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}
