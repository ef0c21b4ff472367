//! Database schema definitions using SurrealQL.

use jobsdb_core::Dataset;

use crate::{Database, DbError};

/// Names of the queue-wide tables for one table prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    prefix: String,
}

impl Tables {
    /// Validate `prefix` (`[a-z][a-z0-9]*`) and derive table names from it.
    pub fn new(prefix: impl Into<String>) -> Result<Self, DbError> {
        let prefix = prefix.into();
        let mut chars = prefix.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(DbError::InvalidName(format!("table prefix {prefix:?}")));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn checkpoints(&self) -> String {
        format!("{}_migration_checkpoints", self.prefix)
    }

    pub fn journal(&self) -> String {
        format!("{}_journal", self.prefix)
    }

    pub fn sequences(&self) -> String {
        format!("{}_sequences", self.prefix)
    }
}

/// Initialize the queue-wide tables.
///
/// Dataset tables are created separately, one pair per dataset.
pub async fn init_schema(db: &Database, tables: &Tables) -> Result<(), DbError> {
    tracing::info!("[{}] Initializing jobsdb schema", tables.prefix());

    db.query(CHECKPOINT_SCHEMA.replace("{table}", &tables.checkpoints()))
        .await?
        .check()?;

    db.query(JOURNAL_SCHEMA.replace("{table}", &tables.journal()))
        .await?
        .check()?;

    db.query(SEQUENCE_SCHEMA.replace("{table}", &tables.sequences()))
        .await?
        .check()?;

    tracing::info!("[{}] Jobsdb schema initialized", tables.prefix());

    Ok(())
}

/// Statements creating both tables of `dataset`.
///
/// Deliberately without `IF NOT EXISTS`: creating a dataset whose tables
/// already exist must fail.
pub(crate) fn dataset_ddl(dataset: &Dataset) -> Vec<String> {
    let jobs = &dataset.jobs_table;
    let status = &dataset.status_table;
    vec![
        format!("DEFINE TABLE {jobs} SCHEMALESS"),
        format!("DEFINE FIELD job_id ON {jobs} TYPE int"),
        format!("DEFINE FIELD custom_val ON {jobs} TYPE string"),
        format!("DEFINE INDEX {jobs}_job_id ON {jobs} FIELDS job_id UNIQUE"),
        format!("DEFINE INDEX {jobs}_custom_val ON {jobs} FIELDS custom_val"),
        format!("DEFINE INDEX {jobs}_state ON {jobs} FIELDS last_status.state"),
        format!("DEFINE TABLE {status} SCHEMALESS"),
        format!("DEFINE FIELD job_id ON {status} TYPE int"),
        format!("DEFINE INDEX {status}_job_id ON {status} FIELDS job_id"),
    ]
}

/// Migration checkpoint table schema.
const CHECKPOINT_SCHEMA: &str = r#"
-- One row per step of a migration operation
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;

DEFINE FIELD IF NOT EXISTS checkpoint_id ON {table} TYPE int;
DEFINE FIELD IF NOT EXISTS migration_type ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS file_location ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS status ON {table} TYPE string;
DEFINE FIELD IF NOT EXISTS start_seq ON {table} TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS job_count ON {table} TYPE int DEFAULT 0;

DEFINE INDEX IF NOT EXISTS {table}_op_status ON {table} FIELDS migration_type, status;
DEFINE INDEX IF NOT EXISTS {table}_op_file ON {table} FIELDS migration_type, file_location;
"#;

/// Journal table schema.
const JOURNAL_SCHEMA: &str = r#"
-- Append-only log of structural operations
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;

DEFINE FIELD IF NOT EXISTS op_id ON {table} TYPE int;
DEFINE FIELD IF NOT EXISTS operation ON {table} TYPE string;

DEFINE INDEX IF NOT EXISTS {table}_op_id ON {table} FIELDS op_id UNIQUE;
"#;

/// Store-backed counter table schema.
const SEQUENCE_SCHEMA: &str = r#"
-- Named monotonic counters, record id = counter name
DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;

DEFINE FIELD IF NOT EXISTS value ON {table} TYPE int DEFAULT 0;
"#;
