use db::DbConfig;

use crate::JobsDbError;

/// IDs reserved per migration epoch.
pub const EPOCH_SPAN: i64 = 10_000_000_000_000;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct JobsDbConfig {
    /// Table name prefix, one per queue (`gw`, `rt`, ...).
    pub table_prefix: String,
    /// Name of this node in migration checkpoints.
    pub node_id: String,
    /// Migration generation; new events after a migration start at or
    /// above `migration_epoch * EPOCH_SPAN`.
    pub migration_epoch: i64,
    pub db: DbConfig,
}

impl Default for JobsDbConfig {
    fn default() -> Self {
        Self {
            table_prefix: "gw".to_string(),
            node_id: "node-0".to_string(),
            migration_epoch: 0,
            db: DbConfig::default(),
        }
    }
}

impl JobsDbConfig {
    pub fn new(table_prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: table_prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_migration_epoch(mut self, epoch: i64) -> Self {
        self.migration_epoch = epoch;
        self
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `JOBSDB_TABLE_PREFIX` (default: `gw`)
    /// - `JOBSDB_NODE_ID` (default: `node-0`)
    /// - `JOBSDB_MIGRATION_EPOCH` (default: `0`)
    /// - database settings, see [`DbConfig::from_env`]
    pub fn from_env() -> Result<Self, JobsDbError> {
        let defaults = Self::default();
        let migration_epoch = match env_non_empty("JOBSDB_MIGRATION_EPOCH") {
            Some(raw) => raw.parse::<i64>().ok().filter(|e| *e >= 0).ok_or_else(|| {
                JobsDbError::Config(format!("invalid JOBSDB_MIGRATION_EPOCH={raw}"))
            })?,
            None => defaults.migration_epoch,
        };

        Ok(Self {
            table_prefix: env_non_empty("JOBSDB_TABLE_PREFIX").unwrap_or(defaults.table_prefix),
            node_id: env_non_empty("JOBSDB_NODE_ID").unwrap_or(defaults.node_id),
            migration_epoch,
            db: DbConfig::from_env(),
        })
    }

    /// First ID of the new-events dataset given the highest ID in use.
    pub fn new_events_start(&self, global_max: i64) -> i64 {
        let epoch_floor = self.migration_epoch.saturating_mul(EPOCH_SPAN);
        epoch_floor.max(global_max.saturating_add(EPOCH_SPAN)) + 1
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
