//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection handle. Cheap to clone; clones share the connection.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path" or "file://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobsdb".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Build a config from environment variables.
    ///
    /// - `JOBSDB_DB_ENDPOINT` (default: `mem://`)
    /// - `JOBSDB_DB_NAMESPACE` (default: `jobsdb`)
    /// - `JOBSDB_DB_DATABASE` (default: `main`)
    /// - `JOBSDB_DB_USER`, `JOBSDB_DB_PASS` (optional; both required to sign in)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let user = env_non_empty("JOBSDB_DB_USER");
        let pass = env_non_empty("JOBSDB_DB_PASS");

        Self {
            endpoint: env_non_empty("JOBSDB_DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: env_non_empty("JOBSDB_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: env_non_empty("JOBSDB_DB_DATABASE").unwrap_or(defaults.database),
            credentials: user.zip(pass),
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid name: {0}")]
    InvalidName(String),
}

/// Open a connection and select the configured namespace and database.
///
/// Every call yields an independent handle; `mem://` endpoints get their own
/// in-memory datastore.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(&config.endpoint).await?;

    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
