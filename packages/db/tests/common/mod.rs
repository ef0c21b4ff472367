#![allow(dead_code)]

use db::{Database, DatasetDirectory, DbConfig, DbError, Tables};
use jobsdb_core::{Job, JobId};
use serde_json::json;

/// Fresh in-memory database with the queue-wide tables for prefix `gw`.
pub async fn setup_db() -> Result<(Database, Tables), DbError> {
    let tables = Tables::new("gw")?;
    let db = db::init(&DbConfig::memory(), &tables).await?;
    Ok((db, tables))
}

pub async fn setup_directory() -> Result<(Database, Tables, DatasetDirectory), DbError> {
    let (db, tables) = setup_db().await?;
    let directory = DatasetDirectory::load(db.clone(), tables.clone()).await?;
    Ok((db, tables, directory))
}

/// Jobs with ids `first..first + count` and alternating custom values.
pub fn jobs(first: i64, count: i64) -> Vec<Job> {
    (0..count)
        .map(|i| {
            let custom_val = if i % 2 == 0 { "WEBHOOK" } else { "GA" };
            let mut job = Job::new(custom_val, json!({ "n": first + i }))
                .with_parameters(json!({ "source_id": format!("src-{}", i % 3) }));
            job.assign_id(JobId(first + i));
            job
        })
        .collect()
}
