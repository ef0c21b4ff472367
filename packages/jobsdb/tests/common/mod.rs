#![allow(dead_code)]

use std::sync::Arc;

use db::{Database, DbConfig};
use jobsdb::{JobsDb, JobsDbConfig, JobsDbError};
use jobsdb_core::{Job, JobId, JobState, JobStatus};
use serde_json::json;

pub fn config(node_id: &str) -> JobsDbConfig {
    JobsDbConfig::new("gw")
        .with_node_id(node_id)
        .with_db(DbConfig::memory())
}

/// A fresh in-memory store and the queue opened on it.
pub async fn open(node_id: &str) -> Result<(Database, Arc<JobsDb>), JobsDbError> {
    let db = db::connect(&DbConfig::memory()).await?;
    let jobsdb = JobsDb::with_database(config(node_id), db.clone()).await?;
    Ok((db, Arc::new(jobsdb)))
}

/// Open the queue again on the same store, as a restarted process would.
pub async fn reopen(db: &Database, node_id: &str) -> Result<Arc<JobsDb>, JobsDbError> {
    Ok(Arc::new(JobsDb::with_database(config(node_id), db.clone()).await?))
}

/// `count` jobs without ids, payload `n` counting from `first`.
pub fn new_jobs(first: i64, count: i64) -> Vec<Job> {
    (first..first + count)
        .map(|n| {
            Job::new("WEBHOOK", json!({ "n": n }))
                .with_parameters(json!({ "source_id": "src-1" }))
        })
        .collect()
}

/// Same as [`new_jobs`] with a failed status embedded in the job at `with_status`.
pub fn exported_jobs(count: i64, with_status: usize) -> Vec<Job> {
    new_jobs(1, count)
        .into_iter()
        .enumerate()
        .map(|(i, job)| {
            if i == with_status {
                job.with_last_status(
                    JobStatus::new(JobId(0), JobState::Failed)
                        .with_attempt(2)
                        .with_error("504", json!({ "body": "timeout" })),
                )
            } else {
                job
            }
        })
        .collect()
}

pub fn payload_n(job: &Job) -> i64 {
    job.payload["n"].as_i64().unwrap_or_default()
}
