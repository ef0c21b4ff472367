//! Job and status persistence within one dataset.

use jobsdb_core::{Dataset, Job, JobId, JobState, JobStatus};
use serde::Deserialize;

use crate::{Database, DbError, Transaction};

/// Repository for job and job status rows.
///
/// Every operation names the dataset it works on; the repository itself
/// holds no per-dataset state.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

/// Restricts which jobs a status update applies to.
///
/// Empty filters match every job.
#[derive(Debug, Default, Clone)]
pub struct StatusFilter {
    pub custom_vals: Vec<String>,
    /// `(parameter name, value)` pairs that must all match.
    pub parameters: Vec<(String, serde_json::Value)>,
}

/// Selection options for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobQuery {
    /// Latest states to include.
    pub states: Vec<JobState>,
    /// Also include jobs that never received a status.
    pub unprocessed: bool,
    pub custom_vals: Vec<String>,
    pub parameters: Vec<(String, serde_json::Value)>,
    /// Only jobs with an id above this bookmark.
    pub after: Option<JobId>,
    pub limit: Option<usize>,
}

impl JobQuery {
    /// Jobs that were never picked up.
    pub fn unprocessed() -> Self {
        Self {
            unprocessed: true,
            ..Default::default()
        }
    }

    /// Jobs whose latest state is one of `states`.
    pub fn in_states(states: impl IntoIterator<Item = JobState>) -> Self {
        Self {
            states: states.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_custom_vals(
        mut self,
        custom_vals: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.custom_vals = custom_vals.into_iter().map(Into::into).collect();
        self
    }

    pub fn after(mut self, job_id: JobId) -> Self {
        self.after = Some(job_id);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Deserialize)]
struct JobIdRecord {
    job_id: i64,
}

#[derive(Debug, Deserialize)]
struct CountRecord {
    count: i64,
}

/// Parameter names are spliced into field paths and must be plain identifiers.
fn check_field_name(name: &str) -> Result<(), DbError> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidName(format!("parameter name {name:?}")))
    }
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add job inserts to `txn`.
    ///
    /// Jobs must carry their final ids. Any embedded latest status is left
    /// out; statuses are written through [`Self::update_statuses_in`].
    pub fn store_jobs_in(
        &self,
        txn: &mut Transaction,
        dataset: &Dataset,
        jobs: &[Job],
    ) -> Result<(), DbError> {
        if jobs.is_empty() {
            return Ok(());
        }
        if let Some(job) = jobs.iter().find(|j| !j.job_id.is_assigned()) {
            return Err(DbError::Query(format!(
                "job with custom_val {} has no id",
                job.custom_val
            )));
        }

        let rows: Vec<Job> = jobs
            .iter()
            .map(|job| Job {
                last_status: None,
                ..job.clone()
            })
            .collect();

        let table = txn.bind(&dataset.jobs_table)?;
        let rows = txn.bind(rows)?;
        txn.push(format!(
            "FOR $job IN {rows} {{ CREATE type::thing({table}, $job.job_id) CONTENT $job; }}"
        ));
        Ok(())
    }

    /// Add status appends and latest-status updates to `txn`.
    ///
    /// A status whose job is missing or fails `filter` is skipped.
    pub fn update_statuses_in(
        &self,
        txn: &mut Transaction,
        dataset: &Dataset,
        statuses: &[JobStatus],
        filter: &StatusFilter,
    ) -> Result<(), DbError> {
        if statuses.is_empty() {
            return Ok(());
        }

        let mut conditions = Vec::new();
        if !filter.custom_vals.is_empty() {
            let custom_vals = txn.bind(&filter.custom_vals)?;
            conditions.push(format!("custom_val IN {custom_vals}"));
        }
        for (name, value) in &filter.parameters {
            check_field_name(name)?;
            let value = txn.bind(value)?;
            conditions.push(format!("parameters.{name} = {value}"));
        }
        let condition = if conditions.is_empty() {
            "true".to_string()
        } else {
            conditions.join(" AND ")
        };

        let jobs_table = txn.bind(&dataset.jobs_table)?;
        let status_table = txn.bind(&dataset.status_table)?;
        let statuses = txn.bind(statuses)?;
        txn.push(format!(
            r#"FOR $status IN {statuses} {{
                LET $hit = (UPDATE type::thing({jobs_table}, $status.job_id)
                    SET last_status = $status WHERE {condition});
                IF array::len($hit) > 0 {{
                    CREATE type::thing({status_table}, $status.status_id) CONTENT $status;
                }};
            }}"#
        ));
        Ok(())
    }

    /// Write `jobs` in one transaction.
    pub async fn store_jobs(&self, dataset: &Dataset, jobs: &[Job]) -> Result<(), DbError> {
        let mut txn = Transaction::new();
        self.store_jobs_in(&mut txn, dataset, jobs)?;
        txn.commit(&self.db).await?;
        tracing::debug!("Stored {} jobs in {}", jobs.len(), dataset);
        Ok(())
    }

    /// Write `statuses` in one transaction.
    pub async fn update_statuses(
        &self,
        dataset: &Dataset,
        statuses: &[JobStatus],
        filter: &StatusFilter,
    ) -> Result<(), DbError> {
        let mut txn = Transaction::new();
        self.update_statuses_in(&mut txn, dataset, statuses, filter)?;
        txn.commit(&self.db).await
    }

    /// Highest job id in `dataset`, `0` when empty.
    pub async fn max_job_id(&self, dataset: &Dataset) -> Result<i64, DbError> {
        self.edge_job_id(dataset, "DESC").await
    }

    /// Lowest job id in `dataset`, `0` when empty.
    pub async fn min_job_id(&self, dataset: &Dataset) -> Result<i64, DbError> {
        self.edge_job_id(dataset, "ASC").await
    }

    async fn edge_job_id(&self, dataset: &Dataset, order: &str) -> Result<i64, DbError> {
        let query = format!(
            "SELECT job_id FROM type::table($table) ORDER BY job_id {} LIMIT 1",
            order
        );
        let mut result = self
            .db
            .query(query)
            .bind(("table", dataset.jobs_table.clone()))
            .await?;

        let records: Vec<JobIdRecord> = result.take(0)?;
        Ok(records.into_iter().next().map_or(0, |r| r.job_id))
    }

    /// Number of jobs in `dataset`.
    pub async fn count(&self, dataset: &Dataset) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", dataset.jobs_table.clone()))
            .await?;

        let records: Vec<CountRecord> = result.take(0)?;
        Ok(records.into_iter().next().map_or(0, |r| r.count.max(0) as u64))
    }

    /// Get a job with its latest status.
    pub async fn get(&self, dataset: &Dataset, job_id: JobId) -> Result<Job, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::thing($table, $id)")
            .bind(("table", dataset.jobs_table.clone()))
            .bind(("id", job_id.0))
            .await?;

        let jobs: Vec<Job> = result.take(0)?;
        jobs.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {} in {}", job_id, dataset)))
    }

    /// List jobs in ascending id order.
    pub async fn get_jobs(&self, dataset: &Dataset, query: &JobQuery) -> Result<Vec<Job>, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(String, serde_json::Value)> = Vec::new();

        let mut state_terms = Vec::new();
        if !query.states.is_empty() {
            state_terms.push("last_status.state IN $states");
            let states: Vec<&str> = query.states.iter().map(|s| s.as_str()).collect();
            bindings.push(("states".into(), serde_json::json!(states)));
        }
        if query.unprocessed {
            state_terms.push("last_status = NONE OR last_status = NULL");
        }
        if !state_terms.is_empty() {
            conditions.push(format!("({})", state_terms.join(" OR ")));
        }

        if !query.custom_vals.is_empty() {
            conditions.push("custom_val IN $custom_vals".to_string());
            bindings.push(("custom_vals".into(), serde_json::json!(query.custom_vals)));
        }

        for (i, (name, value)) in query.parameters.iter().enumerate() {
            check_field_name(name)?;
            conditions.push(format!("parameters.{name} = $param{i}"));
            bindings.push((format!("param{i}"), value.clone()));
        }

        if let Some(after) = query.after {
            conditions.push("job_id > $after".to_string());
            bindings.push(("after".into(), serde_json::json!(after.0)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = query
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            "SELECT * FROM type::table($table) {} ORDER BY job_id ASC {}",
            where_clause, limit_clause
        );

        let mut request = self
            .db
            .query(sql)
            .bind(("table", dataset.jobs_table.clone()));

        for binding in bindings {
            request = request.bind(binding);
        }

        let mut response = request.await?;
        let jobs: Vec<Job> = response.take(0)?;
        Ok(jobs)
    }

    /// Every status recorded for `job_id`, oldest first.
    pub async fn status_history(
        &self,
        dataset: &Dataset,
        job_id: JobId,
    ) -> Result<Vec<JobStatus>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM type::table($table)
                WHERE job_id = $job_id
                ORDER BY status_id ASC
                "#,
            )
            .bind(("table", dataset.status_table.clone()))
            .bind(("job_id", job_id.0))
            .await?;

        let statuses: Vec<JobStatus> = result.take(0)?;
        Ok(statuses)
    }
}
