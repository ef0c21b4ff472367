//! Job and status types stored in a dataset.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

/// Identifier of a job, unique and monotonic within the queue.
///
/// IDs are assigned by the engine, either from a dataset's native counter or
/// from a migration reservation. `0` means "not assigned yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl JobId {
    /// Whether this ID has been assigned.
    pub fn is_assigned(self) -> bool {
        self.0 > 0
    }

    /// The ID `n` positions after this one.
    pub fn offset(self, n: i64) -> Self {
        Self(self.0 + n)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one status row. ULIDs sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub Ulid);

static STATUS_IDS: Mutex<Generator> = Mutex::new(Generator::new());

impl StatusId {
    /// New id, strictly greater than every id made earlier in this process.
    pub fn new() -> Self {
        let mut generator = STATUS_IDS.lock().unwrap_or_else(PoisonError::into_inner);
        Self(generator.generate().unwrap_or_else(|_| Ulid::new()))
    }
}

impl Default for StatusId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing state recorded by a status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Executing,
    Succeeded,
    Waiting,
    WaitingRetry,
    Failed,
    Aborted,
    Migrating,
    Migrated,
    WontMigrate,
}

impl JobState {
    /// States after which the job is never picked up again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Aborted | JobState::Migrated | JobState::WontMigrate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Executing => "executing",
            JobState::Succeeded => "succeeded",
            JobState::Waiting => "waiting",
            JobState::WaitingRetry => "waiting_retry",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
            JobState::Migrating => "migrating",
            JobState::Migrated => "migrated",
            JobState::WontMigrate => "wont_migrate",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job this status belongs to.
    pub job_id: JobId,
    /// Unique ID of this status row.
    #[serde(default)]
    pub status_id: StatusId,
    pub state: JobState,
    /// Number of processing attempts so far.
    #[serde(default)]
    pub attempt: u32,
    pub exec_time: DateTime<Utc>,
    pub retry_time: DateTime<Utc>,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_response: serde_json::Value,
}

impl JobStatus {
    /// Create a status for `job_id` executed now.
    pub fn new(job_id: JobId, state: JobState) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status_id: StatusId::new(),
            state,
            attempt: 0,
            exec_time: now,
            retry_time: now,
            error_code: String::new(),
            error_response: serde_json::Value::Null,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, response: serde_json::Value) -> Self {
        self.error_code = code.into();
        self.error_response = response;
        self
    }
}

/// A unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub job_id: JobId,
    /// Category tag, e.g. the destination type a job is routed to.
    pub custom_val: String,
    /// Routing metadata such as `source_id` or `destination_id`.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Opaque event payload.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Latest status, if the job was ever picked up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<JobStatus>,
}

impl Job {
    /// Create an unassigned, never-processed job.
    pub fn new(custom_val: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_id: JobId::default(),
            custom_val: custom_val.into(),
            parameters: serde_json::Value::Object(serde_json::Map::new()),
            payload,
            created_at: Utc::now(),
            last_status: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_last_status(mut self, status: JobStatus) -> Self {
        self.last_status = Some(status);
        self
    }

    /// Latest state, `None` when the job was never picked up.
    pub fn state(&self) -> Option<JobState> {
        self.last_status.as_ref().map(|s| s.state)
    }

    /// Give the job its ID, carrying it over to the embedded status.
    pub fn assign_id(&mut self, job_id: JobId) {
        self.job_id = job_id;
        if let Some(status) = self.last_status.as_mut() {
            status.job_id = job_id;
        }
    }
}
