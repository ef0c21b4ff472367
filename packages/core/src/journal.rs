//! Journal entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structural operations bracketed by the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    /// A dataset appended for regular writes.
    AddDataset,
    /// The dataset receiving imported jobs.
    ImportSetup,
    /// The dataset receiving new events during a migration.
    NewEventsSetup,
}

impl JournalOp {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalOp::AddDataset => "add_dataset",
            JournalOp::ImportSetup => "import_setup",
            JournalOp::NewEventsSetup => "new_events_setup",
        }
    }
}

impl std::fmt::Display for JournalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bracketed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: i64,
    pub operation: JournalOp,
    pub payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub done_at: Option<DateTime<Utc>>,
}

impl JournalEntry {
    pub fn is_done(&self) -> bool {
        self.done_at.is_some()
    }
}
