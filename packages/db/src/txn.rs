//! Multi-statement transactions.
//!
//! Repositories append their statements to a [`Transaction`] so that writes
//! owned by different repositories (jobs, statuses, checkpoints) commit or
//! roll back together.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Database, DbError};

/// Statements and parameters sent to the database as one transaction.
#[derive(Debug, Default)]
pub struct Transaction {
    statements: Vec<String>,
    bindings: Map<String, Value>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to a fresh parameter and return its name, e.g. `$p3`.
    pub fn bind(&mut self, value: impl Serialize) -> Result<String, DbError> {
        let name = format!("p{}", self.bindings.len());
        self.bindings.insert(name.clone(), serde_json::to_value(value)?);
        Ok(format!("${name}"))
    }

    /// Append a statement, without trailing semicolon.
    pub fn push(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Full SurrealQL text of the transaction.
    pub fn to_sql(&self) -> String {
        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for statement in &self.statements {
            sql.push_str(statement);
            sql.push_str(";\n");
        }
        sql.push_str("COMMIT TRANSACTION;");
        sql
    }

    /// Execute all statements atomically.
    ///
    /// If any statement fails the database cancels the whole transaction and
    /// the first error is returned.
    pub async fn commit(self, db: &Database) -> Result<(), DbError> {
        if self.is_empty() {
            return Ok(());
        }
        let sql = self.to_sql();
        db.query(sql).bind(self.bindings).await?.check()?;
        Ok(())
    }
}
