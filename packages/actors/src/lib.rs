//! Actor system for jobsdb migrations.
//!
//! The `MigrationActor` owns a [`jobsdb::MigrationCoordinator`] and the
//! migration file store, and serves the orchestrator's requests one at a
//! time.
//!
//! # Usage
//!
//! ```ignore
//! use actors::{MigrationMessage, request, start_migration_worker};
//!
//! let (worker, handle) = start_migration_worker(coordinator, files).await?;
//! let event = request(&worker, |reply| MigrationMessage::ImportFile {
//!     file_key: "node-1/gw_1.jsonl".into(),
//!     from_node: "node-1".into(),
//!     reply,
//! }, None).await?;
//! ```

mod messages;
mod migration_actor;

pub use messages::{ActorError, MigrationMessage, Reply};
pub use migration_actor::{MigrationActor, MigrationActorState, request, start_migration_worker};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
