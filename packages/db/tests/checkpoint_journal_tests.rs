#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use db::Transaction;
use db::repositories::{CheckpointRepository, JournalRepository, SequenceRepository};
use jobsdb_core::{JobId, JournalOp, MigrationEvent, MigrationOp, MigrationStatus};
use serde_json::json;

fn import_event(file: &str) -> MigrationEvent {
    MigrationEvent::new(
        MigrationOp::Import,
        "node-1",
        "node-2",
        file,
        MigrationStatus::Exported,
    )
}

#[tokio::test]
async fn test_checkpoint_lifecycle() -> Result<(), Box<dyn Error>> {
    let (db, tables) = common::setup_db().await?;
    let repo = CheckpointRepository::new(db, &tables);

    let first = repo.checkpoint(&import_event("a.jsonl")).await?;
    let second = repo.checkpoint(&import_event("b.jsonl")).await?;
    assert!(first.is_persisted());
    assert!(second.id > first.id);

    let mut advanced = first.clone();
    advanced.reserve(JobId(501), 10);
    let advanced = repo.checkpoint(&advanced).await?;
    assert_eq!(advanced.id, first.id);

    let loaded = repo.get(first.id).await?.expect("checkpoint exists");
    assert_eq!(loaded.status, MigrationStatus::PreparedForImport);
    assert_eq!(loaded.start_seq, 501);
    assert_eq!(loaded.job_count, 10);
    assert_eq!(loaded.last_job_id(), 510);

    let prepared = repo
        .get_checkpoints(MigrationOp::Import, MigrationStatus::PreparedForImport)
        .await?;
    assert_eq!(prepared.len(), 1);
    let exported = repo
        .get_checkpoints(MigrationOp::Import, MigrationStatus::Exported)
        .await?;
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].file_location, "b.jsonl");

    let by_file = repo.find_for_file(MigrationOp::Import, "a.jsonl").await?;
    assert_eq!(by_file.map(|e| e.id), Some(first.id));
    assert!(repo.find_for_file(MigrationOp::Export, "a.jsonl").await?.is_none());

    assert_eq!(repo.list_by_op(MigrationOp::Import).await?.len(), 2);
    assert!(repo.get(9999).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_setup_checkpoint_payload() -> Result<(), Box<dyn Error>> {
    let (db, tables) = common::setup_db().await?;
    let repo = CheckpointRepository::new(db, &tables);

    assert!(repo.find_setup(MigrationOp::Import).await?.is_none());

    let setup = MigrationEvent::new(MigrationOp::Import, "", "node-2", "", MigrationStatus::Setup)
        .with_payload(json!({
            "dataset": {
                "index": "1_1",
                "jobs_table": "gw_jobs_1_1",
                "status_table": "gw_job_status_1_1",
            }
        }));
    repo.checkpoint(&setup).await?;

    let found = repo.find_setup(MigrationOp::Import).await?.expect("setup exists");
    let dataset = found.dataset().expect("dataset in payload");
    assert_eq!(dataset.jobs_table, "gw_jobs_1_1");

    Ok(())
}

#[tokio::test]
async fn test_checkpoint_in_transaction() -> Result<(), Box<dyn Error>> {
    let (db, tables) = common::setup_db().await?;
    let repo = CheckpointRepository::new(db.clone(), &tables);

    let mut txn = Transaction::new();
    assert!(repo.checkpoint_in(&mut txn, &import_event("x.jsonl")).is_err());

    let mut event = import_event("x.jsonl");
    repo.assign_id(&mut event).await?;
    event.status = MigrationStatus::Imported;
    repo.checkpoint_in(&mut txn, &event)?;
    txn.push("THROW 'abort'");
    assert!(txn.commit(&db).await.is_err());
    assert!(repo.get(event.id).await?.is_none());

    let mut txn = Transaction::new();
    repo.checkpoint_in(&mut txn, &event)?;
    txn.commit(&db).await?;
    let stored = repo.get(event.id).await?.expect("committed");
    assert_eq!(stored.status, MigrationStatus::Imported);

    Ok(())
}

#[tokio::test]
async fn test_journal_start_and_done() -> Result<(), Box<dyn Error>> {
    let (db, tables) = common::setup_db().await?;
    let journal = JournalRepository::new(db, &tables);

    let a = journal.mark_start(JournalOp::AddDataset, json!({ "index": "1" })).await?;
    let b = journal.mark_start(JournalOp::ImportSetup, json!({ "index": "1_1" })).await?;
    assert!(b > a);

    let pending: Vec<i64> = journal.pending().await?.iter().map(|e| e.op_id).collect();
    assert_eq!(pending, vec![a, b]);

    journal.mark_done(a).await?;
    let pending = journal.pending().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operation, JournalOp::ImportSetup);
    assert_eq!(pending[0].payload, json!({ "index": "1_1" }));

    assert!(journal.get(a).await?.expect("entry").is_done());
    assert!(journal.mark_done(12345).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_sequences() -> Result<(), Box<dyn Error>> {
    let (db, tables) = common::setup_db().await?;
    let sequences = SequenceRepository::new(db, &tables);

    assert_eq!(sequences.current("gw_jobs_1").await?, 0);
    assert_eq!(sequences.next("gw_jobs_1", 3).await?, 1);
    assert_eq!(sequences.next("gw_jobs_1", 1).await?, 4);

    assert_eq!(sequences.raise_to("gw_jobs_1", 100).await?, 100);
    assert_eq!(sequences.raise_to("gw_jobs_1", 50).await?, 100);
    assert_eq!(sequences.next("gw_jobs_1", 2).await?, 101);
    assert_eq!(sequences.current("gw_jobs_1").await?, 102);

    assert!(sequences.next("gw_jobs_1", 0).await.is_err());

    sequences.remove("gw_jobs_1").await?;
    assert_eq!(sequences.current("gw_jobs_1").await?, 0);

    Ok(())
}
