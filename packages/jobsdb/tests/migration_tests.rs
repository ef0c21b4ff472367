#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use jobsdb::{EPOCH_SPAN, JobQuery, JobsDbError, MigrationCoordinator, MigrationPhase};
use jobsdb_core::{
    Job, JobId, JobState, MigrationEvent, MigrationOp, MigrationStatus,
};
use storage::{FileStore, StorageConfig};

fn import_event(file: &str) -> MigrationEvent {
    MigrationEvent::new(
        MigrationOp::Import,
        "node-1",
        "node-2",
        file,
        MigrationStatus::Exported,
    )
}

fn ids(jobs: &[Job]) -> Vec<i64> {
    jobs.iter().map(|j| j.job_id.0).collect()
}

#[tokio::test]
async fn test_setup_places_import_before_new_events() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 500)).await?;

    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    assert_eq!(coordinator.phase().await, MigrationPhase::NotStarted);

    let import = coordinator.setup_for_import().await?;
    assert_eq!(coordinator.phase().await, MigrationPhase::PreparedForImport);
    assert_eq!(import.index.to_string(), "1_1");

    let order: Vec<String> = jobsdb.datasets().iter().map(|d| d.index.to_string()).collect();
    assert_eq!(order, vec!["1", "1_1", "2"]);
    let new_events = coordinator.new_events_dataset().await.expect("new events set up");
    assert_eq!(new_events.index.to_string(), "2");

    assert_eq!(coordinator.setup_for_import().await?, import);
    let setups = coordinator
        .get_checkpoints(MigrationOp::Import, MigrationStatus::Setup)
        .await?;
    assert_eq!(setups.len(), 1);

    // New events land after everything the import could ever use.
    let ids = jobsdb.store(common::new_jobs(501, 2)).await?;
    assert_eq!(ids[0], JobId(EPOCH_SPAN + 501));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_setup_registers_one_destination() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 10)).await?;

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let coordinator = MigrationCoordinator::new(jobsdb.clone());
            tokio::spawn(async move { coordinator.setup_for_import().await })
        })
        .collect();
    let coordinator_a = MigrationCoordinator::new(jobsdb.clone());
    let coordinator_b = MigrationCoordinator::new(jobsdb.clone());
    let (first, second) = tokio::join!(
        coordinator_a.setup_for_import(),
        coordinator_b.setup_for_import(),
    );
    let (first, second) = (first?, second?);
    assert_eq!(first, second);
    for task in tasks {
        assert_eq!(task.await??, first);
    }

    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import_setups = coordinator
        .get_checkpoints(MigrationOp::Import, MigrationStatus::Setup)
        .await?;
    assert_eq!(import_setups.len(), 1);
    let new_events_setups = coordinator
        .get_checkpoints(MigrationOp::AcceptNewEvents, MigrationStatus::Setup)
        .await?;
    assert_eq!(new_events_setups.len(), 1);

    let order: Vec<String> = jobsdb.datasets().iter().map(|d| d.index.to_string()).collect();
    assert_eq!(order, vec!["1", "1_1", "2"]);
    assert_eq!(jobsdb.directory().scan().await?.datasets.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_reservations_follow_prior_dataset() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 500)).await?;

    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    let first = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 10),
            "a.jsonl",
            import_event("a.jsonl"),
        )
        .await?;
    assert_eq!(first.start_seq, 501);
    assert_eq!(first.status, MigrationStatus::Imported);

    let second = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 5),
            "b.jsonl",
            import_event("b.jsonl"),
        )
        .await?;
    assert_eq!(second.start_seq, 511);

    let imported = jobsdb.jobs().get_jobs(&import, &JobQuery::default()).await?;
    assert_eq!(imported.len(), 15);
    assert_eq!(imported.first().map(|j| j.job_id), Some(JobId(501)));
    assert_eq!(imported.last().map(|j| j.job_id), Some(JobId(515)));

    Ok(())
}

#[tokio::test]
async fn test_import_assigns_ids_in_file_order() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    let jobs = common::exported_jobs(3, 1);
    let event = coordinator
        .store_imported_jobs_and_job_statuses(jobs, "gw_1.jsonl", import_event("gw_1.jsonl"))
        .await?;
    assert_eq!(event.status, MigrationStatus::Imported);
    assert_eq!(event.job_count, 3);

    let imported = jobsdb.jobs().get_jobs(&import, &JobQuery::default()).await?;
    let start = event.start_seq;
    assert_eq!(ids(&imported), vec![start, start + 1, start + 2]);
    let order: Vec<i64> = imported.iter().map(common::payload_n).collect();
    assert_eq!(order, vec![1, 2, 3]);

    assert_eq!(imported[1].state(), Some(JobState::Failed));
    let history = jobsdb.jobs().status_history(&import, JobId(start + 1)).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attempt, 2);
    assert_eq!(history[0].job_id, JobId(start + 1));
    assert!(jobsdb.jobs().status_history(&import, JobId(start)).await?.is_empty());

    let imported = coordinator
        .get_checkpoints(MigrationOp::Import, MigrationStatus::Imported)
        .await?;
    assert_eq!(imported.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_reimport_is_a_no_op() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    let event = import_event("gw_1.jsonl");
    let first = coordinator
        .store_imported_jobs_and_job_statuses(
            common::exported_jobs(3, 0),
            "gw_1.jsonl",
            event.clone(),
        )
        .await?;
    let again = coordinator
        .store_imported_jobs_and_job_statuses(common::exported_jobs(3, 0), "gw_1.jsonl", event)
        .await?;
    let by_id = coordinator
        .store_imported_jobs_and_job_statuses(
            common::exported_jobs(3, 0),
            "gw_1.jsonl",
            first.clone(),
        )
        .await?;

    assert_eq!(again.id, first.id);
    assert_eq!(again.start_seq, first.start_seq);
    assert_eq!(by_id.start_seq, first.start_seq);
    assert_eq!(jobsdb.jobs().count(&import).await?, 3);
    assert_eq!(jobsdb.jobs().status_history(&import, JobId(first.start_seq)).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_resume_reuses_persisted_reservation() -> Result<(), Box<dyn Error>> {
    let (db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    coordinator.setup_for_import().await?;

    // A previous run reserved a range and died before writing the jobs.
    let mut crashed = import_event("gw_1.jsonl");
    crashed.reserve(JobId(EPOCH_SPAN / 2), 3);
    let crashed = jobsdb.checkpoint(&crashed).await?;

    let jobsdb = common::reopen(&db, "node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let event = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 3),
            "gw_1.jsonl",
            import_event("gw_1.jsonl"),
        )
        .await?;
    assert_eq!(event.id, crashed.id);
    assert_eq!(event.start_seq, EPOCH_SPAN / 2);

    // Fresh reservations start above the persisted one.
    let next = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 1),
            "gw_2.jsonl",
            import_event("gw_2.jsonl"),
        )
        .await?;
    assert_eq!(next.start_seq, EPOCH_SPAN / 2 + 3);

    Ok(())
}

#[tokio::test]
async fn test_reservation_size_mismatch_is_fatal() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    coordinator.setup_for_import().await?;

    let mut reserved = import_event("gw_1.jsonl");
    reserved.reserve(JobId(1000), 4);
    jobsdb.checkpoint(&reserved).await?;

    let result = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 3),
            "gw_1.jsonl",
            import_event("gw_1.jsonl"),
        )
        .await;
    let err = result.expect_err("mismatch detected");
    assert!(matches!(err, JobsDbError::Invariant(_)));
    assert!(err.is_fatal());

    Ok(())
}

#[tokio::test]
async fn test_unpersisted_reservation_is_replaced() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 500)).await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    coordinator.setup_for_import().await?;

    // The sender's range would land below the jobs already stored.
    let mut stale = import_event("a.jsonl");
    stale.reserve(JobId(1), 3);
    let event = coordinator
        .store_imported_jobs_and_job_statuses(common::new_jobs(1, 3), "a.jsonl", stale)
        .await?;
    assert_eq!(event.status, MigrationStatus::Imported);
    assert_eq!(event.start_seq, 501);
    assert!(event.id > 0);

    let all = jobsdb.get_jobs(&JobQuery::default()).await?;
    assert_eq!(all.len(), 503);
    assert!(all.windows(2).all(|w| w[0].job_id < w[1].job_id));

    Ok(())
}

#[tokio::test]
async fn test_persisted_reservation_below_prior_dataset_is_fatal() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 500)).await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    let mut bad = import_event("a.jsonl");
    bad.reserve(JobId(100), 3);
    jobsdb.checkpoint(&bad).await?;

    let err = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 3),
            "a.jsonl",
            import_event("a.jsonl"),
        )
        .await
        .expect_err("range below dataset 1");
    assert!(matches!(err, JobsDbError::Invariant(_)));
    assert_eq!(jobsdb.jobs().count(&import).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_restart_rebuilds_session() -> Result<(), Box<dyn Error>> {
    let (db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 20)).await?;

    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;
    let first = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 5),
            "a.jsonl",
            import_event("a.jsonl"),
        )
        .await?;
    assert_eq!(first.start_seq, 21);

    let jobsdb = common::reopen(&db, "node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    assert_eq!(coordinator.setup_for_import().await?, import);
    assert_eq!(coordinator.import_floor(&import).await?, 25);

    let second = coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 2),
            "b.jsonl",
            import_event("b.jsonl"),
        )
        .await?;
    assert_eq!(second.start_seq, 26);

    let datasets = jobsdb.datasets();
    assert_eq!(datasets.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_adjacent_datasets_stay_ordered() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    jobsdb.store(common::new_jobs(1, 7)).await?;

    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    coordinator.setup_for_import().await?;
    coordinator
        .store_imported_jobs_and_job_statuses(
            common::new_jobs(1, 4),
            "a.jsonl",
            import_event("a.jsonl"),
        )
        .await?;
    jobsdb.store(common::new_jobs(100, 3)).await?;

    let datasets = jobsdb.datasets();
    for pair in datasets.windows(2) {
        let max = jobsdb.jobs().max_job_id(&pair[0]).await?;
        let min = jobsdb.jobs().min_job_id(&pair[1]).await?;
        assert!(max < min, "{} max {} >= {} min {}", pair[0], max, pair[1], min);
    }

    let all = jobsdb.get_jobs(&JobQuery::default()).await?;
    assert!(all.windows(2).all(|w| w[0].job_id < w[1].job_id));
    assert_eq!(all.len(), 14);

    Ok(())
}

#[tokio::test]
async fn test_failed_import_rolls_back() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    // Occupy the first id the allocator will hand out.
    let floor = coordinator.import_floor(&import).await?;
    let mut squatter = common::new_jobs(1, 1);
    squatter[0].assign_id(JobId(floor + 1));
    jobsdb.jobs().store_jobs(&import, &squatter).await?;

    let result = coordinator
        .store_imported_jobs_and_job_statuses(
            common::exported_jobs(3, 2),
            "a.jsonl",
            import_event("a.jsonl"),
        )
        .await;
    let err = result.expect_err("duplicate id");
    assert!(!err.is_fatal());

    assert_eq!(jobsdb.jobs().count(&import).await?, 1);
    let checkpoint = jobsdb
        .checkpoints()
        .find_for_file(MigrationOp::Import, "a.jsonl")
        .await?
        .expect("reservation persisted");
    assert_eq!(checkpoint.status, MigrationStatus::PreparedForImport);
    assert!(
        coordinator
            .get_checkpoints(MigrationOp::Import, MigrationStatus::Imported)
            .await?
            .is_empty()
    );

    Ok(())
}

#[tokio::test]
async fn test_empty_file_is_marked_imported() -> Result<(), Box<dyn Error>> {
    let (_db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    let event = coordinator
        .store_imported_jobs_and_job_statuses(
            Vec::new(),
            "empty.jsonl",
            import_event("empty.jsonl"),
        )
        .await?;
    assert!(event.is_persisted());
    assert_eq!(event.status, MigrationStatus::Imported);
    assert!(!event.has_reservation());
    assert_eq!(jobsdb.jobs().count(&import).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_missing_destination_is_fatal() -> Result<(), Box<dyn Error>> {
    let (db, jobsdb) = common::open("node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let import = coordinator.setup_for_import().await?;

    db.query(format!(
        "REMOVE TABLE {}; REMOVE TABLE {};",
        import.jobs_table, import.status_table
    ))
    .await?
    .check()?;

    let jobsdb = common::reopen(&db, "node-2").await?;
    let coordinator = MigrationCoordinator::new(jobsdb.clone());
    let err = coordinator.setup_for_import().await.expect_err("destination gone");
    assert!(matches!(err, JobsDbError::Invariant(_)));
    assert!(err.is_fatal());

    // No second destination was created.
    assert_eq!(jobsdb.datasets().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_export_then_import_between_nodes() -> Result<(), Box<dyn Error>> {
    let files = FileStore::new(StorageConfig::memory())?;

    let (_source_db, source) = common::open("node-1").await?;
    source.store(common::exported_jobs(4, 3)).await?;
    let exporter = MigrationCoordinator::new(source.clone());
    let exported = exporter
        .export_jobs(&files, &JobQuery::default(), "node-2", "node-1/gw_1.jsonl")
        .await?;
    assert_eq!(exported.status, MigrationStatus::Exported);
    assert_eq!(exported.job_count, 4);
    assert_eq!(
        source.get_job(JobId(1)).await?.state(),
        Some(JobState::Migrated)
    );

    let again = exporter
        .export_jobs(&files, &JobQuery::default(), "node-2", "node-1/gw_1.jsonl")
        .await?;
    assert_eq!(again.id, exported.id);
    assert_eq!(source.status_history(JobId(1)).await?.len(), 1);

    let (_dest_db, dest) = common::open("node-2").await?;
    dest.store(common::new_jobs(1, 2)).await?;
    let importer = MigrationCoordinator::new(dest.clone());
    let imported = importer.import_file(&files, "node-1/gw_1.jsonl", "node-1").await?;
    assert_eq!(imported.status, MigrationStatus::Imported);
    assert_eq!(imported.start_seq, 3);

    let all = dest.get_jobs(&JobQuery::default()).await?;
    assert_eq!(ids(&all), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(all[5].state(), Some(JobState::Failed));

    Ok(())
}
