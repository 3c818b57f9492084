//! End-to-end scenarios from spec.md §8, run against the in-memory
//! `Store`/`Queue`/`TimeoutWatcher`/`Datastore`, the same harness style as
//! the teacher's `infrastructure/jobs/manager_test.rs` (build a minimal
//! in-process context, no real infrastructure).

use std::sync::Arc;

use dispatch_core::classification::RankedLattice;
use dispatch_core::clock::FakeClock;
use dispatch_core::config::DispatcherConfig;
use dispatch_core::context::DispatchContext;
use dispatch_core::datastore::{Datastore, MemoryDatastore};
use dispatch_core::file_dispatcher::{dispatch_file, FileDispatchOutcome};
use dispatch_core::store::memory::{MemoryQueue, MemoryStore, MemoryWatcher};
use dispatch_core::store::{Queue, Store};
use dispatch_core::submission_dispatcher::{dispatch_submission, SubmissionDispatchInput, SubmissionOutcome};
use dispatch_core::types::*;

fn service(name: &str, stage: &str, timeout_secs: u64) -> ServiceDescriptor {
    ServiceDescriptor {
        name: name.to_string(),
        category: "static".to_string(),
        stage: stage.to_string(),
        accepts: vec![],
        rejects: vec![],
        timeout_secs,
        submission_params: vec![],
    }
}

fn file_info(sha: &str) -> FileInfo {
    FileInfo {
        sha256: sha.to_string(),
        magic: None,
        md5: None,
        mime: None,
        sha1: None,
        size: 100,
        file_type: "document/pdf".to_string(),
    }
}

fn result_record(key: &str, score: i64, drop: bool, extracted: Vec<Sha256>) -> FinishRecord {
    FinishRecord {
        bucket: Bucket::Result,
        key: key.to_string(),
        score,
        drop,
        classification: "UNCLASSIFIED".to_string(),
        extracted,
    }
}

fn error_record(key: &str) -> FinishRecord {
    FinishRecord {
        bucket: Bucket::Error,
        key: key.to_string(),
        score: 0,
        drop: false,
        classification: "UNCLASSIFIED".to_string(),
        extracted: vec![],
    }
}

struct Harness {
    ctx: DispatchContext,
    queue: Arc<MemoryQueue>,
    store: Arc<MemoryStore>,
    watcher: Arc<MemoryWatcher>,
    clock: FakeClock,
}

fn harness(catalog: ServiceCatalog, files: Vec<FileInfo>, stages: Vec<&str>, max_extraction_depth: u32) -> Harness {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new();
    let watcher = MemoryWatcher::new();
    let clock = FakeClock::new();

    let mut datastore = MemoryDatastore::default();
    datastore.catalog = catalog;
    for f in files {
        datastore.files.insert(f.sha256.clone(), f);
    }

    let mut config = DispatcherConfig::default();
    config.stages = stages.into_iter().map(String::from).collect();
    config.max_extraction_depth = max_extraction_depth;

    let ctx = DispatchContext {
        store: store.clone(),
        queue: queue.clone(),
        watcher: watcher.clone(),
        datastore: Arc::new(datastore) as Arc<dyn Datastore>,
        lattice: Arc::new(RankedLattice::new(vec!["UNCLASSIFIED".into(), "SECRET".into()])),
        clock: Arc::new(clock.clone()),
        config: Arc::new(config),
    };

    Harness {
        ctx,
        queue,
        store,
        watcher,
        clock,
    }
}

fn submission_task(sid: &str, files: &[&str], max_extracted: u32, completed_queue: Option<&str>) -> SubmissionTask {
    SubmissionTask {
        submission: Submission {
            sid: sid.to_string(),
            files: files.iter().map(|f| SubmissionFile { sha256: f.to_string() }).collect(),
            params: SubmissionParams {
                max_extracted,
                ..Default::default()
            },
            expiry_ts: None,
            classification: "UNCLASSIFIED".to_string(),
            error_count: 0,
            errors: vec![],
            file_count: 0,
            results: vec![],
            max_score: 0,
            state: String::new(),
            completed_at: None,
        },
        completed_queue: completed_queue.map(String::from),
    }
}

#[tokio::test]
async fn single_file_one_service_immediate_success() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60)],
        },
        vec![file_info("A")],
        vec!["s1"],
        10,
    );

    let outcome = dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 0, Some("completed"))),
    )
    .await
    .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Dispatched(vec!["A".to_string()]));

    let file_task: FileTask = serde_json::from_value(h.queue.pop("dispatch-file").await.unwrap().unwrap()).unwrap();
    assert_eq!(file_task.depth, 0);

    let outcome = dispatch_file(&h.ctx, file_task).await.unwrap();
    assert_eq!(outcome, FileDispatchOutcome::Outstanding(vec!["sv1".to_string()]));
    assert_eq!(h.queue.len("service-queue-sv1").await, 1);

    h.store.finish("S1", "A", "sv1", result_record("k1", 10, false, vec![])).await.unwrap();

    let outcome = dispatch_file(&h.ctx, file_info_task("S1", "A", 0)).await.unwrap();
    assert_eq!(outcome, FileDispatchOutcome::Complete);

    let sid_ref: SubmissionRef = serde_json::from_value(h.queue.pop("dispatch-submission").await.unwrap().unwrap()).unwrap();
    assert_eq!(sid_ref.sid, "S1");

    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(sid_ref)).await.unwrap();
    assert_eq!(outcome, SubmissionOutcome::Finalized);

    let completed: Submission = serde_json::from_value(h.queue.pop("completed").await.unwrap().unwrap()).unwrap();
    assert_eq!(completed.state, "completed");
    assert_eq!(completed.results, vec!["k1".to_string()]);
    assert_eq!(completed.error_count, 0);
    assert_eq!(completed.max_score, 10);

    assert!(h.store.active_task_get("S1").await.unwrap().is_none());
}

fn file_info_task(sid: &str, sha: &str, depth: u32) -> FileTask {
    FileTask {
        sid: sid.to_string(),
        parent_hash: None,
        file_info: file_info(sha),
        depth,
        max_files: 10,
    }
}

#[tokio::test]
async fn filtering_short_circuit_stops_later_stage() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60), service("sv2", "s2", 60)],
        },
        vec![file_info("A")],
        vec!["s1", "s2"],
        10,
    );

    dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 0, None)),
    )
    .await
    .unwrap();
    h.queue.pop("dispatch-file").await.unwrap();

    let outcome = dispatch_file(&h.ctx, file_info_task("S1", "A", 0)).await.unwrap();
    assert_eq!(outcome, FileDispatchOutcome::Outstanding(vec!["sv1".to_string()]));

    h.store.finish("S1", "A", "sv1", result_record("k1", 7, true, vec![])).await.unwrap();

    let outcome = dispatch_file(&h.ctx, file_info_task("S1", "A", 0)).await.unwrap();
    assert_eq!(outcome, FileDispatchOutcome::Complete);
    assert_eq!(h.queue.len("service-queue-sv2").await, 0, "sv2 must never be dispatched after a drop");
}

#[tokio::test]
async fn extraction_depth_cap_excludes_deep_descendants() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60)],
        },
        vec![file_info("A"), file_info("B"), file_info("C")],
        vec!["s1"],
        2,
    );

    let outcome = dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 5, Some("completed"))),
    )
    .await
    .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Dispatched(vec!["A".to_string()]));

    h.store.finish("S1", "A", "sv1", result_record("kA", 0, false, vec!["B".to_string()])).await.unwrap();
    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(SubmissionRef { sid: "S1".into() }))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Dispatched(vec!["B".to_string()]));

    h.store.finish("S1", "B", "sv1", result_record("kB", 0, false, vec!["C".to_string()])).await.unwrap();
    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(SubmissionRef { sid: "S1".into() }))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Finalized, "C sits at depth 2 and must be excluded, leaving nothing pending");

    let files = h.store.files("S1").await.unwrap();
    assert_eq!(files.len(), 2, "only A and B were ever admitted");
    assert!(!files.contains("C"));
}

#[tokio::test]
async fn extraction_budget_admits_only_up_to_max_files() {
    let children: Vec<&str> = vec!["c1", "c2", "c3", "c4", "c5"];
    let mut files = vec![file_info("A")];
    files.extend(children.iter().map(|c| file_info(c)));

    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60)],
        },
        files,
        vec!["s1"],
        10,
    );

    dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 2, Some("completed"))),
    )
    .await
    .unwrap();
    h.queue.pop("dispatch-file").await.unwrap();

    h.store
        .finish(
            "S1",
            "A",
            "sv1",
            result_record("kA", 0, false, children.iter().map(|c| c.to_string()).collect()),
        )
        .await
        .unwrap();

    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(SubmissionRef { sid: "S1".into() }))
        .await
        .unwrap();
    let admitted_children = match outcome {
        SubmissionOutcome::Dispatched(v) => v,
        other => panic!("expected Dispatched, got {other:?}"),
    };
    assert_eq!(admitted_children.len(), 2, "budget allows exactly two more files beyond the root");

    for sha in &admitted_children {
        h.store.finish("S1", sha, "sv1", result_record(&format!("k{sha}"), 0, false, vec![])).await.unwrap();
    }

    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(SubmissionRef { sid: "S1".into() }))
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Finalized, "remaining children are silently dropped, not retried forever");

    let completed: Submission = serde_json::from_value(h.queue.pop("completed").await.unwrap().unwrap()).unwrap();
    assert_eq!(completed.file_count, 3, "root + two admitted children");
}

#[tokio::test]
async fn timeout_triggers_exactly_one_redispatch() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 30)],
        },
        vec![file_info("F")],
        vec!["s1"],
        10,
    );

    dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["F"], 0, None)),
    )
    .await
    .unwrap();
    h.queue.pop("dispatch-file").await.unwrap();

    dispatch_file(&h.ctx, file_info_task("S1", "F", 0)).await.unwrap();
    assert_eq!(h.queue.len("service-queue-sv1").await, 1);

    // Re-dispatching immediately, within the service's own timeout, must not
    // emit a second message.
    dispatch_file(&h.ctx, file_info_task("S1", "F", 0)).await.unwrap();
    assert_eq!(h.queue.len("service-queue-sv1").await, 1);

    h.clock.advance(40);
    dispatch_file(&h.ctx, file_info_task("S1", "F", 0)).await.unwrap();
    assert_eq!(h.queue.len("service-queue-sv1").await, 2, "past the timeout window, sv1 must be re-issued");
    assert_eq!(h.store.dispatch_time("S1", "F", "sv1").await.unwrap(), 40);
}

#[tokio::test]
async fn error_finish_is_recorded_without_blocking_completion() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60)],
        },
        vec![file_info("A")],
        vec!["s1"],
        10,
    );

    dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 0, Some("completed"))),
    )
    .await
    .unwrap();
    h.queue.pop("dispatch-file").await.unwrap();
    dispatch_file(&h.ctx, file_info_task("S1", "A", 0)).await.unwrap();

    h.store.finish("S1", "A", "sv1", error_record("err-1")).await.unwrap();
    let outcome = dispatch_file(&h.ctx, file_info_task("S1", "A", 0)).await.unwrap();
    assert_eq!(outcome, FileDispatchOutcome::Complete);

    let sid_ref: SubmissionRef = serde_json::from_value(h.queue.pop("dispatch-submission").await.unwrap().unwrap()).unwrap();
    let outcome = dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(sid_ref)).await.unwrap();
    assert_eq!(outcome, SubmissionOutcome::Finalized);

    let completed: Submission = serde_json::from_value(h.queue.pop("completed").await.unwrap().unwrap()).unwrap();
    assert_eq!(completed.state, "completed");
    assert_eq!(completed.errors, vec!["err-1".to_string()]);
    assert_eq!(completed.error_count, 1);
    assert!(completed.results.is_empty());
}

#[tokio::test]
async fn repeated_submission_dispatch_with_no_activity_is_idempotent() {
    let h = harness(
        ServiceCatalog {
            services: vec![service("sv1", "s1", 60)],
        },
        vec![file_info("A")],
        vec!["s1"],
        10,
    );

    dispatch_submission(
        &h.ctx,
        SubmissionDispatchInput::Full(submission_task("S1", &["A"], 0, None)),
    )
    .await
    .unwrap();
    let files_after_first = h.store.files("S1").await.unwrap();

    dispatch_submission(&h.ctx, SubmissionDispatchInput::Ref(SubmissionRef { sid: "S1".into() }))
        .await
        .unwrap();
    let files_after_second = h.store.files("S1").await.unwrap();

    assert_eq!(files_after_first, files_after_second, "admission set must not grow without new finish activity");
    assert!(h.watcher.touch_count().await >= 1);
}
