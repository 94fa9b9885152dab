//! End-to-end batch lifecycle over an on-disk database.

mod common;

use coffeetrack::{
    BatchStatus, EntryKind, MatchConfidence, ProcessingError, RetryStatus,
};

use common::{advance_on, jan, report, EvaluationBuilder, TestHarness};

#[test]
fn test_washed_batch_fail_resubmit_pass() {
    let harness = TestHarness::new();
    let service = harness.washed_service();
    let batch = service.create_batch("WSH-2024-001", "washed").unwrap();
    let id = batch.batch_id.as_str();

    let drying = advance_on(&service, id, jan(2));
    let hulling = advance_on(&service, id, jan(5));
    let grading = advance_on(&service, id, jan(8));
    assert_eq!(
        [drying.step_index, hulling.step_index, grading.step_index],
        [1, 2, 3]
    );
    assert_eq!(hulling.stage_name, "Hulling");
    assert_eq!(
        service.current_state(id).unwrap(),
        BatchStatus::AwaitingEvaluation
    );

    // Snapshot the farmer's form held before the failure and resubmission.
    let before_resubmission = service.snapshot(id).unwrap();

    service
        .record_evaluation(
            id,
            EvaluationBuilder::fail_at(jan(10), 2, "Hulling")
                .comment("Parchment still wet")
                .recommendations("Dry another two days before hulling")
                .build(),
        )
        .unwrap();
    assert_eq!(
        service.current_state(id).unwrap(),
        BatchStatus::Failed {
            order_index: 2,
            stage_name: "Hulling".to_string()
        }
    );

    let retry = service.reconcile(id).unwrap();
    assert!(!retry.retried());
    match &retry {
        RetryStatus::Pending { failure, stage, .. } => {
            assert_eq!(failure.failed_order_index, 2);
            assert_eq!(failure.stage_id.as_deref(), Some("hulling"));
            assert_eq!(stage.confidence, MatchConfidence::StageId);
        }
        other => panic!("expected pending, got {other:?}"),
    }

    let redo = advance_on(&service, id, jan(12));
    assert_eq!(redo.kind, EntryKind::Resubmission);
    assert_eq!(redo.step_index, 2);
    assert_eq!(redo.stage_id, "hulling");

    let retry = service.reconcile(id).unwrap();
    assert!(retry.retried());
    assert_eq!(retry.latest_entry().unwrap().progress_id, redo.progress_id);
    assert_eq!(
        service.current_state(id).unwrap(),
        BatchStatus::AwaitingEvaluation
    );

    let err = service
        .advance_to_next(id, &report(before_resubmission, jan(13)))
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessingError::StaleStep {
            requested: 3,
            current: 3,
            ..
        }
    ));

    service
        .record_evaluation(id, EvaluationBuilder::pass(jan(15)).build())
        .unwrap();
    let view = service.view(id).unwrap();
    assert_eq!(view.status, BatchStatus::Completed);
    assert_eq!(view.batch.status, BatchStatus::Completed);
    assert_eq!(view.snapshot.revision, 4);
}

#[test]
fn test_resubmission_resolves_failure() {
    let harness = TestHarness::new();
    let service = harness.washed_service();
    let id = service.create_batch("WSH-2024-002", "washed").unwrap().batch_id;
    for day in [2, 5, 8] {
        advance_on(&service, &id, jan(day));
    }

    let failed = service
        .record_evaluation(&id, EvaluationBuilder::fail_at(jan(10), 1, "Drying").build())
        .unwrap();
    // Stage 1 is two steps behind the latest step; the resubmission
    // window is measured from the failed step.
    let first = advance_on(&service, &id, jan(11));
    assert_eq!(first.step_index, 1);
    assert_eq!(first.kind, EntryKind::Resubmission);

    let stored = coffeetrack::db::evaluation_repo::find_by_id(
        service.database(),
        &failed.evaluation_id,
    )
    .unwrap()
    .unwrap();
    assert_eq!(stored.resolved_by_progress_id.as_deref(), Some(first.progress_id.as_str()));

    assert_eq!(
        service.current_state(&id).unwrap(),
        BatchStatus::AwaitingEvaluation
    );
}

#[test]
fn test_repeated_failures_of_the_same_stage() {
    let harness = TestHarness::new();
    let service = harness.washed_service();
    let id = service.create_batch("WSH-2024-003", "washed").unwrap().batch_id;
    for day in [2, 5, 8] {
        advance_on(&service, &id, jan(day));
    }

    service
        .record_evaluation(&id, EvaluationBuilder::fail_at(jan(10), 2, "Hulling").build())
        .unwrap();
    advance_on(&service, &id, jan(11));
    service
        .record_evaluation(&id, EvaluationBuilder::fail_at(jan(14), 2, "Hulling").build())
        .unwrap();

    // The earlier resubmission predates the second failure.
    assert!(!service.reconcile(&id).unwrap().retried());

    let second = advance_on(&service, &id, jan(16));
    let retry = service.reconcile(&id).unwrap();
    assert_eq!(retry.latest_entry().unwrap().progress_id, second.progress_id);

    let history: Vec<_> = service
        .progress_log()
        .entries_for_stage(&id, "hulling")
        .iter()
        .unwrap()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        history,
        vec![EntryKind::Advance, EntryKind::Resubmission, EntryKind::Resubmission]
    );
}

#[test]
fn test_state_survives_reopen() {
    let harness = TestHarness::new();
    let config = harness.washed_config();
    let id = {
        let service = harness.service(&config);
        let id = service.create_batch("WSH-2024-004", "washed").unwrap().batch_id;
        advance_on(&service, &id, jan(2));
        advance_on(&service, &id, jan(3));
        id
    };

    let service = harness.service(&config);
    let snapshot = service.snapshot(&id).unwrap();
    assert_eq!(snapshot.step_index, 2);
    assert_eq!(snapshot.revision, 2);
    assert_eq!(service.current_state(&id).unwrap(), BatchStatus::InProgress);

    let grading = advance_on(&service, &id, jan(4));
    assert_eq!(grading.stage_name, "Grading");
}
