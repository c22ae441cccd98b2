//! Asynchronous receivers answering through status reports.

use serde_json::{json, Value};
use uuid::Uuid;

use formation_engine::constants::events;
use formation_engine::models::{FormationAssignment, StatusReportRequest, WebhookMode};
use formation_engine::orchestration::StatusReportOutcome;
use formation_engine::state_machine::AssignmentState;
use formation_engine::EngineError;

use crate::common::{accepted, application, url_for, TestHarness};

fn report(
    state: &str,
    configuration: Option<Value>,
    operation_id: Option<u64>,
) -> StatusReportRequest {
    StatusReportRequest {
        state: state.to_string(),
        configuration,
        error: None,
        operation_id,
    }
}

async fn report_ready(
    harness: &TestHarness,
    assignment: &FormationAssignment,
) -> StatusReportOutcome {
    harness
        .engine
        .report_assignment_status(
            assignment.formation_id(),
            assignment.id,
            report("READY", None, assignment.operation_id()),
        )
        .await
        .unwrap()
}

/// Formation with two async applications whose self-assignments are READY
async fn async_pair(harness: &TestHarness) -> Uuid {
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    let b = harness.register(application("app-b", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    harness.client.set_default(&url_for("app-b"), accepted());
    let formation = harness.formation().await;

    let a_self = harness.assign(formation.id, &a).await.remove(0);
    report_ready(harness, &a_self).await;
    harness.assign(formation.id, &b).await;
    let b_self = harness.assignment(formation.id, "app-b", "app-b").await.unwrap();
    report_ready(harness, &b_self).await;
    formation.id
}

#[tokio::test]
async fn test_acknowledged_request_awaits_report() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;

    let assignment = harness.assign(formation.id, &a).await.remove(0);
    assert_eq!(assignment.state, AssignmentState::Initial);
    assert!(assignment.awaiting_callback);
    assert!(assignment.operation_id().is_some());

    let outcome = report_ready(&harness, &assignment).await;
    let StatusReportOutcome::Applied { assignment: applied } = outcome else {
        panic!("expected the report to apply, got {outcome:?}");
    };
    assert_eq!(applied.state, AssignmentState::Ready);
    assert!(!applied.awaiting_callback);
}

#[tokio::test]
async fn test_self_reports_release_cross_pairs() {
    let harness = TestHarness::new().await;
    let formation_id = async_pair(&harness).await;

    for (source, target) in [("app-a", "app-b"), ("app-b", "app-a")] {
        let pair = harness.assignment(formation_id, source, target).await.unwrap();
        assert!(pair.awaiting_callback, "{source} -> {target} was not notified");
        assert_eq!(harness.client.requests_for_pair(source, target).len(), 1);
    }
}

#[tokio::test]
async fn test_reported_configuration_reaches_the_reverse() {
    let harness = TestHarness::new().await;
    let formation_id = async_pair(&harness).await;

    let a_to_b = harness.assignment(formation_id, "app-a", "app-b").await.unwrap();
    harness
        .engine
        .report_assignment_status(
            formation_id,
            a_to_b.id,
            report("READY", Some(json!({"url": "https://b.example"})), a_to_b.operation_id()),
        )
        .await
        .unwrap();

    let b_to_a = harness.assignment(formation_id, "app-b", "app-a").await.unwrap();
    report_ready(&harness, &b_to_a).await;

    // app-a answered before seeing the configuration, so it is asked again
    let renotified = harness.assignment(formation_id, "app-b", "app-a").await.unwrap();
    assert!(renotified.awaiting_callback);
    assert_ne!(renotified.operation_id(), b_to_a.operation_id());
    let last = harness
        .client
        .requests_for_pair("app-b", "app-a")
        .pop()
        .unwrap();
    assert_eq!(last.body["reverse_config"], json!({"url": "https://b.example"}));

    report_ready(&harness, &renotified).await;
    let assignments = harness.assignments(formation_id).await;
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));
    assert!(assignments.iter().all(|a| !a.awaiting_callback));
}

#[tokio::test]
async fn test_mismatched_operation_is_ignored() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;
    let assignment = harness.assign(formation.id, &a).await.remove(0);
    let mut events_rx = harness.engine.subscribe();

    let current = assignment.operation_id().unwrap();
    let outcome = harness
        .engine
        .report_assignment_status(
            formation.id,
            assignment.id,
            report("READY", None, Some(current + 100)),
        )
        .await
        .unwrap();
    assert!(outcome.is_ignored());
    assert_eq!(
        harness.state_of(formation.id, "app-a", "app-a").await,
        Some(AssignmentState::Initial)
    );

    let event = events_rx.recv().await.unwrap();
    assert_eq!(event.name, events::STATUS_REPORT_IGNORED);
    assert_eq!(event.context["assignment_id"], assignment.id.to_string());
}

#[tokio::test]
async fn test_report_without_outstanding_request_is_ignored() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;
    let assignment = harness.assign(formation.id, &a).await.remove(0);

    report_ready(&harness, &assignment).await;
    let duplicate = report_ready(&harness, &assignment).await;
    assert!(duplicate.is_ignored());
}

#[tokio::test]
async fn test_report_for_unknown_assignment_is_ignored() {
    let harness = TestHarness::new().await;
    let formation = harness.formation().await;

    let outcome = harness
        .engine
        .report_assignment_status(formation.id, Uuid::new_v4(), report("READY", None, None))
        .await
        .unwrap();
    assert!(outcome.is_ignored());
}

#[tokio::test]
async fn test_invalid_report_is_rejected() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;
    let assignment = harness.assign(formation.id, &a).await.remove(0);

    let unknown_state = harness
        .engine
        .report_assignment_status(formation.id, assignment.id, report("SOMEWHERE", None, None))
        .await;
    assert!(matches!(unknown_state, Err(EngineError::InvalidStatusReport(_))));

    let mut with_error = report("READY", None, None);
    with_error.error = Some("not an error state".to_string());
    let error_on_success = harness
        .engine
        .report_assignment_status(formation.id, assignment.id, with_error)
        .await;
    assert!(matches!(error_on_success, Err(EngineError::InvalidStatusReport(_))));
}

#[tokio::test]
async fn test_error_report_records_client_error() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;
    let assignment = harness.assign(formation.id, &a).await.remove(0);

    let mut failed = report("CREATE_ERROR", None, assignment.operation_id());
    failed.error = Some("tenant is not subscribed".to_string());
    harness
        .engine
        .report_assignment_status(formation.id, assignment.id, failed)
        .await
        .unwrap();

    let stored = harness.assignment(formation.id, "app-a", "app-a").await.unwrap();
    assert_eq!(stored.state, AssignmentState::CreateError);
    assert_eq!(
        stored.error.map(|e| e.message),
        Some("tenant is not subscribed".to_string())
    );
}

#[tokio::test]
async fn test_resynchronize_reissues_outstanding_request() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::AsyncCallback)).await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let formation = harness.formation().await;
    let assignment = harness.assign(formation.id, &a).await.remove(0);

    harness.engine.resynchronize(formation.id).await.unwrap();

    let requests = harness.client.requests_to(&url_for("app-a"));
    assert_eq!(requests.len(), 2);
    // Same operation, so a late report for the first request still applies
    assert_eq!(requests[0].body["operation_id"], requests[1].body["operation_id"]);
    let outcome = report_ready(&harness, &assignment).await;
    assert!(!outcome.is_ignored());
}

#[tokio::test]
async fn test_reset_renotifies_the_reverse() {
    let harness = TestHarness::new().await;
    let formation_id = async_pair(&harness).await;
    for (source, target) in [("app-a", "app-b"), ("app-b", "app-a")] {
        let pair = harness.assignment(formation_id, source, target).await.unwrap();
        report_ready(&harness, &pair).await;
    }

    let a_to_b = harness.assignment(formation_id, "app-a", "app-b").await.unwrap();
    let updated = harness
        .engine
        .reset_assignment(
            formation_id,
            a_to_b.id,
            report("READY", Some(json!({"rotated": true})), None),
        )
        .await
        .unwrap();
    assert_eq!(updated.value, Some(json!({"rotated": true})));

    let reverse = harness.assignment(formation_id, "app-b", "app-a").await.unwrap();
    assert!(reverse.awaiting_callback);
    let last = harness.client.requests_for_pair("app-b", "app-a").pop().unwrap();
    assert_eq!(last.body["reverse_config"], json!({"rotated": true}));
}

#[tokio::test]
async fn test_reset_validation() {
    let harness = TestHarness::new().await;
    let formation_id = async_pair(&harness).await;
    let a_to_b = harness.assignment(formation_id, "app-a", "app-b").await.unwrap();

    let empty = harness
        .engine
        .reset_assignment(formation_id, a_to_b.id, report("READY", Some(json!({})), None))
        .await;
    assert!(matches!(empty, Err(EngineError::InvalidStatusReport(_))));

    let wrong_state = harness
        .engine
        .reset_assignment(formation_id, a_to_b.id, report("DELETING", Some(json!({"k": 1})), None))
        .await;
    assert!(matches!(wrong_state, Err(EngineError::InvalidStatusReport(_))));

    // Still awaiting its first report
    let not_ready = harness
        .engine
        .reset_assignment(formation_id, a_to_b.id, report("READY", Some(json!({"k": 1})), None))
        .await;
    assert!(matches!(not_ready, Err(EngineError::Conflict(_))));
}
