//! Formation lifecycle notifications and reports.

use serde_json::json;

use formation_engine::dispatch::WebhookResponse;
use formation_engine::models::{
    CreateFormationRequest, FormationStatusReportRequest, ManagementEvent, ParticipantType,
    WebhookMode,
};
use formation_engine::orchestration::{FormationReportOutcome, ManagementOutcome};
use formation_engine::state_machine::{AssignmentState, FormationCondition, FormationState};
use formation_engine::EngineError;

use crate::common::{
    accepted, application, lifecycle_template, ok, TestHarness, TEMPLATE_ID, TENANT,
};

const LIFECYCLE_URL: &str = "http://lifecycle.example/formations";
const LIFECYCLE_TEMPLATE: &str = "with-lifecycle";

async fn with_lifecycle(harness: &TestHarness, mode: WebhookMode) {
    harness
        .engine
        .register_template(lifecycle_template(LIFECYCLE_TEMPLATE, mode, LIFECYCLE_URL))
        .await
        .unwrap();
}

fn formation_report(state: &str) -> FormationStatusReportRequest {
    FormationStatusReportRequest {
        state: state.to_string(),
        error: None,
    }
}

#[tokio::test]
async fn test_sync_lifecycle_webhook_on_create() {
    let harness = TestHarness::new().await;
    with_lifecycle(&harness, WebhookMode::Sync).await;

    let formation = harness
        .engine
        .create_formation(CreateFormationRequest::new("payments", TENANT, LIFECYCLE_TEMPLATE))
        .await
        .unwrap();
    assert_eq!(formation.state, FormationState::Ready);

    let requests = harness.client.requests_to(LIFECYCLE_URL);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body["operation"], "create_formation");
    assert_eq!(requests[0].body["name"], "payments");
}

#[tokio::test]
async fn test_async_lifecycle_holds_assignments_until_reported() {
    let harness = TestHarness::new().await;
    with_lifecycle(&harness, WebhookMode::AsyncCallback).await;
    harness.client.set_default(LIFECYCLE_URL, accepted());
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;

    let formation = harness
        .engine
        .create_formation(CreateFormationRequest::new("f", TENANT, LIFECYCLE_TEMPLATE))
        .await
        .unwrap();
    assert_eq!(formation.state, FormationState::Initial);
    assert!(formation.awaiting_callback);

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::Initial);
    assert_eq!(harness.client.requests().len(), 1);

    let outcome = harness
        .engine
        .report_formation_status(formation.id, formation_report("READY"))
        .await
        .unwrap();
    let FormationReportOutcome::Applied(applied) = outcome else {
        panic!("expected the report to apply, got {outcome:?}");
    };
    assert_eq!(applied.state, FormationState::Ready);
    assert_eq!(
        harness.state_of(formation.id, "app-a", "app-a").await,
        Some(AssignmentState::Ready)
    );
}

#[tokio::test]
async fn test_lifecycle_failure_and_retry() {
    let harness = TestHarness::new().await;
    with_lifecycle(&harness, WebhookMode::Sync).await;
    harness
        .client
        .set_default(LIFECYCLE_URL, WebhookResponse::new(500, json!({"error": "quota"})));

    let formation = harness
        .engine
        .create_formation(CreateFormationRequest::new("f", TENANT, LIFECYCLE_TEMPLATE))
        .await
        .unwrap();
    assert_eq!(formation.state, FormationState::CreateError);
    assert_eq!(formation.error.as_ref().map(|e| e.message.as_str()), Some("quota"));

    let status = harness.engine.formation_status(formation.id).await.unwrap();
    assert_eq!(status.condition, FormationCondition::Error);
    assert!(status.errors.iter().any(|e| e.assignment_id.is_none()));

    harness.client.set_default(LIFECYCLE_URL, ok(json!({})));
    let report = harness.engine.resynchronize(formation.id).await.unwrap();
    assert_eq!(report.formation_state, Some(FormationState::Ready));
}

#[tokio::test]
async fn test_async_lifecycle_error_report() {
    let harness = TestHarness::new().await;
    with_lifecycle(&harness, WebhookMode::AsyncCallback).await;
    harness.client.set_default(LIFECYCLE_URL, accepted());
    let formation = harness
        .engine
        .create_formation(CreateFormationRequest::new("f", TENANT, LIFECYCLE_TEMPLATE))
        .await
        .unwrap();

    let mut failed = formation_report("CREATE_ERROR");
    failed.error = Some("rejected".to_string());
    let outcome = harness
        .engine
        .report_formation_status(formation.id, failed)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        FormationReportOutcome::Applied(ref f) if f.state == FormationState::CreateError
    ));
}

#[tokio::test]
async fn test_formation_report_without_outstanding_request_is_ignored() {
    let harness = TestHarness::new().await;
    let formation = harness.formation().await;

    let outcome = harness
        .engine
        .report_formation_status(formation.id, formation_report("READY"))
        .await
        .unwrap();
    assert!(matches!(outcome, FormationReportOutcome::Ignored(_)));

    let draft = harness
        .engine
        .create_formation(CreateFormationRequest::new("draft", TENANT, TEMPLATE_ID).draft())
        .await
        .unwrap();
    let rejected = harness
        .engine
        .report_formation_status(draft.id, formation_report("READY"))
        .await;
    assert!(matches!(rejected, Err(EngineError::InvalidFormationState { .. })));
}

#[tokio::test]
async fn test_management_events_drive_the_engine() {
    let harness = TestHarness::new().await;
    harness.register(application("app-a", WebhookMode::Sync)).await;

    let created = harness
        .engine
        .handle_event(ManagementEvent::FormationCreated {
            formation_id: None,
            name: "from-event".to_string(),
            tenant: TENANT.to_string(),
            template_id: TEMPLATE_ID.to_string(),
            draft: false,
        })
        .await
        .unwrap();
    let ManagementOutcome::Formation(Some(formation)) = created else {
        panic!("expected a formation, got {created:?}");
    };

    let assigned = ManagementEvent::ParticipantAssigned {
        formation_id: formation.id,
        participant_id: "app-a".to_string(),
        participant_type: ParticipantType::Application,
        tenant: TENANT.to_string(),
    };
    let first = harness.engine.handle_event(assigned.clone()).await.unwrap();
    let redelivered = harness.engine.handle_event(assigned).await.unwrap();
    assert_eq!(first, redelivered);

    let deleted = harness
        .engine
        .handle_event(ManagementEvent::FormationDeleted {
            formation_id: formation.id,
            tenant: TENANT.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(deleted, ManagementOutcome::Formation(None));
}

#[tokio::test]
async fn test_resynchronize_rejects_drafts() {
    let harness = TestHarness::new().await;
    let draft = harness
        .engine
        .create_formation(CreateFormationRequest::new("draft", TENANT, TEMPLATE_ID).draft())
        .await
        .unwrap();

    let result = harness.engine.resynchronize(draft.id).await;
    assert!(matches!(result, Err(EngineError::InvalidFormationState { .. })));
}
