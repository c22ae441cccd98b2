//! Assign flows against synchronous receivers.

use serde_json::json;

use formation_engine::dispatch::{TransportError, WebhookResponse};
use formation_engine::models::{CreateFormationRequest, ParticipantType, WebhookMode};
use formation_engine::state_machine::{AssignmentState, FormationCondition, FormationState};
use formation_engine::EngineError;

use crate::common::{application, ok, runtime, url_for, TestHarness, TEMPLATE_ID, TENANT};

#[tokio::test]
async fn test_two_sync_applications_reach_ready() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;
    assert_eq!(formation.state, FormationState::Ready);

    let first = harness.assign(formation.id, &a).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].state, AssignmentState::Ready);

    let second = harness.assign(formation.id, &b).await;
    assert_eq!(second.len(), 3);

    let assignments = harness.assignments(formation.id).await;
    assert_eq!(assignments.len(), 4);
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));

    // Each pair is delivered to its target
    assert!(!harness.client.requests_for_pair("app-a", "app-b").is_empty());
    assert!(harness
        .client
        .requests_for_pair("app-a", "app-b")
        .iter()
        .all(|r| r.url == url_for("app-b")));
    assert!(harness
        .client
        .requests_for_pair("app-b", "app-a")
        .iter()
        .all(|r| r.url == url_for("app-a")));

    let status = harness.engine.formation_status(formation.id).await.unwrap();
    assert_eq!(status.condition, FormationCondition::Ready);
    assert!(status.errors.is_empty());
}

#[tokio::test]
async fn test_cross_pairs_wait_for_self_assignments() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;

    let requests = harness.client.requests();
    let position = |source: &str, target: &str| {
        requests
            .iter()
            .position(|r| r.body["source"] == source && r.body["target"] == target)
            .expect("request for pair")
    };
    assert!(position("app-b", "app-b") < position("app-a", "app-b"));
    assert!(position("app-b", "app-b") < position("app-b", "app-a"));
}

#[tokio::test]
async fn test_rendered_body_carries_correlation_data() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    let requests = harness.client.requests_to(&url_for("app-a"));
    assert_eq!(requests.len(), 1);

    let body = &requests[0].body;
    assert_eq!(body["operation"], "assign");
    assert_eq!(body["formation_id"], formation.id.to_string());
    assert_eq!(body["assignment_id"], assignments[0].id.to_string());
    assert!(body["operation_id"].is_u64());
    // Self-assignments have no reverse
    assert!(body["reverse_config"].is_null());
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_configuration_is_forwarded_to_the_reverse() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    harness
        .client
        .set_default(&url_for("app-b"), ok(json!({"config": {"token": "from-b"}})));
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;

    let a_to_b = harness.assignment(formation.id, "app-a", "app-b").await.unwrap();
    assert_eq!(a_to_b.value, Some(json!({"token": "from-b"})));

    let forwarded = harness
        .client
        .requests_for_pair("app-b", "app-a")
        .into_iter()
        .any(|r| r.body["reverse_config"] == json!({"token": "from-b"}));
    assert!(forwarded, "app-a never saw the configuration returned by app-b");

    let b_to_a = harness.assignment(formation.id, "app-b", "app-a").await.unwrap();
    assert_eq!(b_to_a.state, AssignmentState::Ready);
    assert_eq!(b_to_a.notified_reverse_value, Some(json!({"token": "from-b"})));
}

#[tokio::test]
async fn test_incomplete_response_leaves_config_pending() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    // The self-assignment of app-b is the first request it receives
    harness.client.respond(&url_for("app-b"), ok(json!({})));
    harness
        .client
        .set_default(&url_for("app-b"), WebhookResponse::new(204, json!(null)));
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;

    assert_eq!(
        harness.state_of(formation.id, "app-a", "app-b").await,
        Some(AssignmentState::ConfigPending)
    );
    assert_eq!(
        harness.state_of(formation.id, "app-b", "app-a").await,
        Some(AssignmentState::Ready)
    );
    let status = harness.engine.formation_status(formation.id).await.unwrap();
    assert_eq!(status.condition, FormationCondition::InProgress);
}

#[tokio::test]
async fn test_reported_state_in_body_is_honoured() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    harness.client.set_default(
        &url_for("app-a"),
        ok(json!({"state": "CONFIG_PENDING", "config": {"partial": true}})),
    );
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::ConfigPending);
    assert_eq!(assignments[0].value, Some(json!({"partial": true})));
}

#[tokio::test]
async fn test_receiver_error_then_resynchronize() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    harness.client.respond(&url_for("app-b"), ok(json!({})));
    harness
        .client
        .set_default(&url_for("app-b"), WebhookResponse::new(500, json!({"error": "boom"})));
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;

    let failed = harness.assignment(formation.id, "app-a", "app-b").await.unwrap();
    assert_eq!(failed.state, AssignmentState::CreateError);
    assert_eq!(failed.error.as_ref().map(|e| e.message.as_str()), Some("boom"));

    let status = harness.engine.formation_status(formation.id).await.unwrap();
    assert_eq!(status.condition, FormationCondition::Error);
    assert!(status.errors.iter().any(|e| e.assignment_id == Some(failed.id)));

    harness.client.set_default(&url_for("app-b"), ok(json!({})));
    let report = harness.engine.resynchronize(formation.id).await.unwrap();
    assert_eq!(report.redriven, 1);
    assert_eq!(report.untouched, 3);

    let assignments = harness.assignments(formation.id).await;
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));
    assert!(harness
        .engine
        .formation_status(formation.id)
        .await
        .unwrap()
        .is_ready());
}

#[tokio::test]
async fn test_resynchronizing_a_ready_formation_is_a_no_op() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;
    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;
    let before = harness.assignments(formation.id).await;
    harness.client.clear();

    let report = harness.engine.resynchronize(formation.id).await.unwrap();
    assert_eq!(report.redriven, 0);
    assert_eq!(report.untouched, 4);
    assert!(harness.client.requests().is_empty());
    assert_eq!(harness.assignments(formation.id).await, before);
}

#[tokio::test]
async fn test_unexpected_status_fails_the_assignment() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    harness
        .client
        .set_default(&url_for("app-a"), WebhookResponse::new(418, json!({})));
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::CreateError);
    let message = &assignments[0].error.as_ref().unwrap().message;
    assert!(message.contains("418"), "unexpected message {message}");
}

#[tokio::test]
async fn test_transport_failure_is_recorded() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    harness.client.fail_with(
        &url_for("app-a"),
        TransportError::Connection("connection refused".to_string()),
    );
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::CreateError);
    let message = &assignments[0].error.as_ref().unwrap().message;
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn test_assign_is_idempotent() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let first = harness.assign(formation.id, &a).await;
    let sent = harness.client.requests().len();
    let second = harness.assign(formation.id, &a).await;

    assert_eq!(first[0].id, second[0].id);
    assert_eq!(harness.client.requests().len(), sent);
}

#[tokio::test]
async fn test_application_and_runtime_pair() {
    let harness = TestHarness::new().await;
    let app = harness.register(application("app-a", WebhookMode::Sync)).await;
    let rt = harness.register(runtime("runtime-1", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    harness.assign(formation.id, &app).await;
    harness.assign(formation.id, &rt).await;

    let assignments = harness.assignments(formation.id).await;
    assert_eq!(assignments.len(), 4);
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));
    assert!(!harness.client.requests_to(&url_for("runtime-1")).is_empty());
}

#[tokio::test]
async fn test_receiver_without_webhook_settles_ready() {
    let harness = TestHarness::new().await;
    let quiet = harness
        .register(formation_engine::models::Participant::new(
            "quiet",
            ParticipantType::Application,
            TENANT,
        ))
        .await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &quiet).await;
    assert_eq!(assignments[0].state, AssignmentState::Ready);
    assert!(harness.client.requests().is_empty());
}

#[tokio::test]
async fn test_assign_validation_errors() {
    let harness = TestHarness::new().await;
    harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let missing = harness
        .engine
        .assign_participant(formation.id, "nobody", ParticipantType::Application)
        .await;
    assert!(matches!(
        missing,
        Err(EngineError::NotFound { entity: "Participant", .. })
    ));

    let wrong_type = harness
        .engine
        .assign_participant(formation.id, "app-a", ParticipantType::Runtime)
        .await;
    assert!(matches!(wrong_type, Err(EngineError::InvalidInput(_))));

    let not_assignable = harness
        .engine
        .assign_participant(formation.id, "app-a", ParticipantType::ApplicationTemplate)
        .await;
    assert!(matches!(not_assignable, Err(EngineError::InvalidInput(_))));

    let unknown_formation = harness
        .engine
        .assign_participant(uuid::Uuid::new_v4(), "app-a", ParticipantType::Application)
        .await;
    assert!(matches!(
        unknown_formation,
        Err(EngineError::NotFound { entity: "Formation", .. })
    ));
}

#[tokio::test]
async fn test_draft_formation_notifies_on_finalize() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let draft = harness
        .engine
        .create_formation(CreateFormationRequest::new("draft", TENANT, TEMPLATE_ID).draft())
        .await
        .unwrap();
    assert_eq!(draft.state, FormationState::Draft);

    harness.assign(draft.id, &a).await;
    harness.assign(draft.id, &b).await;
    assert!(harness.client.requests().is_empty());
    assert_eq!(
        harness.engine.formation_status(draft.id).await.unwrap().condition,
        FormationCondition::Draft
    );

    let finalized = harness.engine.finalize_formation(draft.id).await.unwrap();
    assert_eq!(finalized.state, FormationState::Ready);

    let assignments = harness.assignments(draft.id).await;
    assert_eq!(assignments.len(), 4);
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));

    // Exactly one notification per pair
    assert_eq!(harness.client.requests().len(), 4);
    for (source, target) in [
        ("app-a", "app-a"),
        ("app-a", "app-b"),
        ("app-b", "app-a"),
        ("app-b", "app-b"),
    ] {
        assert_eq!(harness.client.requests_for_pair(source, target).len(), 1);
    }
}

#[tokio::test]
async fn test_create_formation_is_idempotent_by_id() {
    let harness = TestHarness::new().await;
    let id = uuid::Uuid::new_v4();
    let request = CreateFormationRequest::new("same", TENANT, TEMPLATE_ID).with_id(id);

    let first = harness.engine.create_formation(request.clone()).await.unwrap();
    let second = harness.engine.create_formation(request).await.unwrap();
    assert_eq!(first.id, id);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_create_formation_requires_template() {
    let harness = TestHarness::new().await;
    let result = harness
        .engine
        .create_formation(CreateFormationRequest::new("f", TENANT, "missing-template"))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::NotFound { entity: "FormationTemplate", .. })
    ));
}

#[tokio::test]
async fn test_history_records_transitions() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    let history = harness
        .engine
        .assignment_history(formation.id, assignments[0].id)
        .await
        .unwrap();
    assert!(!history.is_empty());
    assert_eq!(
        history.last().and_then(|t| t.to_state),
        Some(AssignmentState::Ready)
    );
    assert!(history.iter().all(|t| t.assignment_id == assignments[0].id));

    let other_formation = harness
        .engine
        .assignment_history(uuid::Uuid::new_v4(), assignments[0].id)
        .await
        .unwrap();
    assert!(other_formation.is_empty());
}
