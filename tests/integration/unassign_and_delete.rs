//! Removal of participants and whole formations.

use serde_json::json;
use uuid::Uuid;

use formation_engine::dispatch::WebhookResponse;
use formation_engine::models::{CreateFormationRequest, WebhookMode};
use formation_engine::state_machine::{AssignmentState, FormationState};
use formation_engine::EngineError;

use crate::common::{application, lifecycle_template, ok, url_for, TestHarness, TEMPLATE_ID, TENANT};

async fn ready_pair(harness: &TestHarness) -> Uuid {
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;
    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;
    harness.client.clear();
    formation.id
}

async fn is_member(harness: &TestHarness, formation_id: Uuid, participant_id: &str) -> bool {
    harness
        .engine
        .core()
        .stores
        .formations
        .get_member(formation_id, participant_id)
        .await
        .unwrap()
        .is_some()
}

fn unassign_position(harness: &TestHarness, source: &str, target: &str) -> usize {
    harness
        .client
        .requests()
        .iter()
        .position(|r| {
            r.body["operation"] == "unassign"
                && r.body["source"] == source
                && r.body["target"] == target
        })
        .unwrap_or_else(|| panic!("no unassign request for {source} -> {target}"))
}

#[tokio::test]
async fn test_unassign_removes_every_assignment_of_the_participant() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    let b = harness.engine.get_participant("app-b").await.unwrap();

    let remaining = harness.unassign(formation_id, &b).await;
    assert!(remaining.is_empty());

    let assignments = harness.assignments(formation_id).await;
    assert_eq!(assignments.len(), 1);
    assert!(assignments[0].is_self());
    assert_eq!(assignments[0].source(), "app-a");
    assert!(!is_member(&harness, formation_id, "app-b").await);
    assert!(is_member(&harness, formation_id, "app-a").await);
}

#[tokio::test]
async fn test_unassign_order_puts_self_assignment_last() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    let b = harness.engine.get_participant("app-b").await.unwrap();

    harness.unassign(formation_id, &b).await;

    let leaving_to_staying = unassign_position(&harness, "app-b", "app-a");
    let staying_to_leaving = unassign_position(&harness, "app-a", "app-b");
    let own = unassign_position(&harness, "app-b", "app-b");
    assert!(leaving_to_staying < staying_to_leaving);
    assert!(staying_to_leaving < own);
}

#[tokio::test]
async fn test_failed_unassign_keeps_membership_until_resynchronized() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    let b = harness.engine.get_participant("app-b").await.unwrap();
    harness
        .client
        .set_default(&url_for("app-b"), WebhookResponse::new(500, json!({"error": "busy"})));

    harness.unassign(formation_id, &b).await;

    assert_eq!(
        harness.state_of(formation_id, "app-a", "app-b").await,
        Some(AssignmentState::DeleteError)
    );
    assert_eq!(harness.state_of(formation_id, "app-b", "app-a").await, None);
    assert_eq!(
        harness.state_of(formation_id, "app-b", "app-b").await,
        Some(AssignmentState::Deleting)
    );
    assert!(is_member(&harness, formation_id, "app-b").await);

    harness.client.set_default(&url_for("app-b"), ok(json!({})));
    harness.engine.resynchronize(formation_id).await.unwrap();

    assert_eq!(harness.assignments(formation_id).await.len(), 1);
    assert!(!is_member(&harness, formation_id, "app-b").await);
}

#[tokio::test]
async fn test_config_pending_on_unassign_is_an_error() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    let b = harness.engine.get_participant("app-b").await.unwrap();
    harness
        .client
        .set_default(&url_for("app-a"), WebhookResponse::new(204, json!(null)));

    harness.unassign(formation_id, &b).await;

    let failed = harness.assignment(formation_id, "app-b", "app-a").await.unwrap();
    assert_eq!(failed.state, AssignmentState::DeleteError);
    assert!(failed.error.is_some());
}

#[tokio::test]
async fn test_unassign_of_unknown_member_is_a_no_op() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    let stranger = harness.register(application("app-c", WebhookMode::Sync)).await;

    let result = harness.unassign(formation_id, &stranger).await;
    assert!(result.is_empty());
    assert!(harness.client.requests().is_empty());
    assert_eq!(harness.assignments(formation_id).await.len(), 4);
}

#[tokio::test]
async fn test_never_notified_assignments_are_dropped_silently() {
    let harness = TestHarness::new().await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let draft = harness
        .engine
        .create_formation(CreateFormationRequest::new("draft", TENANT, TEMPLATE_ID).draft())
        .await
        .unwrap();
    harness.assign(draft.id, &a).await;
    harness.assign(draft.id, &b).await;

    harness.unassign(draft.id, &b).await;

    assert!(harness.client.requests().is_empty());
    assert_eq!(harness.assignments(draft.id).await.len(), 1);
    assert!(!is_member(&harness, draft.id, "app-b").await);
}

#[tokio::test]
async fn test_delete_formation_unassigns_everyone() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;

    let deleted = harness.engine.delete_formation(formation_id).await.unwrap();
    assert!(deleted.is_none());

    let gone = harness.engine.get_formation(formation_id).await;
    assert!(matches!(gone, Err(EngineError::NotFound { entity: "Formation", .. })));
    let unassigns = harness
        .client
        .requests()
        .into_iter()
        .filter(|r| r.body["operation"] == "unassign")
        .count();
    assert_eq!(unassigns, 4);

    // A second delete finds nothing
    assert!(harness.engine.delete_formation(formation_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleting_a_draft_sends_nothing() {
    let harness = TestHarness::new().await;
    let lifecycle_url = "http://lifecycle.example/formations";
    for (template, mode) in [
        ("sync-lifecycle", WebhookMode::Sync),
        ("async-lifecycle", WebhookMode::AsyncCallback),
    ] {
        harness
            .engine
            .register_template(lifecycle_template(template, mode, lifecycle_url))
            .await
            .unwrap();
    }
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;

    for template in ["sync-lifecycle", "async-lifecycle"] {
        let draft = harness
            .engine
            .create_formation(CreateFormationRequest::new("draft", TENANT, template).draft())
            .await
            .unwrap();
        harness.assign(draft.id, &a).await;
        harness.assign(draft.id, &b).await;
        assert_eq!(harness.assignments(draft.id).await.len(), 4);

        let deleted = harness.engine.delete_formation(draft.id).await.unwrap();
        assert!(deleted.is_none());

        let gone = harness.engine.get_formation(draft.id).await;
        assert!(matches!(gone, Err(EngineError::NotFound { entity: "Formation", .. })));
        assert!(!is_member(&harness, draft.id, "app-a").await);
        assert!(!is_member(&harness, draft.id, "app-b").await);
        assert!(harness
            .engine
            .core()
            .stores
            .assignments
            .list_for_formation(draft.id)
            .await
            .unwrap()
            .is_empty());
    }
    assert!(harness.client.requests().is_empty());
}

#[tokio::test]
async fn test_delete_sends_lifecycle_notification_last() {
    let harness = TestHarness::new().await;
    let lifecycle_url = "http://lifecycle.example/formations";
    harness
        .engine
        .register_template(lifecycle_template("with-lifecycle", WebhookMode::Sync, lifecycle_url))
        .await
        .unwrap();
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness
        .engine
        .create_formation(CreateFormationRequest::new("f", TENANT, "with-lifecycle"))
        .await
        .unwrap();
    harness.assign(formation.id, &a).await;

    harness.engine.delete_formation(formation.id).await.unwrap();

    let requests = harness.client.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.url, lifecycle_url);
    assert_eq!(last.body["operation"], "delete_formation");
    let unassign = requests
        .iter()
        .position(|r| r.body["operation"] == "unassign")
        .unwrap();
    assert!(unassign < requests.len() - 1);
}

#[tokio::test]
async fn test_stuck_deletion_rejects_new_assignments() {
    let harness = TestHarness::new().await;
    let formation_id = ready_pair(&harness).await;
    harness
        .client
        .set_default(&url_for("app-b"), WebhookResponse::new(500, json!({})));

    let pending = harness.engine.delete_formation(formation_id).await.unwrap();
    assert_eq!(pending.map(|f| f.state), Some(FormationState::Deleting));

    let c = harness.register(application("app-c", WebhookMode::Sync)).await;
    let result = harness
        .engine
        .assign_participant(formation_id, &c.id, c.participant_type)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidFormationState { .. })));

    harness.client.set_default(&url_for("app-b"), ok(json!({})));
    let retried = harness.engine.delete_formation(formation_id).await.unwrap();
    assert!(retried.is_none());
}
