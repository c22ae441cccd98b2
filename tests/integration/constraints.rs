//! Constraints attached at join points, exercised through full engine flows.

use serde_json::json;

use formation_engine::constants::events;
use formation_engine::dispatch::WebhookResponse;
use formation_engine::models::{
    JoinPoint, NewConstraint, OperatorName, ResourceType, WebhookMode, SCENARIO_GROUPS_LABEL,
};
use formation_engine::state_machine::AssignmentState;
use formation_engine::EngineError;

use crate::common::{application, url_for, TestHarness};

async fn attach(
    harness: &TestHarness,
    constraint: NewConstraint,
) -> formation_engine::models::Constraint {
    harness.engine.attach_constraint(constraint).await.unwrap()
}

#[tokio::test]
async fn test_scenario_groups_gate_vetoes_assignment() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "requires-billing",
            JoinPoint::AssignFormation,
            OperatorName::ContainsScenarioGroups,
            r#"{"required_groups": ["billing"]}"#,
        ),
    )
    .await;
    let plain = harness.register(application("app-a", WebhookMode::Sync)).await;
    let grouped = harness
        .register(
            application("app-b", WebhookMode::Sync)
                .with_label(SCENARIO_GROUPS_LABEL, json!(["billing", "audit"])),
        )
        .await;
    let formation = harness.formation().await;

    let vetoed = harness
        .engine
        .assign_participant(formation.id, &plain.id, plain.participant_type)
        .await;
    match vetoed {
        Err(EngineError::ConstraintViolation { constraint, reason }) => {
            assert_eq!(constraint, "requires-billing");
            assert!(reason.contains("billing"));
        }
        other => panic!("expected a veto, got {other:?}"),
    }
    assert!(harness.assignments(formation.id).await.is_empty());
    assert!(harness.client.requests().is_empty());

    let accepted = harness.assign(formation.id, &grouped).await;
    assert_eq!(accepted.len(), 1);
}

#[tokio::test]
async fn test_gate_only_applies_to_matching_resources() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "runtimes-need-groups",
            JoinPoint::AssignFormation,
            OperatorName::ContainsScenarioGroups,
            r#"{"required_groups": ["billing"]}"#,
        )
        .for_resource(ResourceType::Runtime, formation_engine::models::ANY_SUBTYPE),
    )
    .await;
    let app = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    assert_eq!(harness.assign(formation.id, &app).await.len(), 1);
}

#[tokio::test]
async fn test_constraint_scoped_to_another_template_is_inert() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "elsewhere",
            JoinPoint::AssignFormation,
            OperatorName::ContainsScenarioGroups,
            r#"{"required_groups": ["billing"]}"#,
        )
        .scoped_to_template("some-other-template"),
    )
    .await;
    let app = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    assert_eq!(harness.assign(formation.id, &app).await.len(), 1);
}

#[tokio::test]
async fn test_detached_constraint_no_longer_vetoes() {
    let harness = TestHarness::new().await;
    let constraint = attach(
        &harness,
        NewConstraint::new(
            "requires-billing",
            JoinPoint::AssignFormation,
            OperatorName::ContainsScenarioGroups,
            r#"{"required_groups": ["billing"]}"#,
        ),
    )
    .await;
    let app = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    harness.engine.detach_constraint(constraint.id).await.unwrap();
    assert!(harness.engine.list_constraints().await.unwrap().is_empty());
    assert_eq!(harness.assign(formation.id, &app).await.len(), 1);
}

#[tokio::test]
async fn test_operator_at_unsupported_join_point_is_rejected() {
    let harness = TestHarness::new().await;
    let result = harness
        .engine
        .attach_constraint(NewConstraint::new(
            "misplaced",
            JoinPoint::SendNotification,
            OperatorName::ContainsScenarioGroups,
            r#"{"required_groups": []}"#,
        ))
        .await;
    assert!(matches!(result, Err(EngineError::Constraint(_))));
}

#[tokio::test]
async fn test_loop_suppression_settles_self_assignments_silently() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "no-loops",
            JoinPoint::GenerateFormationAssignmentNotification,
            OperatorName::DoNotGenerateFormationAssignmentNotificationForLoops,
            "{}",
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;
    let mut events_rx = harness.engine.subscribe();

    harness.assign(formation.id, &a).await;
    harness.assign(formation.id, &b).await;

    let assignments = harness.assignments(formation.id).await;
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));
    assert!(harness.client.requests_for_pair("app-a", "app-a").is_empty());
    assert!(harness.client.requests_for_pair("app-b", "app-b").is_empty());
    assert_eq!(harness.client.requests_for_pair("app-a", "app-b").len(), 1);

    let mut suppressed = 0;
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::NOTIFICATION_SUPPRESSED {
            suppressed += 1;
        }
    }
    assert_eq!(suppressed, 2);
}

#[tokio::test]
async fn test_config_mutator_rewrites_returned_configuration() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "inject",
            JoinPoint::NotificationStatusReturned,
            OperatorName::ConfigMutator,
            r#"{"only_for_states": ["INITIAL"], "configuration": {"injected": "{{ target.id }}"}}"#,
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].value, Some(json!({"injected": "app-a"})));
}

#[tokio::test]
async fn test_config_mutator_filters_on_the_state_before_the_report() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "hold-new-pairs",
            JoinPoint::NotificationStatusReturned,
            OperatorName::ConfigMutator,
            r#"{"only_for_states": ["INITIAL"], "state": "CONFIG_PENDING",
                "configuration": {"m": 1}}"#,
        ),
    )
    .await;
    attach(
        &harness,
        NewConstraint::new(
            "settled-only",
            JoinPoint::NotificationStatusReturned,
            OperatorName::ConfigMutator,
            r#"{"only_for_states": ["READY"], "configuration": {"settled": true}}"#,
        )
        .with_priority(10),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    harness.client.set_default(
        &url_for("app-a"),
        WebhookResponse::new(200, json!({"config": {"raw": true}})),
    );
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::ConfigPending);
    assert_eq!(assignments[0].value, Some(json!({"m": 1})));
}

#[tokio::test]
async fn test_config_mutator_skips_errors_by_default() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "force-ready",
            JoinPoint::NotificationStatusReturned,
            OperatorName::ConfigMutator,
            r#"{"state": "READY"}"#,
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    harness
        .client
        .set_default(&url_for("app-a"), WebhookResponse::new(500, json!({"error": "down"})));
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::CreateError);
}

#[tokio::test]
async fn test_redirect_changes_destination() {
    let harness = TestHarness::new().await;
    let redirected = "http://gateway.example/hooks";
    attach(
        &harness,
        NewConstraint::new(
            "gateway",
            JoinPoint::SendNotification,
            OperatorName::RedirectNotification,
            format!(r#"{{"url": "{redirected}", "method": "PUT"}}"#),
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;

    assert!(harness.client.requests_to(&url_for("app-a")).is_empty());
    let requests = harness.client.requests_to(redirected);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "PUT");
}

#[tokio::test]
async fn test_redirect_limited_to_other_tenants_is_skipped() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "gateway",
            JoinPoint::SendNotification,
            OperatorName::RedirectNotification,
            r#"{"url": "http://gateway.example/hooks", "only_for_tenants": ["someone-else"]}"#,
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    harness.assign(formation.id, &a).await;
    assert_eq!(harness.client.requests_to(&url_for("app-a")).len(), 1);
}

#[tokio::test]
async fn test_fan_out_delivers_to_extra_destinations() {
    let harness = TestHarness::new().await;
    let audit = "http://audit.example/copies";
    attach(
        &harness,
        NewConstraint::new(
            "audit-copy",
            JoinPoint::SendNotification,
            OperatorName::AsynchronousFlowControl,
            format!(r#"{{"behavior": "FAN_OUT", "destinations": [{{"url": "{audit}"}}]}}"#),
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::Ready);
    assert_eq!(harness.client.requests_to(&url_for("app-a")).len(), 1);
    let copies = harness.client.requests_to(audit);
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].method, "POST");
}

#[tokio::test]
async fn test_failed_fan_out_fails_the_assignment() {
    let harness = TestHarness::new().await;
    let audit = "http://audit.example/copies";
    attach(
        &harness,
        NewConstraint::new(
            "audit-copy",
            JoinPoint::SendNotification,
            OperatorName::AsynchronousFlowControl,
            format!(r#"{{"behavior": "FAN_OUT", "destinations": [{{"url": "{audit}"}}]}}"#),
        ),
    )
    .await;
    harness
        .client
        .set_default(audit, WebhookResponse::new(503, json!({})));
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::CreateError);
}

#[tokio::test]
async fn test_deferral_waits_for_the_reverse() {
    let harness = TestHarness::new().await;
    attach(
        &harness,
        NewConstraint::new(
            "reverse-first",
            JoinPoint::SendNotification,
            OperatorName::AsynchronousFlowControl,
            r#"{"behavior": "DEFER_UNTIL_REVERSE_READY"}"#,
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let b = harness.register(application("app-b", WebhookMode::Sync)).await;
    let formation = harness.formation().await;
    harness.assign(formation.id, &a).await;
    let mut events_rx = harness.engine.subscribe();

    harness.assign(formation.id, &b).await;

    let assignments = harness.assignments(formation.id).await;
    assert!(assignments.iter().all(|a| a.state == AssignmentState::Ready));
    assert!(assignments.iter().all(|a| !a.deferred));

    let mut deferred = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        if event.name == events::NOTIFICATION_DEFERRED {
            deferred.push(event.context["assignment_id"].clone());
        }
    }
    assert_eq!(deferred.len(), 1);

    // The deferred half is delivered after its reverse
    let requests = harness.client.requests();
    let position = |source: &str, target: &str| {
        requests
            .iter()
            .position(|r| r.body["source"] == source && r.body["target"] == target)
            .unwrap()
    };
    let a_to_b = harness.assignment(formation.id, "app-a", "app-b").await.unwrap();
    if deferred[0] == json!(a_to_b.id) {
        assert!(position("app-b", "app-a") < position("app-a", "app-b"));
    } else {
        assert!(position("app-a", "app-b") < position("app-b", "app-a"));
    }
}

#[tokio::test]
async fn test_secondary_confirmation_finalizes_after_second_destination() {
    let harness = TestHarness::new().await;
    let confirm = "http://confirm.example/check";
    attach(
        &harness,
        NewConstraint::new(
            "double-check",
            JoinPoint::NotificationStatusReturned,
            OperatorName::AsynchronousFlowControl,
            format!(r#"{{"behavior": "SECONDARY_CONFIRMATION", "url": "{confirm}"}}"#),
        ),
    )
    .await;
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::Ready);
    assert_eq!(harness.client.requests_to(confirm).len(), 1);

    let history = harness
        .engine
        .assignment_history(formation.id, assignments[0].id)
        .await
        .unwrap();
    assert!(history
        .iter()
        .any(|t| t.to_state == Some(AssignmentState::CreateReady)));
}

#[tokio::test]
async fn test_secondary_confirmation_error_fails_the_assignment() {
    let harness = TestHarness::new().await;
    let confirm = "http://confirm.example/check";
    attach(
        &harness,
        NewConstraint::new(
            "double-check",
            JoinPoint::NotificationStatusReturned,
            OperatorName::AsynchronousFlowControl,
            format!(r#"{{"behavior": "SECONDARY_CONFIRMATION", "url": "{confirm}"}}"#),
        ),
    )
    .await;
    harness
        .client
        .set_default(confirm, WebhookResponse::new(400, json!({"error": "not confirmed"})));
    let a = harness.register(application("app-a", WebhookMode::Sync)).await;
    let formation = harness.formation().await;

    let assignments = harness.assign(formation.id, &a).await;
    assert_eq!(assignments[0].state, AssignmentState::CreateError);
    assert_eq!(
        assignments[0].error.as_ref().map(|e| e.message.as_str()),
        Some("not confirmed")
    );
    // The receiver itself answered fine
    assert_eq!(harness.client.requests_to(&url_for("app-a")).len(), 1);
}
