use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use formation_engine::config::{WebAuthConfig, WebConfig};
use formation_engine::models::WebhookMode;
use formation_engine::web::{create_app, AppState};

use crate::common::{accepted, application, url_for, TestHarness, TEMPLATE_ID, TENANT};

fn app(harness: &TestHarness, config: WebConfig) -> Router {
    create_app(AppState::new(Arc::new(harness.engine.clone()), config))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn create_formation(app: &Router) -> String {
    let (status, body) = send(
        app,
        request(
            Method::POST,
            "/v1/events",
            Some(json!({
                "type": "FORMATION_CREATED",
                "name": "web",
                "tenant": TENANT,
                "template_id": TEMPLATE_ID,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "formation");
    body["result"]["id"].as_str().unwrap().to_string()
}

async fn assign(app: &Router, formation_id: &str, participant_id: &str) -> (StatusCode, Value) {
    send(
        app,
        request(
            Method::POST,
            "/v1/events",
            Some(json!({
                "type": "PARTICIPANT_ASSIGNED",
                "formation_id": formation_id,
                "participant_id": participant_id,
                "participant_type": "APPLICATION",
                "tenant": TENANT,
            })),
        ),
    )
    .await
}

#[tokio::test]
async fn test_health_endpoints() {
    let harness = TestHarness::new().await;
    let app = app(&harness, WebConfig::default());

    let (status, body) = send(&app, request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(!body["version"].as_str().unwrap().is_empty());

    let (status, body) = send(&app, request(Method::GET, "/health/live", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_register_participant_and_read_it_back() {
    let harness = TestHarness::new().await;
    let app = app(&harness, WebConfig::default());
    let participant = serde_json::to_value(application("app-a", WebhookMode::Sync)).unwrap();

    let (status, _) = send(
        &app,
        request(Method::PUT, "/v1/participants/app-a", Some(participant.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request(Method::GET, "/v1/participants/app-a", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "app-a");
    assert_eq!(body["tenant"], participant["tenant"]);
}

#[tokio::test]
async fn test_participant_id_must_match_path() {
    let harness = TestHarness::new().await;
    let app = app(&harness, WebConfig::default());
    let participant = serde_json::to_value(application("app-a", WebhookMode::Sync)).unwrap();

    let (status, body) = send(
        &app,
        request(Method::PUT, "/v1/participants/app-b", Some(participant)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_events_drive_formation_to_ready() {
    let harness = TestHarness::new().await;
    harness.register(application("app-a", WebhookMode::Sync)).await;
    harness.register(application("app-b", WebhookMode::Sync)).await;
    let app = app(&harness, WebConfig::default());

    let formation_id = create_formation(&app).await;
    let (status, body) = assign(&app, &formation_id, "app-a").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["kind"], "assignments");
    assign(&app, &formation_id, "app-b").await;

    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/v1/formations/{formation_id}/status"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["condition"], "READY");
    assert_eq!(body["assignments"].as_array().unwrap().len(), 4);

    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/v1/formations/{formation_id}/assignments"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .all(|a| a["state"] == "READY"));
}

#[tokio::test]
async fn test_status_callback_applies_report() {
    let harness = TestHarness::new().await;
    harness
        .register(application("app-a", WebhookMode::AsyncCallback))
        .await;
    harness.client.set_default(&url_for("app-a"), accepted());
    let app = app(&harness, WebConfig::default());

    let formation_id = create_formation(&app).await;
    let (_, assigned) = assign(&app, &formation_id, "app-a").await;
    let assignment = &assigned["result"][0];
    assert_eq!(assignment["state"], "INITIAL");
    let assignment_id = assignment["id"].as_str().unwrap();

    let uri = format!("/v1/formations/{formation_id}/assignments/{assignment_id}/status");
    let (status, body) = send(
        &app,
        request(Method::PATCH, &uri, Some(json!({"state": "READY"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["outcome"], "applied");
    assert_eq!(body["assignment"]["state"], "READY");

    let (status, body) = send(
        &app,
        request(Method::PATCH, &uri, Some(json!({"state": "READY"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "ignored");

    let (status, body) = send(
        &app,
        request(Method::PATCH, &uri, Some(json!({"state": "NOT_A_STATE"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let history = format!("/v1/formations/{formation_id}/assignments/{assignment_id}/history");
    let (status, body) = send(&app, request(Method::GET, &history, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_formation_is_a_json_404() {
    let harness = TestHarness::new().await;
    let app = app(&harness, WebConfig::default());

    let uri = format!("/v1/formations/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&app, request(Method::GET, &uri, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["error"]["message"].as_str().unwrap().contains("Formation"));
}

#[tokio::test]
async fn test_resynchronize_endpoint() {
    let harness = TestHarness::new().await;
    harness.register(application("app-a", WebhookMode::Sync)).await;
    let app = app(&harness, WebConfig::default());
    let formation_id = create_formation(&app).await;
    assign(&app, &formation_id, "app-a").await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/v1/formations/{formation_id}/resynchronize"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["formation_id"], formation_id);
}

#[tokio::test]
async fn test_constraint_registry_endpoints() {
    let harness = TestHarness::new().await;
    let app = app(&harness, WebConfig::default());

    let (status, attached) = send(
        &app,
        request(
            Method::POST,
            "/v1/constraints",
            Some(json!({
                "name": "no-loops",
                "join_point": "GenerateFormationAssignmentNotification",
                "operator": "DoNotGenerateFormationAssignmentNotificationForLoops",
                "input_template": "{}",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{attached}");

    let (_, listed) = send(&app, request(Method::GET, "/v1/constraints", None)).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let id = attached["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        request(Method::DELETE, &format!("/v1/constraints/{id}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = send(&app, request(Method::GET, "/v1/constraints", None)).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_auth_protects_v1_routes_only() {
    let harness = TestHarness::new().await;
    let config = WebConfig {
        auth: WebAuthConfig {
            enabled: true,
            api_keys: vec!["secret".to_string()],
            callback_tokens: vec!["receiver-token".to_string()],
            ..WebAuthConfig::default()
        },
        ..WebConfig::default()
    };
    let app = app(&harness, config);

    let (status, _) = send(&app, request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request(Method::GET, "/v1/constraints", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let with_key = Request::builder()
        .uri("/v1/constraints")
        .header("x-api-key", "secret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, with_key).await;
    assert_eq!(status, StatusCode::OK);

    let with_token = Request::builder()
        .uri("/v1/constraints")
        .header("authorization", "Bearer receiver-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, with_token).await;
    assert_eq!(status, StatusCode::OK);
}
