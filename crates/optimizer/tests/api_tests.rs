//! Integration tests for the optimizer API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cost_optimizer::api::{create_router, AppState};
use optimizer_lib::{
    cloud::{create_adapter, AdapterConfig},
    health::{components, HealthRegistry},
    idempotency::IdempotencyEngine,
    inventory::{InventoryPipeline, PipelineConfig},
    ledger::{Ledger, MemoryLedger, SqliteLedger},
    observability::{AuditLogger, OptimizerMetrics},
    suggest::RuleBasedSuggester,
    ResourceState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    ledger: Arc<dyn Ledger>,
}

async fn setup_test_app(refresh: bool) -> TestApp {
    setup_with_ledger(refresh, Arc::new(MemoryLedger::new())).await
}

async fn setup_with_ledger(refresh: bool, ledger: Arc<dyn Ledger>) -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::INVENTORY).await;
    health_registry.register(components::LEDGER).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = OptimizerMetrics::new().unwrap();
    let adapter = create_adapter(AdapterConfig::default().dry_run(false)).unwrap();
    let pipeline = Arc::new(
        InventoryPipeline::new(
            adapter,
            Arc::new(RuleBasedSuggester::default()),
            PipelineConfig::default(),
            health_registry.clone(),
        )
        .unwrap()
        .with_metrics(metrics.clone()),
    );
    if refresh {
        pipeline.refresh().await;
    }

    let engine = IdempotencyEngine::new(ledger.clone(), AuditLogger::default())
        .with_metrics(metrics.clone());

    let state = Arc::new(AppState::new(health_registry, metrics, pipeline, engine));
    TestApp {
        router: create_router(state.clone()),
        state,
        ledger,
    }
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_action(app: &TestApp, body: Value) -> (StatusCode, Value) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/actions")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_tracks_components() {
    let app = setup_test_app(true).await;

    let (status, health) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");

    app.state
        .health_registry
        .set_degraded(components::INVENTORY, "serving stale snapshot")
        .await;
    let (status, health) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");

    app.state
        .health_registry
        .set_unhealthy(components::LEDGER, "disk full")
        .await;
    let (status, health) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["components"]["ledger"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_first_refresh() {
    let app = setup_test_app(false).await;

    let (status, readiness) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.pipeline.refresh().await;

    let (status, readiness) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_resources_and_metrics() {
    let app = setup_test_app(true).await;

    let (status, body) = get_json(&app, "/resources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 5);
    assert_eq!(body["resources"].as_array().unwrap().len(), 5);
    assert!(body["last_updated"].is_string());
    assert_eq!(body["resources"][0]["last_scanned_at"], body["last_updated"]);

    let (status, derived) = get_json(&app, "/resource-metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(derived["total_resources"], 5);
    assert_eq!(derived["total_monthly_cost"], 1095.0);
    assert!(derived["timestamp"].is_string());
}

#[tokio::test]
async fn test_empty_inventory_before_refresh() {
    let app = setup_test_app(false).await;

    let (status, body) = get_json(&app, "/resources").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 0);
    assert!(body.get("last_updated").is_none());

    let (status, body) = get_json(&app, "/optimization-suggestions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_suggestions"], 0);
    assert!(body.get("timestamp").is_none());
}

#[tokio::test]
async fn test_suggestion_filters() {
    let app = setup_test_app(true).await;

    let (status, body) = get_json(&app, "/optimization-suggestions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_suggestions"], 4);
    assert_eq!(body["total_potential_savings"], 605.0);

    let (_, body) = get_json(&app, "/optimization-suggestions?type=rightsize").await;
    assert_eq!(body["total_suggestions"], 1);
    assert_eq!(body["suggestions"][0]["resource_id"], "api-staging-02");

    let (_, body) = get_json(&app, "/optimization-suggestions?min_savings=100").await;
    assert_eq!(body["total_suggestions"], 2);
    assert_eq!(body["total_potential_savings"], 545.0);

    let (status, body) = get_json(&app, "/optimization-suggestions?type=delete_everything").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_opportunities_ranked_by_score() {
    let app = setup_test_app(true).await;

    let (status, body) = get_json(&app, "/opportunities").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);

    let order: Vec<&str> = body["opportunities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["resource_id"].as_str().unwrap())
        .collect();
    assert_eq!(
        order,
        vec!["batch-worker-03", "db-prod-01", "vol-archive-01", "api-staging-02"]
    );
    assert_eq!(body["opportunities"][0]["scoring"]["risk"], 1.0);
}

#[tokio::test]
async fn test_anomalies_and_metrics_endpoints() {
    let app = setup_test_app(true).await;

    let (status, body) = get_json(&app, "/anomalies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = get(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("cost_optimizer_resources 5"));
    assert!(text.contains("cost_optimizer_refresh_latency_seconds"));
}

#[tokio::test]
async fn test_action_runs_once() {
    let app = setup_test_app(true).await;
    let request = json!({
        "action": "stop",
        "resource_id": "web-prod-01",
        "risk": 4.0
    });

    let (status, first) = post_action(&app, request.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "completed");
    assert_eq!(first["resource_id"], "web-prod-01");

    let (status, second) = post_action(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "skipped");
    assert_eq!(second["request_id"], first["request_id"]);
    assert_eq!(second["resource_id"], "web-prod-01");

    let resource = app
        .state
        .pipeline
        .adapter()
        .get_resource("web-prod-01")
        .await
        .unwrap();
    assert_eq!(resource.state, ResourceState::Stopped);
    assert_eq!(app.ledger.stats().await.unwrap().completed, 1);
}

#[tokio::test]
async fn test_high_risk_action_awaits_approval() {
    let app = setup_test_app(true).await;
    let held = json!({
        "agent": "cost-bot",
        "action": "resize_down",
        "resource_id": "db-prod-01",
        "params": {"new_type": "db.m5.large"},
        "risk": 9.8
    });

    let (status, body) = post_action(&app, held).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "awaiting_approval");
    assert_eq!(body["resource_id"], "AWAITING_APPROVAL");
    assert_eq!(app.ledger.stats().await.unwrap().pending, 1);

    let approved = json!({
        "agent": "approver",
        "action": "resize_down",
        "resource_id": "db-prod-01",
        "params": {"new_type": "db.m5.large"},
        "risk": 1.0
    });
    let (status, replay) = post_action(&app, approved).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["status"], "completed");
    assert_eq!(replay["request_id"], body["request_id"]);
}

#[tokio::test]
async fn test_invalid_action_is_not_recorded() {
    let app = setup_test_app(true).await;

    let (status, body) = post_action(
        &app,
        json!({"action": "explode", "resource_id": "web-prod-01", "risk": 1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = post_action(
        &app,
        json!({"action": "stop", "resource_id": "web-prod-01", "risk": -1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.ledger.stats().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_failed_action_maps_to_bad_gateway() {
    let app = setup_test_app(true).await;

    let (status, body) = post_action(
        &app,
        json!({"action": "stop", "resource_id": "i-does-not-exist", "risk": 1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "EXECUTION_FAILURE");
    assert_eq!(app.ledger.stats().await.unwrap().failed, 1);
}

#[tokio::test]
async fn test_completed_action_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let request = json!({"action": "rightsize", "resource_id": "api-staging-02", "risk": 2.0});

    let ledger = SqliteLedger::open(&path).await.unwrap();
    let app = setup_with_ledger(true, Arc::new(ledger.clone())).await;
    let (status, first) = post_action(&app, request.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "completed");
    ledger.close().await;
    drop(app);

    let reopened = SqliteLedger::open(&path).await.unwrap();
    let app = setup_with_ledger(true, Arc::new(reopened)).await;
    let (status, second) = post_action(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "skipped");
    assert_eq!(second["request_id"], first["request_id"]);
}
