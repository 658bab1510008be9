//! Integration tests for mutr-node API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt;

use helpers::{StubEngine, TestEnv};
use mutr_node::models::AnalysisStatus;
use mutr_node::{build_router, AppState};

/// Test helper: router over a running pipeline
async fn create_test_app(engine: StubEngine) -> (axum::Router, TestEnv) {
    let env = TestEnv::start(engine).await;
    let state = AppState::new(
        env.pool.clone(),
        env.event_bus.clone(),
        &env.pipeline,
        "http://engine.test".to_string(),
    );
    (build_router(state), env)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _env) = create_test_app(StubEngine::new()).await;

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "mutr-node");
    assert_eq!(body["engine_url"], "http://engine.test");
    assert_eq!(body["active_analyses"], 0);
}

#[tokio::test]
async fn test_create_root_node() {
    let (app, env) = create_test_app(StubEngine::new()).await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/nodes", json!({ "content": "hello galaxy" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["content"], "hello galaxy");
    assert_eq!(body["parent_id"], Value::Null);
    assert_eq!(body["root_id"], body["id"]);
    assert_eq!(body["mutation_filter"], "ORIGIN");

    let id = body["id"].as_i64().unwrap();
    env.wait_for(id, AnalysisStatus::Completed).await;

    let (status, body) = send(&app, get(&format!("/api/v1/nodes/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis_status"], "COMPLETED");
    assert_eq!(body["topic"], "topic:hello galaxy");
    assert_eq!(body["emotion"], "joy");
}

#[tokio::test]
async fn test_create_child_and_fetch_galaxy() {
    let (app, env) = create_test_app(StubEngine::new()).await;

    let (_, root) = send(&app, post_json("/api/v1/nodes", json!({ "content": "root" }))).await;
    let root_id = root["id"].as_i64().unwrap();

    let (status, child) = send(
        &app,
        post_json(
            "/api/v1/nodes",
            json!({ "parent_id": root_id, "content": "branch" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(child["root_id"], root_id);
    env.wait_for(child["id"].as_i64().unwrap(), AnalysisStatus::Completed)
        .await;

    let (status, galaxy) = send(&app, get(&format!("/api/v1/galaxies/{}", root_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(galaxy["root_id"], root_id);
    let nodes = galaxy["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["content"], "root");
    assert_eq!(nodes[1]["content"], "branch");
}

#[tokio::test]
async fn test_galaxy_keyword_filters_nodes() {
    let (app, env) = create_test_app(StubEngine::new()).await;

    let (_, root) = send(&app, post_json("/api/v1/nodes", json!({ "content": "root" }))).await;
    let root_id = root["id"].as_i64().unwrap();
    let (_, child) = send(
        &app,
        post_json(
            "/api/v1/nodes",
            json!({ "parent_id": root_id, "content": "branch" }),
        ),
    )
    .await;
    env.wait_for(child["id"].as_i64().unwrap(), AnalysisStatus::Completed)
        .await;

    let (status, galaxy) = send(
        &app,
        get(&format!("/api/v1/galaxies/{}?keyword=branch", root_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let nodes = galaxy["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["content"], "branch");

    // Known galaxy, no match: empty list rather than 404
    let (status, galaxy) = send(
        &app,
        get(&format!("/api/v1/galaxies/{}?keyword=leaf", root_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(galaxy["nodes"].as_array().unwrap().is_empty());

    let (status, _) = send(&app, get("/api/v1/galaxies/4242?keyword=branch")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blank_content_is_rejected() {
    let (app, env) = create_test_app(StubEngine::new()).await;

    let (status, body) = send(&app, post_json("/api/v1/nodes", json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(env.engine.call_count(), 0);
}

#[tokio::test]
async fn test_missing_parent_is_not_found() {
    let (app, _env) = create_test_app(StubEngine::new()).await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/nodes", json!({ "parent_id": 999, "content": "orphan" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_node_and_galaxy_are_not_found() {
    let (app, _env) = create_test_app(StubEngine::new()).await;

    let (status, _) = send(&app, get("/api/v1/nodes/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/v1/galaxies/42")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_in_flight_node_conflicts() {
    let (app, _env) =
        create_test_app(StubEngine::new().with_delay(Duration::from_secs(5))).await;

    let (_, node) = send(&app, post_json("/api/v1/nodes", json!({ "content": "slow" }))).await;
    let id = node["id"].as_i64().unwrap();

    // PENDING or PROCESSING: neither can be retried
    let (status, body) = send(
        &app,
        post_json(&format!("/api/v1/nodes/{}/retry", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_retry_failed_node() {
    let (app, env) = create_test_app(StubEngine::new().failing_first("fragile", 3)).await;

    let (_, node) = send(&app, post_json("/api/v1/nodes", json!({ "content": "fragile" }))).await;
    let id = node["id"].as_i64().unwrap();
    env.wait_for(id, AnalysisStatus::Failed).await;
    env.wait_idle().await;

    let (status, body) = send(
        &app,
        post_json(&format!("/api/v1/nodes/{}/retry", id), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis_status"], "PENDING");

    let node = env.wait_for(id, AnalysisStatus::Completed).await;
    assert_eq!(node.last_error, None);
    assert_eq!(env.engine.calls_for("fragile").len(), 4);
}

#[tokio::test]
async fn test_create_emits_node_created_event() {
    let (app, env) = create_test_app(StubEngine::new()).await;
    let mut rx = env.event_bus.subscribe();

    let (_, node) = send(&app, post_json("/api/v1/nodes", json!({ "content": "announce" }))).await;

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type(), "NodeCreated");
    assert_eq!(event.node_id(), node["id"].as_i64().unwrap());
}
