//! In-process HTTP tests over the full router: validation, envelopes,
//! detail projections, and admin surfaces.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use kpath::{build_router, BackendKind, CoreConfig, ServerConfig, ServerState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct TestServer {
    state: Arc<ServerState>,
    router: axum::Router,
    _dir: TempDir,
}

fn test_server() -> TestServer {
    let dir = TempDir::new().expect("temp dir");
    let core = CoreConfig {
        backend: BackendKind::Hashed,
        index_dir: dir.path().join("indexes"),
        model_dir: dir.path().join("models"),
        ..Default::default()
    };
    let state = Arc::new(
        ServerState::new(ServerConfig::default(), &core, common::fixture_registry())
            .expect("state builds"),
    );
    TestServer {
        router: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

async fn built_server() -> TestServer {
    let server = test_server();
    server
        .state
        .stack
        .manager
        .build_all()
        .await
        .expect("index build");
    server
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("request completes");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, value)
}

fn post_search(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/search")
        .header("content-type", "application/json")
        .header("x-caller-id", "test-agent")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

#[tokio::test(flavor = "multi_thread")]
async fn search_before_build_returns_not_ready_envelope() {
    let server = test_server();
    let (status, body) = send(&server.router, post_search(json!({"query": "payments"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], json!("IndexNotReady"));
    assert_eq!(body["retryable"], json!(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn post_search_returns_complete_envelope() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        post_search(json!({"query": "payment processing", "limit": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], json!("payment processing"));
    assert_eq!(body["search_mode"], json!("agents_only"));
    assert!(body["results"].is_array());
    assert_eq!(
        body["results"].as_array().unwrap().len(),
        body["total_results"].as_u64().unwrap() as usize
    );
    assert!(body["search_time_ms"].is_u64());
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

    // Telemetry counted the caller.
    assert_eq!(*server.state.query_counts.get("test-agent").unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn get_search_accepts_comma_separated_arrays() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        get("/api/v1/search?query=reporting&mode=agents_only&domain_filter=Finance,Payments&limit=5"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    for result in body["results"].as_array().unwrap() {
        let domains = result["service"]["domains"].as_array().cloned().unwrap_or_default();
        assert!(
            domains.iter().any(|d| d == "Finance" || d == "Payments"),
            "result {result} escaped the domain filter"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_body_field_is_invalid_request() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        post_search(json!({"query": "x", "shiny_flag": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("InvalidRequest"));
    assert_eq!(body["retryable"], json!(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_mode_is_invalid_request() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        post_search(json!({"query": "x", "mode": "everything"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("InvalidRequest"));
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_query_is_rejected() {
    let server = built_server().await;
    let (status, body) = send(&server.router, post_search(json!({"query": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("QueryEmpty"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tools_only_result_carries_recommended_tool_with_detail_link() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        post_search(json!({"query": "process a credit card payment", "mode": "tools_only"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let first = &body["results"][0];
    let tool = &first["recommended_tool"];
    assert!(tool["tool_name"].is_string());
    let url = tool["details_url"].as_str().unwrap();
    assert!(url.starts_with("/api/v1/search/tools/"));

    // The emitted link resolves against the same router.
    let (status, detail) = send(&server.router, get(url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["tool_name"], tool["tool_name"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_detail_views_project_the_registry() {
    let server = built_server().await;

    let (status, schema) = send(&server.router, get("/api/v1/search/tools/10/schema")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(schema["input_schema"].is_object());
    assert!(schema["output_schema"].is_object());

    let (status, examples) = send(&server.router, get("/api/v1/search/tools/10/examples")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(examples["example_calls"].is_object());

    let (status, summary) = send(&server.router, get("/api/v1/search/tools/10/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["service_name"], json!("PaymentGatewayAPI"));

    let (status, body) = send(&server.router, get("/api/v1/search/tools/9999/details")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NotFound"));

    let (status, _) = send(&server.router, get("/api/v1/search/tools/10/everything")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn similar_endpoint_excludes_the_anchor_service() {
    let server = built_server().await;
    let (status, body) = send(&server.router, get("/api/v1/search/similar/1?limit=4")).await;
    assert_eq!(status, StatusCode::OK);
    for result in body["results"].as_array().unwrap() {
        assert_ne!(result["service_id"], json!(1));
    }

    let (status, body) = send(&server.router, get("/api/v1/search/similar/404404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NotFound"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_endpoint_reports_the_manager() {
    let server = built_server().await;
    let (status, body) = send(&server.router, get("/api/v1/search/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["built"], json!(true));
    assert_eq!(body["svc_count"], json!(6));
    assert_eq!(body["tool_count"], json!(7));
    assert_eq!(body["model"], json!("hashed-stub"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuild_and_initialize_accept_immediately() {
    let server = built_server().await;
    for uri in ["/api/v1/search/rebuild", "/api/v1/search/initialize"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&server.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], json!(true));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn health_and_readiness_follow_the_lifecycle() {
    let server = test_server();
    let (status, _) = send(&server.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&server.router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], json!(false));

    server.state.stack.manager.build_all().await.expect("build");
    let (status, body) = send(&server.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], json!(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_routes_get_the_envelope_too() {
    let server = test_server();
    let (status, body) = send(&server.router, get("/api/v2/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NotFound"));
}

#[tokio::test(flavor = "multi_thread")]
async fn minimal_response_mode_fits_its_budget_over_http() {
    let server = built_server().await;
    let (status, body) = send(
        &server.router,
        post_search(json!({
            "query": "payment processing",
            "mode": "tools_only",
            "response_mode": "minimal"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    for result in body["results"].as_array().unwrap() {
        let serialized = serde_json::to_string(result).unwrap();
        assert!(
            serialized.len() <= 300 * 4,
            "minimal result exceeded budget: {} chars",
            serialized.len()
        );
    }
}
