//! HTTP tests for the `/api/database-cloner` routes.
//!
//! This test suite validates:
//! - superuser enforcement (401 without a session, 403 for other roles)
//!   before any orchestrator involvement
//! - request validation (400 for missing environments, bad JSON, bad ids)
//! - the start / poll / cancel flow over in-memory databases
//! - connection validation results surfaced as data, not HTTP errors
//! - credentials never echoed back in responses

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use dbclone_api::{router, AppState, ServerConfig, StaticSessionProvider};
use dbclone_core::{Error, Result, Session, SessionProvider, TableInfo};
use dbclone_db::{ConnectFailure, MockBackend, MockConnector};
use dbclone_jobs::{ClonerOrchestrator, OrchestratorConfig};

const ROOT_TOKEN: &str = "root-token";
const ADMIN_TOKEN: &str = "admin-token";

// ============================================================================
// TEST HARNESS
// ============================================================================

struct TestApp {
    router: Router,
    orchestrator: Arc<ClonerOrchestrator>,
    source: MockBackend,
    target: MockBackend,
}

impl TestApp {
    fn new() -> Self {
        let source = MockBackend::new()
            .with_table(
                TableInfo::new("bookings").with_references(["lofts"]),
                MockBackend::generate_rows(2),
            )
            .with_table(TableInfo::new("lofts"), MockBackend::generate_rows(3));
        let target = MockBackend::new()
            .with_table(TableInfo::new("bookings"), vec![])
            .with_table(TableInfo::new("lofts"), vec![]);

        let connector = MockConnector::new()
            .with_backend("production", source.clone())
            .with_backend("development", target.clone())
            .with_failure("staging", ConnectFailure::Authentication);
        let sessions = StaticSessionProvider::new()
            .with_session(ROOT_TOKEN, "superuser")
            .with_session(ADMIN_TOKEN, "admin");

        Self::with_sessions(source, target, connector, Arc::new(sessions))
    }

    fn with_sessions(
        source: MockBackend,
        target: MockBackend,
        connector: MockConnector,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        let config = OrchestratorConfig::default()
            .with_write_retries(0)
            .with_default_batch_size(2);
        let orchestrator = Arc::new(ClonerOrchestrator::new(Arc::new(connector), config));
        let router = router(
            AppState::new(orchestrator.clone(), sessions),
            &ServerConfig::default(),
        );
        Self {
            router,
            orchestrator,
            source,
            target,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Poll clone-status over HTTP until the operation is terminal.
    async fn wait_for_terminal(&self, id: &str) -> Value {
        let start = Instant::now();
        loop {
            let response = self
                .get(&format!("/api/database-cloner/clone-status/{}", id), Some(ROOT_TOKEN))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            let status = body["status"]["status"].as_str().unwrap().to_string();
            if matches!(status.as_str(), "completed" | "failed" | "cancelled") {
                return body["status"].clone();
            }
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "operation {} still {}",
                id,
                status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn environment(name: &str) -> Value {
    json!({
        "name": name,
        "credentials": {
            "url": format!("postgres://cloner@{}.db.internal/loft", name),
            "key": "hunter2"
        }
    })
}

fn clone_request() -> Value {
    json!({
        "source": environment("production"),
        "target": environment("development"),
    })
}

/// Session provider whose backing service is down.
struct UnavailableSessions;

#[async_trait]
impl SessionProvider for UnavailableSessions {
    async fn get_session(&self, _token: &str) -> Result<Option<Session>> {
        Err(Error::Request("session service returned 503".to_string()))
    }
}

// ============================================================================
// AUTHORIZATION
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_session() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();

    let response = app
        .post("/api/database-cloner/start-clone", None, clone_request())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Authentication required");

    let response = app
        .post("/api/database-cloner/start-clone", Some("unknown"), clone_request())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(app.orchestrator.list_operations().await.is_empty());
}

#[tokio::test]
async fn test_non_superuser_is_forbidden_before_orchestrator() {
    let app = TestApp::new();

    let response = app
        .post("/api/database-cloner/start-clone", Some(ADMIN_TOKEN), clone_request())
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Superuser role required");

    let id = Uuid::now_v7();
    for uri in [
        format!("/api/database-cloner/clone-status/{}", id),
        "/api/database-cloner/operations".to_string(),
    ] {
        let response = app.get(&uri, Some(ADMIN_TOKEN)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "GET {}", uri);
    }
    let response = app
        .post(
            &format!("/api/database-cloner/cancel-clone/{}", id),
            Some(ADMIN_TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(app.orchestrator.list_operations().await.is_empty());
    assert!(!app.target.was_mutated());
}

#[tokio::test]
async fn test_auth_checked_before_body() {
    let app = TestApp::new();

    let request = Request::builder()
        .method("POST")
        .uri("/api/database-cloner/start-clone")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_service_failure_is_internal_error() {
    let app = TestApp::with_sessions(
        MockBackend::new(),
        MockBackend::new(),
        MockConnector::new(),
        Arc::new(UnavailableSessions),
    );

    let response = app
        .get("/api/database-cloner/operations", Some(ROOT_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// INPUT VALIDATION
// ============================================================================

#[tokio::test]
async fn test_start_clone_requires_source_and_target() {
    let app = TestApp::new();

    let response = app
        .post(
            "/api/database-cloner/start-clone",
            Some(ROOT_TOKEN),
            json!({ "source": environment("production") }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("required"));

    assert!(app.orchestrator.list_operations().await.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = TestApp::new();

    let request = Request::builder()
        .method("POST")
        .uri("/api/database-cloner/start-clone")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", ROOT_TOKEN))
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_invalid_options_are_bad_request() {
    let app = TestApp::new();

    let mut request = clone_request();
    request["options"] = json!({ "batchSize": 0 });
    let response = app
        .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), request)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post(
            "/api/database-cloner/start-clone",
            Some(ROOT_TOKEN),
            json!({
                "source": environment("production"),
                "target": environment("production"),
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.orchestrator.list_operations().await.is_empty());
}

#[tokio::test]
async fn test_malformed_operation_id_is_bad_request() {
    let app = TestApp::new();

    let response = app
        .get("/api/database-cloner/clone-status/not-a-uuid", Some(ROOT_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// CLONE LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_start_clone_and_poll_to_completion() {
    let app = TestApp::new();

    let response = app
        .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), clone_request())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let id = body["operationId"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&id).is_ok());

    let operation = app.wait_for_terminal(&id).await;
    assert_eq!(operation["status"], "completed");
    assert_eq!(operation["progress"]["tablesCompleted"], 2);
    assert_eq!(operation["progress"]["rowsCopied"], 5);
    assert_eq!(operation["source"]["name"], "production");
    assert_eq!(app.target.row_count("lofts"), 3);
    assert_eq!(app.target.row_count("bookings"), 2);
    assert!(!app.source.was_mutated());
}

#[tokio::test]
async fn test_status_never_contains_credentials() {
    let app = TestApp::new();

    let response = app
        .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), clone_request())
        .await;
    let id = body_json(response).await["operationId"]
        .as_str()
        .unwrap()
        .to_string();
    let operation = app.wait_for_terminal(&id).await;

    let response = app
        .get("/api/database-cloner/operations", Some(ROOT_TOKEN))
        .await;
    let listing = body_json(response).await;

    for text in [operation.to_string(), listing.to_string()] {
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("postgres://"));
        assert!(!text.contains("credentials"));
    }
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let app = TestApp::new();
    let id = Uuid::now_v7();

    let response = app
        .get(&format!("/api/database-cloner/clone-status/{}", id), Some(ROOT_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post(
            &format!("/api/database-cloner/cancel-clone/{}", id),
            Some(ROOT_TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_finished_operation_is_not_found() {
    let app = TestApp::new();

    let response = app
        .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), clone_request())
        .await;
    let id = body_json(response).await["operationId"]
        .as_str()
        .unwrap()
        .to_string();
    let before = app.wait_for_terminal(&id).await;

    let response = app
        .post(
            &format!("/api/database-cloner/cancel-clone/{}", id),
            Some(ROOT_TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let after = app.wait_for_terminal(&id).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_cancel_running_operation() {
    let app = TestApp::new();
    let gate = app.source.gate_reads("bookings");

    let response = app
        .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), clone_request())
        .await;
    let id = body_json(response).await["operationId"]
        .as_str()
        .unwrap()
        .to_string();

    gate.entered().await;
    let response = app
        .post(
            &format!("/api/database-cloner/cancel-clone/{}", id),
            Some(ROOT_TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
    gate.release();

    let operation = app.wait_for_terminal(&id).await;
    assert_eq!(operation["status"], "cancelled");
    assert_eq!(operation["cancelRequested"], true);
    assert_eq!(operation["progress"]["tablesCompleted"], 1);
    assert_eq!(app.target.row_count("lofts"), 3);
    assert_eq!(app.target.row_count("bookings"), 0);
}

#[tokio::test]
async fn test_list_operations() {
    let app = TestApp::new();

    for _ in 0..2 {
        let response = app
            .post("/api/database-cloner/start-clone", Some(ROOT_TOKEN), clone_request())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .get("/api/database-cloner/operations", Some(ROOT_TOKEN))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["operations"].as_array().unwrap().len(), 2);
}

// ============================================================================
// CONNECTION VALIDATION
// ============================================================================

#[tokio::test]
async fn test_validate_connection_success() {
    let app = TestApp::new();

    let response = app
        .post(
            "/api/database-cloner/validate-connection",
            Some(ROOT_TOKEN),
            json!({ "environment": environment("production") }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await["result"].clone();
    assert_eq!(result["success"], true);
    assert_eq!(result["metadata"]["tablesFound"], 2);
    assert_eq!(result["metadata"]["permissionsOk"], true);
    assert!(!app.source.was_mutated());
}

#[tokio::test]
async fn test_validate_connection_failure_is_data() {
    let app = TestApp::new();

    let response = app
        .post(
            "/api/database-cloner/validate-connection",
            Some(ROOT_TOKEN),
            json!({ "environment": environment("staging") }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await["result"].clone();
    assert_eq!(result["success"], false);
    assert_eq!(result["errorKind"], "authentication");
    assert!(result["error"].is_string());
    assert!(!result.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_validate_connection_requires_environment() {
    let app = TestApp::new();

    let response = app
        .post(
            "/api/database-cloner/validate-connection",
            Some(ROOT_TOKEN),
            json!({}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// LIVE SERVER
// ============================================================================

#[tokio::test]
async fn test_served_over_tcp() {
    let app = TestApp::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/database-cloner/start-clone", addr))
        .bearer_auth(ROOT_TOKEN)
        .json(&clone_request())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    let id = body["operationId"].as_str().unwrap().to_string();

    let operation = app.wait_for_terminal(&id).await;
    assert_eq!(operation["status"], "completed");
}
