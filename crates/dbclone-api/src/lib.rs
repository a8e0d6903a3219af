//! # dbclone-api
//!
//! HTTP surface of the environment cloner. Routes live under
//! `/api/database-cloner` and require a superuser session.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use dbclone_core::SessionProvider;
use dbclone_jobs::ClonerOrchestrator;

pub use auth::Superuser;
pub use config::ServerConfig;
pub use error::ApiError;
pub use sessions::{HttpSessionProvider, StaticSessionProvider};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ClonerOrchestrator>,
    pub sessions: Arc<dyn SessionProvider>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ClonerOrchestrator>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            orchestrator,
            sessions,
        }
    }
}

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Cloner routes, relative to `/api/database-cloner`.
fn cloner_routes() -> Router<AppState> {
    Router::new()
        .route("/start-clone", post(handlers::start_clone))
        .route("/clone-status/:operation_id", get(handlers::clone_status))
        .route("/cancel-clone/:operation_id", post(handlers::cancel_clone))
        .route("/validate-connection", post(handlers::validate_connection))
        .route("/operations", get(handlers::list_operations))
}

/// Build the application router with its middleware stack.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/database-cloner", cloner_routes())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(config.cors_origins()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(3600)),
        )
        .layer(RequestBodyLimitLayer::new(config.body_limit))
        .with_state(state)
}
