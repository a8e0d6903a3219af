//! Route handlers for `/api/database-cloner/*`.
//!
//! Every cloner handler takes [`Superuser`] as its first extractor so the
//! role check happens before the path or body is looked at.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use dbclone_core::{CloneOptions, Environment};

use crate::{auth::Superuser, ApiError, AppState};

/// Body of `POST /start-clone`.
#[derive(Debug, Deserialize)]
pub struct StartCloneRequest {
    #[serde(default)]
    pub source: Option<Environment>,
    #[serde(default)]
    pub target: Option<Environment>,
    #[serde(default)]
    pub options: Option<CloneOptions>,
}

/// Body of `POST /validate-connection`.
#[derive(Debug, Deserialize)]
pub struct ValidateConnectionRequest {
    #[serde(default)]
    pub environment: Option<Environment>,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn operation_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::BadRequest("Invalid operation id".to_string()))
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn start_clone(
    caller: Superuser,
    State(state): State<AppState>,
    payload: Result<Json<StartCloneRequest>, JsonRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let request = json_body(payload)?;
    let (source, target) = match (request.source, request.target) {
        (Some(source), Some(target)) => (source, target),
        _ => {
            return Err(ApiError::BadRequest(
                "Source and target environments are required".to_string(),
            ))
        }
    };
    let options = request.options.unwrap_or_default();

    let source_name = source.name.clone();
    let target_name = target.name.clone();
    let operation_id = state
        .orchestrator
        .start_clone(source, target, options)
        .await?;

    info!(
        subsystem = "api",
        op = "start_clone",
        operation_id = %operation_id,
        source = %source_name,
        target = %target_name,
        user = caller.session.user.email.as_deref().unwrap_or("-"),
        "Clone requested"
    );

    Ok(Json(json!({ "operationId": operation_id })))
}

pub async fn clone_status(
    _caller: Superuser,
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let id = operation_id(path)?;
    let operation = state
        .orchestrator
        .get_operation_status(id)
        .await
        .ok_or_else(|| ApiError::NotFound("Operation not found".to_string()))?;

    Ok(Json(json!({ "status": operation })))
}

pub async fn cancel_clone(
    caller: Superuser,
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let id = operation_id(path)?;
    if !state.orchestrator.cancel_operation(id).await {
        return Err(ApiError::NotFound(
            "Operation not found or already finished".to_string(),
        ));
    }

    info!(
        subsystem = "api",
        op = "cancel_clone",
        operation_id = %id,
        user = caller.session.user.email.as_deref().unwrap_or("-"),
        "Clone cancellation requested"
    );

    Ok(Json(json!({ "success": true })))
}

pub async fn validate_connection(
    _caller: Superuser,
    State(state): State<AppState>,
    payload: Result<Json<ValidateConnectionRequest>, JsonRejection>,
) -> Result<Json<JsonValue>, ApiError> {
    let environment = json_body(payload)?
        .environment
        .ok_or_else(|| ApiError::BadRequest("Environment is required".to_string()))?;
    if environment.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Environment name is required".to_string(),
        ));
    }

    let result = state
        .orchestrator
        .validator()
        .validate_connection(&environment)
        .await;

    Ok(Json(json!({ "result": result })))
}

pub async fn list_operations(
    _caller: Superuser,
    State(state): State<AppState>,
) -> Json<JsonValue> {
    let operations = state.orchestrator.list_operations().await;
    Json(json!({ "operations": operations }))
}
