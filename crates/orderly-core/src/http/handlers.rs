//! order と診断用エンドポイントの handler
//!
//! body の検証だけをここで行い、残りは OrderCoordinator に任せる。

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::domain::{OrderAck, OrderDocument, OrderId};
use crate::http::AppState;
use crate::http::problem::{ApiProblem, ApiResult};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn create_order(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<OrderAck>> {
    let document = parse_document(body)?;
    let ack = state.coordinator.create(document).await?;
    Ok(Json(ack))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderDocument>> {
    let id = OrderId::parse(id)?;
    let document = state.coordinator.get(&id).await?;
    Ok(Json(document))
}

pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<OrderAck>> {
    let id = OrderId::parse(id)?;
    let patch = parse_document(body)?;
    let ack = state.coordinator.update(&id, patch).await?;
    Ok(Json(ack))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OrderAck>> {
    let id = OrderId::parse(id)?;
    let ack = state.coordinator.delete(&id).await?;
    Ok(Json(ack))
}

/// Diagnostic: publish `TEST_MESSAGE` to the queue.
///
/// Always 200; a failure is reported as `{"error": ...}`.
pub async fn test_rabbit(State(state): State<AppState>) -> Json<Value> {
    match state.coordinator.publish_test_message().await {
        Ok(()) => Json(json!({ "status": "test message published" })),
        Err(err) => {
            warn!(error = %err, "test message not published");
            Json(json!({ "error": err.to_string() }))
        }
    }
}

fn parse_document(body: Result<Json<Value>, JsonRejection>) -> ApiResult<OrderDocument> {
    let Json(value) = body.map_err(|rejection| ApiProblem::validation(rejection.body_text()))?;
    Ok(OrderDocument::from_value(value)?)
}
