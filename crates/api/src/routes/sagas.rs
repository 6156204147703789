//! Saga endpoints: start an order saga and read its log.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::SagaId;
use saga::{SagaInstance, SagaLogEntry, SagaState};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSagaRequest {
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub amount: f64,
    /// Caller-chosen saga id; generated when absent.
    #[serde(default)]
    pub saga_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSagaResponse {
    pub order_id: SagaId,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaResponse {
    pub saga_id: SagaId,
    pub state: SagaState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub log: Vec<SagaLogEntry>,
}

fn parse_saga_id(raw: &str) -> Result<SagaId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid saga ID: {raw}")))
}

/// POST /saga/orders: logs `start`, enqueues the reservation and returns
/// before anything is delivered.
#[tracing::instrument(skip(state, req))]
pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<StartSagaResponse>), ApiError> {
    let saga_id = req.saga_id.as_deref().map(parse_saga_id).transpose()?;

    let saga_id = state
        .orchestrator
        .start(saga_id, req.items.clone(), req.amount)
        .await?;
    state
        .orchestrator
        .reserve_inventory(saga_id, &req.items)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartSagaResponse {
            order_id: saga_id,
            status: "PENDING".to_string(),
        }),
    ))
}

/// GET /saga/orders/{id}: the saga's derived state and its full log.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga_id = parse_saga_id(&id)?;

    // One read, so the folded state always matches the log returned with it
    let log = state.orchestrator.log(saga_id).await?;
    let Some(saga) = SagaInstance::from_entries(&log) else {
        return Err(ApiError::NotFound(format!("Saga {saga_id} not found")));
    };

    Ok(Json(SagaResponse {
        saga_id,
        state: saga.state(),
        failure_reason: saga.failure_reason().map(str::to_string),
        log,
    }))
}
