//! Mock inventory and payment endpoints the outbox workers deliver to.
//!
//! A declined step answers 400 so the delivery counts as a business
//! outcome, not a transport failure.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use saga::{ParticipantOutcome, StepRequest};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ParticipantResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type ParticipantResult = Result<(StatusCode, Json<ParticipantResponse>), ApiError>;

fn respond(endpoint: &'static str, outcome: ParticipantOutcome) -> ParticipantResult {
    let label = match &outcome {
        ParticipantOutcome::Applied => "applied",
        ParticipantOutcome::Declined { .. } => "declined",
        ParticipantOutcome::Duplicate => "duplicate",
    };
    metrics::counter!("participant_requests_total", "endpoint" => endpoint, "outcome" => label)
        .increment(1);

    let (status, body) = match outcome {
        ParticipantOutcome::Applied => (
            StatusCode::OK,
            ParticipantResponse {
                success: true,
                duplicate: false,
                error: None,
            },
        ),
        ParticipantOutcome::Duplicate => (
            StatusCode::OK,
            ParticipantResponse {
                success: true,
                duplicate: true,
                error: None,
            },
        ),
        ParticipantOutcome::Declined { reason } => (
            StatusCode::BAD_REQUEST,
            ParticipantResponse {
                success: false,
                duplicate: false,
                error: Some(reason),
            },
        ),
    };
    Ok((status, Json(body)))
}

/// POST /inventory/reserve
pub async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepRequest>,
) -> ParticipantResult {
    respond("inventory.reserve", state.inventory.reserve(&req).await?)
}

/// POST /payment/charge
pub async fn charge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepRequest>,
) -> ParticipantResult {
    respond("payment.charge", state.payment.charge(&req).await?)
}

/// POST /inventory/release
pub async fn release(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepRequest>,
) -> ParticipantResult {
    respond("inventory.release", state.inventory.release(&req).await?)
}
