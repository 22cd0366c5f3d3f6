//! Request handlers for the HTTP surface.

use crate::broadcast::Publisher;
use crate::engine::types::CrashHistoryEntry;
use crate::engine::EngineHandle;
use crate::errors::CommandError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub engine: EngineHandle,
    pub publisher: Publisher,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
        version: state.version.clone(),
    })
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<CrashHistoryEntry>,
}

/// GET /history - recent crash history, newest first.
pub async fn history_handler(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        entries: state.publisher.current_snapshot().crash_history,
    })
}

#[derive(Debug, Deserialize)]
pub struct SetCrashRequest {
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct SetSequenceRequest {
    pub values: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct OperatorAck {
    pub status: String,
}

/// POST /operator/crash - queue a single crash value for the next round.
pub async fn set_single_crash_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetCrashRequest>,
) -> Result<Json<OperatorAck>, ApiError> {
    state.engine.set_single_crash(request.value).await?;
    Ok(Json(OperatorAck {
        status: "ok".to_string(),
    }))
}

/// POST /operator/sequence - activate a repeating crash sequence.
pub async fn set_crash_sequence_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetSequenceRequest>,
) -> Result<Json<OperatorAck>, ApiError> {
    state.engine.set_crash_sequence(request.values).await?;
    Ok(Json(OperatorAck {
        status: "ok".to_string(),
    }))
}

/// DELETE /operator/sequence - deactivate the crash sequence.
pub async fn deactivate_sequence_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OperatorAck>, ApiError> {
    state.engine.deactivate_sequence().await?;
    Ok(Json(OperatorAck {
        status: "ok".to_string(),
    }))
}

/// Structured error response with the command's reason code.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub reason: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub CommandError);

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CommandError::Validation(_) => StatusCode::BAD_REQUEST,
            CommandError::WrongPhase { .. } => StatusCode::CONFLICT,
            CommandError::InsufficientBalance => StatusCode::CONFLICT,
            CommandError::NoActiveWager => StatusCode::NOT_FOUND,
            CommandError::DuplicateWager => StatusCode::CONFLICT,
            CommandError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(ErrorBody {
            reason: self.0.reason_code().to_string(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}
