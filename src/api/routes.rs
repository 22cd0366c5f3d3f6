//! Route definitions.

use super::handlers::{
    deactivate_sequence_handler, health_handler, history_handler, set_crash_sequence_handler,
    set_single_crash_handler, AppState,
};
use super::ws::websocket_handler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/history", get(history_handler))
        // WebSocket endpoint for game state and commands
        .route("/ws", get(websocket_handler))
        // Operator crash overrides
        .route("/operator/crash", post(set_single_crash_handler))
        .route(
            "/operator/sequence",
            post(set_crash_sequence_handler).delete(deactivate_sequence_handler),
        )
        .with_state(state)
}
