//! WebSocket surface: snapshot-first replay plus the live event stream.
//!
//! Each connection immediately receives the full round snapshot, then the
//! ordered broadcast stream. Client frames carry wager commands; their
//! rejections go back on this socket only and are never broadcast.

use super::handlers::AppState;
use crate::broadcast::GameEvent;
use crate::errors::CommandError;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub player_id: String,
}

/// Commands a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    PlaceWager { amount: f64 },
    CancelWager,
    CashOut,
}

/// GET /ws?player_id=..
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, query.player_id, state))
}

async fn handle_connection(socket: WebSocket, player_id: String, state: Arc<AppState>) {
    info!(player_id = %player_id, "websocket client connected");

    let subscription = state.publisher.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // Snapshot first so a (re)joining client never waits for the next tick.
    let snapshot = GameEvent::Snapshot(subscription.snapshot);
    match serde_json::to_string(&snapshot) {
        Ok(frame) => {
            if sender.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!(player_id = %player_id, "failed to serialize snapshot: {}", e);
            return;
        }
    }

    // Socket-local events (rejections) merge with the broadcast stream.
    let (local_tx, mut local_rx) = mpsc::unbounded_channel::<GameEvent>();
    let mut events = subscription.events;

    let send_player = player_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                broadcast = events.recv() => match broadcast {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(player_id = %send_player, skipped, "client lagging, events dropped");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                local = local_rx.recv() => match local {
                    Some(event) => event,
                    None => break,
                },
            };
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let engine = state.engine.clone();
    let recv_player = player_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    handle_command(&engine, &recv_player, &text, &local_tx).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(player_id = %recv_player, "websocket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }
    info!(player_id = %player_id, "websocket client disconnected");
}

async fn handle_command(
    engine: &crate::engine::EngineHandle,
    player_id: &str,
    text: &str,
    local_tx: &mpsc::UnboundedSender<GameEvent>,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            let _ = local_tx.send(GameEvent::WagerRejected {
                reason: "invalid_value".to_string(),
                message: format!("unrecognized command: {}", e),
            });
            return;
        }
    };

    match command {
        ClientCommand::PlaceWager { amount } => {
            if let Err(err) = engine.place_wager(player_id, amount).await {
                let _ = local_tx.send(reject_wager(err));
            }
        }
        ClientCommand::CancelWager => {
            if let Err(err) = engine.cancel_wager(player_id).await {
                let _ = local_tx.send(reject_wager(err));
            }
        }
        ClientCommand::CashOut => {
            if let Err(err) = engine.cash_out(player_id).await {
                let _ = local_tx.send(GameEvent::CashoutRejected {
                    reason: err.reason_code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }
}

fn reject_wager(err: CommandError) -> GameEvent {
    GameEvent::WagerRejected {
        reason: err.reason_code().to_string(),
        message: err.to_string(),
    }
}
