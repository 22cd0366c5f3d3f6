//! Broadcast publisher for round events.
//!
//! One publisher fans ordered events out to every subscriber. A new
//! subscription is handed the current round snapshot before any events,
//! so a (re)joining client is synchronized without waiting for the next
//! tick.

use crate::engine::types::{CrashHistoryEntry, RoundPhase, RoundSnapshot, Wager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events sent to clients. Per round the broadcast order is fixed:
/// state, countdown ticks, started, multiplier ticks, crashed, settlement
/// notices. Rejections are socket-local and never broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Full state replay for a new subscriber.
    Snapshot(RoundSnapshot),
    RoundState {
        round_id: String,
        phase: RoundPhase,
        countdown: u32,
        multiplier: f64,
    },
    Countdown {
        round_id: String,
        seconds_remaining: u32,
    },
    RoundStarted {
        round_id: String,
    },
    MultiplierTick {
        round_id: String,
        value: f64,
    },
    RoundCrashed {
        round_id: String,
        crash_multiplier: f64,
    },
    WagerAccepted {
        round_id: String,
        player_id: String,
        stake: f64,
    },
    WagerCancelled {
        round_id: String,
        player_id: String,
        stake: f64,
    },
    WagerRejected {
        reason: String,
        message: String,
    },
    CashoutAccepted {
        round_id: String,
        player_id: String,
        payout: f64,
        multiplier: f64,
    },
    CashoutRejected {
        reason: String,
        message: String,
    },
    RoundSettled {
        round_id: String,
        lost: Vec<LostWager>,
    },
    CrashHistory {
        entries: Vec<CrashHistoryEntry>,
    },
}

/// Settlement notice for a wager swept into the loss settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LostWager {
    pub player_id: String,
    pub stake: f64,
}

impl From<&Wager> for LostWager {
    fn from(wager: &Wager) -> Self {
        Self {
            player_id: wager.player_id.clone(),
            stake: wager.stake,
        }
    }
}

/// A subscriber's entry point: the snapshot current at subscription time
/// plus the ordered event stream from that point on.
pub struct Subscription {
    pub snapshot: RoundSnapshot,
    pub events: broadcast::Receiver<GameEvent>,
}

/// Fans events out to all subscribers and tracks the current snapshot.
#[derive(Clone)]
pub struct Publisher {
    events: broadcast::Sender<GameEvent>,
    snapshot_tx: Arc<watch::Sender<RoundSnapshot>>,
    snapshot_rx: watch::Receiver<RoundSnapshot>,
}

impl Publisher {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(RoundSnapshot::default());
        Self {
            events,
            snapshot_tx: Arc::new(snapshot_tx),
            snapshot_rx,
        }
    }

    /// Fan an event out to all current subscribers. A send with no
    /// subscribers is not an error.
    pub fn publish(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }

    /// Replace the snapshot replayed to new subscribers.
    pub fn update_snapshot(&self, snapshot: RoundSnapshot) {
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Subscribe, receiving the current snapshot immediately. The event
    /// receiver is registered before the snapshot is read so no event
    /// falls in the gap.
    pub fn subscribe(&self) -> Subscription {
        let events = self.events.subscribe();
        let snapshot = self.snapshot_rx.borrow().clone();
        Subscription { snapshot, events }
    }

    pub fn current_snapshot(&self) -> RoundSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}
