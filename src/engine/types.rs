//! Shared domain types for the round engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Round lifecycle phase. Order is strictly
/// Waiting -> Active -> Crashed -> (new round) Waiting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Waiting,
    Active,
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Waiting => write!(f, "waiting"),
            RoundPhase::Active => write!(f, "active"),
            RoundPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// One complete Waiting -> Active -> Crashed cycle.
///
/// The crash multiplier is chosen at Active entry and never serialized;
/// clients learn it from the `round_crashed` event only.
#[derive(Debug, Clone)]
pub struct Round {
    pub id: String,
    pub phase: RoundPhase,
    pub countdown_remaining: u32,
    /// Displayed multiplier, rounded to 2 decimal places. Resets to 1.0 at
    /// Waiting entry and is monotonically non-decreasing during Active.
    pub current_multiplier: f64,
    /// Raw growth accumulator behind the displayed multiplier.
    pub raw_multiplier: f64,
    pub crash_multiplier: Option<f64>,
    pub operator_set: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Fresh round in Waiting phase.
    pub fn new(countdown_secs: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase: RoundPhase::Waiting,
            countdown_remaining: countdown_secs,
            current_multiplier: 1.0,
            raw_multiplier: 1.0,
            crash_multiplier: None,
            operator_set: false,
            started_at: None,
        }
    }
}

/// Wager settlement state. Won, Lost, and Cancelled are terminal and
/// write-once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Active,
    Won,
    Lost,
    Cancelled,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Active => write!(f, "active"),
            WagerStatus::Won => write!(f, "won"),
            WagerStatus::Lost => write!(f, "lost"),
            WagerStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A player's stake in one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub round_id: String,
    pub player_id: String,
    pub stake: f64,
    pub placed_at: DateTime<Utc>,
    pub status: WagerStatus,
    pub cashout_multiplier: Option<f64>,
    pub payout: f64,
}

impl Wager {
    pub fn new(round_id: &str, player_id: &str, stake: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            round_id: round_id.to_string(),
            player_id: player_id.to_string(),
            stake,
            placed_at: Utc::now(),
            status: WagerStatus::Active,
            cashout_multiplier: None,
            payout: 0.0,
        }
    }
}

/// Persisted record of one finished round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashHistoryEntry {
    pub round_id: String,
    pub crash_multiplier: f64,
    pub operator_set: bool,
    pub timestamp: DateTime<Utc>,
}

/// Full view of the current round, replayed to every new subscriber so a
/// (re)joining client never waits for the next tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: String,
    pub phase: RoundPhase,
    pub countdown: u32,
    pub multiplier: f64,
    pub active_wagers: Vec<Wager>,
    pub crash_history: Vec<CrashHistoryEntry>,
}

impl Default for RoundSnapshot {
    fn default() -> Self {
        Self {
            round_id: String::new(),
            phase: RoundPhase::Waiting,
            countdown: 0,
            multiplier: 1.0,
            active_wagers: Vec::new(),
            crash_history: Vec::new(),
        }
    }
}

/// Round monetary values and multipliers to cents.
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_round_starts_waiting_at_one() {
        let round = Round::new(5);
        assert_eq!(round.phase, RoundPhase::Waiting);
        assert_eq!(round.countdown_remaining, 5);
        assert_eq!(round.current_multiplier, 1.0);
        assert!(round.crash_multiplier.is_none());
    }

    #[test]
    fn new_wager_is_active_with_no_payout() {
        let wager = Wager::new("round-1", "alice", 25.0);
        assert_eq!(wager.status, WagerStatus::Active);
        assert_eq!(wager.stake, 25.0);
        assert_eq!(wager.payout, 0.0);
        assert!(wager.cashout_multiplier.is_none());
    }

    #[test]
    fn cent_rounding() {
        assert_eq!(round_to_cents(2.49999), 2.5);
        assert_eq!(round_to_cents(1.0099), 1.01);
        assert_eq!(round_to_cents(100.0), 100.0);
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RoundPhase::Waiting).unwrap(),
            "\"waiting\""
        );
        assert_eq!(
            serde_json::to_string(&WagerStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
