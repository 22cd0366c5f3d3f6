//! Error types for player and operator commands.
//!
//! Every rejection carries a machine-readable reason code that is returned
//! to the originating client only; command errors never pause the round.

use crate::engine::types::RoundPhase;
use thiserror::Error;

/// Rejection reasons for player and operator commands.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("invalid value: {0}")]
    Validation(String),

    #[error("action not allowed while round is {phase}")]
    WrongPhase { phase: RoundPhase },

    #[error("stake exceeds available balance")]
    InsufficientBalance,

    #[error("no active wager for this round")]
    NoActiveWager,

    #[error("player already holds an active wager this round")]
    DuplicateWager,

    #[error("engine unavailable")]
    EngineUnavailable,
}

impl CommandError {
    /// Reason code sent to clients in `wager_rejected` / `cashout_rejected`
    /// events and operator error responses.
    pub fn reason_code(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "invalid_value",
            CommandError::WrongPhase { .. } => "wrong_phase",
            CommandError::InsufficientBalance => "insufficient_balance",
            CommandError::NoActiveWager => "no_active_wager",
            CommandError::DuplicateWager => "duplicate_wager",
            CommandError::EngineUnavailable => "engine_unavailable",
        }
    }
}
