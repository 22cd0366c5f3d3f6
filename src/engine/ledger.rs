//! Wager ledger: per-round stakes and long-lived player balances.
//!
//! Balances are mutated only through `place`, `cancel`, `cash_out`, and
//! `settle_all_as_lost`. Every mutation yields append-only balance-change
//! rows for the persistence gateway; the ledger itself never blocks on I/O.

use crate::config::LedgerConfig;
use crate::engine::types::{round_to_cents, RoundPhase, Wager, WagerStatus};
use crate::errors::CommandError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Append-only record of one balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    pub player_id: String,
    /// Signed delta applied to the balance.
    pub amount: f64,
    pub balance_after: f64,
    pub reason: BalanceChangeReason,
    pub round_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeReason {
    Seed,
    StakePlaced,
    StakeRefunded,
    CashoutPaid,
}

pub struct WagerLedger {
    config: LedgerConfig,
    balances: HashMap<String, f64>,
    /// Active wagers for the current round, at most one per player.
    active: HashMap<String, Wager>,
}

impl WagerLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            balances: HashMap::new(),
            active: HashMap::new(),
        }
    }

    pub fn balance(&self, player_id: &str) -> Option<f64> {
        self.balances.get(player_id).copied()
    }

    pub fn active_wager(&self, player_id: &str) -> Option<&Wager> {
        self.active.get(player_id)
    }

    /// Active wagers sorted by placement time, oldest first.
    pub fn active_wagers(&self) -> Vec<Wager> {
        let mut wagers: Vec<Wager> = self.active.values().cloned().collect();
        wagers.sort_by(|a, b| a.placed_at.cmp(&b.placed_at));
        wagers
    }

    /// Place a stake for the current round. Waiting phase only; the stake
    /// is deducted immediately and refunded only by an explicit cancel.
    pub fn place(
        &mut self,
        phase: RoundPhase,
        round_id: &str,
        player_id: &str,
        stake: f64,
    ) -> Result<(Wager, Vec<BalanceChange>), CommandError> {
        if phase != RoundPhase::Waiting {
            return Err(CommandError::WrongPhase { phase });
        }
        if !stake.is_finite() || stake <= 0.0 {
            return Err(CommandError::Validation(
                "stake must be greater than zero".to_string(),
            ));
        }
        if stake > self.config.max_stake {
            return Err(CommandError::Validation(format!(
                "stake exceeds maximum of {}",
                self.config.max_stake
            )));
        }
        if self.active.contains_key(player_id) {
            return Err(CommandError::DuplicateWager);
        }

        let stake = round_to_cents(stake);
        // Reject against the balance the player would have; an unknown
        // player is only seeded once the placement is known to succeed, so
        // a rejection leaves no state behind.
        let projected = self
            .balances
            .get(player_id)
            .copied()
            .unwrap_or_else(|| round_to_cents(self.config.starting_balance));
        if stake > projected {
            return Err(CommandError::InsufficientBalance);
        }

        let mut rows = Vec::new();
        self.ensure_player(player_id, round_id, &mut rows);
        let balance = self.balances.entry(player_id.to_string()).or_insert(0.0);
        *balance = round_to_cents(*balance - stake);
        rows.push(BalanceChange {
            player_id: player_id.to_string(),
            amount: -stake,
            balance_after: *balance,
            reason: BalanceChangeReason::StakePlaced,
            round_id: round_id.to_string(),
            timestamp: Utc::now(),
        });

        let wager = Wager::new(round_id, player_id, stake);
        self.active.insert(player_id.to_string(), wager.clone());
        Ok((wager, rows))
    }

    /// Cancel the player's wager and refund the stake. Waiting phase only.
    pub fn cancel(
        &mut self,
        phase: RoundPhase,
        player_id: &str,
    ) -> Result<(Wager, Vec<BalanceChange>), CommandError> {
        if phase != RoundPhase::Waiting {
            return Err(CommandError::WrongPhase { phase });
        }
        let mut wager = self
            .active
            .remove(player_id)
            .ok_or(CommandError::NoActiveWager)?;

        let balance = self.balances.entry(player_id.to_string()).or_insert(0.0);
        *balance = round_to_cents(*balance + wager.stake);
        wager.status = WagerStatus::Cancelled;

        let rows = vec![BalanceChange {
            player_id: player_id.to_string(),
            amount: wager.stake,
            balance_after: *balance,
            reason: BalanceChangeReason::StakeRefunded,
            round_id: wager.round_id.clone(),
            timestamp: Utc::now(),
        }];
        Ok((wager, rows))
    }

    /// Convert the player's active wager into a Won settlement at the given
    /// multiplier. Active phase only.
    pub fn cash_out(
        &mut self,
        phase: RoundPhase,
        player_id: &str,
        multiplier: f64,
    ) -> Result<(Wager, Vec<BalanceChange>), CommandError> {
        if phase != RoundPhase::Active {
            return Err(CommandError::WrongPhase { phase });
        }
        let mut wager = self
            .active
            .remove(player_id)
            .ok_or(CommandError::NoActiveWager)?;

        let payout = round_to_cents(wager.stake * multiplier);
        let balance = self.balances.entry(player_id.to_string()).or_insert(0.0);
        *balance = round_to_cents(*balance + payout);

        wager.status = WagerStatus::Won;
        wager.cashout_multiplier = Some(multiplier);
        wager.payout = payout;

        let rows = vec![BalanceChange {
            player_id: player_id.to_string(),
            amount: payout,
            balance_after: *balance,
            reason: BalanceChangeReason::CashoutPaid,
            round_id: wager.round_id.clone(),
            timestamp: Utc::now(),
        }];
        Ok((wager, rows))
    }

    /// Sweep every remaining active wager into a loss. Stakes were already
    /// deducted at placement, so no balance changes. Called exactly once
    /// per round, at Crashed entry.
    pub fn settle_all_as_lost(&mut self) -> Vec<Wager> {
        let mut lost: Vec<Wager> = self
            .active
            .drain()
            .map(|(_, mut wager)| {
                wager.status = WagerStatus::Lost;
                wager.payout = 0.0;
                wager
            })
            .collect();
        lost.sort_by(|a, b| a.placed_at.cmp(&b.placed_at));
        lost
    }

    fn ensure_player(&mut self, player_id: &str, round_id: &str, rows: &mut Vec<BalanceChange>) {
        if !self.balances.contains_key(player_id) {
            let seeded = round_to_cents(self.config.starting_balance);
            self.balances.insert(player_id.to_string(), seeded);
            rows.push(BalanceChange {
                player_id: player_id.to_string(),
                amount: seeded,
                balance_after: seeded,
                reason: BalanceChangeReason::Seed,
                round_id: round_id.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
