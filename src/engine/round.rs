//! Round engine core: the Waiting -> Active -> Crashed state machine.
//!
//! All round and ledger mutation happens through these synchronous
//! methods, driven by the single-writer service shell. Keeping the core
//! timer-free makes every transition deterministic and directly testable.

use crate::broadcast::{GameEvent, LostWager, Publisher};
use crate::config::CrashpointConfig;
use crate::engine::ledger::{BalanceChange, WagerLedger};
use crate::engine::selector::CrashPointSelector;
use crate::engine::types::{
    round_to_cents, CrashHistoryEntry, Round, RoundPhase, RoundSnapshot, Wager,
};
use crate::errors::CommandError;
use crate::storage::{PersistenceHandle, PersistenceOp};
use chrono::Utc;
use std::collections::VecDeque;
use tracing::{debug, info};

pub struct RoundEngine {
    countdown_secs: u32,
    growth_factor: f64,
    history_limit: usize,
    selector: CrashPointSelector,
    ledger: WagerLedger,
    round: Round,
    /// Recent crash entries, newest first.
    history: VecDeque<CrashHistoryEntry>,
    publisher: Publisher,
    persistence: PersistenceHandle,
}

impl RoundEngine {
    /// Build the engine and open the first round. `history` is the
    /// recovered crash log, newest first.
    pub fn new(
        config: &CrashpointConfig,
        selector: CrashPointSelector,
        ledger: WagerLedger,
        publisher: Publisher,
        persistence: PersistenceHandle,
        history: Vec<CrashHistoryEntry>,
    ) -> Self {
        let history_limit = config.round.history_limit;
        let mut engine = Self {
            countdown_secs: config.round.countdown_secs,
            growth_factor: config.round.growth_factor,
            history_limit,
            selector,
            ledger,
            round: Round::new(config.round.countdown_secs),
            history: history.into_iter().take(history_limit).collect(),
            publisher,
            persistence,
        };
        engine.announce_waiting();
        engine
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn history(&self) -> impl Iterator<Item = &CrashHistoryEntry> {
        self.history.iter()
    }

    pub fn balance_of(&self, player_id: &str) -> Option<f64> {
        self.ledger.balance(player_id)
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round.id.clone(),
            phase: self.round.phase,
            countdown: self.round.countdown_remaining,
            multiplier: self.round.current_multiplier,
            active_wagers: self.ledger.active_wagers(),
            crash_history: self.history.iter().cloned().collect(),
        }
    }

    /// Allocate a fresh round and enter Waiting. Called once at startup
    /// and again after every post-crash pause.
    pub fn begin_waiting(&mut self) {
        self.round = Round::new(self.countdown_secs);
        self.announce_waiting();
    }

    fn announce_waiting(&mut self) {
        info!(
            round_id = %self.round.id,
            countdown = self.round.countdown_remaining,
            "round waiting"
        );
        self.sync_snapshot();
        self.publisher.publish(GameEvent::RoundState {
            round_id: self.round.id.clone(),
            phase: self.round.phase,
            countdown: self.round.countdown_remaining,
            multiplier: self.round.current_multiplier,
        });
    }

    /// One countdown second elapsed. Returns true when the round flipped
    /// to Active.
    pub fn countdown_tick(&mut self) -> bool {
        if self.round.phase != RoundPhase::Waiting {
            return false;
        }
        self.round.countdown_remaining = self.round.countdown_remaining.saturating_sub(1);
        if self.round.countdown_remaining == 0 {
            self.start_active();
            return true;
        }
        self.sync_snapshot();
        self.publisher.publish(GameEvent::Countdown {
            round_id: self.round.id.clone(),
            seconds_remaining: self.round.countdown_remaining,
        });
        false
    }

    fn start_active(&mut self) {
        let crash_point = self.selector.select();
        // The sequence cursor (or consumed single value) must survive a
        // restart, so the new override state is persisted right away.
        self.persistence.record(PersistenceOp::Override(
            self.selector.override_state().clone(),
        ));

        self.round.phase = RoundPhase::Active;
        self.round.countdown_remaining = 0;
        self.round.crash_multiplier = Some(crash_point.value);
        self.round.operator_set = crash_point.operator_set;
        self.round.started_at = Some(Utc::now());

        info!(
            round_id = %self.round.id,
            operator_set = crash_point.operator_set,
            "round started"
        );
        self.sync_snapshot();
        self.publisher.publish(GameEvent::RoundStarted {
            round_id: self.round.id.clone(),
        });
    }

    /// One multiplier tick. Returns true when the round crashed on this
    /// tick.
    pub fn multiplier_tick(&mut self) -> bool {
        if self.round.phase != RoundPhase::Active {
            return false;
        }
        let Some(target) = self.round.crash_multiplier else {
            return false;
        };

        self.round.raw_multiplier *= self.growth_factor;
        let displayed = round_to_cents(self.round.raw_multiplier);
        if displayed >= target {
            self.round.current_multiplier = target;
            self.enter_crashed(target);
            return true;
        }

        self.round.current_multiplier = displayed;
        self.sync_snapshot();
        self.publisher.publish(GameEvent::MultiplierTick {
            round_id: self.round.id.clone(),
            value: displayed,
        });
        false
    }

    fn enter_crashed(&mut self, crash_multiplier: f64) {
        self.round.phase = RoundPhase::Crashed;

        let lost = self.ledger.settle_all_as_lost();
        for wager in &lost {
            self.persistence.record(PersistenceOp::Wager(wager.clone()));
        }

        let entry = CrashHistoryEntry {
            round_id: self.round.id.clone(),
            crash_multiplier,
            operator_set: self.round.operator_set,
            timestamp: Utc::now(),
        };
        self.history.push_front(entry.clone());
        self.history.truncate(self.history_limit);
        self.persistence.record(PersistenceOp::Crash(entry));

        info!(
            round_id = %self.round.id,
            crash_multiplier,
            lost_wagers = lost.len(),
            "round crashed"
        );
        self.sync_snapshot();
        self.publisher.publish(GameEvent::RoundCrashed {
            round_id: self.round.id.clone(),
            crash_multiplier,
        });
        if !lost.is_empty() {
            self.publisher.publish(GameEvent::RoundSettled {
                round_id: self.round.id.clone(),
                lost: lost.iter().map(LostWager::from).collect(),
            });
        }
        self.publisher.publish(GameEvent::CrashHistory {
            entries: self.history.iter().cloned().collect(),
        });
    }

    pub fn place_wager(&mut self, player_id: &str, amount: f64) -> Result<Wager, CommandError> {
        let (wager, rows) =
            self.ledger
                .place(self.round.phase, &self.round.id, player_id, amount)?;
        self.record_wager_rows(&rows);
        debug!(round_id = %self.round.id, player_id, stake = wager.stake, "wager placed");

        self.sync_snapshot();
        self.publisher.publish(GameEvent::WagerAccepted {
            round_id: self.round.id.clone(),
            player_id: player_id.to_string(),
            stake: wager.stake,
        });
        Ok(wager)
    }

    pub fn cancel_wager(&mut self, player_id: &str) -> Result<Wager, CommandError> {
        let (wager, rows) = self.ledger.cancel(self.round.phase, player_id)?;
        self.record_wager_rows(&rows);
        self.persistence.record(PersistenceOp::Wager(wager.clone()));
        debug!(round_id = %self.round.id, player_id, "wager cancelled");

        self.sync_snapshot();
        self.publisher.publish(GameEvent::WagerCancelled {
            round_id: self.round.id.clone(),
            player_id: player_id.to_string(),
            stake: wager.stake,
        });
        Ok(wager)
    }

    /// Settle the player's wager as Won at the multiplier in effect right
    /// now. Whether this beats the crash is decided solely by command
    /// order in the service queue.
    pub fn cash_out(&mut self, player_id: &str) -> Result<Wager, CommandError> {
        let multiplier = self.round.current_multiplier;
        let (wager, rows) = self
            .ledger
            .cash_out(self.round.phase, player_id, multiplier)?;
        self.record_wager_rows(&rows);
        self.persistence.record(PersistenceOp::Wager(wager.clone()));
        info!(
            round_id = %self.round.id,
            player_id,
            multiplier,
            payout = wager.payout,
            "cash-out"
        );

        self.sync_snapshot();
        self.publisher.publish(GameEvent::CashoutAccepted {
            round_id: self.round.id.clone(),
            player_id: player_id.to_string(),
            payout: wager.payout,
            multiplier,
        });
        Ok(wager)
    }

    pub fn set_single_crash(&mut self, value: f64) -> Result<(), CommandError> {
        self.selector.set_single(value)?;
        self.persist_override();
        info!(value, "single crash value queued");
        Ok(())
    }

    pub fn set_crash_sequence(&mut self, values: Vec<f64>) -> Result<(), CommandError> {
        self.selector.set_sequence(values)?;
        self.persist_override();
        info!("crash sequence activated");
        Ok(())
    }

    pub fn deactivate_sequence(&mut self) -> Result<(), CommandError> {
        self.selector.deactivate_sequence();
        self.persist_override();
        info!("crash sequence deactivated");
        Ok(())
    }

    fn persist_override(&self) {
        self.persistence.record(PersistenceOp::Override(
            self.selector.override_state().clone(),
        ));
    }

    fn record_wager_rows(&self, rows: &[BalanceChange]) {
        for row in rows {
            self.persistence.record(PersistenceOp::Balance(row.clone()));
        }
    }

    fn sync_snapshot(&self) {
        self.publisher.update_snapshot(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;
    use crate::engine::types::WagerStatus;
    use crate::storage::PersistenceHandle;

    fn engine() -> RoundEngine {
        let config = CrashpointConfig::default();
        let selector = CrashPointSelector::from_seed(SelectorConfig::default(), 42);
        let ledger = WagerLedger::new(config.ledger.clone());
        let (persistence, _ops) = PersistenceHandle::sink();
        RoundEngine::new(
            &config,
            selector,
            ledger,
            Publisher::new(),
            persistence,
            Vec::new(),
        )
    }

    fn run_countdown(engine: &mut RoundEngine) {
        while !engine.countdown_tick() {}
    }

    fn run_until_crash(engine: &mut RoundEngine) {
        while !engine.multiplier_tick() {}
    }

    #[test]
    fn phases_advance_in_order() {
        let mut engine = engine();
        engine.set_single_crash(2.0).unwrap();

        assert_eq!(engine.round().phase, RoundPhase::Waiting);
        run_countdown(&mut engine);
        assert_eq!(engine.round().phase, RoundPhase::Active);
        run_until_crash(&mut engine);
        assert_eq!(engine.round().phase, RoundPhase::Crashed);

        engine.begin_waiting();
        assert_eq!(engine.round().phase, RoundPhase::Waiting);
        assert_eq!(engine.round().current_multiplier, 1.0);
    }

    #[test]
    fn new_round_gets_fresh_id() {
        let mut engine = engine();
        engine.set_single_crash(1.5).unwrap();
        let first_id = engine.round().id.clone();

        run_countdown(&mut engine);
        run_until_crash(&mut engine);
        engine.begin_waiting();
        assert_ne!(engine.round().id, first_id);
    }

    #[test]
    fn multiplier_is_monotone_during_active() {
        let mut engine = engine();
        engine.set_single_crash(10.0).unwrap();
        run_countdown(&mut engine);

        let mut previous = engine.round().current_multiplier;
        assert_eq!(previous, 1.0);
        while !engine.multiplier_tick() {
            let current = engine.round().current_multiplier;
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(engine.round().current_multiplier, 10.0);
    }

    #[test]
    fn crash_settles_remaining_wagers_as_lost() {
        let mut engine = engine();
        engine.set_single_crash(1.5).unwrap();
        engine.place_wager("alice", 50.0).unwrap();

        run_countdown(&mut engine);
        run_until_crash(&mut engine);

        assert_eq!(engine.balance_of("alice"), Some(950.0));
        let entry = engine.history().next().unwrap();
        assert_eq!(entry.crash_multiplier, 1.5);
        assert!(entry.operator_set);
    }

    #[test]
    fn sequence_override_drives_consecutive_rounds() {
        let mut engine = engine();
        engine.set_crash_sequence(vec![2.0, 5.0, 7.0]).unwrap();

        let mut crashes = Vec::new();
        for _ in 0..4 {
            run_countdown(&mut engine);
            run_until_crash(&mut engine);
            crashes.push(engine.history().next().unwrap().crash_multiplier);
            engine.begin_waiting();
        }
        assert_eq!(crashes, vec![2.0, 5.0, 7.0, 2.0]);
    }

    #[test]
    fn single_override_applies_to_exactly_one_round() {
        let mut engine = engine();
        engine.set_single_crash(3.5).unwrap();

        run_countdown(&mut engine);
        run_until_crash(&mut engine);
        let first: Vec<_> = engine.history().collect();
        assert_eq!(first[0].crash_multiplier, 3.5);
        assert!(first[0].operator_set);

        engine.begin_waiting();
        run_countdown(&mut engine);
        run_until_crash(&mut engine);
        assert!(!engine.history().next().unwrap().operator_set);
    }

    #[test]
    fn cashout_before_crash_tick_wins() {
        let mut engine = engine();
        engine.set_single_crash(1.01).unwrap();
        engine.place_wager("alice", 100.0).unwrap();
        run_countdown(&mut engine);

        // Cash-out is dequeued before the crash-detecting tick.
        let wager = engine.cash_out("alice").unwrap();
        assert_eq!(wager.status, WagerStatus::Won);
        assert!(engine.multiplier_tick());
        assert_eq!(engine.balance_of("alice"), Some(1_000.0));
    }

    #[test]
    fn cashout_after_crash_tick_is_swept() {
        let mut engine = engine();
        engine.set_single_crash(1.01).unwrap();
        engine.place_wager("alice", 100.0).unwrap();
        run_countdown(&mut engine);

        assert!(engine.multiplier_tick());
        let err = engine.cash_out("alice").unwrap_err();
        assert_eq!(
            err,
            CommandError::WrongPhase {
                phase: RoundPhase::Crashed
            }
        );
        assert_eq!(engine.balance_of("alice"), Some(900.0));
    }

    #[test]
    fn race_resolves_to_exactly_one_outcome() {
        // Exercise both interleavings repeatedly: the wager must end Won or
        // Lost, never both, and the balance must match the outcome.
        for iteration in 0..100 {
            let mut engine = engine();
            engine.set_single_crash(1.01).unwrap();
            engine.place_wager("alice", 100.0).unwrap();
            run_countdown(&mut engine);

            let cashout_first = iteration % 2 == 0;
            let (won, lost) = if cashout_first {
                let result = engine.cash_out("alice");
                let crashed = engine.multiplier_tick();
                assert!(crashed);
                (result.is_ok(), false)
            } else {
                assert!(engine.multiplier_tick());
                let result = engine.cash_out("alice");
                (false, result.is_err())
            };
            assert!(won != lost, "wager must settle exactly once");

            let expected = if won { 1_000.0 } else { 900.0 };
            assert_eq!(engine.balance_of("alice"), Some(expected));
        }
    }

    #[test]
    fn snapshot_tracks_active_wagers_and_history() {
        let mut engine = engine();
        engine.set_single_crash(1.5).unwrap();
        engine.place_wager("alice", 10.0).unwrap();
        engine.place_wager("bob", 20.0).unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.phase, RoundPhase::Waiting);
        assert_eq!(snapshot.active_wagers.len(), 2);
        assert!(snapshot.crash_history.is_empty());

        run_countdown(&mut engine);
        run_until_crash(&mut engine);
        let snapshot = engine.snapshot();
        assert!(snapshot.active_wagers.is_empty());
        assert_eq!(snapshot.crash_history.len(), 1);
    }

    #[test]
    fn history_is_capped_at_limit() {
        let mut engine = engine();
        for _ in 0..15 {
            engine.set_single_crash(1.5).unwrap();
            run_countdown(&mut engine);
            run_until_crash(&mut engine);
            engine.begin_waiting();
        }
        assert_eq!(engine.history().count(), 10);
    }

    #[test]
    fn persistence_receives_settlement_records() {
        let config = CrashpointConfig::default();
        let selector = CrashPointSelector::from_seed(SelectorConfig::default(), 42);
        let ledger = WagerLedger::new(config.ledger.clone());
        let (persistence, mut ops) = PersistenceHandle::sink();
        let mut engine = RoundEngine::new(
            &config,
            selector,
            ledger,
            Publisher::new(),
            persistence,
            Vec::new(),
        );

        engine.set_single_crash(1.5).unwrap();
        engine.place_wager("alice", 50.0).unwrap();
        run_countdown(&mut engine);
        run_until_crash(&mut engine);

        let mut saw_crash = false;
        let mut saw_lost_wager = false;
        while let Ok(op) = ops.try_recv() {
            match op {
                PersistenceOp::Crash(entry) => {
                    assert_eq!(entry.crash_multiplier, 1.5);
                    saw_crash = true;
                }
                PersistenceOp::Wager(wager) if wager.status == WagerStatus::Lost => {
                    saw_lost_wager = true;
                }
                _ => {}
            }
        }
        assert!(saw_crash);
        assert!(saw_lost_wager);
    }
}
