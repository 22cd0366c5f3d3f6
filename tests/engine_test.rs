//! End-to-end round flows against the engine core and the service shell.

use crashpoint::broadcast::{GameEvent, Publisher};
use crashpoint::config::CrashpointConfig;
use crashpoint::engine::types::{RoundPhase, WagerStatus};
use crashpoint::engine::{CrashPointSelector, RoundEngine, WagerLedger};
use crashpoint::storage::{MemoryStorage, PersistenceGateway, PersistenceHandle};
use std::sync::Arc;
use std::time::Duration;

fn build_engine(config: &CrashpointConfig, publisher: Publisher) -> RoundEngine {
    let selector = CrashPointSelector::from_seed(config.selector.clone(), 42);
    let ledger = WagerLedger::new(config.ledger.clone());
    let (persistence, _ops) = PersistenceHandle::sink();
    RoundEngine::new(config, selector, ledger, publisher, persistence, Vec::new())
}

fn run_countdown(engine: &mut RoundEngine) {
    while !engine.countdown_tick() {}
}

#[test]
fn player_cashes_out_mid_climb() {
    let config = CrashpointConfig::default();
    let mut engine = build_engine(&config, Publisher::new());

    engine.set_single_crash(100.0).unwrap();
    engine.place_wager("alice", 100.0).unwrap();
    assert_eq!(engine.balance_of("alice"), Some(900.0));

    run_countdown(&mut engine);
    assert_eq!(engine.round().phase, RoundPhase::Active);

    // Ride the climb past 2.5x, then cash out at the displayed value.
    while engine.round().current_multiplier < 2.5 {
        assert!(!engine.multiplier_tick(), "crashed before reaching 2.5x");
    }
    let multiplier = engine.round().current_multiplier;
    let wager = engine.cash_out("alice").unwrap();

    assert_eq!(wager.status, WagerStatus::Won);
    assert_eq!(wager.cashout_multiplier, Some(multiplier));
    let expected = ((900.0 + 100.0 * multiplier) * 100.0).round() / 100.0;
    assert_eq!(engine.balance_of("alice"), Some(expected));
}

#[test]
fn ledger_pays_exactly_at_two_and_a_half() {
    // Fixed-point version of the climb scenario: cash-out at 2.50 turns
    // 1000 into 1000 - 100 + 100 * 2.50 = 1150.
    let config = CrashpointConfig::default();
    let mut ledger = WagerLedger::new(config.ledger.clone());
    ledger
        .place(RoundPhase::Waiting, "r1", "alice", 100.0)
        .unwrap();
    ledger.cash_out(RoundPhase::Active, "alice", 2.5).unwrap();
    assert_eq!(ledger.balance("alice"), Some(1_150.0));
}

#[test]
fn unclaimed_wager_is_lost_at_operator_crash() {
    let config = CrashpointConfig::default();
    let mut engine = build_engine(&config, Publisher::new());

    engine.set_single_crash(1.5).unwrap();
    engine.place_wager("alice", 50.0).unwrap();
    run_countdown(&mut engine);

    while !engine.multiplier_tick() {}
    assert_eq!(engine.round().phase, RoundPhase::Crashed);
    assert_eq!(engine.round().current_multiplier, 1.5);
    assert_eq!(engine.balance_of("alice"), Some(950.0));

    let entry = engine.history().next().unwrap();
    assert_eq!(entry.crash_multiplier, 1.5);
    assert!(entry.operator_set);
}

#[test]
fn multiplier_resets_to_one_for_every_round() {
    let config = CrashpointConfig::default();
    let mut engine = build_engine(&config, Publisher::new());

    for _ in 0..20 {
        assert_eq!(engine.round().phase, RoundPhase::Waiting);
        assert_eq!(engine.round().current_multiplier, 1.0);

        run_countdown(&mut engine);
        let mut previous = engine.round().current_multiplier;
        while !engine.multiplier_tick() {
            assert!(engine.round().current_multiplier >= previous);
            previous = engine.round().current_multiplier;
        }
        assert!(engine.round().current_multiplier >= 1.01);
        engine.begin_waiting();
    }
}

#[test]
fn second_wager_rejected_until_cancel_or_settlement() {
    let config = CrashpointConfig::default();
    let mut engine = build_engine(&config, Publisher::new());

    engine.set_single_crash(1.5).unwrap();
    engine.place_wager("alice", 10.0).unwrap();
    assert!(engine.place_wager("alice", 10.0).is_err());

    engine.cancel_wager("alice").unwrap();
    engine.place_wager("alice", 20.0).unwrap();
    assert_eq!(engine.balance_of("alice"), Some(980.0));

    run_countdown(&mut engine);
    while !engine.multiplier_tick() {}
    engine.begin_waiting();

    // Loss settled the wager; a fresh round accepts a fresh stake.
    engine.place_wager("alice", 30.0).unwrap();
    assert_eq!(engine.balance_of("alice"), Some(950.0));
}

#[tokio::test(start_paused = true)]
async fn full_service_flow_persists_records() {
    let config = CrashpointConfig::default();
    let publisher = Publisher::new();
    let gateway = Arc::new(MemoryStorage::new());

    let selector = CrashPointSelector::from_seed(config.selector.clone(), 42);
    let ledger = WagerLedger::new(config.ledger.clone());
    let persistence = PersistenceHandle::spawn(gateway.clone());
    let engine = RoundEngine::new(
        &config,
        selector,
        ledger,
        publisher.clone(),
        persistence,
        Vec::new(),
    );
    let handle = crashpoint::engine::spawn(engine, config.round.clone());

    handle.set_single_crash(1.5).await.unwrap();
    handle.place_wager("alice", 50.0).await.unwrap();

    // Watch the round run to its crash.
    let mut subscription = publisher.subscribe();
    loop {
        match subscription.events.recv().await {
            Ok(GameEvent::RoundCrashed {
                crash_multiplier, ..
            }) => {
                assert_eq!(crash_multiplier, 1.5);
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(e) => panic!("event stream closed: {}", e),
        }
    }

    // The write-behind worker drains asynchronously.
    for _ in 0..100 {
        if gateway.wager_count() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(gateway.wager_count() >= 1);
    assert!(gateway.balance_change_count() >= 2);

    let crashes = gateway.load_recent_crashes(10).await.unwrap();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].crash_multiplier, 1.5);
    assert!(crashes[0].operator_set);
}

#[tokio::test(start_paused = true)]
async fn rejoining_subscriber_sees_current_state() {
    let config = CrashpointConfig::default();
    let publisher = Publisher::new();
    let engine = build_engine(&config, publisher.clone());
    let handle = crashpoint::engine::spawn(engine, config.round.clone());

    handle.set_single_crash(5.0).await.unwrap();
    handle.place_wager("alice", 25.0).await.unwrap();

    // A late subscriber gets the wager and phase from the snapshot alone.
    let subscription = publisher.subscribe();
    assert_eq!(subscription.snapshot.active_wagers.len(), 1);
    assert_eq!(subscription.snapshot.active_wagers[0].player_id, "alice");
    assert_eq!(subscription.snapshot.phase, RoundPhase::Waiting);
}
