//! Single-writer service shell around the round engine core.
//!
//! One task owns all round and ledger mutation. Every command and timer
//! tick arrives on the same queue and is processed FIFO to completion, so
//! a cash-out and the crash-detecting tick can never interleave: whichever
//! was enqueued first wins. Timer tasks are per-phase and aborted on phase
//! exit; an epoch counter discards any tick that raced the abort.

use crate::config::RoundConfig;
use crate::engine::round::RoundEngine;
use crate::engine::types::Wager;
use crate::errors::CommandError;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub enum EngineCommand {
    PlaceWager {
        player_id: String,
        amount: f64,
        reply: oneshot::Sender<Result<Wager, CommandError>>,
    },
    CancelWager {
        player_id: String,
        reply: oneshot::Sender<Result<Wager, CommandError>>,
    },
    CashOut {
        player_id: String,
        reply: oneshot::Sender<Result<Wager, CommandError>>,
    },
    SetSingleCrash {
        value: f64,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    SetCrashSequence {
        values: Vec<f64>,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    DeactivateSequence {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Timer {
        epoch: u64,
        event: TimerEvent,
    },
}

#[derive(Debug, Clone, Copy)]
pub enum TimerEvent {
    CountdownTick,
    MultiplierTick,
    RestartDue,
}

/// Cloneable front door to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub async fn place_wager(&self, player_id: &str, amount: f64) -> Result<Wager, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::PlaceWager {
            player_id: player_id.to_string(),
            amount,
            reply,
        })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    pub async fn cancel_wager(&self, player_id: &str) -> Result<Wager, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::CancelWager {
            player_id: player_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    pub async fn cash_out(&self, player_id: &str) -> Result<Wager, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::CashOut {
            player_id: player_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    pub async fn set_single_crash(&self, value: f64) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SetSingleCrash { value, reply })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    pub async fn set_crash_sequence(&self, values: Vec<f64>) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::SetCrashSequence { values, reply })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    pub async fn deactivate_sequence(&self) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::DeactivateSequence { reply })?;
        rx.await.map_err(|_| CommandError::EngineUnavailable)?
    }

    fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        self.tx
            .send(command)
            .map_err(|_| CommandError::EngineUnavailable)
    }
}

/// Spawn the engine task. The engine arrives in Waiting phase; the first
/// countdown timer is armed immediately.
pub fn spawn(engine: RoundEngine, config: RoundConfig) -> EngineHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(engine, config, tx.clone(), rx));
    EngineHandle { tx }
}

async fn run(
    mut engine: RoundEngine,
    config: RoundConfig,
    tx: mpsc::UnboundedSender<EngineCommand>,
    mut rx: mpsc::UnboundedReceiver<EngineCommand>,
) {
    let mut epoch: u64 = 0;
    let mut timer: Option<JoinHandle<()>> = None;
    arm(&mut timer, countdown_timer(tx.clone(), epoch));

    while let Some(command) = rx.recv().await {
        match command {
            EngineCommand::PlaceWager {
                player_id,
                amount,
                reply,
            } => {
                let _ = reply.send(engine.place_wager(&player_id, amount));
            }
            EngineCommand::CancelWager { player_id, reply } => {
                let _ = reply.send(engine.cancel_wager(&player_id));
            }
            EngineCommand::CashOut { player_id, reply } => {
                let _ = reply.send(engine.cash_out(&player_id));
            }
            EngineCommand::SetSingleCrash { value, reply } => {
                let _ = reply.send(engine.set_single_crash(value));
            }
            EngineCommand::SetCrashSequence { values, reply } => {
                let _ = reply.send(engine.set_crash_sequence(values));
            }
            EngineCommand::DeactivateSequence { reply } => {
                let _ = reply.send(engine.deactivate_sequence());
            }
            EngineCommand::Timer {
                epoch: tick_epoch,
                event,
            } => {
                if tick_epoch != epoch {
                    debug!(tick_epoch, epoch, "stale timer tick dropped");
                    continue;
                }
                match event {
                    TimerEvent::CountdownTick => {
                        if engine.countdown_tick() {
                            epoch += 1;
                            arm(
                                &mut timer,
                                multiplier_timer(tx.clone(), epoch, config.tick_interval()),
                            );
                        }
                    }
                    TimerEvent::MultiplierTick => {
                        if engine.multiplier_tick() {
                            epoch += 1;
                            arm(
                                &mut timer,
                                restart_timer(tx.clone(), epoch, config.restart_pause()),
                            );
                        }
                    }
                    TimerEvent::RestartDue => {
                        epoch += 1;
                        engine.begin_waiting();
                        arm(&mut timer, countdown_timer(tx.clone(), epoch));
                    }
                }
            }
        }
    }

    if let Some(handle) = timer.take() {
        handle.abort();
    }
    debug!("engine task stopped");
}

fn arm(slot: &mut Option<JoinHandle<()>>, next: JoinHandle<()>) {
    if let Some(previous) = slot.replace(next) {
        previous.abort();
    }
}

fn countdown_timer(tx: mpsc::UnboundedSender<EngineCommand>, epoch: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await; // first tick completes immediately
        loop {
            interval.tick().await;
            if tx
                .send(EngineCommand::Timer {
                    epoch,
                    event: TimerEvent::CountdownTick,
                })
                .is_err()
            {
                break;
            }
        }
    })
}

fn multiplier_timer(
    tx: mpsc::UnboundedSender<EngineCommand>,
    epoch: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx
                .send(EngineCommand::Timer {
                    epoch,
                    event: TimerEvent::MultiplierTick,
                })
                .is_err()
            {
                break;
            }
        }
    })
}

fn restart_timer(
    tx: mpsc::UnboundedSender<EngineCommand>,
    epoch: u64,
    pause: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(pause).await;
        let _ = tx.send(EngineCommand::Timer {
            epoch,
            event: TimerEvent::RestartDue,
        });
    })
}
