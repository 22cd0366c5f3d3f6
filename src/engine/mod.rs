pub mod ledger;
pub mod round;
pub mod selector;
pub mod service;
pub mod types;

pub use ledger::WagerLedger;
pub use round::RoundEngine;
pub use selector::{CrashOverride, CrashPoint, CrashPointSelector};
pub use service::{spawn, EngineHandle};
