//! Crash-point selection.
//!
//! Each round's crash multiplier comes from the first matching source:
//! an active sequence override, a pending single override, or the
//! house-edge random distribution.

use crate::config::SelectorConfig;
use crate::engine::types::round_to_cents;
use crate::errors::CommandError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Operator override state. Persisted so a sequence cursor survives
/// restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum CrashOverride {
    #[default]
    None,
    /// One pending value, consumed by the next round.
    Single { value: f64 },
    /// Circular list of values applied to consecutive rounds.
    Sequence { values: Vec<f64>, cursor: usize },
}

/// A selected crash point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrashPoint {
    pub value: f64,
    pub operator_set: bool,
}

pub struct CrashPointSelector {
    config: SelectorConfig,
    override_state: CrashOverride,
    rng: StdRng,
}

impl CrashPointSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: SelectorConfig, rng: StdRng) -> Self {
        Self {
            config,
            override_state: CrashOverride::None,
            rng,
        }
    }

    /// Deterministic selector for tests.
    pub fn from_seed(config: SelectorConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn override_state(&self) -> &CrashOverride {
        &self.override_state
    }

    /// Restore override state recovered from storage at startup.
    pub fn restore_override(&mut self, state: CrashOverride) {
        self.override_state = state;
    }

    /// Queue a single crash value for the next round. Replaces any pending
    /// single value; a configured sequence keeps priority over it.
    pub fn set_single(&mut self, value: f64) -> Result<(), CommandError> {
        let value = self.validate_value(value)?;
        if let CrashOverride::Sequence { .. } = self.override_state {
            return Err(CommandError::Validation(
                "a crash sequence is active; deactivate it first".to_string(),
            ));
        }
        self.override_state = CrashOverride::Single { value };
        Ok(())
    }

    /// Activate a repeating crash sequence starting at its first value.
    pub fn set_sequence(&mut self, values: Vec<f64>) -> Result<(), CommandError> {
        if values.is_empty() {
            return Err(CommandError::Validation(
                "crash sequence must not be empty".to_string(),
            ));
        }
        let values = values
            .into_iter()
            .map(|v| self.validate_value(v))
            .collect::<Result<Vec<_>, _>>()?;
        self.override_state = CrashOverride::Sequence { values, cursor: 0 };
        Ok(())
    }

    /// Deactivate an active sequence. Idempotent; a pending single value is
    /// left untouched.
    pub fn deactivate_sequence(&mut self) {
        if let CrashOverride::Sequence { .. } = self.override_state {
            self.override_state = CrashOverride::None;
        }
    }

    /// Pick this round's crash point. Priority: sequence, single, random.
    pub fn select(&mut self) -> CrashPoint {
        match &mut self.override_state {
            CrashOverride::Sequence { values, cursor } => {
                let value = values[*cursor];
                *cursor = (*cursor + 1) % values.len();
                CrashPoint {
                    value,
                    operator_set: true,
                }
            }
            CrashOverride::Single { value } => {
                let value = *value;
                self.override_state = CrashOverride::None;
                CrashPoint {
                    value,
                    operator_set: true,
                }
            }
            CrashOverride::None => CrashPoint {
                value: self.draw(),
                operator_set: false,
            },
        }
    }

    /// House-edge distribution: an instant crash with probability
    /// `house_edge`, otherwise `0.9 / (1 - r - house_edge)` clamped to
    /// `[min_crash, max_crash]` and rounded to cents. The denominator
    /// vanishes as r approaches `1 - house_edge`, so the cap applies
    /// before rounding.
    fn draw(&mut self) -> f64 {
        let r: f64 = self.rng.gen();
        if r < self.config.house_edge {
            return self.config.min_crash;
        }
        let denominator = 1.0 - r - self.config.house_edge;
        let raw = if denominator > f64::EPSILON {
            0.9 / denominator
        } else {
            self.config.max_crash
        };
        let clamped = raw.clamp(self.config.min_crash, self.config.max_crash);
        round_to_cents(clamped).max(self.config.min_crash)
    }

    fn validate_value(&self, value: f64) -> Result<f64, CommandError> {
        if !value.is_finite() || value < self.config.min_crash {
            return Err(CommandError::Validation(format!(
                "crash value must be >= {}",
                self.config.min_crash
            )));
        }
        Ok(round_to_cents(value))
    }
}
