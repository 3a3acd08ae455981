//! Adaptive infusion-rate controller.
//!
//! Each decision walks the same fixed pipeline:
//!
//! ```text
//!   base rate (hydration urgency, energy need, risk)
//!     → × predictive boost      (10 min forecast below 50 %)
//!     → × coherence σ           (noisy signal ⇒ conservative)
//!     → × cardiac limiting      (reserve below 0.3)
//!     → clamp [min_rate, profile max]
//!     → min(safety ceiling)
//! ```
//!
//! The only state kept between decisions is the last commanded rate.
//! Rate-of-change limiting is the safety monitor's job.

use log::debug;

use crate::config::{ControlTuning, SystemConfig};
use crate::estimator::StateEstimator;
use crate::math::{clamp, sigmoid};
use crate::model::{ControlOutput, PatientProfile, PatientState};
use crate::safety::{SafetyCheck, SafetyMonitor};

use super::rationale::{self, DecisionFlags};

/// One decision: the command plus the safety check and flags behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub output: ControlOutput,
    /// Safety evaluation of the clamped request.
    pub check: SafetyCheck,
    pub flags: DecisionFlags,
}

impl Decision {
    /// Ceiling applied this tick (ml/min).
    pub fn max_allowed_rate(&self) -> f64 {
        self.check.max_allowed_rate
    }
}

pub struct AdaptiveController {
    profile: PatientProfile,
    tuning: ControlTuning,
    min_rate: f64,
    /// Minutes one command runs for; feeds the volume projection.
    period_min: f64,
    last_command: f64,
}

impl AdaptiveController {
    pub fn new(
        profile: &PatientProfile,
        tuning: &ControlTuning,
        min_rate_ml_min: f64,
        period_min: f64,
    ) -> Self {
        Self {
            profile: *profile,
            tuning: tuning.clone(),
            min_rate: min_rate_ml_min,
            period_min,
            last_command: tuning.initial_rate_ml_min,
        }
    }

    pub fn from_config(config: &SystemConfig) -> Self {
        Self::new(
            &config.profile,
            &config.control,
            config.safety.min_rate_ml_min,
            config.period_minutes(),
        )
    }

    /// Produce this tick's command.
    pub fn decide(
        &mut self,
        state: &PatientState,
        safety: &SafetyMonitor,
        estimator: &StateEstimator,
    ) -> Decision {
        let t = &self.tuning;
        let mut flags = DecisionFlags::default();

        // 1. Base rate
        let mut rate = self.base_rate(state);

        // 2. Predictive boost
        if let Some(forecast) = estimator.predict_forward(t.prediction_horizon_min) {
            if forecast.hydration_pct < t.predictive_boost_threshold_pct {
                rate *= t.predictive_boost_factor;
                flags.predictive_boost = true;
            }
        }

        // 3. Coherence modulation
        rate *= state.coherence_sigma;

        // 4. Cardiac limiting
        if state.cardiac_reserve < t.reserve_scaling_threshold {
            rate *= 0.5 + 0.5 * sigmoid(state.cardiac_reserve, t.reserve_scaling_threshold, 10.0);
        }

        // 5. Hard bounds
        rate = clamp(rate, self.min_rate, self.profile.max_safe_infusion_rate);

        // 6. Safety ceiling
        let check = safety.evaluate(rate, state, self.period_min);
        if rate > check.max_allowed_rate {
            rate = check.max_allowed_rate;
            flags.safety_limited = true;
        }

        debug!(
            "Controller: {:.3} ml/min (ceiling {:.3}, boost={}, limited={})",
            rate, check.max_allowed_rate, flags.predictive_boost, flags.safety_limited
        );

        self.last_command = rate;

        Decision {
            output: ControlOutput {
                infusion_ml_per_min: rate,
                confidence: clamp(1.0 - state.uncertainty, 0.0, 1.0),
                rationale: rationale::format(state, rate, flags),
                safety_override: !check.passed,
                warning_flags: check.warnings,
            },
            check,
            flags,
        }
    }

    /// Rate in use before the next decision (ml/min).
    pub fn last_command(&self) -> f64 {
        self.last_command
    }

    /// Urgency and energy need combined, amplified by risk, mapped onto
    /// the base-rate range.
    fn base_rate(&self, state: &PatientState) -> f64 {
        let deficit = clamp(1.0 - state.hydration_pct / 100.0, 0.0, 1.0);
        let urgency = if deficit < 0.5 {
            deficit
        } else {
            sigmoid(deficit, 0.5, 5.0)
        };
        let need = (1.0 - state.energy_t) * (1.0 + 0.5 * state.metabolic_load);
        let amplifier = 1.0 + 0.5 * state.risk_score;

        let demand = clamp(clamp(0.6 * urgency + 0.4 * need, 0.0, 1.0) * amplifier, 0.0, 1.0);
        self.tuning.base_rate_floor_ml_min + self.tuning.base_rate_span_ml_min * demand
    }
}
