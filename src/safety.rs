//! Safety monitor.
//!
//! Runs **every tick after the controller has proposed a rate** and
//! returns the maximum rate the pump may be driven at, plus the set of
//! warnings that shaped that ceiling.
//!
//! ## Layered checks
//!
//! The ceiling starts at the profile's `max_safe_infusion_rate` and every
//! check can only *lower* it (running minimum):
//!
//! 1. Projected 24 h volume above 90 % of the weight-derived ceiling.
//! 2. Cardiac reserve below the configured floor.
//! 3. Change from the last delivered rate larger than the per-cycle delta.
//! 4. Composite risk above the high-risk threshold.
//! 5. Tachycardia (HR above 1.4 × baseline).
//! 6. Emergency floor: if hydration is critically low and the ceiling fell
//!    below the minimum safe rate, the ceiling is raised back to it.
//!
//! [`SafetyMonitor::evaluate`] is a pure function of its arguments and the
//! monitor's bookkeeping; elapsed time is passed in rather than read from a
//! clock.  The bookkeeping (cumulative volume, recent rates) only changes
//! through [`SafetyMonitor::update_volume`] and
//! [`SafetyMonitor::reset_24h_counter`].

use core::fmt;

use log::{debug, info};
use serde::{Serialize, Serializer};

use crate::config::SafetyLimits;
use crate::history::BoundedHistory;
use crate::model::{PatientProfile, PatientState};

/// Number of recently delivered rates retained.
pub const RATE_RING_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Warning tokens
// ---------------------------------------------------------------------------

/// A single named safety warning.  Each check owns one bit so several can
/// be active together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SafetyWarning {
    VolumeLimitApproach = 0b0000_0001,
    LowCardiacReserve = 0b0000_0010,
    RateChangeLimited = 0b0000_0100,
    HighRiskState = 0b0000_1000,
    TachycardiaDetected = 0b0001_0000,
    EmergencyMinRate = 0b0010_0000,
}

impl SafetyWarning {
    /// All warnings in evaluation order.
    pub const ALL: [SafetyWarning; 6] = [
        Self::VolumeLimitApproach,
        Self::LowCardiacReserve,
        Self::RateChangeLimited,
        Self::HighRiskState,
        Self::TachycardiaDetected,
        Self::EmergencyMinRate,
    ];

    pub const fn mask(self) -> u8 {
        self as u8
    }

    /// Wire token, as written to logs and the observability API.
    pub const fn token(self) -> &'static str {
        match self {
            Self::VolumeLimitApproach => "VOLUME_LIMIT_APPROACH",
            Self::LowCardiacReserve => "LOW_CARDIAC_RESERVE",
            Self::RateChangeLimited => "RATE_CHANGE_LIMITED",
            Self::HighRiskState => "HIGH_RISK_STATE",
            Self::TachycardiaDetected => "TACHYCARDIA_DETECTED",
            Self::EmergencyMinRate => "EMERGENCY_MIN_RATE",
        }
    }
}

impl fmt::Display for SafetyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Set of active warnings.  Displays (and serialises) as space-delimited
/// tokens in evaluation order; empty when nothing fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Warnings(u8);

impl Warnings {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, warning: SafetyWarning) {
        self.0 |= warning.mask();
    }

    pub fn contains(&self, warning: SafetyWarning) -> bool {
        self.0 & warning.mask() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = SafetyWarning> + '_ {
        SafetyWarning::ALL
            .into_iter()
            .filter(|w| self.contains(*w))
    }

    /// Warnings present in `self` but not in `previous`.
    pub fn newly_raised(&self, previous: Warnings) -> Warnings {
        Warnings(self.0 & !previous.0)
    }
}

impl fmt::Display for Warnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for w in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(w.token())?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for Warnings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Safety check result
// ---------------------------------------------------------------------------

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyCheck {
    /// True iff the final ceiling is at or above the minimum safe rate.
    pub passed: bool,
    /// Highest rate (ml/min) that may be commanded this tick.
    pub max_allowed_rate: f64,
    pub warnings: Warnings,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Stateful layered constraint evaluator.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    profile: PatientProfile,
    limits: SafetyLimits,
    /// Ceiling on volume delivered in a 24 h window (ml).
    max_volume_24h_ml: f64,
    /// Volume delivered since the last reset (ml).  Non-decreasing.
    cumulative_volume_ml: f64,
    /// Last [`RATE_RING_LEN`] delivered rates.
    recent_rates: BoundedHistory<f64, RATE_RING_LEN>,
}

impl SafetyMonitor {
    pub fn new(profile: &PatientProfile, limits: &SafetyLimits) -> Self {
        let mut max_volume = profile.weight_kg * limits.daily_volume_per_kg_ml;
        if profile.cardiac_condition {
            max_volume *= limits.cardiac_condition_volume_factor;
        }
        if profile.renal_impairment {
            max_volume *= limits.renal_impairment_volume_factor;
        }
        info!(
            "Safety: 24h volume ceiling {:.0} ml ({:.1} kg{}{})",
            max_volume,
            profile.weight_kg,
            if profile.cardiac_condition { ", cardiac" } else { "" },
            if profile.renal_impairment { ", renal" } else { "" },
        );

        Self {
            profile: *profile,
            limits: limits.clone(),
            max_volume_24h_ml: max_volume,
            cumulative_volume_ml: 0.0,
            recent_rates: BoundedHistory::new(),
        }
    }

    /// Evaluate every check against a requested rate.
    ///
    /// `elapsed_min` is the time the requested rate would run for, used to
    /// project the cumulative volume.
    ///
    /// The rate-of-change check only lowers the ceiling, so the per-cycle
    /// delta bound holds for rises.  A steep drop is flagged but the
    /// commanded rate still falls as far as requested.
    pub fn evaluate(&self, requested_rate: f64, state: &PatientState, elapsed_min: f64) -> SafetyCheck {
        let l = &self.limits;
        let mut ceiling = self.profile.max_safe_infusion_rate;
        let mut warnings = Warnings::empty();

        // ── 1. Volume overload ───────────────────────────────────
        let projected = self.cumulative_volume_ml + requested_rate * elapsed_min.max(0.0);
        if projected > self.max_volume_24h_ml * l.volume_warning_fraction {
            ceiling = ceiling.min(l.volume_ceiling_ml_min);
            warnings.insert(SafetyWarning::VolumeLimitApproach);
        }

        // ── 2. Cardiac load ──────────────────────────────────────
        if state.cardiac_reserve < l.min_cardiac_reserve {
            ceiling = ceiling.min(l.cardiac_ceiling_ml_min);
            warnings.insert(SafetyWarning::LowCardiacReserve);
        }

        // ── 3. Rate of change ────────────────────────────────────
        // Bounds rises only; on a drop `last - Δ` sits above the request.
        if let Some(&last) = self.recent_rates.latest() {
            let delta = requested_rate - last;
            if delta.abs() > l.max_rate_change_ml_min {
                let limited = if delta > 0.0 {
                    last + l.max_rate_change_ml_min
                } else {
                    last - l.max_rate_change_ml_min
                };
                ceiling = ceiling.min(limited);
                warnings.insert(SafetyWarning::RateChangeLimited);
            }
        }

        // ── 4. High risk ─────────────────────────────────────────
        if state.risk_score > l.high_risk_threshold {
            ceiling = ceiling.min(l.risk_ceiling_ml_min);
            warnings.insert(SafetyWarning::HighRiskState);
        }

        // ── 5. Tachycardia ───────────────────────────────────────
        if state.heart_rate_bpm > self.profile.baseline_hr_bpm * l.tachycardia_factor {
            ceiling = ceiling.min(l.tachycardia_ceiling_ml_min);
            warnings.insert(SafetyWarning::TachycardiaDetected);
        }

        // ── 6. Emergency floor ───────────────────────────────────
        if ceiling < l.min_rate_ml_min && state.hydration_pct < l.emergency_hydration_pct {
            ceiling = l.min_rate_ml_min;
            warnings.insert(SafetyWarning::EmergencyMinRate);
        }

        let ceiling = ceiling.max(0.0);
        if !warnings.is_empty() {
            debug!(
                "Safety: requested {:.3} ml/min, ceiling {:.3} [{}]",
                requested_rate, ceiling, warnings
            );
        }

        SafetyCheck {
            passed: ceiling >= l.min_rate_ml_min,
            max_allowed_rate: ceiling,
            warnings,
        }
    }

    /// Account for `rate_ml_per_min` having run for `duration_min`.
    pub fn update_volume(&mut self, rate_ml_per_min: f64, duration_min: f64) {
        let added = rate_ml_per_min.max(0.0) * duration_min.max(0.0);
        if added.is_finite() {
            self.cumulative_volume_ml += added;
        }
        self.recent_rates.push(rate_ml_per_min);
    }

    /// Start a fresh 24 h volume window.  The rate ring is kept so the
    /// rate-of-change check stays continuous across the boundary.
    pub fn reset_24h_counter(&mut self) {
        info!(
            "Safety: 24h volume counter reset (was {:.1} ml)",
            self.cumulative_volume_ml
        );
        self.cumulative_volume_ml = 0.0;
    }

    pub fn cumulative_volume_ml(&self) -> f64 {
        self.cumulative_volume_ml
    }

    pub fn max_volume_24h_ml(&self) -> f64 {
        self.max_volume_24h_ml
    }

    /// Most recently delivered rate, if any.
    pub fn last_rate(&self) -> Option<f64> {
        self.recent_rates.latest().copied()
    }

    pub fn recent_rates(&self) -> impl Iterator<Item = f64> + '_ {
        self.recent_rates.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
