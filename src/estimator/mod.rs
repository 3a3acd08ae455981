//! State estimator.
//!
//! Fuses one telemetry snapshot with the patient profile and the rate
//! currently being delivered into a [`PatientState`]:
//!
//! ```text
//!   Telemetry ─┬─► coherence σ ───────────────┐
//!              ├─► energy proxy (EnergyModel) ─┤
//!              ├─► absolute energy (W/kg)      ├─► PatientState ─► history (50)
//!              ├─► metabolic load              │
//!              ├─► cardiac reserve             │
//!              └─► risk score ─────────────────┘
//! ```
//!
//! Every derived quantity is clamped before it leaves this module, so
//! malformed telemetry degrades the estimate instead of failing the tick.
//! The last 50 telemetry snapshots and states are retained for the
//! coherence noise check and [`StateEstimator::predict_forward`].

pub mod energy;

use log::debug;

use crate::history::BoundedHistory;
use crate::math::{clamp, gaussian, sigmoid};
use crate::model::{PatientProfile, PatientState, Telemetry};

use self::energy::{EnergyInputs, EnergyModel, FormulaEnergyModel};

/// Capacity of both history rings.
pub const HISTORY_LEN: usize = 50;

/// States required before a forecast is produced.
pub const MIN_FORECAST_HISTORY: usize = 5;

/// Telemetry samples inspected by the HR noise check.
const HR_NOISE_WINDOW: usize = 5;
/// Mean squared HR deviation (bpm²) above which the reading is penalised.
const HR_NOISE_VARIANCE: f64 = 400.0;

const DEFAULT_FORECAST_GROWTH_PER_MIN: f64 = 0.05;

pub struct StateEstimator {
    model: Box<dyn EnergyModel>,
    forecast_growth_per_min: f64,
    history: BoundedHistory<PatientState, HISTORY_LEN>,
    telemetry_history: BoundedHistory<Telemetry, HISTORY_LEN>,
}

impl Default for StateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEstimator {
    /// Estimator using the closed-form energy proxy.
    pub fn new() -> Self {
        Self::with_model(Box::new(FormulaEnergyModel))
    }

    pub fn with_model(model: Box<dyn EnergyModel>) -> Self {
        Self {
            model,
            forecast_growth_per_min: DEFAULT_FORECAST_GROWTH_PER_MIN,
            history: BoundedHistory::new(),
            telemetry_history: BoundedHistory::new(),
        }
    }

    /// Override how fast forecast uncertainty grows per minute of horizon.
    #[must_use]
    pub fn with_forecast_growth(mut self, per_minute: f64) -> Self {
        self.forecast_growth_per_min = per_minute.max(0.0);
        self
    }

    pub fn energy_model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Derive this tick's state and append it (and the snapshot) to history.
    pub fn estimate(
        &mut self,
        telemetry: &Telemetry,
        profile: &PatientProfile,
        current_infusion_rate: f64,
    ) -> PatientState {
        let coherence = self.coherence(telemetry);
        let energy_t = clamp(
            self.model
                .estimate_energy(&EnergyInputs::from_telemetry(telemetry)),
            0.0,
            1.0,
        );
        let flow_velocity = flow_velocity_cm_s(telemetry, profile, current_infusion_rate);
        let params = &profile.energy_params;
        let flow_efficiency = clamp(
            gaussian(
                flow_velocity,
                params.optimal_velocity_cm_s,
                params.velocity_sigma_cm_s,
            ),
            0.0,
            1.0,
        );
        let energy_t_absolute =
            absolute_energy_w_kg(telemetry, profile, current_infusion_rate, flow_efficiency);
        let metabolic_load = metabolic_load(telemetry);
        let cardiac_reserve = cardiac_reserve(telemetry, profile);
        let risk_score = risk_score(telemetry, energy_t);
        let uncertainty = clamp(1.0 - coherence * (1.0 - 0.3 * metabolic_load), 0.0, 1.0);

        let state = PatientState {
            hydration_pct: clamp(telemetry.hydration_pct, 0.0, 100.0),
            heart_rate_bpm: if telemetry.heart_rate_bpm.is_nan() {
                0.0
            } else {
                telemetry.heart_rate_bpm.max(0.0)
            },
            coherence_sigma: coherence,
            energy_t,
            energy_t_absolute,
            metabolic_load,
            cardiac_reserve,
            risk_score,
            estimated_flow_velocity_cm_s: flow_velocity,
            flow_efficiency,
            uncertainty,
        };

        self.telemetry_history.push(*telemetry);
        self.history.push(state);
        state
    }

    /// Linear extrapolation of hydration and energy `minutes_ahead` into the
    /// future.  `None` until [`MIN_FORECAST_HISTORY`] states exist.
    pub fn predict_forward(&self, minutes_ahead: f64) -> Option<PatientState> {
        if self.history.len() < MIN_FORECAST_HISTORY {
            return None;
        }
        let latest = *self.history.latest()?;
        let past = self.history.nth_back(MIN_FORECAST_HISTORY - 1)?;
        let span = MIN_FORECAST_HISTORY as f64;
        let minutes = if minutes_ahead.is_nan() { 0.0 } else { minutes_ahead.max(0.0) };

        let hydration_trend = (latest.hydration_pct - past.hydration_pct) / span;
        let energy_trend = (latest.energy_t - past.energy_t) / span;

        let forecast = PatientState {
            hydration_pct: clamp(latest.hydration_pct + hydration_trend * minutes, 0.0, 100.0),
            energy_t: clamp(latest.energy_t + energy_trend * minutes, 0.0, 1.0),
            uncertainty: (latest.uncertainty + self.forecast_growth_per_min * minutes).min(1.0),
            ..latest
        };
        debug!(
            "Estimator: {:.1} min forecast H={:.1}% E_T={:.2} u={:.2}",
            minutes, forecast.hydration_pct, forecast.energy_t, forecast.uncertainty
        );
        Some(forecast)
    }

    /// Oldest-first derived states.
    pub fn history(&self) -> impl Iterator<Item = &PatientState> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn telemetry_history(&self) -> impl Iterator<Item = &Telemetry> {
        self.telemetry_history.iter()
    }

    pub fn latest(&self) -> Option<&PatientState> {
        self.history.latest()
    }

    // ── Coherence ────────────────────────────────────────────────

    /// Signal trust, penalised for implausible vitals and HR noise against
    /// previously seen snapshots.
    fn coherence(&self, t: &Telemetry) -> f64 {
        let mut sigma = t.signal_quality;

        if !(40.0..=180.0).contains(&t.heart_rate_bpm) {
            sigma *= 0.5;
        }
        if !(35.0..=40.0).contains(&t.temp_celsius) {
            sigma *= 0.7;
        }
        if t.spo2_pct < 85.0 {
            sigma *= 0.6;
        }

        if self.telemetry_history.len() >= HR_NOISE_WINDOW {
            let variance = self
                .telemetry_history
                .last_n(HR_NOISE_WINDOW)
                .map(|prev| {
                    let d = prev.heart_rate_bpm - t.heart_rate_bpm;
                    d * d
                })
                .sum::<f64>()
                / HR_NOISE_WINDOW as f64;
            if variance > HR_NOISE_VARIANCE {
                sigma *= 0.7;
            }
        }

        clamp(sigma, 0.1, 1.0)
    }
}

// ── Physiological terms ──────────────────────────────────────────

/// Combined cardiac and infusion flow over a weight-scaled effective area.
fn flow_velocity_cm_s(t: &Telemetry, profile: &PatientProfile, rate_ml_min: f64) -> f64 {
    let cardiac_ml_s = t.cardiac_output_l_min.max(0.0) * 1000.0 / 60.0;
    let infusion_ml_s = rate_ml_min.max(0.0) / 60.0;
    let area_cm2 = (profile.weight_kg * 0.5).max(1.0);
    clamp((cardiac_ml_s + infusion_ml_s) / area_cm2, 0.05, 40.0)
}

/// Absorption efficiency of muscle tissue degraded by hypoxia, poor
/// perfusion and hypothermia.
fn tissue_efficiency(t: &Telemetry, profile: &PatientProfile) -> f64 {
    let p = &profile.energy_params;
    let mut eta = p.eta_muscle;

    if t.spo2_pct < 90.0 {
        eta *= 1.0 - clamp((90.0 - t.spo2_pct) / 20.0, 0.0, 0.6);
    }
    eta *= 0.5 + 0.5 * clamp(profile.tissue_perfusion, 0.0, 1.0);
    if t.temp_celsius < 36.0 {
        eta *= 1.0 - clamp((36.0 - t.temp_celsius) / 5.0, 0.0, 0.4);
    }

    let lo = p.eta_ischemic.min(p.eta_well_perfused);
    let hi = p.eta_ischemic.max(p.eta_well_perfused);
    clamp(eta, lo, hi)
}

/// Power delivered per kg of body mass (W/kg).
fn absolute_energy_w_kg(
    t: &Telemetry,
    profile: &PatientProfile,
    rate_ml_min: f64,
    velocity_match: f64,
) -> f64 {
    let p = &profile.energy_params;
    // ml/min → kg/s, taking infusate density as water.
    let mass_flow_kg_s = rate_ml_min.max(0.0) / 60_000.0;
    let power = p.input_power_w()
        * velocity_match
        * mass_flow_kg_s
        * p.specific_energy_kj_kg()
        * tissue_efficiency(t, profile);
    let value = power / profile.weight_kg.max(1e-3);
    if value.is_finite() { value } else { 0.0 }
}

fn metabolic_load(t: &Telemetry) -> f64 {
    let hr_stress = clamp((t.heart_rate_bpm - 60.0) / 100.0, 0.0, 1.0);
    // Temperature deviation is left unbounded; only the weighted sum is clamped.
    let temp_stress = (t.temp_celsius - 37.0).abs() / 3.0;
    let lactate_stress = clamp(t.lactate_mmol / 10.0, 0.0, 1.0);
    let anxiety = clamp(t.anxiety_idx, 0.0, 1.0);
    clamp(
        0.3 * hr_stress + 0.25 * temp_stress + 0.25 * lactate_stress + 0.2 * anxiety,
        0.0,
        1.0,
    )
}

/// Remaining cardiac headroom against an age-predicted maximum HR
/// (220 − age), falling steeply past 85 % of that maximum.
fn cardiac_reserve(t: &Telemetry, profile: &PatientProfile) -> f64 {
    let max_hr = (220.0 - profile.age_years).max(1.0);
    let ratio = t.heart_rate_bpm / max_hr;
    let reserve = 1.0 - sigmoid(ratio, 0.85, 10.0);
    let oxygen_scale = clamp(t.spo2_pct / 95.0, 0.5, 1.0);
    clamp(reserve * oxygen_scale, 0.0, 1.0)
}

fn risk_score(t: &Telemetry, energy_t: f64) -> f64 {
    let blood = clamp(t.blood_loss_idx, 0.0, 1.0);
    let hypoxia = clamp((95.0 - t.spo2_pct) / 10.0, 0.0, 1.0);
    // Thermal terms are floored at zero but not capped, so severe
    // hypo/hyperthermia can dominate the composite.
    let hypothermia = (36.0 - t.temp_celsius).max(0.0) / 2.0;
    let critical = blood.max(hypoxia).max(hypothermia);

    let dehydration = clamp((100.0 - t.hydration_pct) / 50.0, 0.0, 1.0);
    let metabolic = 0.4 * dehydration + 0.6 * (1.0 - energy_t);

    let thermal = (t.temp_celsius - 38.5).max(0.0) / 2.0;

    clamp(0.6 * critical + 0.3 * metabolic + 0.1 * thermal, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(hydration: f64, hr: f64) -> Telemetry {
        Telemetry {
            hydration_pct: hydration,
            heart_rate_bpm: hr,
            signal_quality: 1.0,
            ..Telemetry::default()
        }
    }

    #[test]
    fn healthy_reading_passes_through() {
        let mut est = StateEstimator::new();
        let s = est.estimate(&resting(80.0, 75.0), &PatientProfile::default(), 0.4);
        assert!((s.hydration_pct - 80.0).abs() <= 0.1);
        assert_eq!(s.heart_rate_bpm, 75.0);
        assert!(s.uncertainty < 0.5);
        assert!((s.coherence_sigma - 1.0).abs() < 1e-12);
    }

    #[test]
    fn implausible_vitals_reduce_coherence() {
        let mut est = StateEstimator::new();
        let t = Telemetry {
            heart_rate_bpm: 200.0,
            temp_celsius: 41.0,
            spo2_pct: 80.0,
            ..resting(80.0, 0.0)
        };
        let s = est.estimate(&t, &PatientProfile::default(), 0.4);
        assert!((s.coherence_sigma - 0.5 * 0.7 * 0.6).abs() < 1e-9);
    }

    #[test]
    fn hr_noise_penalised_after_five_samples() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        for _ in 0..5 {
            est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        }
        // Deviation of 25 bpm → variance 625 > 400.
        let s = est.estimate(&resting(80.0, 95.0), &profile, 0.4);
        assert!((s.coherence_sigma - 0.7).abs() < 1e-9);
    }

    #[test]
    fn hr_noise_ignored_with_short_history() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        for _ in 0..4 {
            est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        }
        let s = est.estimate(&resting(80.0, 95.0), &profile, 0.4);
        assert!((s.coherence_sigma - 1.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_requires_five_states() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        for _ in 0..4 {
            est.estimate(&resting(80.0, 70.0), &profile, 0.4);
            assert!(est.predict_forward(10.0).is_none());
        }
        est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        let f = est.predict_forward(10.0).unwrap();
        let latest = est.latest().unwrap();
        assert!(f.uncertainty >= latest.uncertainty);
        assert!((f.hydration_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_extrapolates_falling_hydration() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        for h in [70.0, 68.0, 66.0, 64.0, 62.0] {
            est.estimate(&resting(h, 70.0), &profile, 0.4);
        }
        // (62 - 70) / 5 = -1.6 per minute.
        let f = est.predict_forward(10.0).unwrap();
        assert!((f.hydration_pct - 46.0).abs() < 1e-9);

        let far = est.predict_forward(1000.0).unwrap();
        assert_eq!(far.hydration_pct, 0.0);
        assert_eq!(far.uncertainty, 1.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        for _ in 0..120 {
            est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        }
        assert_eq!(est.history_len(), HISTORY_LEN);
        assert_eq!(est.telemetry_history().count(), HISTORY_LEN);
    }

    #[test]
    fn flow_velocity_and_efficiency() {
        let mut est = StateEstimator::new();
        let profile = PatientProfile::default();
        let s = est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        let expected = (5.0 * 1000.0 / 60.0 + 0.4 / 60.0) / (75.0 * 0.5);
        assert!((s.estimated_flow_velocity_cm_s - expected).abs() < 1e-9);
        assert!(s.flow_efficiency > 0.0 && s.flow_efficiency <= 1.0);
    }

    #[test]
    fn zero_width_velocity_band_yields_zero_efficiency() {
        let mut profile = PatientProfile::default();
        profile.energy_params.velocity_sigma_cm_s = 0.0;
        let mut est = StateEstimator::new();
        let s = est.estimate(&resting(80.0, 70.0), &profile, 0.4);
        assert_eq!(s.flow_efficiency, 0.0);
        assert_eq!(s.energy_t_absolute, 0.0);
    }

    #[test]
    fn absolute_energy_scales_with_modality() {
        use crate::model::IvModality;
        let t = resting(80.0, 70.0);
        let mut profile = PatientProfile::default();
        let standard = absolute_energy_w_kg(&t, &profile, 1.0, 1.0);
        profile.energy_params.modality = IvModality::Mitochondrial;
        let mito = absolute_energy_w_kg(&t, &profile, 1.0, 1.0);
        assert!(standard > 0.0);
        assert!((mito / standard - 8.0 / 1.2).abs() < 1e-9);
    }

    #[test]
    fn tissue_efficiency_is_bounded_by_compartments() {
        let profile = PatientProfile::default();
        let hostile = Telemetry {
            spo2_pct: 50.0,
            temp_celsius: 30.0,
            ..Telemetry::default()
        };
        let eta = tissue_efficiency(&hostile, &profile);
        assert!((eta - profile.energy_params.eta_ischemic).abs() < 1e-12);
    }

    #[test]
    fn older_patient_has_less_reserve() {
        let t = resting(80.0, 150.0);
        let young = PatientProfile {
            age_years: 25.0,
            ..PatientProfile::default()
        };
        let old = PatientProfile {
            age_years: 75.0,
            ..PatientProfile::default()
        };
        assert!(cardiac_reserve(&t, &young) > cardiac_reserve(&t, &old));
    }

    #[test]
    fn blood_loss_drives_risk() {
        let calm = risk_score(&Telemetry::default(), 0.9);
        let bleeding = risk_score(
            &Telemetry {
                blood_loss_idx: 1.0,
                ..Telemetry::default()
            },
            0.9,
        );
        assert!(bleeding - calm >= 0.59);
    }

    // ── Temperature extremes ─────────────────────────────────────

    #[test]
    fn severe_hypothermia_drives_high_risk() {
        use crate::config::SafetyLimits;
        use crate::safety::{SafetyMonitor, SafetyWarning};

        let profile = PatientProfile::default();
        let t = Telemetry {
            temp_celsius: 33.0,
            ..Telemetry::default()
        };
        let s = StateEstimator::new().estimate(&t, &profile, 0.4);
        // Hypothermia term (36 - 33) / 2 = 1.5 is not capped before weighting.
        assert!(s.risk_score > 0.75, "risk {}", s.risk_score);

        let check = SafetyMonitor::new(&profile, &SafetyLimits::default()).evaluate(0.4, &s, 0.2 / 60.0);
        assert!(check.warnings.contains(SafetyWarning::HighRiskState));
    }

    #[test]
    fn hyperthermia_temperature_stress_is_uncapped() {
        let t = Telemetry {
            temp_celsius: 43.0,
            ..Telemetry::default()
        };
        let s = StateEstimator::new().estimate(&t, &PatientProfile::default(), 0.4);
        // 0.3 * 0.1 + 0.25 * 2.0 + 0.25 * 0.15 + 0.2 * 0.1
        assert!((s.metabolic_load - 0.5875).abs() < 1e-9, "load {}", s.metabolic_load);
        assert!(s.risk_score <= 1.0);
    }

    #[test]
    fn mild_fever_leaves_thermal_risk_out() {
        let profile = PatientProfile::default();
        let normal = StateEstimator::new().estimate(&Telemetry::default(), &profile, 0.4);
        let fever = StateEstimator::new().estimate(
            &Telemetry {
                temp_celsius: 38.5,
                ..Telemetry::default()
            },
            &profile,
            0.4,
        );
        assert!((fever.risk_score - normal.risk_score).abs() < 1e-12);
    }
}
