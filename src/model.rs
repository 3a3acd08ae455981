//! Core data model shared by every stage of the pipeline.
//!
//! [`Telemetry`] is the raw per-tick input, [`PatientProfile`] the static
//! session configuration, [`PatientState`] the derived estimate, and
//! [`ControlOutput`] the final command.  Values flow strictly one tick at a
//! time: snapshot → estimate → forecast → rate → safety clamp → command.

use serde::{Deserialize, Serialize};

use crate::safety::Warnings;

// ---------------------------------------------------------------------------
// Telemetry (raw sensor snapshot)
// ---------------------------------------------------------------------------

/// A point-in-time snapshot of every physiological channel.
///
/// Values are taken as-is from the source; nothing here is validated.
/// Every consumer clamps what it derives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Milliseconds since session start.
    pub timestamp_ms: u64,
    /// Body water percentage, nominally 0–100.
    pub hydration_pct: f64,
    pub heart_rate_bpm: f64,
    /// Core body temperature (°C).
    pub temp_celsius: f64,
    /// Cumulative blood loss estimate, nominally 0–1.
    pub blood_loss_idx: f64,
    /// Muscular / metabolic fatigue, nominally 0–1.
    pub fatigue_idx: f64,
    /// Stress / anxiety level, nominally 0–1.
    pub anxiety_idx: f64,
    /// Sensor reliability metric, nominally 0–1.
    pub signal_quality: f64,
    /// Blood oxygen saturation, nominally 0–100.
    pub spo2_pct: f64,
    /// Blood lactate (mmol/L).
    pub lactate_mmol: f64,
    /// Measured or estimated cardiac output (L/min).
    #[serde(rename = "cardiac_output_L_min")]
    pub cardiac_output_l_min: f64,
}

impl Default for Telemetry {
    /// A resting, well-hydrated reading.
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            hydration_pct: 80.0,
            heart_rate_bpm: 70.0,
            temp_celsius: 37.0,
            blood_loss_idx: 0.0,
            fatigue_idx: 0.2,
            anxiety_idx: 0.1,
            signal_quality: 1.0,
            spo2_pct: 98.0,
            lactate_mmol: 1.5,
            cardiac_output_l_min: 5.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Patient profile
// ---------------------------------------------------------------------------

/// IV fluid modality, selecting the specific energy delivered per kg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvModality {
    #[default]
    Standard,
    AtpLoaded,
    Mitochondrial,
}

/// Parameters of the absolute energy-transfer model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyTransferParams {
    /// Baseline cellular respiration (W).
    pub baseline_power_w: f64,
    /// IV substrate supplementation (W).
    pub iv_supplement_power_w: f64,
    /// Energy-transfer-cell contribution (W); zero until deployed.
    pub energy_cell_power_w: f64,

    /// Specific energy of standard IV fluids (kJ/kg).
    pub specific_energy_standard_kj_kg: f64,
    /// Specific energy of ATP-loaded vesicles (kJ/kg).
    pub specific_energy_atp_kj_kg: f64,
    /// Specific energy of mitochondrial transplant (kJ/kg).
    pub specific_energy_mitochondrial_kj_kg: f64,
    /// Which of the three specific energies is infused.
    pub modality: IvModality,

    /// Absorption efficiency of well-perfused tissue (brain, heart).
    pub eta_well_perfused: f64,
    /// Absorption efficiency of muscle.
    pub eta_muscle: f64,
    /// Absorption efficiency of ischemic / hypoxic tissue.
    pub eta_ischemic: f64,

    /// Patient-specific optimal flow velocity (cm/s).
    pub optimal_velocity_cm_s: f64,
    /// Velocity tolerance band (cm/s).
    pub velocity_sigma_cm_s: f64,
}

impl EnergyTransferParams {
    /// Specific energy (kJ/kg) of the configured modality.
    pub fn specific_energy_kj_kg(&self) -> f64 {
        match self.modality {
            IvModality::Standard => self.specific_energy_standard_kj_kg,
            IvModality::AtpLoaded => self.specific_energy_atp_kj_kg,
            IvModality::Mitochondrial => self.specific_energy_mitochondrial_kj_kg,
        }
    }

    /// Total input power (W).
    pub fn input_power_w(&self) -> f64 {
        self.baseline_power_w + self.iv_supplement_power_w + self.energy_cell_power_w
    }
}

impl Default for EnergyTransferParams {
    /// Standard IV therapy, no energy cells.
    fn default() -> Self {
        Self {
            baseline_power_w: 100.0,
            iv_supplement_power_w: 35.0,
            energy_cell_power_w: 0.0,

            specific_energy_standard_kj_kg: 1.2,
            specific_energy_atp_kj_kg: 4.5,
            specific_energy_mitochondrial_kj_kg: 8.0,
            modality: IvModality::Standard,

            eta_well_perfused: 0.90,
            eta_muscle: 0.75,
            eta_ischemic: 0.40,

            optimal_velocity_cm_s: 20.0,
            velocity_sigma_cm_s: 5.0,
        }
    }
}

/// Static per-session patient configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientProfile {
    pub weight_kg: f64,
    pub age_years: f64,
    pub cardiac_condition: bool,
    pub renal_impairment: bool,
    pub diabetes: bool,
    pub baseline_hr_bpm: f64,
    /// Absolute upper bound on any commanded rate (ml/min).
    pub max_safe_infusion_rate: f64,
    /// Overall tissue perfusion state, 0–1.
    pub tissue_perfusion: f64,
    pub energy_params: EnergyTransferParams,
}

impl Default for PatientProfile {
    fn default() -> Self {
        Self {
            weight_kg: 75.0,
            age_years: 35.0,
            cardiac_condition: false,
            renal_impairment: false,
            diabetes: false,
            baseline_hr_bpm: 70.0,
            max_safe_infusion_rate: 1.5,
            tissue_perfusion: 0.85,
            energy_params: EnergyTransferParams::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived state
// ---------------------------------------------------------------------------

/// Per-tick physiological estimate produced by the state estimator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PatientState {
    /// [0, 100]
    pub hydration_pct: f64,
    /// ≥ 0
    pub heart_rate_bpm: f64,
    /// Signal trustworthiness, [0.1, 1].
    pub coherence_sigma: f64,
    /// Normalised metabolic energy proxy, [0, 1].
    #[serde(rename = "energy_T")]
    pub energy_t: f64,
    /// Absolute energy transfer (W/kg), unbounded.
    #[serde(rename = "energy_T_absolute")]
    pub energy_t_absolute: f64,
    /// [0, 1]
    pub metabolic_load: f64,
    /// [0, 1]
    pub cardiac_reserve: f64,
    /// [0, 1]
    pub risk_score: f64,
    pub estimated_flow_velocity_cm_s: f64,
    /// Gaussian match of flow velocity to the optimum, [0, 1].
    pub flow_efficiency: f64,
    /// [0, 1]
    pub uncertainty: f64,
}

// ---------------------------------------------------------------------------
// Control output
// ---------------------------------------------------------------------------

/// The command emitted once per tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutput {
    pub infusion_ml_per_min: f64,
    /// `1 - uncertainty`.
    pub confidence: f64,
    /// Diagnostic text; never read back by control logic.
    pub rationale: String,
    /// True when the safety check failed this tick.
    pub safety_override: bool,
    pub warning_flags: Warnings,
}
