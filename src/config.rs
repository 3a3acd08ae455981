//! System configuration parameters
//!
//! All tunable parameters for an infusion session.  Loaded from a JSON file
//! (`--config`) with every field optional; anything missing falls back to
//! the defaults below.  [`SystemConfig::validate`] rejects values that
//! would make the control loop meaningless rather than silently clamping
//! them.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::PatientProfile;

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Control loop period (milliseconds).
    pub control_period_ms: u64,
    pub profile: PatientProfile,
    pub control: ControlTuning,
    pub safety: SafetyLimits,
    pub estimator: EstimatorConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 200, // 5 Hz
            profile: PatientProfile::default(),
            control: ControlTuning::default(),
            safety: SafetyLimits::default(),
            estimator: EstimatorConfig::default(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Adaptive controller tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlTuning {
    /// Rate commanded before the first decision (ml/min).
    pub initial_rate_ml_min: f64,
    /// Lower end of the base-rate range (ml/min).
    pub base_rate_floor_ml_min: f64,
    /// Span added on top of the floor at full demand (ml/min).
    pub base_rate_span_ml_min: f64,
    /// Forecast horizon for the predictive boost (minutes).
    pub prediction_horizon_min: f64,
    /// Forecast uncertainty growth per minute of horizon.
    pub forecast_uncertainty_per_min: f64,
    /// Boost applies when forecast hydration is below this (%).
    pub predictive_boost_threshold_pct: f64,
    pub predictive_boost_factor: f64,
    /// Below this cardiac reserve the rate is scaled down smoothly.
    pub reserve_scaling_threshold: f64,
}

impl Default for ControlTuning {
    fn default() -> Self {
        Self {
            initial_rate_ml_min: 0.4,
            base_rate_floor_ml_min: 0.4,
            base_rate_span_ml_min: 1.4,
            prediction_horizon_min: 10.0,
            forecast_uncertainty_per_min: 0.05,
            predictive_boost_threshold_pct: 50.0,
            predictive_boost_factor: 1.2,
            reserve_scaling_threshold: 0.3,
        }
    }
}

/// Safety monitor thresholds and per-check ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    /// Minimum safe rate (ml/min); a ceiling below it fails the check.
    pub min_rate_ml_min: f64,
    /// Largest change from the last delivered rate per cycle (ml/min).
    pub max_rate_change_ml_min: f64,
    pub min_cardiac_reserve: f64,
    pub high_risk_threshold: f64,
    /// Fraction of the 24 h ceiling at which the volume check trips.
    pub volume_warning_fraction: f64,
    pub daily_volume_per_kg_ml: f64,
    pub cardiac_condition_volume_factor: f64,
    pub renal_impairment_volume_factor: f64,
    pub volume_ceiling_ml_min: f64,
    pub cardiac_ceiling_ml_min: f64,
    pub risk_ceiling_ml_min: f64,
    /// Tachycardia when HR exceeds baseline times this.
    pub tachycardia_factor: f64,
    pub tachycardia_ceiling_ml_min: f64,
    /// Hydration (%) below which the emergency floor applies.
    pub emergency_hydration_pct: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_rate_ml_min: 0.1,
            max_rate_change_ml_min: 0.3,
            min_cardiac_reserve: 0.2,
            high_risk_threshold: 0.75,
            volume_warning_fraction: 0.9,
            daily_volume_per_kg_ml: 35.0,
            cardiac_condition_volume_factor: 0.7,
            renal_impairment_volume_factor: 0.6,
            volume_ceiling_ml_min: 0.3,
            cardiac_ceiling_ml_min: 0.5,
            risk_ceiling_ml_min: 0.6,
            tachycardia_factor: 1.4,
            tachycardia_ceiling_ml_min: 0.4,
            emergency_hydration_pct: 50.0,
        }
    }
}

/// Which energy-proxy implementation the estimator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyModelKind {
    #[default]
    Formula,
    /// Learned network loaded from `EstimatorConfig::model_path`.
    Learned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EstimatorConfig {
    pub energy_model: EnergyModelKind,
    /// JSON weights file for [`EnergyModelKind::Learned`].
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory receiving the session's CSV and JSON-lines files.
    pub log_dir: PathBuf,
    /// Session identifier embedded in file names; generated when absent.
    pub session_id: Option<String>,
    /// Emit a console status line every N ticks.
    pub status_every_ticks: u32,
    /// Buffered records between forced flushes.
    pub flush_every_records: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            session_id: None,
            status_every_ticks: 10, // every 2 s at 5 Hz
            flush_every_records: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("http bind address: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Loading / validation
// ---------------------------------------------------------------------------

impl SystemConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Control period in minutes, the unit the volume accounting uses.
    pub fn period_minutes(&self) -> f64 {
        self.control_period_ms as f64 / 60_000.0
    }

    /// Reject configurations the loop cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        fn fraction(name: &str, v: f64) -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(Error::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        }
        fn positive(name: &str, v: f64) -> Result<()> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(Error::Config(format!("{name} must be positive, got {v}")))
            }
        }

        if self.control_period_ms == 0 {
            return Err(Error::Config("control_period_ms must be positive".into()));
        }

        let p = &self.profile;
        positive("profile.weight_kg", p.weight_kg)?;
        positive("profile.baseline_hr_bpm", p.baseline_hr_bpm)?;
        fraction("profile.tissue_perfusion", p.tissue_perfusion)?;
        if p.age_years < 0.0 || p.age_years >= 220.0 {
            return Err(Error::Config(format!(
                "profile.age_years out of range: {}",
                p.age_years
            )));
        }
        if p.energy_params.velocity_sigma_cm_s <= 0.0 {
            return Err(Error::Config(
                "profile.energy_params.velocity_sigma_cm_s must be positive".into(),
            ));
        }

        let s = &self.safety;
        positive("safety.min_rate_ml_min", s.min_rate_ml_min)?;
        if p.max_safe_infusion_rate < s.min_rate_ml_min {
            return Err(Error::Config(format!(
                "profile.max_safe_infusion_rate ({}) below safety.min_rate_ml_min ({})",
                p.max_safe_infusion_rate, s.min_rate_ml_min
            )));
        }
        positive("safety.max_rate_change_ml_min", s.max_rate_change_ml_min)?;
        positive("safety.daily_volume_per_kg_ml", s.daily_volume_per_kg_ml)?;
        fraction("safety.min_cardiac_reserve", s.min_cardiac_reserve)?;
        fraction("safety.high_risk_threshold", s.high_risk_threshold)?;
        fraction("safety.volume_warning_fraction", s.volume_warning_fraction)?;
        fraction(
            "safety.cardiac_condition_volume_factor",
            s.cardiac_condition_volume_factor,
        )?;
        fraction(
            "safety.renal_impairment_volume_factor",
            s.renal_impairment_volume_factor,
        )?;
        positive("safety.tachycardia_factor", s.tachycardia_factor)?;

        let c = &self.control;
        positive("control.prediction_horizon_min", c.prediction_horizon_min)?;
        positive("control.predictive_boost_factor", c.predictive_boost_factor)?;
        fraction("control.reserve_scaling_threshold", c.reserve_scaling_threshold)?;

        if self.estimator.energy_model == EnergyModelKind::Learned
            && self.estimator.model_path.is_none()
        {
            return Err(Error::Config(
                "estimator.energy_model = learned requires estimator.model_path".into(),
            ));
        }

        if self.logging.status_every_ticks == 0 || self.logging.flush_every_records == 0 {
            return Err(Error::Config(
                "logging cadences must be at least 1".into(),
            ));
        }
        if self.http.enabled {
            self.http.socket_addr()?;
        }
        Ok(())
    }
}
