//! Simulated telemetry source.
//!
//! Slow sinusoidal waveforms on every channel, driven by session time, so
//! the binary can run a full session without hardware.  Periods are chosen
//! so hydration occasionally dips low enough to exercise the predictive
//! boost.

use crate::app::ports::TelemetrySource;
use crate::model::Telemetry;

pub struct SimulatedTelemetry {
    baseline_hr_bpm: f64,
}

impl SimulatedTelemetry {
    pub fn new(baseline_hr_bpm: f64) -> Self {
        Self { baseline_hr_bpm }
    }
}

impl TelemetrySource for SimulatedTelemetry {
    fn read(&mut self, timestamp_ms: u64) -> Telemetry {
        let t = timestamp_ms as f64 / 1000.0;
        Telemetry {
            timestamp_ms,
            hydration_pct: 65.0 + 15.0 * (0.05 * t).sin(),
            heart_rate_bpm: self.baseline_hr_bpm + 20.0 * (0.1 * t).sin(),
            temp_celsius: 37.0 + 0.5 * (0.03 * t).sin(),
            blood_loss_idx: 0.0,
            fatigue_idx: 0.3 + 0.2 * (0.02 * t).sin(),
            anxiety_idx: 0.2,
            signal_quality: 0.85 + 0.1 * (0.5 * t).sin(),
            spo2_pct: 97.0 + 2.0 * (0.08 * t).sin(),
            lactate_mmol: 2.0 + (0.04 * t).sin(),
            cardiac_output_l_min: 5.0 + (0.06 * t).sin(),
        }
    }
}
