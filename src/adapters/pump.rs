//! Pump stub.
//!
//! Records the last commanded rate and logs it.  A real driver would
//! implement [`PumpPort`] the same way.

use log::debug;

use crate::app::ports::PumpPort;

#[derive(Debug, Default)]
pub struct LoggingPump {
    rate_ml_min: f64,
    commands: u64,
}

impl LoggingPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_ml_min(&self) -> f64 {
        self.rate_ml_min
    }

    pub fn commands(&self) -> u64 {
        self.commands
    }
}

impl PumpPort for LoggingPump {
    fn set_rate(&mut self, ml_per_min: f64) {
        if (ml_per_min - self.rate_ml_min).abs() > f64::EPSILON {
            debug!("Pump: {:.3} -> {:.3} ml/min", self.rate_ml_min, ml_per_min);
        }
        self.rate_ml_min = ml_per_min;
        self.commands += 1;
    }
}
