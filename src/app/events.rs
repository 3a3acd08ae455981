//! Outbound application events.
//!
//! The [`ControlService`](super::service::ControlService) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on
//! the other side decide what to do with them: append to the session CSV
//! files, write the alert journal, mirror to the console, or publish to
//! the observability snapshot.

use core::fmt;

use serde::Serialize;

use crate::model::{ControlOutput, PatientState, Telemetry};

/// Structured events emitted by the application core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The session has started.
    Started {
        session_id: String,
        energy_model: &'static str,
    },

    /// One completed control tick.
    Tick(Box<TickRecord>),

    /// A notable condition worth persisting to the alert journal.
    Alert(AlertEvent),

    /// The control loop has exited.
    Stopped(SessionSummary),
}

/// Everything produced by one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    /// Session time (ms) at which the tick ran.
    pub timestamp_ms: u64,
    pub tick: u64,
    pub telemetry: Telemetry,
    pub state: PatientState,
    pub output: ControlOutput,
    /// Safety ceiling applied this tick (ml/min).
    pub max_allowed_rate: f64,
    pub cumulative_volume_ml: f64,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

/// One line of the alert journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp_ms: u64,
    pub severity: AlertSeverity,
    /// Subsystem that raised the alert (`safety`, `estimator`, `session`).
    pub source: String,
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl AlertEvent {
    pub fn new(
        timestamp_ms: u64,
        severity: AlertSeverity,
        source: &str,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            severity,
            source: source.to_string(),
            code: code.to_string(),
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

/// Totals reported when the control loop stops.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub cumulative_volume_ml: f64,
    /// Iterations that started more than one period late.
    pub overruns: u64,
    pub final_rate_ml_min: f64,
}
