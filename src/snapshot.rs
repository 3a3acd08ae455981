//! Published snapshot for read-only observers.
//!
//! The control thread folds every [`AppEvent`] into a small
//! [`PublishedSnapshot`] behind a mutex.  Observers (the HTTP server) take
//! a copy under the lock and work from the copy; they never reach into the
//! estimator, controller or safety monitor.
//!
//! Alerts are held back until the tick that raised them is published, so a
//! reader never sees a tick's alerts next to the previous tick's values.
//! Alerts raised outside a tick are published on stop or on
//! [`EventSink::flush`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;

use crate::app::events::{AlertEvent, AppEvent, SessionSummary};
use crate::app::ports::EventSink;
use crate::config::SystemConfig;
use crate::model::{ControlOutput, PatientState, Telemetry};

pub const TELEMETRY_HISTORY_LEN: usize = 1000;
pub const ALERT_HISTORY_LEN: usize = 100;

/// Latest results of the control session.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedSnapshot {
    pub session_id: String,
    pub running: bool,
    pub energy_model: String,
    /// Wall-clock start time (RFC 3339).
    pub started_at: Option<String>,
    pub tick: u64,
    pub session_time_ms: u64,
    pub cumulative_volume_ml: f64,
    pub max_allowed_rate: f64,
    pub latest_telemetry: Option<Telemetry>,
    pub latest_state: Option<PatientState>,
    pub latest_control: Option<ControlOutput>,
    pub telemetry_history: VecDeque<Telemetry>,
    pub alerts: VecDeque<AlertEvent>,
    pub summary: Option<SessionSummary>,
    pub config: SystemConfig,
    #[serde(skip)]
    pending_alerts: Vec<AlertEvent>,
}

impl PublishedSnapshot {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            session_id: String::new(),
            running: false,
            energy_model: String::new(),
            started_at: None,
            tick: 0,
            session_time_ms: 0,
            cumulative_volume_ml: 0.0,
            max_allowed_rate: 0.0,
            latest_telemetry: None,
            latest_state: None,
            latest_control: None,
            telemetry_history: VecDeque::with_capacity(TELEMETRY_HISTORY_LEN),
            alerts: VecDeque::with_capacity(ALERT_HISTORY_LEN),
            summary: None,
            config,
            pending_alerts: Vec::new(),
        }
    }

    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                session_id,
                energy_model,
            } => {
                self.session_id.clone_from(session_id);
                self.energy_model = (*energy_model).to_string();
                self.running = true;
                self.started_at = Some(Utc::now().to_rfc3339());
            }
            AppEvent::Tick(record) => {
                self.tick = record.tick;
                self.session_time_ms = record.timestamp_ms;
                self.cumulative_volume_ml = record.cumulative_volume_ml;
                self.max_allowed_rate = record.max_allowed_rate;
                self.latest_telemetry = Some(record.telemetry);
                self.latest_state = Some(record.state);
                self.latest_control = Some(record.output.clone());
                push_bounded(&mut self.telemetry_history, record.telemetry, TELEMETRY_HISTORY_LEN);
                self.publish_alerts();
            }
            AppEvent::Alert(alert) => self.pending_alerts.push(alert.clone()),
            AppEvent::Stopped(summary) => {
                self.running = false;
                self.summary = Some(*summary);
                self.publish_alerts();
            }
        }
    }

    /// Move held-back alerts into the published alert history.
    pub fn publish_alerts(&mut self) {
        for alert in self.pending_alerts.drain(..) {
            push_bounded(&mut self.alerts, alert, ALERT_HISTORY_LEN);
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    while queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// Shared handle to the snapshot.  Cloning shares the same snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    inner: Arc<Mutex<PublishedSnapshot>>,
}

impl SnapshotHandle {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PublishedSnapshot::new(config))),
        }
    }

    /// Copy of the current snapshot; the lock is held only for the copy.
    pub fn read(&self) -> PublishedSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PublishedSnapshot> {
        // A panicked writer leaves a consistent-enough snapshot to keep
        // serving reads.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for SnapshotHandle {
    fn emit(&mut self, event: &AppEvent) {
        self.lock().apply(event);
    }

    fn flush(&mut self) -> crate::error::Result<()> {
        self.lock().publish_alerts();
        Ok(())
    }
}
