//! Fan-out sink bundling every per-session output.
//!
//! ```text
//!   AppEvent ──▶ SessionSinks ─┬─▶ CsvSessionLog   (telemetry / control CSV)
//!                              ├─▶ AlertJournal    (alerts JSON lines)
//!                              ├─▶ LogEventSink    (console)
//!                              └─▶ SnapshotHandle  (observability, optional)
//! ```
//!
//! Opening is the only fallible step.  A failure here is fatal and is
//! reported before the control loop starts.

use std::fs;

use chrono::Utc;
use log::info;

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use crate::snapshot::SnapshotHandle;

use super::alert_log::AlertJournal;
use super::csv_sink::CsvSessionLog;
use super::log_sink::LogEventSink;

/// Session identifier derived from the wall clock, e.g. `20261018_142530`.
pub fn generate_session_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

pub struct SessionSinks {
    csv: CsvSessionLog,
    alerts: AlertJournal,
    console: LogEventSink,
    snapshot: Option<SnapshotHandle>,
}

impl SessionSinks {
    pub fn open(
        logging: &LoggingConfig,
        session_id: &str,
        snapshot: Option<SnapshotHandle>,
    ) -> Result<Self> {
        fs::create_dir_all(&logging.log_dir).map_err(|e| Error::io(&logging.log_dir, e))?;
        let csv = CsvSessionLog::create(&logging.log_dir, session_id, logging.flush_every_records)?;
        let alerts =
            AlertJournal::create(&logging.log_dir, session_id, logging.flush_every_records)?;
        info!(
            "Session logs open in {} (session {session_id})",
            logging.log_dir.display()
        );
        Ok(Self {
            csv,
            alerts,
            console: LogEventSink::new(logging.status_every_ticks),
            snapshot,
        })
    }

    pub fn csv(&self) -> &CsvSessionLog {
        &self.csv
    }

    pub fn alerts(&self) -> &AlertJournal {
        &self.alerts
    }
}

impl EventSink for SessionSinks {
    fn emit(&mut self, event: &AppEvent) {
        self.csv.emit(event);
        self.alerts.emit(event);
        self.console.emit(event);
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.emit(event);
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.flush()?;
        }
        self.csv.flush()?;
        self.alerts.flush()
    }
}
