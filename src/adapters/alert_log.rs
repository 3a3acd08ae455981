//! Alert journal: one JSON object per line.
//!
//! Buffered like the CSV logs, except that a Critical alert is flushed
//! immediately so it survives a crash right after it was raised.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::app::events::{AlertEvent, AlertSeverity, AppEvent};
use crate::app::ports::EventSink;
use crate::error::{Error, Result};

pub struct AlertJournal {
    out: BufWriter<File>,
    path: PathBuf,
    flush_every: u32,
    pending: u32,
}

impl AlertJournal {
    pub fn create(dir: &Path, session_id: &str, flush_every: u32) -> Result<Self> {
        let path = dir.join(format!("ivctl_{session_id}_alerts.jsonl"));
        let file = File::create(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            out: BufWriter::new(file),
            path,
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, alert: &AlertEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, alert)?;
        self.out
            .write_all(b"\n")
            .map_err(|e| Error::io(&self.path, e))?;
        self.pending += 1;
        if alert.severity == AlertSeverity::Critical || self.pending >= self.flush_every {
            self.flush_out()?;
        }
        Ok(())
    }

    fn flush_out(&mut self) -> Result<()> {
        self.pending = 0;
        self.out.flush().map_err(|e| Error::io(&self.path, e))
    }
}

impl EventSink for AlertJournal {
    fn emit(&mut self, event: &AppEvent) {
        if let AppEvent::Alert(alert) = event {
            if let Err(e) = self.append(alert) {
                warn!("Alert journal write failed: {e}");
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_out()
    }
}

impl Drop for AlertJournal {
    fn drop(&mut self) {
        if let Err(e) = self.flush_out() {
            warn!("Alert journal flush on close failed: {e}");
        }
    }
}
