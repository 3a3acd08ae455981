//! CSV session logs.
//!
//! Two append-only files per session:
//!
//! - `ivctl_<session>_telemetry.csv`: one row per tick with the raw channels.
//! - `ivctl_<session>_control.csv`: one row per decision.
//!
//! Rows are buffered and flushed every `flush_every` records, on
//! [`EventSink::flush`], and on drop.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::Writer;
use log::{debug, warn};

use crate::app::events::{AppEvent, TickRecord};
use crate::app::ports::EventSink;
use crate::error::{Error, Result};

pub const TELEMETRY_HEADER: [&str; 11] = [
    "timestamp",
    "hydration_pct",
    "heart_rate_bpm",
    "temp_c",
    "blood_loss_idx",
    "fatigue_idx",
    "anxiety_idx",
    "signal_quality",
    "spo2_pct",
    "lactate_mmol",
    "cardiac_output_L_min",
];

pub const CONTROL_HEADER: [&str; 11] = [
    "timestamp",
    "infusion_rate_ml_min",
    "confidence",
    "energy_T",
    "energy_T_abs_W_kg",
    "flow_velocity_cm_s",
    "flow_efficiency",
    "risk_score",
    "cardiac_reserve",
    "warnings",
    "rationale",
];

/// `SSSSSS.mmm` seconds since session start.
pub fn format_timestamp(ms: u64) -> String {
    format!("{:06}.{:03}", ms / 1000, ms % 1000)
}

type CsvFile = Writer<BufWriter<File>>;

fn open_csv(path: &Path, header: &[&str]) -> Result<CsvFile> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = Writer::from_writer(BufWriter::new(file));
    writer.write_record(header)?;
    writer.flush().map_err(|e| Error::io(path, e))?;
    Ok(writer)
}

/// Telemetry + control CSV writer pair.
pub struct CsvSessionLog {
    telemetry: CsvFile,
    control: CsvFile,
    telemetry_path: PathBuf,
    control_path: PathBuf,
    flush_every: u32,
    pending: u32,
}

impl CsvSessionLog {
    /// Create both files under `dir`, writing their header rows.
    pub fn create(dir: &Path, session_id: &str, flush_every: u32) -> Result<Self> {
        let telemetry_path = dir.join(format!("ivctl_{session_id}_telemetry.csv"));
        let control_path = dir.join(format!("ivctl_{session_id}_control.csv"));
        let telemetry = open_csv(&telemetry_path, &TELEMETRY_HEADER)?;
        let control = open_csv(&control_path, &CONTROL_HEADER)?;
        debug!("CSV logs: {} / {}", telemetry_path.display(), control_path.display());
        Ok(Self {
            telemetry,
            control,
            telemetry_path,
            control_path,
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    pub fn telemetry_path(&self) -> &Path {
        &self.telemetry_path
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn write_tick(&mut self, r: &TickRecord) -> Result<()> {
        let ts = format_timestamp(r.timestamp_ms);
        let t = &r.telemetry;
        self.telemetry.write_record([
            ts.clone(),
            format!("{:.2}", t.hydration_pct),
            format!("{:.1}", t.heart_rate_bpm),
            format!("{:.2}", t.temp_celsius),
            format!("{:.3}", t.blood_loss_idx),
            format!("{:.3}", t.fatigue_idx),
            format!("{:.3}", t.anxiety_idx),
            format!("{:.3}", t.signal_quality),
            format!("{:.1}", t.spo2_pct),
            format!("{:.2}", t.lactate_mmol),
            format!("{:.2}", t.cardiac_output_l_min),
        ])?;

        let s = &r.state;
        let o = &r.output;
        self.control.write_record([
            ts,
            format!("{:.4}", o.infusion_ml_per_min),
            format!("{:.3}", o.confidence),
            format!("{:.4}", s.energy_t),
            format!("{:.6}", s.energy_t_absolute),
            format!("{:.3}", s.estimated_flow_velocity_cm_s),
            format!("{:.4}", s.flow_efficiency),
            format!("{:.4}", s.risk_score),
            format!("{:.4}", s.cardiac_reserve),
            o.warning_flags.to_string(),
            o.rationale.clone(),
        ])?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush_all()?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<()> {
        self.pending = 0;
        self.telemetry
            .flush()
            .map_err(|e| Error::io(&self.telemetry_path, e))?;
        self.control
            .flush()
            .map_err(|e| Error::io(&self.control_path, e))
    }
}

impl EventSink for CsvSessionLog {
    fn emit(&mut self, event: &AppEvent) {
        if let AppEvent::Tick(record) = event {
            if let Err(e) = self.write_tick(record) {
                warn!("CSV log write failed: {e}");
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_all()
    }
}

impl Drop for CsvSessionLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!("CSV log flush on close failed: {e}");
        }
    }
}
