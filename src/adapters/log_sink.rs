//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (the binary routes it to stderr).  Tick status lines
//! are throttled to every `status_every` ticks; alerts are always logged at
//! a level matching their severity.

use log::{debug, error, info, warn};

use crate::app::events::{AlertSeverity, AppEvent};
use crate::app::ports::EventSink;

/// Adapter that logs [`AppEvent`]s to the console.
pub struct LogEventSink {
    status_every: u64,
}

impl LogEventSink {
    pub fn new(status_every_ticks: u32) -> Self {
        Self {
            status_every: u64::from(status_every_ticks.max(1)),
        }
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Tick(r) => {
                if r.tick % self.status_every != 0 {
                    return;
                }
                let o = &r.output;
                let s = &r.state;
                info!(
                    "STATUS | t={:.1}s | H={:.1}% HR={:.0} | E_T={:.2} R={:.2} C_res={:.2} | \
                     rate={:.2}/{:.2} ml/min conf={:.2} | vol={:.1} ml{}{}",
                    r.timestamp_ms as f64 / 1000.0,
                    s.hydration_pct,
                    s.heart_rate_bpm,
                    s.energy_t,
                    s.risk_score,
                    s.cardiac_reserve,
                    o.infusion_ml_per_min,
                    r.max_allowed_rate,
                    o.confidence,
                    r.cumulative_volume_ml,
                    if o.warning_flags.is_empty() { "" } else { " | " },
                    o.warning_flags,
                );
            }
            AppEvent::Alert(a) => match a.severity {
                AlertSeverity::Debug => debug!("ALERT | {} {}: {}", a.source, a.code, a.message),
                AlertSeverity::Info => info!("ALERT | {} {}: {}", a.source, a.code, a.message),
                AlertSeverity::Warn => warn!("ALERT | {} {}: {}", a.source, a.code, a.message),
                AlertSeverity::Error | AlertSeverity::Critical => {
                    error!("ALERT | {} {} {}: {}", a.severity, a.source, a.code, a.message);
                }
            },
            AppEvent::Started {
                session_id,
                energy_model,
            } => {
                info!("START | session={session_id} energy_model={energy_model}");
            }
            AppEvent::Stopped(s) => {
                info!(
                    "STOP | ticks={} elapsed={:.1}s volume={:.2} ml overruns={} final_rate={:.2}",
                    s.ticks,
                    s.elapsed_ms as f64 / 1000.0,
                    s.cumulative_volume_ml,
                    s.overruns,
                    s.final_rate_ml_min
                );
            }
        }
    }
}
