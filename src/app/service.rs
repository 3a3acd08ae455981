//! Control service: the hexagonal core.
//!
//! [`ControlService`] owns the estimator, safety monitor and controller,
//! and runs one tick of the pipeline per call.  All I/O flows through port
//! traits injected at call sites, making the entire service testable with
//! mock adapters.
//!
//! ```text
//!  TelemetrySource ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!                      │        ControlService         │
//!         PumpPort ◀── │ Estimator · Controller · Safety│
//!                      └──────────────────────────────┘
//! ```

use log::{info, warn};
use serde_json::json;

use crate::config::SystemConfig;
use crate::control::AdaptiveController;
use crate::estimator::StateEstimator;
use crate::estimator::energy::select_model;
use crate::safety::{SafetyMonitor, Warnings};

use super::events::{AlertEvent, AlertSeverity, AppEvent, SessionSummary, TickRecord};
use super::ports::{EventSink, PumpPort, TelemetrySource};

/// Length of one volume-accounting window.
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

// ───────────────────────────────────────────────────────────────
// ControlService
// ───────────────────────────────────────────────────────────────

/// The control service orchestrates all domain logic.
pub struct ControlService {
    config: SystemConfig,
    session_id: String,
    estimator: StateEstimator,
    safety: SafetyMonitor,
    controller: AdaptiveController,
    period_ms: u64,
    tick_count: u64,
    /// Index of the 24 h window the volume counter belongs to.
    volume_window: u64,
    previous_warnings: Warnings,
    overriding: bool,
    /// Alerts raised during construction, emitted on [`start`](Self::start).
    pending_alerts: Vec<AlertEvent>,
}

impl ControlService {
    /// Build every pipeline stage from `config`.
    ///
    /// A learned energy model that cannot be loaded is replaced by the
    /// formula model; the resulting alert is emitted on start.
    pub fn new(config: SystemConfig, session_id: impl Into<String>) -> Self {
        let (model, fallback) = select_model(&config.estimator);
        let estimator = StateEstimator::with_model(model)
            .with_forecast_growth(config.control.forecast_uncertainty_per_min);
        let safety = SafetyMonitor::new(&config.profile, &config.safety);
        let controller = AdaptiveController::from_config(&config);

        Self {
            period_ms: config.control_period_ms,
            config,
            session_id: session_id.into(),
            estimator,
            safety,
            controller,
            tick_count: 0,
            volume_window: 0,
            previous_warnings: Warnings::empty(),
            overriding: false,
            pending_alerts: fallback.into_iter().collect(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&mut self, sink: &mut impl EventSink) {
        sink.emit(&AppEvent::Started {
            session_id: self.session_id.clone(),
            energy_model: self.estimator.energy_model_name(),
        });
        let start = AlertEvent::new(
            0,
            AlertSeverity::Info,
            "session",
            "SESSION_START",
            format!("session {} started", self.session_id),
        )
        .with_context(json!({
            "weight_kg": self.config.profile.weight_kg,
            "max_volume_24h_ml": self.safety.max_volume_24h_ml(),
            "energy_model": self.estimator.energy_model_name(),
            "control_period_ms": self.period_ms,
        }));
        sink.emit(&AppEvent::Alert(start));
        for alert in self.pending_alerts.drain(..) {
            sink.emit(&AppEvent::Alert(alert));
        }
        info!(
            "ControlService started: session={} period={}ms model={}",
            self.session_id,
            self.period_ms,
            self.estimator.energy_model_name()
        );
    }

    /// Stop the pump, record the session end and flush the sink.
    pub fn stop(
        &mut self,
        pump: &mut impl PumpPort,
        sink: &mut impl EventSink,
        overruns: u64,
    ) -> SessionSummary {
        pump.stop();
        let summary = SessionSummary {
            ticks: self.tick_count,
            elapsed_ms: self.elapsed_ms(),
            cumulative_volume_ml: self.safety.cumulative_volume_ml(),
            overruns,
            final_rate_ml_min: self.controller.last_command(),
        };
        let stop = AlertEvent::new(
            self.elapsed_ms(),
            AlertSeverity::Info,
            "session",
            "SESSION_STOP",
            format!("session {} stopped after {} ticks", self.session_id, self.tick_count),
        )
        .with_context(json!({
            "cumulative_volume_ml": summary.cumulative_volume_ml,
            "overruns": overruns,
        }));
        sink.emit(&AppEvent::Alert(stop));
        sink.emit(&AppEvent::Stopped(summary));
        if let Err(e) = sink.flush() {
            warn!("ControlService: final flush failed: {e}");
        }
        summary
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one full cycle: read → estimate → decide → actuate → account.
    pub fn tick(
        &mut self,
        source: &mut impl TelemetrySource,
        pump: &mut impl PumpPort,
        sink: &mut impl EventSink,
    ) -> TickRecord {
        let now_ms = self.elapsed_ms();
        self.tick_count += 1;

        // 1. Telemetry
        let telemetry = source.read(now_ms);

        // 2. Estimate against the rate currently flowing
        let state = self.estimator.estimate(
            &telemetry,
            &self.config.profile,
            self.controller.last_command(),
        );

        // 3. Decide (safety-clamped)
        let decision = self.controller.decide(&state, &self.safety, &self.estimator);
        let ceiling = decision.max_allowed_rate();
        let output = decision.output;

        // 4. Actuate
        pump.set_rate(output.infusion_ml_per_min);

        // 5. Volume / rate bookkeeping
        self.safety
            .update_volume(output.infusion_ml_per_min, self.config.period_minutes());

        // 6. Alerts on warning transitions
        let context = json!({
            "rate_ml_min": output.infusion_ml_per_min,
            "ceiling_ml_min": ceiling,
            "risk_score": state.risk_score,
            "hydration_pct": state.hydration_pct,
        });
        for warning in output.warning_flags.newly_raised(self.previous_warnings).iter() {
            warn!("Safety warning raised: {warning}");
            sink.emit(&AppEvent::Alert(
                AlertEvent::new(
                    now_ms,
                    AlertSeverity::Warn,
                    "safety",
                    warning.token(),
                    format!("{warning} limited the ceiling to {ceiling:.2} ml/min"),
                )
                .with_context(context.clone()),
            ));
        }
        if output.safety_override && !self.overriding {
            warn!("Safety override: ceiling {ceiling:.3} below minimum safe rate");
            sink.emit(&AppEvent::Alert(
                AlertEvent::new(
                    now_ms,
                    AlertSeverity::Critical,
                    "safety",
                    "SAFETY_OVERRIDE",
                    format!("safety check failed [{}]", output.warning_flags),
                )
                .with_context(context.clone()),
            ));
        }
        if output.warning_flags.is_empty() && !self.previous_warnings.is_empty() {
            info!("Safety warnings cleared");
            sink.emit(&AppEvent::Alert(
                AlertEvent::new(
                    now_ms,
                    AlertSeverity::Info,
                    "safety",
                    "SAFETY_CLEAR",
                    "all safety warnings cleared",
                )
                .with_context(context),
            ));
        }
        self.previous_warnings = output.warning_flags;
        self.overriding = output.safety_override;

        // 7. 24 h volume window rollover
        let window = self.elapsed_ms() / DAY_MS;
        if window > self.volume_window {
            let delivered = self.safety.cumulative_volume_ml();
            self.safety.reset_24h_counter();
            self.volume_window = window;
            sink.emit(&AppEvent::Alert(
                AlertEvent::new(
                    self.elapsed_ms(),
                    AlertSeverity::Info,
                    "safety",
                    "VOLUME_COUNTER_RESET",
                    format!("24h volume window closed at {delivered:.1} ml"),
                )
                .with_context(json!({ "delivered_ml": delivered })),
            ));
        }

        let record = TickRecord {
            timestamp_ms: now_ms,
            tick: self.tick_count,
            telemetry,
            state,
            output,
            max_allowed_rate: ceiling,
            cumulative_volume_ml: self.safety.cumulative_volume_ml(),
        };
        sink.emit(&AppEvent::Tick(Box::new(record.clone())));
        record
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Total control ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Session time covered by the ticks run so far.
    pub fn elapsed_ms(&self) -> u64 {
        self.tick_count * self.period_ms
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn estimator(&self) -> &StateEstimator {
        &self.estimator
    }

    pub fn controller(&self) -> &AdaptiveController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Telemetry;

    struct Fixed(Telemetry);

    impl TelemetrySource for Fixed {
        fn read(&mut self, timestamp_ms: u64) -> Telemetry {
            Telemetry {
                timestamp_ms,
                ..self.0
            }
        }
    }

    #[derive(Default)]
    struct Pump(Vec<f64>);

    impl PumpPort for Pump {
        fn set_rate(&mut self, ml_per_min: f64) {
            self.0.push(ml_per_min);
        }
    }

    #[derive(Default)]
    struct Collect(Vec<AppEvent>);

    impl EventSink for Collect {
        fn emit(&mut self, event: &AppEvent) {
            self.0.push(event.clone());
        }
    }

    fn alert_codes(sink: &Collect) -> Vec<String> {
        sink.0
            .iter()
            .filter_map(|e| match e {
                AppEvent::Alert(a) => Some(a.code.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn timestamps_advance_by_period() {
        let mut svc = ControlService::new(SystemConfig::default(), "t");
        let (mut src, mut pump, mut sink) = (Fixed(Telemetry::default()), Pump::default(), Collect::default());
        let a = svc.tick(&mut src, &mut pump, &mut sink);
        let b = svc.tick(&mut src, &mut pump, &mut sink);
        assert_eq!(a.timestamp_ms, 0);
        assert_eq!(b.timestamp_ms, 200);
        assert_eq!(b.telemetry.timestamp_ms, 200);
        assert_eq!(svc.elapsed_ms(), 400);
        assert_eq!(pump.0.len(), 2);
    }

    #[test]
    fn start_emits_session_and_fallback_alerts() {
        let mut config = SystemConfig::default();
        config.estimator.energy_model = crate::config::EnergyModelKind::Learned;
        config.estimator.model_path = Some("/nonexistent/ivctl/model.json".into());
        let mut svc = ControlService::new(config, "t");
        let mut sink = Collect::default();
        svc.start(&mut sink);
        assert!(matches!(sink.0[0], AppEvent::Started { energy_model: "formula", .. }));
        assert_eq!(alert_codes(&sink), vec!["SESSION_START", "ESTIMATOR_FALLBACK"]);
    }

    #[test]
    fn warning_alert_emitted_once_then_cleared() {
        let mut svc = ControlService::new(SystemConfig::default(), "t");
        let mut pump = Pump::default();
        let mut sink = Collect::default();
        let mut tachy = Fixed(Telemetry {
            heart_rate_bpm: 110.0,
            ..Telemetry::default()
        });
        svc.tick(&mut tachy, &mut pump, &mut sink);
        svc.tick(&mut tachy, &mut pump, &mut sink);
        let codes = alert_codes(&sink);
        assert_eq!(
            codes.iter().filter(|c| *c == "TACHYCARDIA_DETECTED").count(),
            1
        );

        let mut calm = Fixed(Telemetry::default());
        // Let the rate settle so the rate-change check stays quiet.
        for _ in 0..10 {
            svc.tick(&mut calm, &mut pump, &mut sink);
        }
        assert!(alert_codes(&sink).iter().any(|c| c == "SAFETY_CLEAR"));
    }

    #[test]
    fn stop_reports_summary() {
        let mut svc = ControlService::new(SystemConfig::default(), "t");
        let (mut src, mut pump, mut sink) = (Fixed(Telemetry::default()), Pump::default(), Collect::default());
        for _ in 0..5 {
            svc.tick(&mut src, &mut pump, &mut sink);
        }
        let summary = svc.stop(&mut pump, &mut sink, 2);
        assert_eq!(summary.ticks, 5);
        assert_eq!(summary.overruns, 2);
        assert_eq!(summary.elapsed_ms, 1000);
        assert!(summary.cumulative_volume_ml > 0.0);
        assert_eq!(pump.0.last(), Some(&0.0));
        assert!(matches!(sink.0.last(), Some(AppEvent::Stopped(_))));
    }

    #[test]
    fn volume_counter_resets_each_day() {
        let config = SystemConfig {
            // One tick per hour keeps the test short.
            control_period_ms: 60 * 60 * 1000,
            ..SystemConfig::default()
        };
        let mut svc = ControlService::new(config, "t");
        let (mut src, mut pump, mut sink) = (Fixed(Telemetry::default()), Pump::default(), Collect::default());
        for _ in 0..24 {
            svc.tick(&mut src, &mut pump, &mut sink);
        }
        assert!(alert_codes(&sink).iter().any(|c| c == "VOLUME_COUNTER_RESET"));
        assert_eq!(svc.safety().cumulative_volume_ml(), 0.0);
    }
}
