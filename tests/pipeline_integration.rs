//! Integration tests: ControlService → estimator → controller → safety → ports.

use std::fs;
use std::path::PathBuf;

use ivctl::adapters::session::SessionSinks;
use ivctl::adapters::simulation::SimulatedTelemetry;
use ivctl::app::events::{AlertSeverity, AppEvent};
use ivctl::app::ports::{EventSink, LoopPorts, PumpPort, TelemetrySource};
use ivctl::app::service::ControlService;
use ivctl::config::SystemConfig;
use ivctl::model::Telemetry;
use ivctl::safety::SafetyWarning;
use ivctl::scheduler;
use ivctl::snapshot::SnapshotHandle;

// ── Mock implementations ──────────────────────────────────────

struct Scripted {
    reading: Telemetry,
}

impl TelemetrySource for Scripted {
    fn read(&mut self, timestamp_ms: u64) -> Telemetry {
        Telemetry {
            timestamp_ms,
            ..self.reading
        }
    }
}

#[derive(Default)]
struct MockPump {
    rates: Vec<f64>,
}

impl PumpPort for MockPump {
    fn set_rate(&mut self, ml_per_min: f64) {
        self.rates.push(ml_per_min);
    }
}

#[derive(Default)]
struct MockSink {
    events: Vec<AppEvent>,
}

impl EventSink for MockSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

impl MockSink {
    fn alerts(&self) -> Vec<(AlertSeverity, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Alert(a) => Some((a.severity, a.code.clone())),
                _ => None,
            })
            .collect()
    }
}

fn healthy() -> Telemetry {
    Telemetry {
        hydration_pct: 80.0,
        heart_rate_bpm: 72.0,
        spo2_pct: 98.0,
        signal_quality: 1.0,
        ..Telemetry::default()
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ivctl-it-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

// ── End-to-end ticks ──────────────────────────────────────────

#[test]
fn healthy_tick_is_confident_and_quiet() {
    let mut svc = ControlService::new(SystemConfig::default(), "it");
    let mut src = Scripted { reading: healthy() };
    let mut pump = MockPump::default();
    let mut sink = MockSink::default();

    let record = svc.tick(&mut src, &mut pump, &mut sink);

    assert!(record.output.confidence > 0.5);
    assert!(record.output.warning_flags.is_empty());
    assert!(!record.output.safety_override);
    assert_eq!(pump.rates, vec![record.output.infusion_ml_per_min]);
    assert!(sink.alerts().is_empty());
}

#[test]
fn dehydrated_tachycardic_tick_raises_warnings() {
    let config = SystemConfig::default();
    let baseline = config.profile.baseline_hr_bpm;
    let mut svc = ControlService::new(config, "it");
    let mut src = Scripted {
        reading: Telemetry {
            hydration_pct: 40.0,
            heart_rate_bpm: baseline * 1.5,
            ..healthy()
        },
    };
    let mut pump = MockPump::default();
    let mut sink = MockSink::default();

    let record = svc.tick(&mut src, &mut pump, &mut sink);
    let flags = record.output.warning_flags;
    assert!(
        flags.contains(SafetyWarning::TachycardiaDetected)
            || flags.contains(SafetyWarning::HighRiskState)
    );
    assert!(record.output.infusion_ml_per_min <= 0.4 + 1e-12);
    assert!(
        sink.alerts()
            .iter()
            .any(|(sev, code)| *sev == AlertSeverity::Warn && code == "TACHYCARDIA_DETECTED")
    );
}

#[test]
fn commanded_rate_respects_bounds_and_delta() {
    let config = SystemConfig::default();
    let (min, max, delta) = (
        config.safety.min_rate_ml_min,
        config.profile.max_safe_infusion_rate,
        config.safety.max_rate_change_ml_min,
    );
    let mut svc = ControlService::new(config, "it");
    let mut src = SimulatedTelemetry::new(70.0);
    let mut pump = MockPump::default();
    let mut sink = MockSink::default();

    for _ in 0..600 {
        let r = svc.tick(&mut src, &mut pump, &mut sink);
        if !r.output.warning_flags.contains(SafetyWarning::EmergencyMinRate) {
            assert!(r.output.infusion_ml_per_min >= min - 1e-12);
        }
        assert!(r.output.infusion_ml_per_min <= max + 1e-12);
    }
    // Rate-of-change limiting caps increases; decreases are never held up.
    for pair in pump.rates.windows(2) {
        assert!(pair[1] - pair[0] <= delta + 1e-9, "{pair:?}");
    }
}

#[test]
fn volume_accumulates_from_commanded_rates() {
    let config = SystemConfig::default();
    let period_min = config.period_minutes();
    let mut svc = ControlService::new(config, "it");
    let mut src = Scripted { reading: healthy() };
    let mut pump = MockPump::default();
    let mut sink = MockSink::default();

    for _ in 0..50 {
        svc.tick(&mut src, &mut pump, &mut sink);
    }
    let expected: f64 = pump.rates.iter().map(|r| r * period_min).sum();
    assert!((svc.safety().cumulative_volume_ml() - expected).abs() < 1e-9);
    assert_eq!(svc.estimator().history_len(), 50);
}

#[test]
fn run_writes_logs_and_snapshot() {
    let dir = temp_dir("run");
    let mut config = SystemConfig::default();
    config.control_period_ms = 1;
    config.logging.log_dir.clone_from(&dir);
    config.http.enabled = false;

    let snapshot = SnapshotHandle::new(config.clone());
    let sinks = SessionSinks::open(&config.logging, "run", Some(snapshot.clone())).unwrap();
    let ports = LoopPorts {
        source: SimulatedTelemetry::new(70.0),
        pump: MockPump::default(),
        sink: sinks,
    };
    let stop = std::sync::atomic::AtomicBool::new(false);
    let summary = scheduler::run(ControlService::new(config, "run"), ports, &stop, Some(30));
    assert_eq!(summary.ticks, 30);

    // Sinks were dropped inside `run`, so everything is on disk.
    let telemetry = fs::read_to_string(dir.join("ivctl_run_telemetry.csv")).unwrap();
    let control = fs::read_to_string(dir.join("ivctl_run_control.csv")).unwrap();
    assert_eq!(telemetry.lines().count(), 31);
    assert_eq!(control.lines().count(), 31);
    assert!(control.starts_with("timestamp,infusion_rate_ml_min,confidence,energy_T,"));

    let alerts = fs::read_to_string(dir.join("ivctl_run_alerts.jsonl")).unwrap();
    let codes: Vec<String> = alerts
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["code"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(codes.first().map(String::as_str), Some("SESSION_START"));
    assert_eq!(codes.last().map(String::as_str), Some("SESSION_STOP"));

    let snap = snapshot.read();
    assert!(!snap.running);
    assert_eq!(snap.tick, 30);
    assert_eq!(snap.telemetry_history.len(), 30);
    assert_eq!(snap.summary.unwrap().ticks, 30);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn learned_model_from_file_is_used() {
    use ivctl::estimator::energy::{Activation, DenseLayer, MLP_INPUTS, MlpEnergyModel};

    let dir = temp_dir("mlp");
    fs::create_dir_all(&dir).unwrap();
    let model = MlpEnergyModel::new(vec![
        DenseLayer {
            weights: vec![vec![0.1; 16]; MLP_INPUTS],
            biases: vec![0.0; 16],
            activation: Activation::Relu,
        },
        DenseLayer {
            weights: vec![vec![0.1; 8]; 16],
            biases: vec![0.0; 8],
            activation: Activation::Relu,
        },
        DenseLayer {
            weights: vec![vec![0.5]; 8],
            biases: vec![-0.2],
            activation: Activation::Sigmoid,
        },
    ])
    .unwrap();
    assert_eq!(model.parameter_count(), 241);
    let path = dir.join("weights.json");
    fs::write(&path, serde_json::to_string(&model).unwrap()).unwrap();

    let mut config = SystemConfig::default();
    config.estimator.energy_model = ivctl::config::EnergyModelKind::Learned;
    config.estimator.model_path = Some(path);
    let mut svc = ControlService::new(config, "mlp");
    let mut sink = MockSink::default();
    svc.start(&mut sink);
    assert_eq!(svc.estimator().energy_model_name(), "mlp");
    assert!(!sink.alerts().iter().any(|(_, c)| c == "ESTIMATOR_FALLBACK"));

    let r = svc.tick(&mut Scripted { reading: healthy() }, &mut MockPump::default(), &mut sink);
    assert!((0.0..=1.0).contains(&r.state.energy_t));

    let _ = fs::remove_dir_all(&dir);
}
