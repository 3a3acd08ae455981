//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlService (domain)
//! ```
//!
//! Driven adapters (telemetry source, pump, event sinks) implement these
//! traits.  The [`ControlService`](super::service::ControlService) consumes
//! them via generics, so the domain core never touches a device, a file
//! or a socket directly.

use crate::error::Result;
use crate::model::Telemetry;

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Telemetry port (driven adapter: sensors → domain)
// ───────────────────────────────────────────────────────────────

/// Pull-based provider of one snapshot per tick.
pub trait TelemetrySource {
    /// Produce the snapshot for session time `timestamp_ms`.
    fn read(&mut self, timestamp_ms: u64) -> Telemetry;
}

// ───────────────────────────────────────────────────────────────
// Pump port (driven adapter: domain → actuator)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the domain commands the infusion pump through this.
pub trait PumpPort {
    /// Drive the pump at `ml_per_min`.
    fn set_rate(&mut self, ml_per_min: f64);

    /// Bring the pump to zero flow.
    fn stop(&mut self) {
        self.set_rate(0.0);
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logs / observability)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.  Adapters
/// decide where they go (CSV, JSON lines, console, HTTP snapshot).
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);

    /// Push buffered output to its destination.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The adapters one control session runs against.
pub struct LoopPorts<S, P, E> {
    pub source: S,
    pub pump: P,
    pub sink: E,
}
