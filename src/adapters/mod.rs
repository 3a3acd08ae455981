//! Driven adapters: concrete implementations of the app-layer ports.
//!
//! ```text
//!   TelemetrySource ◀── simulation
//!   PumpPort        ◀── pump
//!   EventSink       ◀── csv_sink · alert_log · log_sink (bundled by session)
//!   SnapshotHandle  ──▶ http (read-only observers)
//! ```

pub mod alert_log;
pub mod csv_sink;
pub mod http;
pub mod log_sink;
pub mod pump;
pub mod session;
pub mod simulation;
