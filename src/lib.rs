//! Closed-loop adaptive IV infusion controller.
//!
//! Turns per-tick physiological telemetry into a bounded, safety-clamped
//! infusion rate at a fixed cadence:
//!
//! ```text
//!   Telemetry ─▶ StateEstimator ─▶ AdaptiveController ─▶ SafetyMonitor ─▶ pump
//!                    │  history        │  forecast            │  volume / rate ring
//!                    └─────────────────┴──────────────────────┘
//! ```
//!
//! The numeric pipeline (`estimator`, `control`, `safety`) is pure and
//! total.  Everything that touches the outside world sits behind the port
//! traits in [`app::ports`] and is implemented in [`adapters`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod estimator;
pub mod history;
pub mod math;
pub mod model;
pub mod safety;
pub mod scheduler;
pub mod snapshot;

pub use error::{Error, Result};
