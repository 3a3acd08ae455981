//! Application core: pure domain orchestration, zero I/O.
//!
//! The business rules for one infusion session: estimate, decide, clamp,
//! account.  All interaction with sensors, the pump, and the log/observer
//! outputs happens through **port traits** defined in [`ports`], keeping
//! this layer fully testable without files, sockets or devices.

pub mod events;
pub mod ports;
pub mod service;
