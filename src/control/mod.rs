//! Rate synthesis: estimate + forecast + safety ceiling → pump command.

pub mod adaptive;
pub mod rationale;

pub use adaptive::{AdaptiveController, Decision};
