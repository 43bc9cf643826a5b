//! Shared service helpers: telemetry wiring and the known-risk address set.

pub mod risk_set;
pub mod telemetry;

pub use risk_set::*;
pub use telemetry::*;
