//! Domain-level building blocks shared by the pipeline and storage crates:
//! the event/profile/risk/job data model, structured configuration,
//! telemetry bootstrap and the storage traits.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use config::*;
pub use model::*;
pub use services::*;
pub use storage::*;
