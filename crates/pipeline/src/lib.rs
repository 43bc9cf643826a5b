//! Event risk pipeline: normalization, address profiling, weighted risk
//! scoring, monitoring and notification routing, plus scheduled replay of
//! recent blocks. `main.rs` wires these together as the `chainwatch` binary.

pub mod analyzer;
pub mod monitor;
pub mod normalizer;
pub mod notifier;
pub mod pipeline;
pub mod profiler;
pub mod replay;
pub mod rpc;
pub mod worker;

pub use analyzer::{Evaluators, RiskAnalyzer};
pub use monitor::PipelineMonitor;
pub use normalizer::EventNormalizer;
pub use notifier::{NotificationRouter, RateLimiter};
pub use pipeline::{EventPipeline, PipelineError, ProcessedEvent};
pub use profiler::AddressProfiler;
pub use replay::{JobMonitor, ReplayScheduler};
pub use worker::{build_components, Components, WorkerError};
