//! In-process storage adapters that satisfy the domain storage traits. The
//! persistence backend stays swappable behind `JobStore` and `EventStore`.

mod event_store;
mod job_store;

pub use event_store::MemoryEventStore;
pub use job_store::MemoryStorage;
