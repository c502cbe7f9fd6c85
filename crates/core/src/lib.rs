//! seriesflow core - series registry, schemas, routing and orchestration.
//!
//! This crate owns the engine: it knows nothing about concrete vendors or
//! storage. Extractors and sinks plug in through the traits in
//! [`extractors`] and [`sinks`] and are implemented by the
//! `seriesflow-extractors` and `seriesflow-sinks` crates.

pub mod allocator;
pub mod errors;
pub mod events;
pub mod extractors;
pub mod orchestrator;
pub mod records;
pub mod retry;
pub mod schema;
pub mod series;
pub mod sinks;
pub mod transform;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
