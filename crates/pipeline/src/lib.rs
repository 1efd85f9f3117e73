//! Orchestration layer of the sleep analysis core
//!
//! This crate runs detectors over channel sets and keeps their results: the
//! [`EventStore`], the detector registry, the run configuration document and the
//! [`Orchestrator`] state machine with its per-channel executor.

pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod store;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::*;
pub use control::*;
pub use error::*;
pub use orchestrator::*;
pub use registry::*;
pub use store::*;
