//! Shared types for the sleep-signal analysis core
//!
//! This crate contains the data model used throughout the workspace: the signal
//! buffer, the hypnogram and its stage classes, transient (label change) detection,
//! detection events, time-frequency maps and the error taxonomy.

pub mod error;
pub mod signal;
pub mod hypnogram;
pub mod transient;
pub mod event;
pub mod tfmap;

// Re-export commonly used types
pub use error::*;
pub use signal::*;
pub use hypnogram::*;
pub use transient::*;
pub use event::*;
pub use tfmap::*;
