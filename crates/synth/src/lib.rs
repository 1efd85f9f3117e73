//! Synthetic sleep recordings
//!
//! A deterministic stand-in for a recording loader: given a stage schedule and a
//! seed, builds a [`sleep_types::SignalBuffer`] with EEG, EOG and EMG channels, the
//! matching [`sleep_types::Hypnogram`] and the list of injected transients.

pub mod config;
pub mod generator;

pub use config::{Epoch, SynthConfig};
pub use generator::{generate, Recording, SyntheticEvent};
