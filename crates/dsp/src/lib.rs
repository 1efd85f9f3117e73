//! Signal processing for the sleep analysis core
//!
//! Pure functions over sample slices: IIR design and zero-phase filtering,
//! re-referencing, envelope smoothing, spectral estimates, Morlet wavelets and
//! time-frequency normalization. Nothing here retains state except the
//! [`FilterBank`] coefficient cache.

pub mod design;
pub mod filter;
pub mod normalize;
pub mod reref;
pub mod smooth;
pub mod spectral;
pub mod wavelet;

pub use filter::{demean, detrend, filtfilt, lfilter, Band, FilterBank, FilterMethod, FilterSpec, SosFilter};
pub use normalize::normalize;
pub use reref::{rereference, Reference};
pub use spectral::{hilbert_envelope, multitaper_psd, spectrogram, welch, Psd, SpectrogramParams, Window};
pub use wavelet::{morlet_map, morlet_power};
