//! Error taxonomy shared by every crate of the analysis core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error kind names.
///
/// The serialized form (`INVALID_INPUT`, `BAD_PARAM`, ...) is what run reports and
/// external bindings see, so variants must never be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    InvalidFilterOrder,
    BadParam,
    BadSignal,
    RefInIgnore,
    EmptyStageMask,
    EmptyBaseline,
    ShortSignal,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidFilterOrder => "INVALID_FILTER_ORDER",
            ErrorKind::BadParam => "BAD_PARAM",
            ErrorKind::BadSignal => "BAD_SIGNAL",
            ErrorKind::RefInIgnore => "REF_IN_IGNORE",
            ErrorKind::EmptyStageMask => "EMPTY_STAGE_MASK",
            ErrorKind::EmptyBaseline => "EMPTY_BASELINE",
            ErrorKind::ShortSignal => "SHORT_SIGNAL",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the analysis core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SleepError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Filter order {order} is too large for a signal of {n_samples} samples")]
    InvalidFilterOrder { order: usize, n_samples: usize },

    #[error("Bad parameter: {0}")]
    BadParam(String),

    #[error("Signal contains non-finite values: {0}")]
    BadSignal(String),

    #[error("Reference channel '{0}' is in the ignore set")]
    RefInIgnore(String),

    #[error("No samples in the allowed stage class {0}")]
    EmptyStageMask(String),

    #[error("Baseline window [{start}, {end}) s selects no samples")]
    EmptyBaseline { start: f64, end: f64 },

    #[error("Signal of {n_samples} samples is shorter than the {required}-sample analysis window")]
    ShortSignal { n_samples: usize, required: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SleepError {
    /// Returns the stable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SleepError::InvalidInput(_) => ErrorKind::InvalidInput,
            SleepError::InvalidFilterOrder { .. } => ErrorKind::InvalidFilterOrder,
            SleepError::BadParam(_) => ErrorKind::BadParam,
            SleepError::BadSignal(_) => ErrorKind::BadSignal,
            SleepError::RefInIgnore(_) => ErrorKind::RefInIgnore,
            SleepError::EmptyStageMask(_) => ErrorKind::EmptyStageMask,
            SleepError::EmptyBaseline { .. } => ErrorKind::EmptyBaseline,
            SleepError::ShortSignal { .. } => ErrorKind::ShortSignal,
            SleepError::Cancelled => ErrorKind::Cancelled,
            SleepError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for core operations
pub type SleepResult<T> = Result<T, SleepError>;

/// Fails with `BadSignal` if any sample is NaN or infinite.
pub fn ensure_finite(signal: &[f64], what: &str) -> SleepResult<()> {
    match signal.iter().position(|v| !v.is_finite()) {
        Some(idx) => Err(SleepError::BadSignal(format!("{} has a non-finite sample at index {}", what, idx))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        let json = serde_json::to_string(&ErrorKind::EmptyStageMask).unwrap();
        assert_eq!(json, "\"EMPTY_STAGE_MASK\"");
        assert_eq!(ErrorKind::InvalidFilterOrder.as_str(), "INVALID_FILTER_ORDER");
        let back: ErrorKind = serde_json::from_str("\"REF_IN_IGNORE\"").unwrap();
        assert_eq!(back, ErrorKind::RefInIgnore);
    }

    #[test]
    fn test_error_maps_to_kind() {
        let err = SleepError::ShortSignal { n_samples: 10, required: 30 };
        assert_eq!(err.kind(), ErrorKind::ShortSignal);
        assert_eq!(SleepError::Cancelled.kind().to_string(), "CANCELLED");
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[0.0, 1.0, -2.5], "x").is_ok());
        let err = ensure_finite(&[0.0, f64::NAN], "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadSignal);
    }
}
