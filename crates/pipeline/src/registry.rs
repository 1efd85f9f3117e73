//! Detector registry: which implementation serves each detector kind.

use detectors::{BuiltinDetector, CustomDetector, Detector};
use serde::{Deserialize, Serialize};
use sleep_types::{DetectorKind, SleepError, SleepResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Which implementation a run asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Default,
    Custom,
}

/// One detector per kind. Built-ins are registered up front; a custom registration
/// replaces the built-in and owns the kind until [`DetectorRegistry::restore_default`].
#[derive(Debug, Clone)]
pub struct DetectorRegistry {
    detectors: HashMap<DetectorKind, Arc<dyn Detector>>,
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        let detectors = DetectorKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(BuiltinDetector::new(kind)) as Arc<dyn Detector>))
            .collect();
        Self { detectors }
    }
}

impl DetectorRegistry {
    /// Creates a registry holding the six built-in detectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `detector` as the implementation of its kind.
    pub fn register_custom(&mut self, detector: CustomDetector) {
        let kind = detector.kind();
        info!("Registered custom detector '{}' for {}", detector.name(), kind);
        self.detectors.insert(kind, Arc::new(detector));
    }

    /// Puts the built-in back in charge of `kind`.
    pub fn restore_default(&mut self, kind: DetectorKind) {
        self.detectors.insert(kind, Arc::new(BuiltinDetector::new(kind)));
    }

    pub fn has_custom(&self, kind: DetectorKind) -> bool {
        self.detectors.get(&kind).map_or(false, |d| d.is_custom())
    }

    /// The detector serving `kind`, provided it matches the requested `method`.
    ///
    /// There is no fallthrough: asking for the default while a custom detector owns
    /// the kind, or for a custom one that was never registered, is `BAD_PARAM`.
    pub fn resolve(&self, kind: DetectorKind, method: Method) -> SleepResult<Arc<dyn Detector>> {
        let detector = self
            .detectors
            .get(&kind)
            .ok_or_else(|| SleepError::Internal(format!("no detector registered for {}", kind)))?;
        match (method, detector.is_custom()) {
            (Method::Default, false) | (Method::Custom, true) => Ok(Arc::clone(detector)),
            (Method::Default, true) => Err(SleepError::BadParam(format!(
                "{} is owned by custom detector '{}'; request method 'custom'",
                kind,
                detector.name()
            ))),
            (Method::Custom, false) => {
                Err(SleepError::BadParam(format!("no custom detector registered for {}", kind)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detectors::DetectorOutput;
    use sleep_types::ErrorKind;

    fn empty_custom(kind: DetectorKind) -> CustomDetector {
        CustomDetector::new(kind, "nothing", |x: &[f64], _, _, _| Ok(DetectorOutput::Mask(vec![false; x.len()])))
    }

    #[test]
    fn test_builtins_resolve_by_default() {
        let registry = DetectorRegistry::new();
        for kind in DetectorKind::ALL {
            let det = registry.resolve(kind, Method::Default).unwrap();
            assert_eq!(det.kind(), kind);
            assert!(!det.is_custom());
        }
        let err = registry.resolve(DetectorKind::Rem, Method::Custom).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParam);
        assert!(format!("{:?}", registry).contains("BuiltinDetector"));
    }

    #[test]
    fn test_custom_owns_kind() {
        let mut registry = DetectorRegistry::new();
        registry.register_custom(empty_custom(DetectorKind::Spindles));
        assert!(registry.has_custom(DetectorKind::Spindles));
        assert_eq!(registry.resolve(DetectorKind::Spindles, Method::Custom).unwrap().name(), "nothing");
        assert!(registry.resolve(DetectorKind::Spindles, Method::Default).is_err());
        assert!(registry.resolve(DetectorKind::SlowWaves, Method::Default).is_ok());

        registry.restore_default(DetectorKind::Spindles);
        assert!(registry.resolve(DetectorKind::Spindles, Method::Default).is_ok());
    }

    #[test]
    fn test_method_serde() {
        assert_eq!(serde_json::to_string(&Method::Custom).unwrap(), "\"custom\"");
        let m: Method = serde_json::from_str("\"default\"").unwrap();
        assert_eq!(m, Method::Default);
    }
}
