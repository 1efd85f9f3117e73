//! Run configuration types and serialization

use detectors::DetectorParams;
use serde::{Deserialize, Serialize};
use sleep_dsp::{FilterSpec, Reference};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::registry::Method;

pub const CONFIG_VERSION: &str = "1.0";

/// A versioned list of detector runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,
    /// Runs, executed in order
    #[serde(default)]
    pub runs: Vec<RunRequest>,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { version: default_version(), runs: Vec::new() }
    }
}

/// One detector applied to a set of channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Unique run name within the configuration
    pub name: String,
    /// Channel labels to analyse
    pub channels: Vec<String>,
    /// Detector kind and its parameters
    pub params: DetectorParams,
    /// Built-in or caller-registered implementation
    #[serde(default)]
    pub method: Method,
    /// Conditioning applied before detection
    #[serde(default)]
    pub preprocess: Preprocess,
    /// Replace stored events of the same channel and kind instead of merging
    #[serde(default)]
    pub overwrite: bool,
    /// Abort the run on the first channel failure
    #[serde(default)]
    pub strict: bool,
}

/// Signal conditioning of the PREP state. The input buffer is never modified.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocess {
    pub reference: Option<Reference>,
    /// Channels left out of re-referencing
    pub ignore: Vec<String>,
    pub filter: Option<FilterSpec>,
    pub demean: bool,
}

impl RunRequest {
    /// A request with default parameters for `params`' kind and no preprocessing.
    pub fn new(name: impl Into<String>, channels: &[&str], params: DetectorParams) -> Self {
        Self {
            name: name.into(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            params,
            method: Method::Default,
            preprocess: Preprocess::default(),
            overwrite: false,
            strict: false,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_preprocess(mut self, preprocess: Preprocess) -> Self {
        self.preprocess = preprocess;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Structural checks; parameter ranges depend on the sampling frequency and are
    /// checked by [`RunRequest::validate_for`].
    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("run name must not be empty"));
        }
        if self.channels.is_empty() {
            return Err(PipelineError::config(format!("run '{}' selects no channel", self.name)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.channels.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(PipelineError::config(format!(
                "run '{}' lists channel '{}' twice",
                self.name, dup
            )));
        }
        Ok(())
    }

    /// [`RunRequest::validate`] plus detector and filter parameters at `sf` Hz.
    pub fn validate_for(&self, sf: f64) -> PipelineResult<()> {
        self.validate()?;
        self.params.validate(sf)?;
        if let Some(filter) = &self.preprocess.filter {
            filter.validate(sf)?;
        }
        Ok(())
    }
}

impl RunConfig {
    pub fn from_json(text: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> PipelineResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Loads a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Err(PipelineError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> PipelineResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn get_run(&self, name: &str) -> Option<&RunRequest> {
        self.runs.iter().find(|r| r.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(PipelineError::config(format!(
                "unsupported configuration version '{}', expected '{}'",
                self.version, CONFIG_VERSION
            )));
        }
        if self.runs.is_empty() {
            return Err(PipelineError::config("configuration must contain at least one run"));
        }
        let mut names = HashSet::new();
        for run in &self.runs {
            run.validate()?;
            if !names.insert(run.name.as_str()) {
                return Err(PipelineError::config(format!("run name '{}' already exists", run.name)));
            }
        }
        Ok(())
    }

    /// [`RunConfig::validate`] plus every run's parameters at `sf` Hz.
    pub fn validate_for(&self, sf: f64) -> PipelineResult<()> {
        self.validate()?;
        self.runs.iter().try_for_each(|run| run.validate_for(sf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detectors::SpindleParams;
    use sleep_dsp::Band;
    use sleep_types::{DetectorKind, ErrorKind};
    use std::io::Write;

    const YAML: &str = r#"
version: "1.0"
runs:
  - name: spindles
    channels: [C3, C4]
    params:
      kind: spindles
      threshold: 2.5
    preprocess:
      filter:
        band: { type: bandpass, low: 0.3, high: 35.0 }
      demean: true
  - name: eye
    channels: [EOG]
    params:
      kind: rem
    overwrite: true
"#;

    #[test]
    fn test_yaml_fills_defaults() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.runs.len(), 2);
        let spindles = config.get_run("spindles").unwrap();
        match spindles.params {
            DetectorParams::Spindles(p) => {
                assert_eq!(p.threshold, 2.5);
                assert_eq!(p.f_min, SpindleParams::default().f_min);
            }
            other => panic!("unexpected params {:?}", other),
        }
        let filter = spindles.preprocess.filter.unwrap();
        assert_eq!(filter.band, Band::Bandpass { low: 0.3, high: 35.0 });
        assert_eq!(filter.order, 4);
        assert!(spindles.preprocess.demean);
        let eye = config.get_run("eye").unwrap();
        assert_eq!(eye.params.kind(), DetectorKind::Rem);
        assert_eq!(eye.method, Method::Default);
        assert!(eye.overwrite && !eye.strict);
    }

    #[test]
    fn test_json_round_trip() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        let back = RunConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let req = RunRequest::new("a", &["C3"], DetectorParams::default_for(DetectorKind::Peaks));
        let dup = RunConfig { runs: vec![req.clone(), req.clone()], ..Default::default() };
        assert!(dup.validate().is_err());
        assert!(RunConfig::default().validate().is_err());
        let no_channel = RunRequest { channels: vec![], ..req.clone() };
        assert!(no_channel.validate().is_err());
        let twice = RunRequest::new("b", &["C3", "C3"], DetectorParams::default_for(DetectorKind::Peaks));
        assert!(twice.validate().is_err());
        let wrong_version = RunConfig { version: "2.0".into(), runs: vec![req] };
        assert!(wrong_version.validate().is_err());
    }

    #[test]
    fn test_validate_for_checks_nyquist() {
        let config = RunConfig::from_yaml(YAML).unwrap();
        assert!(config.validate_for(256.0).is_ok());
        // spindle band 12-14 Hz is above Nyquist at 20 Hz
        let err = config.validate_for(20.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParam);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(config.runs[0].channels, vec!["C3", "C4"]);

        let txt = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(matches!(RunConfig::from_path(txt.path()), Err(PipelineError::UnsupportedFormat(_))));
        assert!(matches!(
            RunConfig::from_path("/nonexistent/run.yaml"),
            Err(PipelineError::IoError(_))
        ));
    }
}
