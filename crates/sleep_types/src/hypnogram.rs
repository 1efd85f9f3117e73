//! Sleep stages, stage classes and the per-sample hypnogram.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{SleepError, SleepResult};
use crate::transient::transient;

/// Canonical sleep stage labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "StageRepr", into = "i32")]
pub enum SleepStage {
    Art,
    Wake,
    N1,
    N2,
    N3,
    Rem,
}

/// Accepted serialized forms: the integer code or the stage name.
#[derive(Deserialize)]
#[serde(untagged)]
enum StageRepr {
    Code(i32),
    Name(String),
}

impl SleepStage {
    pub const ALL: [SleepStage; 6] = [
        SleepStage::Art,
        SleepStage::Wake,
        SleepStage::N1,
        SleepStage::N2,
        SleepStage::N3,
        SleepStage::Rem,
    ];

    /// Integer code in `{-1..4}`.
    pub fn code(self) -> i32 {
        match self {
            SleepStage::Art => -1,
            SleepStage::Wake => 0,
            SleepStage::N1 => 1,
            SleepStage::N2 => 2,
            SleepStage::N3 => 3,
            SleepStage::Rem => 4,
        }
    }

    pub fn from_code(code: i32) -> SleepResult<Self> {
        match code {
            -1 => Ok(SleepStage::Art),
            0 => Ok(SleepStage::Wake),
            1 => Ok(SleepStage::N1),
            2 => Ok(SleepStage::N2),
            3 => Ok(SleepStage::N3),
            4 => Ok(SleepStage::Rem),
            other => Err(SleepError::InvalidInput(format!("stage code {} outside -1..=4", other))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SleepStage::Art => "Art",
            SleepStage::Wake => "Wake",
            SleepStage::N1 => "N1",
            SleepStage::N2 => "N2",
            SleepStage::N3 => "N3",
            SleepStage::Rem => "REM",
        }
    }

    pub fn from_name(name: &str) -> SleepResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "art" | "artefact" | "artifact" => Ok(SleepStage::Art),
            "wake" | "w" => Ok(SleepStage::Wake),
            "n1" => Ok(SleepStage::N1),
            "n2" => Ok(SleepStage::N2),
            "n3" => Ok(SleepStage::N3),
            "rem" | "r" => Ok(SleepStage::Rem),
            other => Err(SleepError::InvalidInput(format!("unknown stage name '{}'", other))),
        }
    }

    /// True for N1, N2, N3 and REM.
    pub fn is_sleep(self) -> bool {
        matches!(self, SleepStage::N1 | SleepStage::N2 | SleepStage::N3 | SleepStage::Rem)
    }

    fn bit(self) -> u8 {
        1 << (self.code() + 1)
    }
}

impl TryFrom<i32> for SleepStage {
    type Error = SleepError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        SleepStage::from_code(code)
    }
}

impl TryFrom<StageRepr> for SleepStage {
    type Error = SleepError;

    fn try_from(repr: StageRepr) -> Result<Self, Self::Error> {
        match repr {
            StageRepr::Code(code) => SleepStage::from_code(code),
            StageRepr::Name(name) => SleepStage::from_name(&name),
        }
    }
}

impl From<SleepStage> for i32 {
    fn from(stage: SleepStage) -> i32 {
        stage.code()
    }
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of stages a detector is allowed to operate in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<SleepStage>", into = "Vec<SleepStage>")]
pub struct StageSet(u8);

impl StageSet {
    pub const fn empty() -> Self {
        StageSet(0)
    }

    /// N1 ∪ N2 ∪ N3.
    pub fn nrem() -> Self {
        Self::from_stages(&[SleepStage::N1, SleepStage::N2, SleepStage::N3])
    }

    pub fn rem() -> Self {
        Self::from_stages(&[SleepStage::Rem])
    }

    pub fn all() -> Self {
        Self::from_stages(&SleepStage::ALL)
    }

    pub fn from_stages(stages: &[SleepStage]) -> Self {
        StageSet(stages.iter().fold(0, |acc, s| acc | s.bit()))
    }

    pub fn contains(&self, stage: SleepStage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = SleepStage> + '_ {
        SleepStage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<Vec<SleepStage>> for StageSet {
    fn from(stages: Vec<SleepStage>) -> Self {
        StageSet::from_stages(&stages)
    }
}

impl From<StageSet> for Vec<SleepStage> {
    fn from(set: StageSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(SleepStage::name).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// A run of identical stage labels, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageSegment {
    pub start_s: f64,
    pub end_s: f64,
    pub stage: SleepStage,
}

/// Summary sleep statistics, durations in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepStats {
    /// Time in bed: the whole recording.
    pub tib_min: f64,
    /// Total sleep time (N1 + N2 + N3 + REM).
    pub tst_min: f64,
    /// Sleep onset latency: time to the first sleep sample.
    pub sol_min: Option<f64>,
    /// Sleep period time: first to last sleep sample.
    pub spt_min: f64,
    /// Wake after sleep onset, within the sleep period.
    pub waso_min: f64,
    /// TST / TIB in percent.
    pub sleep_efficiency: f64,
    /// Minutes per stage, keyed by stage name.
    pub stage_min: BTreeMap<String, f64>,
    /// Percentage of TST per sleep stage.
    pub stage_pct_tst: BTreeMap<String, f64>,
    /// Latency from the recording start to the first sample of each stage.
    pub stage_latency_min: BTreeMap<String, f64>,
}

/// Per-sample stage vector aligned with a [`crate::SignalBuffer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HypnogramRepr")]
pub struct Hypnogram {
    stages: Vec<SleepStage>,
    sf: f64,
}

#[derive(Deserialize)]
struct HypnogramRepr {
    stages: Vec<SleepStage>,
    sf: f64,
}

impl TryFrom<HypnogramRepr> for Hypnogram {
    type Error = SleepError;

    fn try_from(repr: HypnogramRepr) -> SleepResult<Self> {
        Self::from_stages(repr.stages, repr.sf)
    }
}

impl Hypnogram {
    /// Validates loader output: length must equal `n_samples`, codes must be in `{-1..4}`.
    pub fn from_codes(codes: &[i32], n_samples: usize, sf: f64) -> SleepResult<Self> {
        Self::check_shape(codes.len(), n_samples, sf)?;
        let stages = codes
            .iter()
            .map(|&c| SleepStage::from_code(c))
            .collect::<SleepResult<Vec<_>>>()?;
        Ok(Self { stages, sf })
    }

    /// Like [`Hypnogram::from_codes`], translating loader-specific codes first.
    ///
    /// Codes absent from `mapping` must already be canonical.
    pub fn from_codes_with_mapping(
        codes: &[i32],
        mapping: &HashMap<i32, SleepStage>,
        n_samples: usize,
        sf: f64,
    ) -> SleepResult<Self> {
        Self::check_shape(codes.len(), n_samples, sf)?;
        let stages = codes
            .iter()
            .map(|c| match mapping.get(c) {
                Some(stage) => Ok(*stage),
                None => SleepStage::from_code(*c),
            })
            .collect::<SleepResult<Vec<_>>>()?;
        Ok(Self { stages, sf })
    }

    pub fn from_stages(stages: Vec<SleepStage>, sf: f64) -> SleepResult<Self> {
        Self::check_shape(stages.len(), stages.len(), sf)?;
        Ok(Self { stages, sf })
    }

    /// A hypnogram holding a single stage everywhere.
    pub fn uniform(stage: SleepStage, n_samples: usize, sf: f64) -> SleepResult<Self> {
        Self::from_stages(vec![stage; n_samples], sf)
    }

    fn check_shape(len: usize, n_samples: usize, sf: f64) -> SleepResult<()> {
        if !(sf.is_finite() && sf > 0.0) {
            return Err(SleepError::InvalidInput(format!("sampling frequency must be > 0, got {}", sf)));
        }
        if len != n_samples {
            return Err(SleepError::InvalidInput(format!(
                "hypnogram has {} samples, signal has {}",
                len, n_samples
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn sf(&self) -> f64 {
        self.sf
    }

    pub fn stages(&self) -> &[SleepStage] {
        &self.stages
    }

    pub fn stage_at(&self, idx: usize) -> Option<SleepStage> {
        self.stages.get(idx).copied()
    }

    pub fn codes(&self) -> Vec<i32> {
        self.stages.iter().map(|s| s.code()).collect()
    }

    /// One flag per sample: true where the stage belongs to `set`.
    pub fn mask(&self, set: StageSet) -> Vec<bool> {
        self.stages.iter().map(|s| set.contains(*s)).collect()
    }

    pub fn count_in(&self, set: StageSet) -> usize {
        self.stages.iter().filter(|s| set.contains(**s)).count()
    }

    /// Segmentation into `(t_start_s, t_end_s, stage)` runs.
    pub fn segments(&self) -> Vec<StageSegment> {
        let n = self.stages.len();
        if n == 0 {
            return Vec::new();
        }
        let mut bounds = vec![0];
        bounds.extend(transient(&self.stages).iter().map(|t| t.index));
        bounds.push(n);
        bounds
            .windows(2)
            .map(|w| StageSegment {
                start_s: w[0] as f64 / self.sf,
                end_s: w[1] as f64 / self.sf,
                stage: self.stages[w[0]],
            })
            .collect()
    }

    /// Sleep statistics over the whole hypnogram.
    pub fn stats(&self) -> SleepStats {
        let to_min = |samples: usize| samples as f64 / self.sf / 60.0;
        let n = self.stages.len();

        let mut counts: BTreeMap<SleepStage, usize> = BTreeMap::new();
        let mut first: BTreeMap<SleepStage, usize> = BTreeMap::new();
        for (i, s) in self.stages.iter().enumerate() {
            *counts.entry(*s).or_insert(0) += 1;
            first.entry(*s).or_insert(i);
        }

        let first_sleep = self.stages.iter().position(|s| s.is_sleep());
        let last_sleep = self.stages.iter().rposition(|s| s.is_sleep());
        let tst = self.stages.iter().filter(|s| s.is_sleep()).count();
        let (spt, waso) = match (first_sleep, last_sleep) {
            (Some(a), Some(b)) => {
                let wake = self.stages[a..=b].iter().filter(|s| **s == SleepStage::Wake).count();
                (b + 1 - a, wake)
            }
            _ => (0, 0),
        };

        let stage_min = counts.iter().map(|(s, c)| (s.name().to_string(), to_min(*c))).collect();
        let stage_pct_tst = counts
            .iter()
            .filter(|(s, _)| s.is_sleep())
            .map(|(s, c)| {
                let pct = if tst > 0 { *c as f64 / tst as f64 * 100.0 } else { 0.0 };
                (s.name().to_string(), pct)
            })
            .collect();
        let stage_latency_min = first.iter().map(|(s, i)| (s.name().to_string(), to_min(*i))).collect();

        SleepStats {
            tib_min: to_min(n),
            tst_min: to_min(tst),
            sol_min: first_sleep.map(to_min),
            spt_min: to_min(spt),
            waso_min: to_min(waso),
            sleep_efficiency: if n > 0 { tst as f64 / n as f64 * 100.0 } else { 0.0 },
            stage_min,
            stage_pct_tst,
            stage_latency_min,
        }
    }
}
