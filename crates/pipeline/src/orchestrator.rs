//! The orchestrator: runs one detector over a channel set and commits the results.
//!
//! Each run walks `Idle -> Prep -> Detect -> Store -> Idle`. Channel failures are
//! collected into the [`RunReport`]; only entry errors (unknown channel, shape
//! mismatch, unusable method) abort a run up front. Cancellation and strict-mode
//! failures abort before the Store state, so the EventStore never sees a partial run.

use detectors::{run_detector, CustomDetector, Detector};
use serde::{Deserialize, Serialize};
use sleep_dsp::{demean, rereference, FilterBank};
use sleep_types::{DetectorKind, ErrorKind, Event, Hypnogram, SignalBuffer, SleepError, SleepResult};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{RunConfig, RunRequest};
use crate::control::RunControl;
use crate::error::PipelineResult;
use crate::executor::{run_channels, ChannelJob, ChannelOutcome};
use crate::registry::{DetectorRegistry, Method};
use crate::store::EventStore;

/// Orchestrator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    /// Waiting for a run
    Idle,
    /// Re-referencing, filtering and demeaning channels
    Prep,
    /// Running the detector on each channel
    Detect,
    /// Committing results to the EventStore
    Store,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "IDLE",
            OrchestratorState::Prep => "PREP",
            OrchestratorState::Detect => "DETECT",
            OrchestratorState::Store => "STORE",
        };
        f.write_str(name)
    }
}

/// Why a channel produced no events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFailure {
    pub status: ErrorKind,
    pub reason: String,
}

impl From<&SleepError> for ChannelFailure {
    fn from(err: &SleepError) -> Self {
        Self { status: err.kind(), reason: err.to_string() }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub name: String,
    pub kind: DetectorKind,
    pub method: Method,
    /// Events detected in this run, per channel; failed channels count zero.
    pub per_channel_counts: BTreeMap<String, usize>,
    /// Events per minute of recording, per channel.
    pub per_channel_densities: BTreeMap<String, f64>,
    pub failures: BTreeMap<String, ChannelFailure>,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total_events(&self) -> usize {
        self.per_channel_counts.values().sum()
    }
}

/// Drives detector runs against one recording and owns its [`EventStore`].
pub struct Orchestrator {
    registry: DetectorRegistry,
    store: EventStore,
    filters: FilterBank,
    state: OrchestratorState,
    workers: usize,
}

impl Orchestrator {
    pub fn new(store: EventStore) -> Self {
        Self {
            registry: DetectorRegistry::new(),
            store,
            filters: FilterBank::new(),
            state: OrchestratorState::Idle,
            workers: 1,
        }
    }

    /// An orchestrator with an empty store sized for `signal` and stamped by `hypno`.
    pub fn for_recording(signal: &SignalBuffer, hypno: &Hypnogram) -> SleepResult<Self> {
        let store = EventStore::new(signal.sf(), signal.n_samples())?.with_hypnogram(hypno.clone())?;
        Ok(Self::new(store))
    }

    pub fn with_registry(mut self, registry: DetectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Number of detection threads; `1` runs channels inline.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn register_custom(&mut self, detector: CustomDetector) {
        self.registry.register_custom(detector);
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DetectorRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EventStore {
        &mut self.store
    }

    pub fn into_store(self) -> EventStore {
        self.store
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Runs every request of `config` in order, stopping at the first aborted run.
    pub fn run_all(
        &mut self,
        signal: &SignalBuffer,
        hypno: &Hypnogram,
        config: &RunConfig,
        control: &RunControl,
    ) -> PipelineResult<Vec<RunReport>> {
        config.validate()?;
        config
            .runs
            .iter()
            .map(|request| self.run(signal, hypno, request, control))
            .collect()
    }

    /// Runs `request` on `signal`, committing into the store unless the run aborts.
    pub fn run(
        &mut self,
        signal: &SignalBuffer,
        hypno: &Hypnogram,
        request: &RunRequest,
        control: &RunControl,
    ) -> PipelineResult<RunReport> {
        request.validate()?;
        self.check_entry(signal, hypno)?;
        let detector = self.registry.resolve(request.params.kind(), request.method)?;
        info!(
            "Starting run '{}': {} ({:?}) on {} channel(s)",
            request.name,
            request.params.kind(),
            request.method,
            request.channels.len()
        );

        let result = self.execute(signal, hypno, request, detector.as_ref(), control);
        self.transition(OrchestratorState::Idle);
        match &result {
            Ok(report) => info!(
                "Run '{}' finished: {} event(s), {} failed channel(s)",
                report.name,
                report.total_events(),
                report.failures.len()
            ),
            Err(e) => warn!("Run '{}' aborted: {}", request.name, e),
        }
        result.map_err(Into::into)
    }

    fn check_entry(&self, signal: &SignalBuffer, hypno: &Hypnogram) -> SleepResult<()> {
        if hypno.len() != signal.n_samples() {
            return Err(SleepError::InvalidInput(format!(
                "hypnogram has {} samples, signal has {}",
                hypno.len(),
                signal.n_samples()
            )));
        }
        if hypno.sf() != signal.sf() {
            return Err(SleepError::InvalidInput(format!(
                "hypnogram is sampled at {} Hz, signal at {} Hz",
                hypno.sf(),
                signal.sf()
            )));
        }
        if self.store.n_samples() != signal.n_samples() || self.store.sf() != signal.sf() {
            return Err(SleepError::InvalidInput(format!(
                "store is sized for {} samples at {} Hz, signal has {} samples at {} Hz",
                self.store.n_samples(),
                self.store.sf(),
                signal.n_samples(),
                signal.sf()
            )));
        }
        Ok(())
    }

    fn execute(
        &mut self,
        signal: &SignalBuffer,
        hypno: &Hypnogram,
        request: &RunRequest,
        detector: &dyn Detector,
        control: &RunControl,
    ) -> SleepResult<RunReport> {
        if control.is_cancelled() {
            return Err(SleepError::Cancelled);
        }
        self.transition(OrchestratorState::Prep);
        let prepared = self.prepare(signal, request)?;
        if control.is_cancelled() {
            return Err(SleepError::Cancelled);
        }

        self.transition(OrchestratorState::Detect);
        let mut results: BTreeMap<String, SleepResult<Vec<Event>>> = BTreeMap::new();
        let mut jobs = Vec::with_capacity(prepared.len());
        for (channel, prep) in prepared {
            match prep {
                Ok(x) => jobs.push(ChannelJob { channel, signal: x }),
                Err(e) => {
                    results.insert(channel, Err(e));
                }
            }
        }
        let sf = signal.sf();
        let params = &request.params;
        let outcomes = run_channels(&request.name, &jobs, self.workers, control, |job| {
            run_detector(detector, &job.signal, sf, hypno, params)
        })?;
        for ChannelOutcome { channel, result } in outcomes {
            results.insert(channel, result);
        }

        if request.strict {
            if let Some((channel, Err(e))) = request
                .channels
                .iter()
                .filter_map(|c| results.get_key_value(c))
                .find(|(_, r)| r.is_err())
            {
                warn!("Strict run '{}' failed on channel '{}'", request.name, channel);
                return Err(e.clone());
            }
        }

        self.transition(OrchestratorState::Store);
        let kind = request.params.kind();
        let minutes = self.store.duration_min();
        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            name: request.name.clone(),
            kind,
            method: request.method,
            per_channel_counts: BTreeMap::new(),
            per_channel_densities: BTreeMap::new(),
            failures: BTreeMap::new(),
        };
        for (channel, result) in results {
            let committed = result.and_then(|events| {
                let count = events.len();
                if request.overwrite {
                    self.store.replace(&channel, kind, events)?;
                } else {
                    self.store.add(&channel, kind, events)?;
                }
                Ok(count)
            });
            let count = match committed {
                Ok(count) => {
                    debug!("{} {} event(s) on '{}'", count, kind, channel);
                    count
                }
                Err(e) => {
                    warn!("Channel '{}' failed in run '{}': {}", channel, request.name, e);
                    report.failures.insert(channel.clone(), ChannelFailure::from(&e));
                    0
                }
            };
            report.per_channel_counts.insert(channel.clone(), count);
            report
                .per_channel_densities
                .insert(channel, if minutes > 0.0 { count as f64 / minutes } else { 0.0 });
        }
        Ok(report)
    }

    /// Per requested channel, the conditioned signal or the reason it could not be built.
    ///
    /// Unknown channels and `INVALID_INPUT` from re-referencing abort the run. Any other
    /// re-referencing error is charged to every requested channel.
    fn prepare(
        &mut self,
        signal: &SignalBuffer,
        request: &RunRequest,
    ) -> SleepResult<Vec<(String, SleepResult<Vec<f64>>)>> {
        let pre = &request.preprocess;
        let buffer: Cow<'_, SignalBuffer> = match &pre.reference {
            Some(reference) => match rereference(signal, reference, &pre.ignore) {
                Ok(buffer) => Cow::Owned(buffer),
                Err(e) if e.kind() == ErrorKind::InvalidInput => return Err(e),
                Err(e) => {
                    warn!("Re-referencing failed in run '{}': {}", request.name, e);
                    check_channels(signal, &request.channels)?;
                    return Ok(request.channels.iter().map(|c| (c.clone(), Err(e.clone()))).collect());
                }
            },
            None => Cow::Borrowed(signal),
        };
        check_channels(&buffer, &request.channels)?;

        let sf = buffer.sf();
        let mut prepared = Vec::with_capacity(request.channels.len());
        for channel in &request.channels {
            let conditioned = buffer.channel_vec(channel).and_then(|x| {
                let x = match &pre.filter {
                    Some(spec) => self.filters.filtfilt(&x, sf, spec)?,
                    None => x,
                };
                Ok(if pre.demean { demean(&x) } else { x })
            });
            prepared.push((channel.clone(), conditioned));
        }
        Ok(prepared)
    }

    fn transition(&mut self, next: OrchestratorState) {
        if self.state != next {
            debug!("Orchestrator {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

fn check_channels(buffer: &SignalBuffer, channels: &[String]) -> SleepResult<()> {
    match channels.iter().find(|c| buffer.channel_index(c).is_none()) {
        Some(unknown) => Err(SleepError::InvalidInput(format!(
            "unknown channel '{}' (available: {})",
            unknown,
            buffer.labels().join(", ")
        ))),
        None => Ok(()),
    }
}
