//! Sleep microstructure scan over a synthetic recording.
//!
//! Wires the pieces together for the `sleepscan` binary: builds a recording from
//! [`synth`], loads a [`RunConfig`], runs every request through the
//! [`Orchestrator`] and gathers the results into a serializable [`Summary`].

use anyhow::{Context, Result};
use clap::Parser;
use pipeline::{Orchestrator, RunConfig, RunControl, RunReport};
use serde::Serialize;
use sleep_dsp::{spectrogram, SpectrogramParams};
use sleep_types::{DetectionRecord, SignalBuffer, SleepStats, StageSegment};
use std::path::PathBuf;
use synth::SynthConfig;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "sleepscan", about = "Detect sleep microstructure events in a synthetic recording")]
pub struct Cli {
    /// Run configuration (YAML or JSON)
    #[arg(long, default_value = "pipelines/default.yaml")]
    pub config: PathBuf,

    /// Seed of the synthetic recording
    #[arg(long)]
    pub seed: Option<u64>,

    /// Recording length in seconds; the stage schedule is rescaled to fit
    #[arg(long, allow_negative_numbers = true)]
    pub duration: Option<f64>,

    /// Sampling frequency in Hz
    #[arg(long, allow_negative_numbers = true)]
    pub sf: Option<f64>,

    /// Worker threads per run
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Also report the mean spectrum of this channel
    #[arg(long, value_name = "CHANNEL")]
    pub spectrogram: Option<String>,
}

impl Cli {
    /// Recording settings after applying the command-line overrides.
    pub fn synth_config(&self) -> Result<SynthConfig> {
        let mut config = SynthConfig::default();
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(sf) = self.sf {
            config.sf = sf;
            if config.line_noise_hz.map_or(false, |f| f >= sf / 2.0) {
                config.line_noise_hz = None;
            }
        }
        if let Some(seconds) = self.duration {
            config = config.scaled_to(seconds)?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub sf: f64,
    pub n_samples: usize,
    pub duration_s: f64,
    pub channels: Vec<String>,
    pub seed: u64,
}

/// Time-averaged spectrogram of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct SpectrumSummary {
    pub channel: String,
    pub freqs: Vec<f64>,
    pub mean_power: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub recording: RecordingInfo,
    pub reports: Vec<RunReport>,
    pub detections: Vec<DetectionRecord>,
    pub hypnogram: Vec<StageSegment>,
    pub sleep_stats: SleepStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<SpectrumSummary>,
}

/// Generates the recording, runs every configured request and collects the output.
pub fn analyze(cli: &Cli, control: &RunControl) -> Result<Summary> {
    let config = RunConfig::from_path(&cli.config)
        .with_context(|| format!("loading run configuration {}", cli.config.display()))?;
    let synth_config = cli.synth_config()?;
    let recording = synth::generate(&synth_config)?;
    let signal = &recording.signal;
    let hypnogram = &recording.hypnogram;
    config.validate_for(signal.sf())?;

    let mut orchestrator = Orchestrator::for_recording(signal, hypnogram)?.with_workers(cli.jobs.max(1));
    let reports = orchestrator.run_all(signal, hypnogram, &config, control)?;
    let store = orchestrator.into_store();
    info!("{} run(s) committed {} event(s)", reports.len(), store.total());

    let spectrum = cli
        .spectrogram
        .as_deref()
        .map(|channel| mean_spectrum(signal, channel))
        .transpose()?;

    Ok(Summary {
        recording: RecordingInfo {
            sf: signal.sf(),
            n_samples: signal.n_samples(),
            duration_s: signal.duration_s(),
            channels: signal.labels().to_vec(),
            seed: synth_config.seed,
        },
        reports,
        detections: store.records(),
        hypnogram: hypnogram.segments(),
        sleep_stats: hypnogram.stats(),
        spectrum,
    })
}

fn mean_spectrum(signal: &SignalBuffer, channel: &str) -> Result<SpectrumSummary> {
    let x = signal.channel_vec(channel)?;
    let params = SpectrogramParams { f_end: (signal.sf() / 2.0).min(30.0), ..Default::default() };
    let map = spectrogram(&x, signal.sf(), &params)?;
    let mean_power = map
        .values
        .rows()
        .into_iter()
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();
    Ok(SpectrumSummary { channel: channel.to_string(), freqs: map.freqs, mean_power })
}
