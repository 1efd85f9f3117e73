//! Per-channel detection on worker threads.
//!
//! Detectors are pure, so channels can run in parallel. Workers pull jobs from a
//! shared queue and push results back over a channel; only the calling thread sees
//! the results, which keeps the EventStore single-writer.

use sleep_types::{Event, SleepError, SleepResult};
use std::ops::ControlFlow;
use std::thread;
use tracing::{debug, warn};

use crate::control::{Progress, RunControl};

/// A prepared channel waiting for detection.
#[derive(Debug, Clone)]
pub struct ChannelJob {
    pub channel: String,
    pub signal: Vec<f64>,
}

/// Detection result of one channel.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: String,
    pub result: SleepResult<Vec<Event>>,
}

/// Runs `detect` on every job with up to `workers` threads.
///
/// Outcomes come back in job order. The progress hook runs on the calling thread
/// after each channel; a break from the hook or a cancelled token stops the run
/// with `CANCELLED`, discarding finished channels.
pub fn run_channels<F>(
    run: &str,
    jobs: &[ChannelJob],
    workers: usize,
    control: &RunControl,
    detect: F,
) -> SleepResult<Vec<ChannelOutcome>>
where
    F: Fn(&ChannelJob) -> SleepResult<Vec<Event>> + Sync,
{
    let total = jobs.len();
    let workers = workers.clamp(1, total.max(1));
    let token = control.token().child_token();
    let mut slots: Vec<Option<SleepResult<Vec<Event>>>> = (0..total).map(|_| None).collect();

    if workers == 1 {
        for (idx, job) in jobs.iter().enumerate() {
            if token.is_cancelled() {
                return Err(SleepError::Cancelled);
            }
            slots[idx] = Some(detect(job));
            let progress = Progress { run, channel: &job.channel, completed: idx + 1, total };
            if let ControlFlow::Break(()) = control.report(&progress) {
                debug!("Progress hook stopped run '{}' after '{}'", run, job.channel);
                return Err(SleepError::Cancelled);
            }
        }
    } else {
        let (job_tx, job_rx) = flume::unbounded::<(usize, &ChannelJob)>();
        for job in jobs.iter().enumerate() {
            job_tx
                .send(job)
                .map_err(|e| SleepError::Internal(format!("job queue closed: {}", e)))?;
        }
        drop(job_tx);
        let (result_tx, result_rx) = flume::unbounded::<(usize, SleepResult<Vec<Event>>)>();
        let detect = &detect;

        thread::scope(|scope| -> SleepResult<()> {
            for w in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let worker_token = token.clone();
                thread::Builder::new()
                    .name(format!("detect-{}", w))
                    .spawn_scoped(scope, move || {
                        for (idx, job) in job_rx.iter() {
                            if worker_token.is_cancelled() {
                                break;
                            }
                            if result_tx.send((idx, detect(job))).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| {
                        token.cancel();
                        SleepError::Internal(format!("failed to spawn detection worker: {}", e))
                    })?;
            }
            drop(result_tx);

            let mut completed = 0;
            for (idx, result) in result_rx.iter() {
                completed += 1;
                let progress = Progress { run, channel: &jobs[idx].channel, completed, total };
                slots[idx] = Some(result);
                if let ControlFlow::Break(()) = control.report(&progress) {
                    debug!("Progress hook stopped run '{}' after '{}'", run, jobs[idx].channel);
                    token.cancel();
                }
                if token.is_cancelled() {
                    break;
                }
            }
            Ok(())
        })?;
    }

    if token.is_cancelled() {
        return Err(SleepError::Cancelled);
    }
    jobs.iter()
        .zip(slots)
        .map(|(job, slot)| match slot {
            Some(result) => Ok(ChannelOutcome { channel: job.channel.clone(), result }),
            None => {
                warn!("Channel '{}' produced no result", job.channel);
                Err(SleepError::Internal(format!("channel '{}' produced no result", job.channel)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn jobs(n: usize) -> Vec<ChannelJob> {
        (0..n)
            .map(|i| ChannelJob { channel: format!("ch{}", i), signal: vec![i as f64; 10] })
            .collect()
    }

    fn first_sample_event(job: &ChannelJob) -> SleepResult<Vec<Event>> {
        if job.signal[0] == 2.0 {
            return Err(SleepError::BadParam("channel two".into()));
        }
        Ok(vec![Event::new(0, job.signal[0] as usize + 1)])
    }

    #[test]
    fn test_outcomes_in_job_order() {
        for workers in [1, 3, 8] {
            let out = run_channels("t", &jobs(6), workers, &RunControl::new(), first_sample_event).unwrap();
            let names: Vec<_> = out.iter().map(|o| o.channel.as_str()).collect();
            assert_eq!(names, vec!["ch0", "ch1", "ch2", "ch3", "ch4", "ch5"]);
            assert!(out[2].result.is_err());
            assert_eq!(out[5].result.as_ref().unwrap()[0].end, 6);
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let control = RunControl::new();
        control.cancel();
        for workers in [1, 4] {
            let err = run_channels("t", &jobs(4), workers, &control, first_sample_event).unwrap_err();
            assert_eq!(err, SleepError::Cancelled);
        }
    }

    #[test]
    fn test_progress_break_cancels_without_touching_parent() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let control = RunControl::new().with_progress(move |_p: &Progress<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Break(())
        });
        let err = run_channels("t", &jobs(5), 1, &control, first_sample_event).unwrap_err();
        assert_eq!(err, SleepError::Cancelled);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!control.is_cancelled());

        let err = run_channels("t", &jobs(5), 2, &control, first_sample_event).unwrap_err();
        assert_eq!(err, SleepError::Cancelled);
    }

    #[test]
    fn test_no_jobs() {
        let out = run_channels("t", &[], 4, &RunControl::new(), first_sample_event).unwrap();
        assert!(out.is_empty());
    }
}
