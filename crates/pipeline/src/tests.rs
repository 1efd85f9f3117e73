//! Integration tests: detector runs driven through the orchestrator.

use crate::config::{Preprocess, RunConfig, RunRequest};
use crate::control::{Progress, RunControl};
use crate::orchestrator::{Orchestrator, OrchestratorState};
use crate::registry::Method;
use crate::store::EventStore;
use detectors::{CustomDetector, DetectorOutput, DetectorParams};
use sleep_dsp::{FilterSpec, Reference};
use sleep_types::{
    transient_indices, DetectorKind, ErrorKind, Event, Hypnogram, SignalBuffer, SleepStage,
};
use std::f64::consts::PI;
use std::ops::ControlFlow;

fn sigma_burst(sf: f64, seconds: f64) -> Vec<f64> {
    (0..(sf * seconds) as usize)
        .map(|i| {
            let t = i as f64 / sf;
            if (1.0..1.8).contains(&t) {
                (2.0 * PI * 13.0 * t).sin()
            } else {
                0.0
            }
        })
        .collect()
}

fn saccades(sf: f64) -> Vec<f64> {
    let mut x = vec![0.0; (20.0 * sf) as usize];
    let half = (0.1 * sf) as i64;
    for (t0, sign) in [(5.0, 1.0), (10.0, -1.0), (15.0, 1.0)] {
        let centre = (t0 * sf) as i64;
        for j in -half..=half {
            x[(centre + j) as usize] = sign * 80.0 * (1.0 - (j.abs() as f64) / half as f64);
        }
    }
    x
}

fn spindle_recording(stage: SleepStage) -> (SignalBuffer, Hypnogram) {
    let sf = 200.0;
    let burst = sigma_burst(sf, 30.0);
    let flat = vec![0.0; burst.len()];
    let n = burst.len();
    let signal = SignalBuffer::from_rows(vec![burst, flat], sf, vec!["C3".into(), "C4".into()]).unwrap();
    let hypno = Hypnogram::uniform(stage, n, sf).unwrap();
    (signal, hypno)
}

fn spindle_request(channels: &[&str]) -> RunRequest {
    RunRequest::new("spindles", channels, DetectorParams::default_for(DetectorKind::Spindles))
}

#[test]
fn test_spindle_burst_in_n2() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let report = orch.run(&signal, &hypno, &spindle_request(&["C3", "C4"]), &RunControl::new()).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.kind, DetectorKind::Spindles);
    assert_eq!(report.per_channel_counts["C3"], 1);
    assert_eq!(report.per_channel_counts["C4"], 0);
    assert!((report.per_channel_densities["C3"] - 2.0).abs() < 1e-9);
    assert_eq!(orch.state(), OrchestratorState::Idle);

    let set = orch.store().get("C3", DetectorKind::Spindles).unwrap();
    let (start, end) = set.events()[0].bounds();
    assert!((start as i64 - 200).abs() <= 20, "start {}", start);
    assert!((end as i64 - 360).abs() <= 20, "end {}", end);
    assert_eq!(set.events()[0].stage_at_start, Some(SleepStage::N2));
}

#[test]
fn test_slow_wave_train() {
    let sf = 100.0;
    let x: Vec<f64> = (0..1000).map(|i| 100.0 * (2.0 * PI * i as f64 / sf).sin()).collect();
    let signal = SignalBuffer::from_rows(vec![x], sf, vec!["Fz".into()]).unwrap();
    let hypno = Hypnogram::uniform(SleepStage::N3, 1000, sf).unwrap();
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let request = RunRequest::new("sw", &["Fz"], DetectorParams::default_for(DetectorKind::SlowWaves));
    let report = orch.run(&signal, &hypno, &request, &RunControl::new()).unwrap();

    assert_eq!(report.per_channel_counts["Fz"], 10);
    let metrics = orch.store().metrics("Fz", DetectorKind::SlowWaves).unwrap();
    assert!((metrics.mean_duration_s - 1.0).abs() < 0.05);
    let set = orch.store().get("Fz", DetectorKind::SlowWaves).unwrap();
    assert!(set.check().is_ok());
    for ev in set.iter() {
        assert!((ev.duration_s(sf) - 1.0).abs() < 0.05, "{:?}", ev);
    }
}

#[test]
fn test_rem_saccades() {
    let sf = 256.0;
    let x = saccades(sf);
    let n = x.len();
    let signal = SignalBuffer::from_rows(vec![x], sf, vec!["EOG".into()]).unwrap();
    let hypno = Hypnogram::uniform(SleepStage::Rem, n, sf).unwrap();
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let request = RunRequest::new("rem", &["EOG"], DetectorParams::default_for(DetectorKind::Rem));
    orch.run(&signal, &hypno, &request, &RunControl::new()).unwrap();

    let set = orch.store().get("EOG", DetectorKind::Rem).unwrap();
    assert_eq!(set.len(), 3);
    for (ev, t0) in set.iter().zip([5.0, 10.0, 15.0]) {
        let centre = (ev.start + ev.end) as f64 / 2.0 / sf;
        assert!((centre - t0).abs() <= 0.05, "{:?} not centred on {} s", ev, t0);
        assert_eq!(ev.stage_at_start, Some(SleepStage::Rem));
    }
}

#[test]
fn test_wake_only_records_failure() {
    let (signal, hypno) = spindle_recording(SleepStage::Wake);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let report = orch.run(&signal, &hypno, &spindle_request(&["C3"]), &RunControl::new()).unwrap();

    assert_eq!(report.per_channel_counts["C3"], 0);
    assert_eq!(report.failures["C3"].status, ErrorKind::EmptyStageMask);
    assert!(orch.store().get("C3", DetectorKind::Spindles).is_none());
    assert_eq!(orch.store().total(), 0);
}

#[test]
fn test_strict_aborts_without_writes() {
    let (signal, hypno) = spindle_recording(SleepStage::Wake);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let err = orch
        .run(&signal, &hypno, &spindle_request(&["C3", "C4"]).strict(true), &RunControl::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyStageMask);
    assert!(orch.store().is_empty());
    assert_eq!(orch.state(), OrchestratorState::Idle);
}

#[test]
fn test_hypnogram_transients() {
    let hypno = Hypnogram::from_codes(&[0, 0, 0, 1, 1, 2, 2, 2, 0], 9, 1.0).unwrap();
    assert_eq!(transient_indices(hypno.stages(), false), vec![3, 5, 8]);
    let segments = hypno.segments();
    assert_eq!(segments.len(), 4);
    assert_eq!(segments[1].stage, SleepStage::N1);
    assert_eq!((segments[1].start_s, segments[1].end_s), (3.0, 5.0));
}

#[test]
fn test_edit_rejected_store_unchanged() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let store = orch.store_mut();
    store
        .add("C3", DetectorKind::Spindles, vec![Event::new(100, 200), Event::new(300, 400)])
        .unwrap();
    let err = store.edit("C3", DetectorKind::Spindles, 0, Some(100), Some(350)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(store.get("C3", DetectorKind::Spindles).unwrap().bounds(), vec![(100, 200), (300, 400)]);
}

#[test]
fn test_unknown_channel_is_eager() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let err = orch
        .run(&signal, &hypno, &spindle_request(&["C3", "Pz"]), &RunControl::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(orch.store().is_empty());
}

#[test]
fn test_mismatched_hypnogram_is_eager() {
    let (signal, _) = spindle_recording(SleepStage::N2);
    let short = Hypnogram::uniform(SleepStage::N2, 100, 200.0).unwrap();
    let mut orch = Orchestrator::new(EventStore::new(200.0, signal.n_samples()).unwrap());
    let err = orch.run(&signal, &short, &spindle_request(&["C3"]), &RunControl::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_cancelled_token_writes_nothing() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let control = RunControl::new();
    control.cancel();
    let err = orch.run(&signal, &hypno, &spindle_request(&["C3"]), &control).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(orch.store().is_empty());
}

#[test]
fn test_progress_sentinel_cancels_whole_run() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    for workers in [1, 2] {
        let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap().with_workers(workers);
        let control = RunControl::new().with_progress(|p: &Progress<'_>| {
            if p.completed == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        let err = orch.run(&signal, &hypno, &spindle_request(&["C3", "C4"]), &control).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(orch.store().is_empty());
        assert_eq!(orch.state(), OrchestratorState::Idle);
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let sf = 200.0;
    let rows: Vec<Vec<f64>> = (0..4)
        .map(|k| sigma_burst(sf, 30.0).into_iter().map(|v| v * (k + 1) as f64).collect())
        .collect();
    let labels: Vec<String> = ["F3", "F4", "C3", "C4"].iter().map(|s| s.to_string()).collect();
    let signal = SignalBuffer::from_rows(rows, sf, labels).unwrap();
    let hypno = Hypnogram::uniform(SleepStage::N2, signal.n_samples(), sf).unwrap();
    let request = spindle_request(&["F3", "F4", "C3", "C4"]);

    let mut seq = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let seq_report = seq.run(&signal, &hypno, &request, &RunControl::new()).unwrap();
    let mut par = Orchestrator::for_recording(&signal, &hypno).unwrap().with_workers(4);
    let par_report = par.run(&signal, &hypno, &request, &RunControl::new()).unwrap();

    assert_eq!(seq_report.per_channel_counts, par_report.per_channel_counts);
    assert_eq!(seq.store().records(), par.store().records());
    assert_eq!(seq.store().total(), 4);
}

#[test]
fn test_custom_detector_and_overwrite() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let params = DetectorParams::default_for(DetectorKind::Peaks);
    let peaks = RunRequest::new("peaks", &["C3"], params);
    let first = orch.run(&signal, &hypno, &peaks, &RunControl::new()).unwrap();
    // identical events merge into themselves
    orch.run(&signal, &hypno, &peaks, &RunControl::new()).unwrap();
    assert_eq!(orch.store().get("C3", DetectorKind::Peaks).unwrap().len(), first.per_channel_counts["C3"]);

    let custom = peaks.clone().with_method(Method::Custom);
    assert_eq!(
        orch.run(&signal, &hypno, &custom, &RunControl::new()).unwrap_err().kind(),
        ErrorKind::BadParam
    );

    orch.register_custom(CustomDetector::new(DetectorKind::Peaks, "first-second", |x: &[f64], sf, _, _| {
        Ok(DetectorOutput::Intervals(vec![Event::new(0, (sf as usize).min(x.len()))]))
    }));
    assert_eq!(
        orch.run(&signal, &hypno, &peaks, &RunControl::new()).unwrap_err().kind(),
        ErrorKind::BadParam
    );
    let report = orch.run(&signal, &hypno, &custom.overwrite(true), &RunControl::new()).unwrap();
    assert_eq!(report.method, Method::Custom);
    assert_eq!(orch.store().get("C3", DetectorKind::Peaks).unwrap().bounds(), vec![(0, 200)]);
}

#[test]
fn test_preprocess_rereference_and_filter_failure() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();

    let bipolar = spindle_request(&["C3-C4"]).with_preprocess(Preprocess {
        reference: Some(Reference::Bipolar),
        filter: Some(FilterSpec::bandpass(0.3, 35.0, 2)),
        demean: true,
        ..Default::default()
    });
    let report = orch.run(&signal, &hypno, &bipolar, &RunControl::new()).unwrap();
    assert_eq!(report.per_channel_counts["C3-C4"], 1);

    let bad_filter = RunRequest {
        name: "above-nyquist".into(),
        preprocess: Preprocess { filter: Some(FilterSpec::lowpass(150.0, 4)), ..Default::default() },
        ..spindle_request(&["C3"])
    };
    let report = orch.run(&signal, &hypno, &bad_filter, &RunControl::new()).unwrap();
    assert_eq!(report.failures["C3"].status, ErrorKind::BadParam);
    assert_eq!(orch.store().get("C3-C4", DetectorKind::Spindles).unwrap().len(), 1);
    assert!(orch.store().get("C3", DetectorKind::Spindles).is_none());

    let ref_ignored = spindle_request(&["C3"]).with_preprocess(Preprocess {
        reference: Some(Reference::Single("C4".into())),
        ignore: vec!["C4".into()],
        ..Default::default()
    });
    let report = orch.run(&signal, &hypno, &ref_ignored, &RunControl::new()).unwrap();
    assert_eq!(report.failures["C3"].status, ErrorKind::RefInIgnore);
    assert_eq!(report.per_channel_counts["C3"], 0);
    assert!(orch.store().get("C3", DetectorKind::Spindles).is_none());

    let missing_ref = spindle_request(&["C3"]).with_preprocess(Preprocess {
        reference: Some(Reference::Single("Cz".into())),
        ..Default::default()
    });
    let err = orch.run(&signal, &hypno, &missing_ref, &RunControl::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_reference_failure_does_not_stop_later_runs() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let config = RunConfig::from_yaml(
        r#"
runs:
  - name: referenced
    channels: [C3]
    params: { kind: spindles }
    preprocess:
      reference: { type: single, channel: C4 }
      ignore: [C4]
  - name: plain
    channels: [C3]
    params: { kind: spindles }
"#,
    )
    .unwrap();
    let reports = orch.run_all(&signal, &hypno, &config, &RunControl::new()).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].failures["C3"].status, ErrorKind::RefInIgnore);
    assert!(reports[1].is_complete());
    assert_eq!(reports[1].per_channel_counts["C3"], 1);

    let strict = RunRequest { strict: true, ..config.runs[0].clone() };
    let err = orch.run(&signal, &hypno, &strict, &RunControl::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RefInIgnore);
}

#[test]
fn test_run_all_from_yaml() {
    let (signal, hypno) = spindle_recording(SleepStage::N2);
    let config = RunConfig::from_yaml(
        r#"
runs:
  - name: sigma
    channels: [C3]
    params: { kind: spindles, threshold: 2.0 }
  - name: extrema
    channels: [C3, C4]
    params: { kind: peaks, lookahead: 50 }
"#,
    )
    .unwrap();
    let mut orch = Orchestrator::for_recording(&signal, &hypno).unwrap();
    let reports = orch.run_all(&signal, &hypno, &config, &RunControl::new()).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].per_channel_counts["C3"], 1);
    assert_ne!(reports[0].run_id, reports[1].run_id);
    let keys: Vec<_> = orch.store().iter_keys().collect();
    assert_eq!(keys[0], ("C3", DetectorKind::Peaks));
    assert_eq!(keys[1], ("C3", DetectorKind::Spindles));
}
