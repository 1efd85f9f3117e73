//! EventStore: detections keyed by channel and detector kind.
//!
//! Every [`EventSet`] is kept sorted with non-empty, non-overlapping members; each
//! mutation either preserves that or fails with `INVALID_INPUT` and leaves the store
//! as it was.

use std::collections::BTreeMap;

use detectors::common::canonical_events;
use serde::{Deserialize, Serialize};
use sleep_types::{transient, DetectionRecord, DetectorKind, Event, Hypnogram, SleepError, SleepResult};

/// Sorted, disjoint, non-empty events of one `(channel, kind)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Event>", into = "Vec<Event>")]
pub struct EventSet {
    events: Vec<Event>,
}

impl TryFrom<Vec<Event>> for EventSet {
    type Error = SleepError;

    fn try_from(events: Vec<Event>) -> SleepResult<Self> {
        Self::new(events)
    }
}

impl From<EventSet> for Vec<Event> {
    fn from(set: EventSet) -> Self {
        set.events
    }
}

impl EventSet {
    /// Accepts `events` only if they already satisfy the set invariant.
    pub fn new(events: Vec<Event>) -> SleepResult<Self> {
        let set = Self { events };
        set.check()?;
        Ok(set)
    }

    /// Rebuilds a set from a label vector produced by [`EventSet::label_vector`].
    ///
    /// Each run of one non-zero label becomes an event, so touching events stay apart.
    pub fn from_labels(labels: &[u32]) -> Self {
        let mut bounds = vec![0];
        bounds.extend(transient(labels).into_iter().map(|t| t.index));
        bounds.push(labels.len());
        let events = bounds
            .windows(2)
            .filter(|w| w[0] < w[1] && labels[w[0]] != 0)
            .map(|w| Event::new(w[0], w[1]))
            .collect();
        Self { events }
    }

    /// Per-sample labels: `0` outside events, `k` inside the k-th event (1-based).
    pub fn label_vector(&self, n_samples: usize) -> Vec<u32> {
        let mut labels = vec![0u32; n_samples];
        for (k, ev) in self.events.iter().enumerate() {
            let end = ev.end.min(n_samples);
            if ev.start < end {
                labels[ev.start..end].iter_mut().for_each(|l| *l = k as u32 + 1);
            }
        }
        labels
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Event> {
        self.events.get(idx)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bounds(&self) -> Vec<(usize, usize)> {
        self.events.iter().map(Event::bounds).collect()
    }

    /// Verifies `events[i].start < events[i].end <= events[i + 1].start`.
    pub fn check(&self) -> SleepResult<()> {
        if let Some(ev) = self.events.iter().find(|e| e.is_empty()) {
            return Err(SleepError::InvalidInput(format!("empty interval ({}, {})", ev.start, ev.end)));
        }
        if let Some(w) = self.events.windows(2).find(|w| w[0].end > w[1].start) {
            return Err(SleepError::InvalidInput(format!(
                "interval ({}, {}) overlaps or precedes ({}, {})",
                w[1].start, w[1].end, w[0].start, w[0].end
            )));
        }
        Ok(())
    }
}

/// Summary of one `(channel, kind)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetrics {
    pub count: usize,
    /// Events per minute of recording.
    pub density_per_min: f64,
    /// `0.0` when there is no event.
    pub mean_duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_amplitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_band_power: Option<f64>,
}

/// Detection results of a recording, keyed by `(channel, kind)`.
///
/// The store assumes a single writer; callers running detectors in parallel must
/// funnel their commits through one thread.
#[derive(Debug, Clone)]
pub struct EventStore {
    sf: f64,
    n_samples: usize,
    hypnogram: Option<Hypnogram>,
    sets: BTreeMap<(String, DetectorKind), EventSet>,
}

impl EventStore {
    /// Creates an empty store for a recording of `n_samples` at `sf` Hz.
    pub fn new(sf: f64, n_samples: usize) -> SleepResult<Self> {
        if !(sf.is_finite() && sf > 0.0) {
            return Err(SleepError::InvalidInput(format!("sampling frequency must be > 0, got {}", sf)));
        }
        Ok(Self { sf, n_samples, hypnogram: None, sets: BTreeMap::new() })
    }

    /// Stamps stored events with the stage at their start from `hypnogram`.
    pub fn with_hypnogram(mut self, hypnogram: Hypnogram) -> SleepResult<Self> {
        if hypnogram.len() != self.n_samples {
            return Err(SleepError::InvalidInput(format!(
                "hypnogram has {} samples, store expects {}",
                hypnogram.len(),
                self.n_samples
            )));
        }
        self.hypnogram = Some(hypnogram);
        for set in self.sets.values_mut() {
            for ev in set.events.iter_mut() {
                ev.stage_at_start = self.hypnogram.as_ref().and_then(|h| h.stage_at(ev.start));
            }
        }
        Ok(self)
    }

    pub fn sf(&self) -> f64 {
        self.sf
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn duration_min(&self) -> f64 {
        self.n_samples as f64 / self.sf / 60.0
    }

    /// Merges `events` into the `(channel, kind)` entry and returns its new size.
    ///
    /// Overlapping events fuse; bounds past the recording are rejected.
    pub fn add(&mut self, channel: &str, kind: DetectorKind, events: Vec<Event>) -> SleepResult<usize> {
        let key = (channel.to_string(), kind);
        let mut combined = self.sets.get(&key).map(|s| s.events.clone()).unwrap_or_default();
        combined.extend(events);
        let set = self.stamped(canonical_events(combined, self.n_samples)?)?;
        let len = set.len();
        self.sets.insert(key, set);
        Ok(len)
    }

    /// Drops the prior entry, then stores `events`.
    pub fn replace(&mut self, channel: &str, kind: DetectorKind, events: Vec<Event>) -> SleepResult<usize> {
        let set = self.stamped(canonical_events(events, self.n_samples)?)?;
        let len = set.len();
        self.sets.insert((channel.to_string(), kind), set);
        Ok(len)
    }

    pub fn get(&self, channel: &str, kind: DetectorKind) -> Option<&EventSet> {
        self.sets.get(&(channel.to_string(), kind))
    }

    pub fn contains(&self, channel: &str, kind: DetectorKind) -> bool {
        self.get(channel, kind).is_some()
    }

    /// Removes the whole `(channel, kind)` entry.
    pub fn delete(&mut self, channel: &str, kind: DetectorKind) -> SleepResult<EventSet> {
        self.sets
            .remove(&(channel.to_string(), kind))
            .ok_or_else(|| missing(channel, kind))
    }

    /// Removes event `idx` of `(channel, kind)`.
    pub fn delete_event(&mut self, channel: &str, kind: DetectorKind, idx: usize) -> SleepResult<Event> {
        let set = self.set_mut(channel, kind)?;
        if idx >= set.len() {
            return Err(out_of_range(channel, kind, idx, set.len()));
        }
        Ok(set.events.remove(idx))
    }

    /// Moves the bounds of event `idx`; a bound left as `None` is unchanged.
    ///
    /// Fails with `INVALID_INPUT`, leaving the store untouched, when the new interval
    /// is empty, leaves the recording or crosses a neighbour.
    pub fn edit(
        &mut self,
        channel: &str,
        kind: DetectorKind,
        idx: usize,
        new_start: Option<usize>,
        new_end: Option<usize>,
    ) -> SleepResult<Event> {
        let n_samples = self.n_samples;
        let stage_at = |i: usize| self.hypnogram.as_ref().and_then(|h| h.stage_at(i));
        let set = self
            .sets
            .get(&(channel.to_string(), kind))
            .ok_or_else(|| missing(channel, kind))?;
        let current = *set.get(idx).ok_or_else(|| out_of_range(channel, kind, idx, set.len()))?;
        let start = new_start.unwrap_or(current.start);
        let end = new_end.unwrap_or(current.end);

        if start >= end || end > n_samples {
            return Err(SleepError::InvalidInput(format!(
                "edited interval ({}, {}) is empty or outside a recording of {} samples",
                start, end, n_samples
            )));
        }
        if idx > 0 && set.events[idx - 1].end > start {
            let prev = set.events[idx - 1];
            return Err(SleepError::InvalidInput(format!(
                "edited interval ({}, {}) crosses previous event ({}, {})",
                start, end, prev.start, prev.end
            )));
        }
        if let Some(next) = set.events.get(idx + 1) {
            if end > next.start {
                return Err(SleepError::InvalidInput(format!(
                    "edited interval ({}, {}) crosses next event ({}, {})",
                    start, end, next.start, next.end
                )));
            }
        }

        let mut edited = current;
        edited.start = start;
        edited.end = end;
        if start != current.start {
            edited.stage_at_start = stage_at(start).or(current.stage_at_start);
        }
        let set = self.set_mut(channel, kind)?;
        set.events[idx] = edited;
        Ok(edited)
    }

    pub fn metrics(&self, channel: &str, kind: DetectorKind) -> SleepResult<EventMetrics> {
        let set = self.get(channel, kind).ok_or_else(|| missing(channel, kind))?;
        let count = set.len();
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };
        let minutes = self.duration_min();
        Ok(EventMetrics {
            count,
            density_per_min: if minutes > 0.0 { count as f64 / minutes } else { 0.0 },
            mean_duration_s: mean(set.iter().map(|e| e.duration_s(self.sf)).collect()).unwrap_or(0.0),
            mean_amplitude: mean(set.iter().filter_map(|e| e.amplitude).collect()),
            mean_band_power: mean(set.iter().filter_map(|e| e.band_power).collect()),
        })
    }

    /// Keys in channel order, then kind name order.
    pub fn iter_keys(&self) -> impl Iterator<Item = (&str, DetectorKind)> + '_ {
        self.sets.keys().map(|(channel, kind)| (channel.as_str(), *kind))
    }

    pub fn label_vector(&self, channel: &str, kind: DetectorKind) -> SleepResult<Vec<u32>> {
        let set = self.get(channel, kind).ok_or_else(|| missing(channel, kind))?;
        Ok(set.label_vector(self.n_samples))
    }

    /// Every stored event as a typed record, in key order.
    pub fn records(&self) -> Vec<DetectionRecord> {
        self.sets
            .iter()
            .flat_map(|((channel, kind), set)| {
                set.iter().map(move |ev| DetectionRecord::from_event(channel, *kind, ev, self.sf))
            })
            .collect()
    }

    /// Number of stored events across all keys.
    pub fn total(&self) -> usize {
        self.sets.values().map(EventSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn set_mut(&mut self, channel: &str, kind: DetectorKind) -> SleepResult<&mut EventSet> {
        self.sets
            .get_mut(&(channel.to_string(), kind))
            .ok_or_else(|| missing(channel, kind))
    }

    fn stamped(&self, mut events: Vec<Event>) -> SleepResult<EventSet> {
        if let Some(hypno) = &self.hypnogram {
            for ev in events.iter_mut() {
                ev.stage_at_start = hypno.stage_at(ev.start);
            }
        }
        EventSet::new(events)
    }
}

fn missing(channel: &str, kind: DetectorKind) -> SleepError {
    SleepError::InvalidInput(format!("no {} events stored for channel '{}'", kind, channel))
}

fn out_of_range(channel: &str, kind: DetectorKind, idx: usize, len: usize) -> SleepError {
    SleepError::InvalidInput(format!(
        "event index {} out of range for {} on '{}' ({} events)",
        idx, kind, channel, len
    ))
}
