//! Channel re-referencing.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use sleep_types::{SignalBuffer, SleepError, SleepResult};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "channel", rename_all = "snake_case")]
pub enum Reference {
    /// Subtract one channel from every non-ignored channel.
    Single(String),
    CommonAverage,
    /// Consecutive non-ignored channels are differenced pairwise (`A-B`).
    Bipolar,
}

/// Returns a re-referenced copy of `buf`; channels listed in `ignore` pass through untouched.
///
/// Bipolar referencing drops one channel and renames the rest, ignored channels
/// keep their position.
pub fn rereference(buf: &SignalBuffer, reference: &Reference, ignore: &[String]) -> SleepResult<SignalBuffer> {
    if let Some(unknown) = ignore.iter().find(|l| buf.channel_index(l).is_none()) {
        return Err(SleepError::InvalidInput(format!("ignored channel '{}' does not exist", unknown)));
    }
    let ignored: Vec<bool> = buf.labels().iter().map(|l| ignore.contains(l)).collect();
    let data = buf.data();

    match reference {
        Reference::Single(label) => {
            let idx = buf
                .channel_index(label)
                .ok_or_else(|| SleepError::InvalidInput(format!("reference channel '{}' does not exist", label)))?;
            if ignored[idx] {
                return Err(SleepError::RefInIgnore(label.clone()));
            }
            let reference = data.row(idx).to_owned();
            let mut out = data.to_owned();
            for (mut row, _) in out.outer_iter_mut().zip(&ignored).filter(|(_, ign)| !**ign) {
                row -= &reference;
            }
            debug!(reference = %label, "applied single reference");
            buf.with_channels(out, buf.labels().to_vec())
        }
        Reference::CommonAverage => {
            let kept: Vec<usize> = (0..buf.n_channels()).filter(|&i| !ignored[i]).collect();
            if kept.is_empty() {
                return Err(SleepError::InvalidInput("common average needs at least one non-ignored channel".into()));
            }
            let mut mean = Array1::<f64>::zeros(buf.n_samples());
            for &i in &kept {
                mean += &data.row(i);
            }
            mean /= kept.len() as f64;
            let mut out = data.to_owned();
            for &i in &kept {
                let mut row = out.row_mut(i);
                row -= &mean;
            }
            debug!(channels = kept.len(), "applied common average reference");
            buf.with_channels(out, buf.labels().to_vec())
        }
        Reference::Bipolar => {
            let kept: Vec<usize> = (0..buf.n_channels()).filter(|&i| !ignored[i]).collect();
            if kept.len() < 2 {
                return Err(SleepError::InvalidInput("bipolar montage needs two non-ignored channels".into()));
            }
            let next_kept = |i: usize| kept.iter().copied().find(|&k| k > i);
            let mut rows = Vec::with_capacity(buf.n_channels() - 1);
            let mut labels = Vec::with_capacity(buf.n_channels() - 1);
            for i in 0..buf.n_channels() {
                if ignored[i] {
                    rows.push(data.row(i).to_owned());
                    labels.push(buf.labels()[i].clone());
                } else if let Some(next) = next_kept(i) {
                    rows.push(&data.row(i) - &data.row(next));
                    labels.push(format!("{}-{}", buf.labels()[i], buf.labels()[next]));
                }
            }
            let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
            let out: Array2<f64> = ndarray::stack(Axis(0), &views)
                .map_err(|e| SleepError::Internal(format!("bipolar stack failed: {}", e)))?;
            debug!(channels = labels.len(), "applied bipolar montage");
            buf.with_channels(out, labels)
        }
    }
}
