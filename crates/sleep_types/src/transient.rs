//! Transient detection: where a stepwise label sequence changes value.
//!
//! The same machinery converts between per-sample flags and half-open intervals,
//! which is how boolean detector output becomes an interval list.

use serde::{Deserialize, Serialize};

/// A change of value in a label sequence.
///
/// `index` is the first sample holding the new value, so `before == h[index - 1]`
/// and `after == h[index]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition<T> {
    pub index: usize,
    pub before: T,
    pub after: T,
}

/// All transitions of `h`, in O(N).
pub fn transient<T: PartialEq + Copy>(h: &[T]) -> Vec<Transition<T>> {
    h.windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, w)| Transition { index: i + 1, before: w[0], after: w[1] })
        .collect()
}

/// Transition indices, optionally bracketed by the endpoints `0` and `N - 1`.
pub fn transient_indices<T: PartialEq + Copy>(h: &[T], include_endpoints: bool) -> Vec<usize> {
    let mut indices: Vec<usize> = transient(h).into_iter().map(|t| t.index).collect();
    if include_endpoints && !h.is_empty() {
        if indices.first() != Some(&0) {
            indices.insert(0, 0);
        }
        let last = h.len() - 1;
        if indices.last() != Some(&last) {
            indices.push(last);
        }
    }
    indices
}

/// Transitions expressed on a parallel numeric axis (typically time in seconds):
/// `(x[index], before, after)`.
///
/// Returns `None` when `x` and `h` differ in length.
pub fn transient_at<T: PartialEq + Copy>(h: &[T], x: &[f64]) -> Option<Vec<(f64, T, T)>> {
    if x.len() != h.len() {
        return None;
    }
    Some(transient(h).into_iter().map(|t| (x[t.index], t.before, t.after)).collect())
}

/// Half-open `(start, end)` runs of `true` samples.
pub fn intervals_from_mask(mask: &[bool]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut open = if mask.first() == Some(&true) { Some(0) } else { None };
    for t in transient(mask) {
        match (t.after, open) {
            (true, _) => open = Some(t.index),
            (false, Some(start)) => {
                out.push((start, t.index));
                open = None;
            }
            (false, None) => {}
        }
    }
    if let Some(start) = open {
        out.push((start, mask.len()));
    }
    out
}

/// Per-sample flags set inside each half-open interval. Out-of-range bounds are clipped.
pub fn mask_from_intervals(intervals: &[(usize, usize)], n: usize) -> Vec<bool> {
    let mut mask = vec![false; n];
    for &(start, end) in intervals {
        let end = end.min(n);
        if start < end {
            mask[start..end].iter_mut().for_each(|m| *m = true);
        }
    }
    mask
}
