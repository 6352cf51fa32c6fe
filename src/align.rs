//! Cross-probe time alignment.
//!
//! Each probe records against its own sample clock, so spike times from
//! different probes drift apart over a session even at identical nominal
//! rates. All probes share a hardware sync line, and the recorded edge
//! times of that line on each probe give a set of correspondence points
//! between clocks.
//!
//! [`align`] matches the sync edges of every dataset against a reference
//! dataset (nearest neighbor, monotonic) and returns one [`TimeWarp`] per
//! dataset: a piecewise-linear mapping from local sample index to the
//! reference clock. Spike times are warped with [`TimeWarp::apply_all`].
//!
//! With a single dataset there is nothing to align and the warp is the
//! identity.

use crate::error::{MergeError, MergeResult};

/// Monotonic mapping from one probe's sample indices to the reference
/// probe's sample indices.
#[derive(Debug, Clone)]
pub struct TimeWarp {
    /// Matched (local, reference) sync-edge pairs, strictly increasing in
    /// both components. Empty means identity.
    anchors: Vec<(u64, u64)>,
}

impl TimeWarp {
    pub fn identity() -> Self {
        Self {
            anchors: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.anchors.is_empty()
    }

    fn from_anchors(anchors: Vec<(u64, u64)>) -> Self {
        Self { anchors }
    }

    /// Map one local sample index onto the reference clock.
    ///
    /// Between two anchors the mapping interpolates linearly; outside the
    /// anchored range it extends the nearest anchor's constant offset, which
    /// keeps the mapping monotonic without extrapolating drift it has no
    /// evidence for.
    pub fn apply(&self, t: u64) -> u64 {
        if self.anchors.is_empty() {
            return t;
        }

        let first = self.anchors[0];
        let last = self.anchors[self.anchors.len() - 1];
        if t <= first.0 {
            return shift(t, first.1 as i64 - first.0 as i64);
        }
        if t >= last.0 {
            return shift(t, last.1 as i64 - last.0 as i64);
        }

        // Index of the first anchor with local time > t; t sits in
        // [anchors[i-1].0, anchors[i].0).
        let i = self.anchors.partition_point(|&(local, _)| local <= t);
        let (l0, r0) = self.anchors[i - 1];
        let (l1, r1) = self.anchors[i];
        let frac = (t - l0) as f64 / (l1 - l0) as f64;
        let mapped = r0 as f64 + frac * (r1 as f64 - r0 as f64);
        mapped.round().max(0.0) as u64
    }

    pub fn apply_all(&self, times: &[u64]) -> Vec<u64> {
        if self.is_identity() {
            return times.to_vec();
        }
        times.iter().map(|&t| self.apply(t)).collect()
    }

    /// Matched anchor pairs, for diagnostics.
    pub fn anchors(&self) -> &[(u64, u64)] {
        &self.anchors
    }
}

fn shift(t: u64, offset: i64) -> u64 {
    if offset >= 0 {
        t.saturating_add(offset as u64)
    } else {
        t.saturating_sub(offset.unsigned_abs())
    }
}

/// Compute one time warp per dataset, mapping every clock onto the clock of
/// `reference_index`.
///
/// `sync_trains[i]` holds the ordered sync-edge sample indices recorded by
/// dataset `i`. Fails with [`MergeError::Alignment`] when any train is empty
/// or when, after matching, a train disagrees with the reference on more
/// than a tolerated number of events (`max(2, 1%)` of the reference count) —
/// a sign the probes did not record the same pulse train.
pub fn align(sync_trains: &[Vec<u64>], reference_index: usize) -> MergeResult<Vec<TimeWarp>> {
    if sync_trains.len() <= 1 {
        return Ok(vec![TimeWarp::identity(); sync_trains.len()]);
    }
    if reference_index >= sync_trains.len() {
        return Err(MergeError::Alignment(format!(
            "reference dataset index {reference_index} out of range ({} datasets)",
            sync_trains.len()
        )));
    }
    for (i, train) in sync_trains.iter().enumerate() {
        if train.is_empty() {
            return Err(MergeError::Alignment(format!(
                "sync channel of dataset {i} has zero recorded events"
            )));
        }
    }

    let reference = &sync_trains[reference_index];
    let tolerance = drift_tolerance(reference.len());

    let mut warps = Vec::with_capacity(sync_trains.len());
    for (i, train) in sync_trains.iter().enumerate() {
        if i == reference_index {
            warps.push(TimeWarp::identity());
            continue;
        }
        let anchors = match_events(train, reference);
        let unmatched = train.len().max(reference.len()) - anchors.len();
        if unmatched > tolerance {
            return Err(MergeError::Alignment(format!(
                "dataset {i} sync train ({} events) and reference dataset {reference_index} \
                 ({} events) disagree on {unmatched} events (tolerated drift: {tolerance})",
                train.len(),
                reference.len()
            )));
        }
        if anchors.len() < 2 {
            return Err(MergeError::Alignment(format!(
                "dataset {i} shares fewer than two sync events with the reference; \
                 cannot derive a mapping"
            )));
        }
        warps.push(TimeWarp::from_anchors(anchors));
    }

    Ok(warps)
}

fn drift_tolerance(reference_events: usize) -> usize {
    (reference_events / 100).max(2)
}

/// Pair each local sync edge with its nearest reference edge, keeping the
/// matched reference indices strictly increasing. When two local edges
/// compete for the same reference edge the closer one wins and the other is
/// dropped as unmatched.
fn match_events(local: &[u64], reference: &[u64]) -> Vec<(u64, u64)> {
    let mut anchors: Vec<(u64, u64)> = Vec::with_capacity(local.len().min(reference.len()));
    let mut matched_ref: Vec<usize> = Vec::with_capacity(anchors.capacity());

    for &l in local {
        // Nearest reference event by absolute distance.
        let idx = reference.partition_point(|&r| r < l);
        let candidates = [idx.checked_sub(1), (idx < reference.len()).then_some(idx)];
        let Some(j) = candidates
            .into_iter()
            .flatten()
            .min_by_key(|&j| reference[j].abs_diff(l))
        else {
            continue;
        };

        match matched_ref.last() {
            Some(&prev) if j < prev => {
                // Would break monotonicity; skip this local event.
            }
            Some(&prev) if j == prev => {
                // Two local events nearest to the same reference event;
                // keep whichever is closer.
                let (last_l, last_r) = anchors[anchors.len() - 1];
                if reference[j].abs_diff(l) < last_r.abs_diff(last_l) {
                    let n = anchors.len();
                    anchors[n - 1] = (l, reference[j]);
                }
            }
            _ => {
                anchors.push((l, reference[j]));
                matched_ref.push(j);
            }
        }
    }

    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dataset_is_identity() {
        let warps = align(&[vec![10, 20, 30]], 0).unwrap();
        assert_eq!(warps.len(), 1);
        assert!(warps[0].is_identity());
        assert_eq!(warps[0].apply_all(&[1, 5, 99]), vec![1, 5, 99]);
    }

    #[test]
    fn empty_sync_train_fails() {
        let err = align(&[vec![1, 2], vec![]], 0).unwrap_err();
        assert!(matches!(err, MergeError::Alignment(_)));
    }

    #[test]
    fn constant_offset_is_recovered() {
        // Second probe started 5 samples later: everything shifted by -5
        // maps onto the reference.
        let reference = vec![100, 200, 300, 400];
        let local: Vec<u64> = reference.iter().map(|t| t + 5).collect();
        let warps = align(&[reference, local.clone()], 0).unwrap();
        assert!(warps[0].is_identity());
        assert_eq!(warps[1].apply(105), 100);
        assert_eq!(warps[1].apply(305), 300);
        // Before the first and after the last anchor the offset is constant.
        assert_eq!(warps[1].apply(55), 50);
        assert_eq!(warps[1].apply(505), 500);
    }

    #[test]
    fn linear_drift_is_interpolated() {
        // Local clock runs 0.1% fast relative to the reference.
        let reference = vec![0u64, 100_000, 200_000, 300_000];
        let local: Vec<u64> = reference.iter().map(|&t| t + t / 1000).collect();
        let warps = align(&[reference.clone(), local], 0).unwrap();
        // Midway between two sync pulses, the warp splits the difference.
        let mapped = warps[1].apply(150_150);
        assert!(mapped.abs_diff(150_000) <= 1, "mapped to {mapped}");
    }

    #[test]
    fn gross_event_count_mismatch_fails() {
        let reference: Vec<u64> = (0..100).map(|i| i * 1000).collect();
        let local: Vec<u64> = (0..40).map(|i| i * 1000 + 3).collect();
        let err = align(&[reference, local], 0).unwrap_err();
        assert!(matches!(err, MergeError::Alignment(_)));
    }

    #[test]
    fn dropped_edge_within_tolerance_still_aligns() {
        let reference: Vec<u64> = (0..500).map(|i| i * 1000).collect();
        // Local train missed two edges near the start.
        let local: Vec<u64> = (0..500)
            .filter(|i| *i != 3 && *i != 7)
            .map(|i| i * 1000 + 10)
            .collect();
        let warps = align(&[reference, local], 0).unwrap();
        assert_eq!(warps[1].apply(250_010), 250_000);
    }
}
