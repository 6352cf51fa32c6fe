//! Global unit identities.
//!
//! Spike-sorting assigns cluster ids local to one probe, so merging several
//! probes needs a collision-free renumbering. A merged dataset keys every
//! unit by a [`GlobalUnitId`]: the local cluster id and the dataset index
//! packed into one `u64` with the bijection
//!
//! ```text
//! global = local_id * MAX_DATASETS + dataset_index
//! ```
//!
//! Both components are recovered losslessly by division/remainder, for any
//! local id up to `u64::MAX / MAX_DATASETS`.

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};

/// Upper bound on the number of datasets a merge may contain.
///
/// Also the base of the id bijection; decimal-round so global ids stay
/// human-readable (unit 7 of dataset 1 is 7001).
pub const MAX_DATASETS: u64 = 1_000;

/// Globally unique unit key, stable for the lifetime of a merged dataset.
///
/// Ordered so graph iteration is deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalUnitId(u64);

impl GlobalUnitId {
    /// Encode a (local cluster id, dataset index) pair.
    ///
    /// Fails with [`MergeError::Identity`] when the dataset index is out of
    /// range or the local id would overflow the packing, rather than
    /// wrapping into a colliding id.
    pub fn encode(local_id: u64, dataset_index: usize) -> MergeResult<Self> {
        if dataset_index as u64 >= MAX_DATASETS {
            return Err(MergeError::Identity(format!(
                "dataset index {dataset_index} exceeds the maximum of {} datasets",
                MAX_DATASETS
            )));
        }
        let packed = local_id
            .checked_mul(MAX_DATASETS)
            .and_then(|v| v.checked_add(dataset_index as u64))
            .ok_or_else(|| {
                MergeError::Identity(format!(
                    "local cluster id {local_id} does not fit the id packing"
                ))
            })?;
        Ok(Self(packed))
    }

    /// Recover the (local cluster id, dataset index) pair.
    pub fn decode(self) -> (u64, usize) {
        (self.0 / MAX_DATASETS, (self.0 % MAX_DATASETS) as usize)
    }

    pub fn local_id(self) -> u64 {
        self.decode().0
    }

    pub fn dataset_index(self) -> usize {
        self.decode().1
    }

    /// Raw packed value, as stored in the merged `spikes/units` array.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reinterpret a raw packed value read back from a merged store.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Node label used in exports and console output, `<dataset>_<local>`.
    pub fn label(self) -> String {
        let (local, ds) = self.decode();
        format!("{ds}_{local}")
    }
}

impl std::fmt::Display for GlobalUnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
