//! Per-probe dataset access.
//!
//! The merge engine consumes probe recordings through the narrow
//! [`DatasetSource`] trait: spike arrays, quality labels, sync events and
//! peak positions. [`ZarrDatasetSource`] is the bundled implementation,
//! reading the store layout this toolbox writes; anything else (Kilosort
//! output directories, HDF5 exports) only needs to implement the trait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::filesystem::FilesystemStore;

use crate::error::{MergeError, MergeResult};
use crate::zarr;

/// Quality label that admits a unit into the merged graph.
pub const GOOD_QUALITY: &str = "good";

/// Immutable descriptor of one probe's dataset within a merge.
///
/// Created at merge start, never mutated after; persisted to the merge
/// target as the datasets table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_index: usize,
    pub name: String,
    pub probe_label: String,
    pub source_path: PathBuf,
    pub sampling_rate_hz: f64,
}

/// Narrow interface to one probe recording.
pub trait DatasetSource {
    /// Display name, typically the recording directory name.
    fn name(&self) -> &str;

    fn source_path(&self) -> &Path;

    fn sampling_rate_hz(&self) -> f64;

    /// Raw spike sample indices, in recording order.
    fn spike_times(&self) -> MergeResult<Vec<u64>>;

    /// Local cluster id per spike, parallel to [`Self::spike_times`].
    fn spike_clusters(&self) -> MergeResult<Vec<u64>>;

    /// Curation quality label per local cluster id.
    fn quality_labels(&self) -> MergeResult<BTreeMap<u64, String>>;

    /// Sync-line edge sample indices, keyed by channel id.
    fn sync_events(&self) -> MergeResult<BTreeMap<u32, Vec<u64>>>;

    /// Peak waveform position per local cluster id, in micrometers.
    fn peak_positions(&self) -> MergeResult<BTreeMap<u64, (f64, f64)>>;

    /// Local cluster ids labeled good.
    fn good_units(&self) -> MergeResult<Vec<u64>> {
        Ok(self
            .quality_labels()?
            .into_iter()
            .filter(|(_, q)| q == GOOD_QUALITY)
            .map(|(id, _)| id)
            .collect())
    }
}

/// Picks the sync channel to align a dataset with.
///
/// Alignment must never silently guess among channels; the selector is the
/// seam where that decision is injected (configuration, or interactively by
/// a caller that owns a terminal).
pub trait SyncChannelSelector {
    fn select(
        &self,
        dataset: &DatasetRecord,
        candidates: &BTreeMap<u32, Vec<u64>>,
    ) -> MergeResult<u32>;
}

/// Selector driven by explicit per-dataset configuration.
///
/// Falls back to a dataset's single non-empty candidate channel (there is
/// nothing to guess between); several candidates without configuration is an
/// [`MergeError::Alignment`].
#[derive(Debug, Default, Clone)]
pub struct FixedChannelSelector {
    per_dataset: BTreeMap<usize, u32>,
}

impl FixedChannelSelector {
    pub fn new(per_dataset: BTreeMap<usize, u32>) -> Self {
        Self { per_dataset }
    }

    pub fn with_channel(mut self, dataset_index: usize, channel: u32) -> Self {
        self.per_dataset.insert(dataset_index, channel);
        self
    }
}

impl SyncChannelSelector for FixedChannelSelector {
    fn select(
        &self,
        dataset: &DatasetRecord,
        candidates: &BTreeMap<u32, Vec<u64>>,
    ) -> MergeResult<u32> {
        if let Some(&channel) = self.per_dataset.get(&dataset.dataset_index) {
            match candidates.get(&channel) {
                Some(events) if !events.is_empty() => return Ok(channel),
                Some(_) => {
                    return Err(MergeError::Alignment(format!(
                        "configured sync channel {channel} of dataset '{}' has zero events",
                        dataset.name
                    )));
                }
                None => {
                    return Err(MergeError::Alignment(format!(
                        "configured sync channel {channel} not present in dataset '{}' \
                         (channels: {:?})",
                        dataset.name,
                        candidates.keys().collect::<Vec<_>>()
                    )));
                }
            }
        }

        let mut non_empty = candidates.iter().filter(|(_, events)| !events.is_empty());
        match (non_empty.next(), non_empty.next()) {
            (Some((&channel, _)), None) => Ok(channel),
            (None, _) => Err(MergeError::Alignment(format!(
                "dataset '{}' has no sync channel with recorded events",
                dataset.name
            ))),
            (Some(_), Some(_)) => Err(MergeError::Alignment(format!(
                "dataset '{}' offers several sync channels ({:?}); one must be selected \
                 explicitly",
                dataset.name,
                candidates
                    .iter()
                    .filter(|(_, e)| !e.is_empty())
                    .map(|(c, e)| format!("chan {c} ({} events)", e.len()))
                    .collect::<Vec<_>>()
            ))),
        }
    }
}

/// Probe recording stored in this toolbox's Zarr layout.
///
/// Expected members: `spikes/times`, `spikes/clusters`, `sync/<channel>`,
/// `units/positions`, and root attributes `qualities` (cluster id to label)
/// and `sampling_rate_hz`.
pub struct ZarrDatasetSource {
    name: String,
    path: PathBuf,
    store: Arc<FilesystemStore>,
    sampling_rate_hz: f64,
}

impl ZarrDatasetSource {
    pub fn open(path: impl Into<PathBuf>) -> MergeResult<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(MergeError::InputPath { path });
        }
        let store = zarr::open_store(&path)?;
        let attrs = zarr::read_group_attributes(&store, "/")?;
        let sampling_rate_hz = attrs
            .get("sampling_rate_hz")
            .and_then(|v| v.as_f64())
            .unwrap_or(30_000.0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".zarr").to_string())
            .unwrap_or_else(|| "dataset".to_string());
        Ok(Self {
            name,
            path,
            store,
            sampling_rate_hz,
        })
    }

    fn missing(&self, what: &str) -> MergeError {
        MergeError::MissingInput {
            dataset: self.name.clone(),
            what: what.to_string(),
        }
    }
}

impl DatasetSource for ZarrDatasetSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_path(&self) -> &Path {
        &self.path
    }

    fn sampling_rate_hz(&self) -> f64 {
        self.sampling_rate_hz
    }

    fn spike_times(&self) -> MergeResult<Vec<u64>> {
        if !zarr::array_exists(&self.store, "/spikes/times")? {
            return Err(self.missing("spikes/times array"));
        }
        zarr::read_u64_array(&self.store, "/spikes/times")
    }

    fn spike_clusters(&self) -> MergeResult<Vec<u64>> {
        if !zarr::array_exists(&self.store, "/spikes/clusters")? {
            return Err(self.missing("spikes/clusters array"));
        }
        zarr::read_u64_array(&self.store, "/spikes/clusters")
    }

    fn quality_labels(&self) -> MergeResult<BTreeMap<u64, String>> {
        let attrs = zarr::read_group_attributes(&self.store, "/")?;
        let Some(qualities) = attrs.get("qualities").and_then(|v| v.as_object()) else {
            return Err(self.missing("qualities attribute"));
        };
        let mut labels = BTreeMap::new();
        for (cluster, label) in qualities {
            let id: u64 = cluster
                .parse()
                .map_err(|_| self.missing("numeric cluster id in qualities attribute"))?;
            labels.insert(id, label.as_str().unwrap_or_default().to_string());
        }
        Ok(labels)
    }

    fn sync_events(&self) -> MergeResult<BTreeMap<u32, Vec<u64>>> {
        let mut channels = BTreeMap::new();
        let sync_dir = self.path.join("sync");
        if !sync_dir.is_dir() {
            return Ok(channels);
        }
        for entry in std::fs::read_dir(&sync_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(channel) = name.parse::<u32>() else {
                continue;
            };
            let events = zarr::read_u64_array(&self.store, &format!("/sync/{name}"))?;
            channels.insert(channel, events);
        }
        Ok(channels)
    }

    fn peak_positions(&self) -> MergeResult<BTreeMap<u64, (f64, f64)>> {
        if !zarr::array_exists(&self.store, "/units/positions")? {
            return Err(self.missing("units/positions array"));
        }
        let rows = zarr::read_f64_matrix(&self.store, "/units/positions")?;
        let mut positions = BTreeMap::new();
        for row in rows {
            if row.len() >= 3 {
                positions.insert(row[0] as u64, (row[1], row[2]));
            }
        }
        Ok(positions)
    }
}
