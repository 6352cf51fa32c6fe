//! Dataset merging.
//!
//! [`Merger`] turns N independently-clocked probe recordings into one
//! merged dataset: spike times re-expressed on a common reference clock,
//! cluster ids renumbered into collision-free global ids, both arrays
//! co-sorted by time and persisted to the merge target store.
//!
//! Merging is idempotent. A second run over unchanged inputs is served from
//! the persisted arrays; re-spike-sorted inputs (the cluster-identity set
//! of any dataset changed) force a re-merge, while quality-only label edits
//! do not — spike times are unaffected by those.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use fs2::FileExt;
use serde_json::{Map, Value, json};

use crate::align;
use crate::dataset::{DatasetRecord, DatasetSource, SyncChannelSelector};
use crate::error::{MergeError, MergeResult};
use crate::graph::{UnitGraph, UnitGraphStore, UnitNode};
use crate::identity::{GlobalUnitId, MAX_DATASETS};
use crate::zarr;

/// Horizontal offset between probes in the merged position table, in
/// micrometers.
const PROBE_X_OFFSET_UM: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Merge target store; defaults to `merged_<names>.zarr` next to the
    /// first dataset.
    pub target: Option<PathBuf>,
    /// Dataset whose clock every other dataset is warped onto.
    pub reference_index: usize,
    /// Re-merge even when the persisted arrays look current.
    pub force_remerge: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            target: None,
            reference_index: 0,
            force_remerge: false,
        }
    }
}

/// Whether [`Merger::merge`] recomputed the arrays or served the persisted
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Written,
    Reused,
}

/// The co-sorted merged spike arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSpikeLog {
    /// Non-decreasing sample indices on the reference clock.
    pub spike_times: Vec<u64>,
    /// Packed [`GlobalUnitId`] per spike, parallel to `spike_times`.
    pub spike_units: Vec<u64>,
}

/// Result of a merge: descriptors, arrays, and the unit-graph skeleton
/// (nodes only; edges are populated later from a correlation table).
#[derive(Debug)]
pub struct MergedDataset {
    pub records: Vec<DatasetRecord>,
    pub target: PathBuf,
    pub outcome: MergeOutcome,
    pub spike_log: MergedSpikeLog,
    pub graph: UnitGraphStore,
}

impl MergedDataset {
    /// Directory for exported graph files.
    pub fn network_dir(&self) -> PathBuf {
        self.target.join("network")
    }
}

pub struct Merger {
    config: MergerConfig,
    datasets: Vec<(String, Box<dyn DatasetSource>)>,
}

impl Merger {
    pub fn new(config: MergerConfig) -> Self {
        Self {
            config,
            datasets: Vec::new(),
        }
    }

    /// Register one probe recording under a probe label.
    pub fn add_dataset(
        &mut self,
        probe_label: impl Into<String>,
        source: Box<dyn DatasetSource>,
    ) -> MergeResult<()> {
        if !source.source_path().exists() {
            return Err(MergeError::InputPath {
                path: source.source_path().to_path_buf(),
            });
        }
        if self.datasets.len() as u64 >= MAX_DATASETS {
            return Err(MergeError::Identity(format!(
                "cannot merge more than {MAX_DATASETS} datasets"
            )));
        }
        self.datasets.push((probe_label.into(), source));
        Ok(())
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.len()
    }

    /// Run the merge.
    ///
    /// `selector` resolves the sync channel of each dataset; it is only
    /// consulted for multi-dataset merges (a single dataset needs no
    /// alignment).
    pub fn merge(&self, selector: &dyn SyncChannelSelector) -> MergeResult<MergedDataset> {
        if self.datasets.is_empty() {
            return Err(MergeError::MissingInput {
                dataset: "(none)".to_string(),
                what: "at least one dataset".to_string(),
            });
        }

        // Dataset indices are assigned in ascending name order so repeated
        // merges of the same set are stable regardless of argument order.
        let mut order: Vec<usize> = (0..self.datasets.len()).collect();
        order.sort_by(|&a, &b| self.datasets[a].1.name().cmp(self.datasets[b].1.name()));

        let records: Vec<DatasetRecord> = order
            .iter()
            .enumerate()
            .map(|(dataset_index, &slot)| {
                let (probe_label, source) = &self.datasets[slot];
                DatasetRecord {
                    dataset_index,
                    name: source.name().to_string(),
                    probe_label: probe_label.clone(),
                    source_path: source.source_path().to_path_buf(),
                    sampling_rate_hz: source.sampling_rate_hz(),
                }
            })
            .collect();
        let sources: Vec<&dyn DatasetSource> =
            order.iter().map(|&slot| &*self.datasets[slot].1).collect();

        if self.config.reference_index >= sources.len() {
            return Err(MergeError::Alignment(format!(
                "reference dataset index {} out of range ({} datasets)",
                self.config.reference_index,
                sources.len()
            )));
        }

        let target = self.target_path(&records)?;
        tracing::info!(
            "merged data from {} dataset(s) will be saved to {}",
            records.len(),
            target.display()
        );

        let store = zarr::open_or_create_store(&target)?;

        // One merge at a time per target.
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(target.join(".merge.lock"))?;
        lock_file.lock_exclusive()?;

        let result = self.merge_locked(&records, &sources, &target, &store, selector);
        lock_file.unlock()?;
        result
    }

    fn merge_locked(
        &self,
        records: &[DatasetRecord],
        sources: &[&dyn DatasetSource],
        target: &PathBuf,
        store: &std::sync::Arc<zarrs::filesystem::FilesystemStore>,
        selector: &dyn SyncChannelSelector,
    ) -> MergeResult<MergedDataset> {
        let previous_attrs = zarr::read_group_attributes(store, "/")?;
        warn_on_probe_drift(&previous_attrs, records);

        // Quality labels drive both the good-unit node set and re-sort
        // detection.
        let qualities: Vec<BTreeMap<u64, String>> = sources
            .iter()
            .map(|s| s.quality_labels())
            .collect::<MergeResult<_>>()?;
        let cluster_sets: Vec<BTreeSet<u64>> = qualities
            .iter()
            .map(|q| q.keys().copied().collect())
            .collect();
        let re_sorted = detect_resort(&previous_attrs, &cluster_sets);
        if re_sorted {
            tracing::info!("new spike-sorting detected; re-merging spike trains");
        }

        let have_arrays = zarr::array_exists(store, "/spikes/times")?
            && zarr::array_exists(store, "/spikes/units")?;

        let (spike_log, outcome) = if self.config.force_remerge || !have_arrays || re_sorted {
            let log = self.build_spike_log(records, sources, selector)?;
            zarr::writer::write_spike_log(target, &log.spike_times, &log.spike_units)?;
            (log, MergeOutcome::Written)
        } else {
            let log = MergedSpikeLog {
                spike_times: zarr::read_u64_array(store, "/spikes/times")?,
                spike_units: zarr::read_u64_array(store, "/spikes/units")?,
            };
            (log, MergeOutcome::Reused)
        };

        // Unit-graph skeleton: one node per good unit, probes offset on x.
        let mut graph = UnitGraph::new();
        let mut position_rows: Vec<(u64, f64, f64)> = Vec::new();
        for (record, source) in records.iter().zip(sources) {
            let positions = source.peak_positions()?;
            let mut good: Vec<u64> = qualities[record.dataset_index]
                .iter()
                .filter(|(_, q)| q.as_str() == crate::dataset::GOOD_QUALITY)
                .map(|(&id, _)| id)
                .collect();
            good.sort_unstable();
            for local in good {
                let id = GlobalUnitId::encode(local, record.dataset_index)?;
                let (x, y) = positions.get(&local).copied().unwrap_or_else(|| {
                    tracing::warn!(
                        "unit {local} of dataset '{}' has no peak position",
                        record.name
                    );
                    (0.0, 0.0)
                });
                let position = (x + PROBE_X_OFFSET_UM * record.dataset_index as f64, y);
                graph.add_node(UnitNode::new(id, position));
                position_rows.push((id.raw(), position.0, position.1));
            }
        }
        zarr::writer::write_unit_positions(store, target, &position_rows)?;

        self.persist_attributes(store, records, &qualities, &cluster_sets)?;

        Ok(MergedDataset {
            records: records.to_vec(),
            target: target.clone(),
            outcome,
            spike_log,
            graph: UnitGraphStore::from_graph(graph),
        })
    }

    fn target_path(&self, records: &[DatasetRecord]) -> MergeResult<PathBuf> {
        if let Some(target) = &self.config.target {
            return Ok(target.clone());
        }
        let parent = records[0]
            .source_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        for record in &records[1..] {
            if record.source_path.parent() != Some(parent.as_path()) {
                tracing::warn!(
                    "datasets are not stored in the same parent directory; \
                     using {} for the merge target",
                    parent.display()
                );
                break;
            }
        }
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        Ok(parent.join(format!("merged_{}.zarr", names.join("_"))))
    }

    /// Load, align, renumber, concatenate and time-sort the spike trains.
    fn build_spike_log(
        &self,
        records: &[DatasetRecord],
        sources: &[&dyn DatasetSource],
        selector: &dyn SyncChannelSelector,
    ) -> MergeResult<MergedSpikeLog> {
        tracing::info!("loading spike trains of {} dataset(s)", sources.len());

        let mut all_times: Vec<Vec<u64>> = Vec::with_capacity(sources.len());
        let mut all_clusters: Vec<Vec<u64>> = Vec::with_capacity(sources.len());
        for (record, source) in records.iter().zip(sources) {
            let times = source.spike_times()?;
            let clusters = source.spike_clusters()?;
            if times.len() != clusters.len() {
                return Err(MergeError::MissingInput {
                    dataset: record.name.clone(),
                    what: format!(
                        "equal-length spike arrays ({} times vs {} clusters)",
                        times.len(),
                        clusters.len()
                    ),
                });
            }
            all_times.push(times);
            all_clusters.push(clusters);
        }

        // Sync alignment only matters across probes.
        if sources.len() > 1 {
            tracing::info!("aligning spike trains of {} datasets", sources.len());
            let mut sync_trains: Vec<Vec<u64>> = Vec::with_capacity(sources.len());
            for (record, source) in records.iter().zip(sources) {
                let candidates = source.sync_events()?;
                let channel = selector.select(record, &candidates)?;
                let events = candidates.get(&channel).cloned().ok_or_else(|| {
                    MergeError::Alignment(format!(
                        "selected sync channel {channel} not present in dataset '{}'",
                        record.name
                    ))
                })?;
                sync_trains.push(events);
            }
            let warps = align::align(&sync_trains, self.config.reference_index)?;
            for (times, warp) in all_times.iter_mut().zip(&warps) {
                if !warp.is_identity() {
                    *times = warp.apply_all(times);
                }
            }
        }

        let total: usize = all_times.iter().map(Vec::len).sum();
        let mut merged_times: Vec<u64> = Vec::with_capacity(total);
        let mut merged_units: Vec<u64> = Vec::with_capacity(total);
        for (dataset_index, (times, clusters)) in
            all_times.iter().zip(&all_clusters).enumerate()
        {
            for (&t, &c) in times.iter().zip(clusters) {
                merged_times.push(t);
                merged_units.push(GlobalUnitId::encode(c, dataset_index)?.raw());
            }
        }

        // Stable sort keeps the concatenation order for ties, i.e. dataset
        // order first, then within-dataset order.
        let mut perm: Vec<usize> = (0..total).collect();
        perm.sort_by_key(|&i| merged_times[i]);
        let spike_times: Vec<u64> = perm.iter().map(|&i| merged_times[i]).collect();
        let spike_units: Vec<u64> = perm.iter().map(|&i| merged_units[i]).collect();

        Ok(MergedSpikeLog {
            spike_times,
            spike_units,
        })
    }

    fn persist_attributes(
        &self,
        store: &std::sync::Arc<zarrs::filesystem::FilesystemStore>,
        records: &[DatasetRecord],
        qualities: &[BTreeMap<u64, String>],
        cluster_sets: &[BTreeSet<u64>],
    ) -> MergeResult<()> {
        let mut merged_qualities = Map::new();
        for (record, labels) in records.iter().zip(qualities) {
            for (&local, label) in labels {
                let id = GlobalUnitId::encode(local, record.dataset_index)?;
                merged_qualities.insert(id.raw().to_string(), json!(label));
            }
        }

        let cluster_sets_json: Map<String, Value> = cluster_sets
            .iter()
            .enumerate()
            .map(|(i, set)| (i.to_string(), json!(set.iter().collect::<Vec<_>>())))
            .collect();

        let mut attrs = Map::new();
        attrs.insert("datasets".to_string(), serde_json::to_value(records)?);
        attrs.insert("cluster_sets".to_string(), Value::Object(cluster_sets_json));
        attrs.insert("qualities".to_string(), Value::Object(merged_qualities));
        attrs.insert(
            "merged_at".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        attrs.insert(
            "merged_on".to_string(),
            json!(
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_default()
            ),
        );
        attrs.insert(
            "toolbox_version".to_string(),
            json!(env!("CARGO_PKG_VERSION")),
        );
        zarr::update_group_attributes(store, "/", attrs)
    }
}

/// Rebuild the unit-graph skeleton (nodes only) from a merge target's
/// persisted position table, without touching the source datasets.
pub fn load_unit_graph(target: &std::path::Path) -> MergeResult<UnitGraph> {
    let store = zarr::open_store(target)?;
    if !zarr::array_exists(&store, "/units/positions")? {
        return Err(MergeError::MissingInput {
            dataset: target.display().to_string(),
            what: "units/positions array (run probe-merge first)".to_string(),
        });
    }
    let rows = zarr::read_f64_matrix(&store, "/units/positions")?;
    let mut graph = UnitGraph::new();
    for row in rows {
        if row.len() >= 3 {
            let id = GlobalUnitId::from_raw(row[0] as u64);
            graph.add_node(UnitNode::new(id, (row[1], row[2])));
        }
    }
    Ok(graph)
}

/// Compare the persisted probe labels against the current ones; naming
/// drift is worth a warning but processing continues with the new labels.
fn warn_on_probe_drift(previous_attrs: &Map<String, Value>, records: &[DatasetRecord]) {
    let Some(previous) = previous_attrs
        .get("datasets")
        .and_then(|v| serde_json::from_value::<Vec<DatasetRecord>>(v.clone()).ok())
    else {
        return;
    };
    for record in records {
        if let Some(old) = previous
            .iter()
            .find(|p| p.dataset_index == record.dataset_index)
            && old.probe_label != record.probe_label
        {
            tracing::warn!(
                "dataset {} ('{}') was previously merged under probe label '{}', now '{}'; \
                 using the new label",
                record.dataset_index,
                record.name,
                old.probe_label,
                record.probe_label
            );
        }
    }
}

/// Re-spike-sorted means the cluster-identity set changed: some previously
/// known cluster id no longer exists, or the dataset count changed. Pure
/// quality-label edits keep the id sets intact and do not count.
fn detect_resort(previous_attrs: &Map<String, Value>, cluster_sets: &[BTreeSet<u64>]) -> bool {
    let Some(previous) = previous_attrs.get("cluster_sets").and_then(|v| v.as_object()) else {
        return false;
    };
    if previous.len() != cluster_sets.len() {
        return true;
    }
    for (index, old_ids) in previous {
        let Ok(dataset_index) = index.parse::<usize>() else {
            return true;
        };
        let Some(current) = cluster_sets.get(dataset_index) else {
            return true;
        };
        let Some(old_ids) = old_ids.as_array() else {
            return true;
        };
        let old_set: BTreeSet<u64> = old_ids.iter().filter_map(|v| v.as_u64()).collect();
        if !old_set.is_subset(current) {
            return true;
        }
    }
    false
}
