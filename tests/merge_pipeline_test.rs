use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, json};

use probe_merge_toolbox::dataset::{FixedChannelSelector, ZarrDatasetSource};
use probe_merge_toolbox::error::MergeError;
use probe_merge_toolbox::identity::GlobalUnitId;
use probe_merge_toolbox::merger::{MergeOutcome, Merger, MergerConfig};
use probe_merge_toolbox::zarr;

struct DatasetFixture {
    spike_times: Vec<u64>,
    spike_clusters: Vec<u64>,
    sync: Vec<(u32, Vec<u64>)>,
    qualities: Vec<(u64, &'static str)>,
    positions: Vec<(u64, f64, f64)>,
}

impl DatasetFixture {
    fn write(&self, path: &Path) -> Result<()> {
        let store = zarr::open_or_create_store(path)?;
        zarr::create_group_if_not_exists(&store, "/spikes")?;
        zarr::writer::write_u64_array(&store, "/spikes/times", &self.spike_times)?;
        zarr::writer::write_u64_array(&store, "/spikes/clusters", &self.spike_clusters)?;
        zarr::create_group_if_not_exists(&store, "/sync")?;
        for (channel, events) in &self.sync {
            zarr::writer::write_u64_array(&store, &format!("/sync/{channel}"), events)?;
        }
        zarr::writer::write_unit_positions(&store, path, &self.positions)?;

        let mut qualities = Map::new();
        for (cluster, label) in &self.qualities {
            qualities.insert(cluster.to_string(), json!(label));
        }
        let mut attrs = Map::new();
        attrs.insert("qualities".to_string(), serde_json::Value::Object(qualities));
        attrs.insert("sampling_rate_hz".to_string(), json!(30_000.0));
        zarr::update_group_attributes(&store, "/", attrs)?;
        Ok(())
    }
}

fn simple_dataset(sample_offset: u64) -> DatasetFixture {
    DatasetFixture {
        spike_times: vec![
            100 + sample_offset,
            250 + sample_offset,
            400 + sample_offset,
            900 + sample_offset,
        ],
        spike_clusters: vec![3, 5, 3, 5],
        sync: vec![(
            3,
            (0..20).map(|i| i * 1_000 + sample_offset).collect(),
        )],
        qualities: vec![(3, "good"), (5, "good"), (9, "mua")],
        positions: vec![(3, 16.0, 1200.0), (5, 48.0, 800.0), (9, 32.0, 40.0)],
    }
}

fn run_merge(
    datasets: &[(&str, PathBuf)],
    target: PathBuf,
    force: bool,
    selector: &FixedChannelSelector,
) -> Result<probe_merge_toolbox::merger::MergedDataset> {
    let mut merger = Merger::new(MergerConfig {
        target: Some(target),
        reference_index: 0,
        force_remerge: force,
    });
    for (probe, path) in datasets {
        merger.add_dataset(*probe, Box::new(ZarrDatasetSource::open(path)?))?;
    }
    Ok(merger.merge(selector)?)
}

#[test]
fn single_dataset_merge_keeps_raw_times() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds = dir.path().join("rec_a.zarr");
    simple_dataset(0).write(&ds)?;
    let target = dir.path().join("merged.zarr");

    let merged = run_merge(
        &[("prb1", ds)],
        target,
        false,
        &FixedChannelSelector::default(),
    )?;

    assert_eq!(merged.outcome, MergeOutcome::Written);
    // Alignment is the identity with one dataset.
    assert_eq!(merged.spike_log.spike_times, vec![100, 250, 400, 900]);
    let expected_units: Vec<u64> = [3u64, 5, 3, 5]
        .iter()
        .map(|&c| GlobalUnitId::encode(c, 0).unwrap().raw())
        .collect();
    assert_eq!(merged.spike_log.spike_units, expected_units);
    // Only the two good units become nodes; the mua cluster does not.
    assert_eq!(merged.graph.undirected().node_count(), 2);
    Ok(())
}

#[test]
fn merge_invariants_hold_across_two_datasets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds_a = dir.path().join("rec_a.zarr");
    let ds_b = dir.path().join("rec_b.zarr");
    simple_dataset(0).write(&ds_a)?;
    // Second probe's clock started 500 samples later.
    simple_dataset(500).write(&ds_b)?;
    let target = dir.path().join("merged.zarr");

    let merged = run_merge(
        &[("prb1", ds_a), ("prb2", ds_b)],
        target,
        false,
        &FixedChannelSelector::default(),
    )?;

    let times = &merged.spike_log.spike_times;
    let units = &merged.spike_log.spike_units;
    // Sort invariant: non-decreasing, equal lengths, sum of counts.
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(times.len(), units.len());
    assert_eq!(times.len(), 8);

    // Every spike of the second dataset decodes back to dataset 1, and the
    // constant clock offset was removed by alignment.
    let mut per_dataset = BTreeMap::new();
    for &raw in units {
        *per_dataset
            .entry(GlobalUnitId::from_raw(raw).dataset_index())
            .or_insert(0usize) += 1;
    }
    assert_eq!(per_dataset.get(&0), Some(&4));
    assert_eq!(per_dataset.get(&1), Some(&4));

    // Aligned times of dataset 1 coincide with dataset 0's raw times, so
    // each time value appears twice.
    for chunk in times.chunks(2) {
        assert_eq!(chunk[0], chunk[1]);
    }

    // Same local cluster id on both probes produced distinct global ids.
    let ids: std::collections::BTreeSet<u64> = units.iter().copied().collect();
    assert_eq!(ids.len(), 4);
    Ok(())
}

#[test]
fn tie_break_keeps_dataset_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds_a = dir.path().join("rec_a.zarr");
    let ds_b = dir.path().join("rec_b.zarr");
    // Identical clocks: every merged time is a tie between the datasets.
    simple_dataset(0).write(&ds_a)?;
    simple_dataset(0).write(&ds_b)?;
    let target = dir.path().join("merged.zarr");

    let merged = run_merge(
        &[("prb1", ds_a), ("prb2", ds_b)],
        target,
        false,
        &FixedChannelSelector::default(),
    )?;

    // For each tied pair, the dataset-0 spike comes first.
    for chunk in merged.spike_log.spike_units.chunks(2) {
        assert_eq!(GlobalUnitId::from_raw(chunk[0]).dataset_index(), 0);
        assert_eq!(GlobalUnitId::from_raw(chunk[1]).dataset_index(), 1);
    }
    Ok(())
}

fn spikes_dir_bytes(target: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut files = Vec::new();
    let mut stack = vec![target.join("spikes")];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                stack.push(entry.path());
            } else {
                files.push((entry.path(), std::fs::read(entry.path())?));
            }
        }
    }
    files.sort();
    Ok(files)
}

#[test]
fn merge_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds = dir.path().join("rec_a.zarr");
    simple_dataset(0).write(&ds)?;
    let target = dir.path().join("merged.zarr");
    let selector = FixedChannelSelector::default();

    let first = run_merge(&[("prb1", ds.clone())], target.clone(), false, &selector)?;
    assert_eq!(first.outcome, MergeOutcome::Written);
    let bytes_after_first = spikes_dir_bytes(&target)?;

    // Unchanged inputs: second run serves the persisted arrays.
    let second = run_merge(&[("prb1", ds.clone())], target.clone(), false, &selector)?;
    assert_eq!(second.outcome, MergeOutcome::Reused);
    assert_eq!(first.spike_log, second.spike_log);

    // A forced re-merge of unchanged inputs reproduces byte-identical files.
    let third = run_merge(&[("prb1", ds)], target.clone(), true, &selector)?;
    assert_eq!(third.outcome, MergeOutcome::Written);
    assert_eq!(spikes_dir_bytes(&target)?, bytes_after_first);
    Ok(())
}

#[test]
fn resorting_forces_a_remerge_but_quality_edits_do_not() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds = dir.path().join("rec_a.zarr");
    let mut fixture = simple_dataset(0);
    fixture.write(&ds)?;
    let target = dir.path().join("merged.zarr");
    let selector = FixedChannelSelector::default();

    run_merge(&[("prb1", ds.clone())], target.clone(), false, &selector)?;

    // Quality-only edit: same cluster ids, different label.
    fixture.qualities = vec![(3, "good"), (5, "noise"), (9, "mua")];
    fixture.write(&ds)?;
    let after_quality_edit =
        run_merge(&[("prb1", ds.clone())], target.clone(), false, &selector)?;
    assert_eq!(after_quality_edit.outcome, MergeOutcome::Reused);
    // The node set does follow the new labels though.
    assert_eq!(after_quality_edit.graph.undirected().node_count(), 1);

    // Re-spike-sorting: cluster 5 disappeared, cluster 6 appeared.
    fixture.spike_clusters = vec![3, 6, 3, 6];
    fixture.qualities = vec![(3, "good"), (6, "good")];
    fixture.write(&ds)?;
    let after_resort = run_merge(&[("prb1", ds)], target, false, &selector)?;
    assert_eq!(after_resort.outcome, MergeOutcome::Written);
    Ok(())
}

#[test]
fn missing_spike_arrays_fail_with_missing_input() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds = dir.path().join("rec_a.zarr");
    // A store with qualities but no spike arrays.
    let store = zarr::open_or_create_store(&ds)?;
    let mut attrs = Map::new();
    attrs.insert("qualities".to_string(), json!({"3": "good"}));
    zarr::update_group_attributes(&store, "/", attrs)?;

    let mut merger = Merger::new(MergerConfig {
        target: Some(dir.path().join("merged.zarr")),
        ..Default::default()
    });
    merger.add_dataset("prb1", Box::new(ZarrDatasetSource::open(&ds)?))?;
    let err = merger
        .merge(&FixedChannelSelector::default())
        .expect_err("merge without spike arrays should fail");
    match err {
        MergeError::MissingInput { .. } => {}
        other => panic!("expected MissingInput, got {other:?}"),
    }
    Ok(())
}

#[test]
fn ambiguous_sync_channels_require_explicit_selection() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds_a = dir.path().join("rec_a.zarr");
    let ds_b = dir.path().join("rec_b.zarr");
    let mut fixture = simple_dataset(0);
    // Two non-empty sync channels on the first dataset.
    fixture.sync = vec![
        (3, (0..20).map(|i| i * 1_000).collect()),
        (7, (0..20).map(|i| i * 1_000 + 2).collect()),
    ];
    fixture.write(&ds_a)?;
    simple_dataset(500).write(&ds_b)?;
    let target = dir.path().join("merged.zarr");

    let err = run_merge(
        &[("prb1", ds_a.clone()), ("prb2", ds_b.clone())],
        target.clone(),
        false,
        &FixedChannelSelector::default(),
    )
    .expect_err("ambiguous sync channels must not be guessed");
    assert!(err.to_string().contains("sync"), "unexpected error: {err}");

    // Explicit configuration resolves the ambiguity.
    let selector = FixedChannelSelector::default().with_channel(0, 3);
    let merged = run_merge(
        &[("prb1", ds_a), ("prb2", ds_b)],
        target,
        false,
        &selector,
    )?;
    assert_eq!(merged.spike_log.spike_times.len(), 8);
    Ok(())
}

#[test]
fn probe_label_drift_warns_but_merges() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ds = dir.path().join("rec_a.zarr");
    simple_dataset(0).write(&ds)?;
    let target = dir.path().join("merged.zarr");
    let selector = FixedChannelSelector::default();

    run_merge(&[("prb1", ds.clone())], target.clone(), false, &selector)?;
    // Re-merge under a different probe label: a warning, not an error.
    let merged = run_merge(&[("renamed", ds)], target.clone(), false, &selector)?;
    assert_eq!(merged.records[0].probe_label, "renamed");

    // The persisted table carries the new label.
    let store = zarr::open_store(&target)?;
    let attrs = zarr::read_group_attributes(&store, "/")?;
    let datasets = attrs.get("datasets").expect("datasets table");
    assert!(datasets.to_string().contains("renamed"));
    Ok(())
}
