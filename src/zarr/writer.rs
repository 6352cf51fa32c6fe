//! Spike-log array writing.
//!
//! The merged `spikes/times` + `spikes/units` pair must never be observable
//! half-written: a crash between the two arrays would leave a merged dataset
//! whose identities do not match its times. Both arrays are therefore built
//! in a temporary sibling directory and swapped into place with a single
//! directory rename.

use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, Ix1, Ix2};
use zarrs::array::codec::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;

use crate::error::{MergeError, MergeResult, StoreResultExt};

/// Chunk length for the 1-D spike arrays.
const SPIKE_CHUNK: u64 = 65_536;

fn u64_codec() -> MergeResult<Arc<BloscCodec>> {
    let compression_level = BloscCompressionLevel::try_from(5u8)
        .map_err(|e| MergeError::Store(format!("invalid compression level: {e}")))?;
    Ok(Arc::new(
        BloscCodec::new(
            BloscCompressor::LZ4,
            compression_level,
            None, // blocksize (auto-detect)
            BloscShuffleMode::Shuffle,
            Some(8), // typesize: 8 bytes for uint64
        )
        .store_ctx("blosc codec")?,
    ))
}

/// Create (or replace the metadata of) a 1-D uint64 array and write
/// `values` into it. Also used to author probe dataset stores.
pub fn write_u64_array(
    store: &Arc<FilesystemStore>,
    path: &str,
    values: &[u64],
) -> MergeResult<()> {
    let array = ArrayBuilder::new(
        vec![values.len() as u64],
        vec![SPIKE_CHUNK],
        DataType::UInt64,
        FillValue::from(0u64),
    )
    .dimension_names(Some(vec![Some("spikes".to_string())]))
    .bytes_to_bytes_codecs(vec![u64_codec()?])
    .build(store.clone(), path)
    .store_ctx("create array")?;

    array.store_metadata().store_ctx("write array metadata")?;
    if !values.is_empty() {
        array
            .store_array_subset_ndarray::<u64, Ix1>(&[0], Array1::from_vec(values.to_vec()))
            .store_ctx("write array data")?;
    }
    Ok(())
}

/// Write the co-sorted (times, units) pair under `<store>/spikes`, replacing
/// any previous pair atomically (temp directory, then rename).
pub fn write_spike_log(
    store_path: &Path,
    spike_times: &[u64],
    spike_units: &[u64],
) -> MergeResult<()> {
    debug_assert_eq!(spike_times.len(), spike_units.len());

    let staging_path = store_path.join(".spikes.tmp");
    if staging_path.exists() {
        std::fs::remove_dir_all(&staging_path)?;
    }
    std::fs::create_dir_all(&staging_path)?;

    {
        let staging = Arc::new(FilesystemStore::new(&staging_path).store_ctx("staging store")?);
        write_u64_array(&staging, "/times", spike_times)?;
        write_u64_array(&staging, "/units", spike_units)?;
    }

    // Mark the staged directory as a zarr group so it is valid once renamed.
    std::fs::write(
        staging_path.join("zarr.json"),
        serde_json::to_vec_pretty(&serde_json::json!({
            "zarr_format": 3,
            "node_type": "group",
        }))?,
    )?;

    let final_path = store_path.join("spikes");
    if final_path.exists() {
        std::fs::remove_dir_all(&final_path)?;
    }
    std::fs::rename(&staging_path, &final_path)?;
    Ok(())
}

/// Write the unit position table `[U x 3]` (global id, x um, y um) under
/// `<store>/units/positions`.
pub fn write_unit_positions(
    store: &Arc<FilesystemStore>,
    store_path: &Path,
    rows: &[(u64, f64, f64)],
) -> MergeResult<()> {
    super::create_group_if_not_exists(store, "/units")?;

    // Stale chunks from a previous merge with more units would otherwise
    // survive next to the new, shorter array.
    let positions_path = store_path.join("units/positions");
    if positions_path.exists() {
        std::fs::remove_dir_all(&positions_path)?;
    }

    let flat: Vec<f64> = rows
        .iter()
        .flat_map(|&(id, x, y)| [id as f64, x, y])
        .collect();
    let matrix = Array2::from_shape_vec((rows.len(), 3), flat)
        .map_err(|e| MergeError::Store(format!("position table shape: {e}")))?;

    let array = ArrayBuilder::new(
        vec![rows.len() as u64, 3],
        vec![SPIKE_CHUNK, 3],
        DataType::Float64,
        FillValue::from(0.0f64),
    )
    .dimension_names(Some(vec![
        Some("units".to_string()),
        Some("columns".to_string()),
    ]))
    .build(store.clone(), "/units/positions")
    .store_ctx("create positions array")?;

    array.store_metadata().store_ctx("write positions metadata")?;
    if !rows.is_empty() {
        array
            .store_array_subset_ndarray::<f64, Ix2>(&[0, 0], matrix)
            .store_ctx("write positions data")?;
    }
    Ok(())
}
