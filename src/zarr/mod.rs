//! Merge-target Zarr store.
//!
//! A merged dataset lives in one Zarr v3 store:
//!
//! ```text
//! merged_<names>.zarr/
//! ├── spikes/
//! │   ├── times     [N] uint64, non-decreasing sample indices (reference clock)
//! │   └── units     [N] uint64, packed global unit ids
//! ├── units/
//! │   └── positions [U x 3] float64 (global id, x um, y um)
//! ├── network/      exported graph files
//! └── zarr.json     root attributes: datasets table, cluster sets, provenance
//! ```
//!
//! The same layout (with `spikes/clusters`, `sync/<channel>` and `qualities`
//! in place of the merged members) is what [`crate::dataset::ZarrDatasetSource`]
//! reads from individual probe stores.

pub mod writer;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde_json::{Map, Value};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::{Group, GroupBuilder};
use zarrs::storage::{ReadableStorageTraits, StoreKey};

use crate::error::{MergeError, MergeResult, StoreResultExt};

/// Initialize or open a merge-target store, handling concurrent access.
pub fn open_or_create_store(store_path: &Path) -> MergeResult<Arc<FilesystemStore>> {
    std::fs::create_dir_all(store_path)?;

    let store = Arc::new(FilesystemStore::new(store_path).store_ctx("open store")?);

    // File locking coordinates concurrent initialization attempts.
    let lock_path = store_path.join(".merge.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.lock_exclusive()?;

    let mut last_error = None;
    for attempt in 0..2 {
        match initialize_store_structure(&store) {
            Ok(_) => {
                lock_file.unlock()?;
                return Ok(store);
            }
            Err(e) => {
                tracing::warn!(
                    "failed to initialize merge store (attempt {}): {}",
                    attempt + 1,
                    e
                );
                last_error = Some(e);
                std::thread::sleep(Duration::from_millis(10 + fastrand::u64(0..20)));
            }
        }
    }

    lock_file.unlock()?;
    Err(MergeError::Store(format!(
        "failed to initialize merge store after 2 attempts: {}",
        last_error.unwrap()
    )))
}

/// Open an existing store; fails if the path does not exist.
pub fn open_store(store_path: &Path) -> MergeResult<Arc<FilesystemStore>> {
    if !store_path.is_dir() {
        return Err(MergeError::InputPath {
            path: store_path.to_path_buf(),
        });
    }
    Ok(Arc::new(
        FilesystemStore::new(store_path).store_ctx("open store")?,
    ))
}

fn initialize_store_structure(store: &Arc<FilesystemStore>) -> MergeResult<()> {
    if !group_exists(store, "/")? {
        let root_group = GroupBuilder::new()
            .build(store.clone(), "/")
            .store_ctx("create root group")?;
        root_group.store_metadata().store_ctx("write root group")?;
    }
    Ok(())
}

/// Check if a Zarr group exists (Zarr v3 uses zarr.json with node_type).
pub fn group_exists(store: &Arc<FilesystemStore>, path: &str) -> MergeResult<bool> {
    node_type_is(store, path, "group")
}

/// Check if a Zarr array exists.
pub fn array_exists(store: &Arc<FilesystemStore>, path: &str) -> MergeResult<bool> {
    node_type_is(store, path, "array")
}

fn node_type_is(store: &Arc<FilesystemStore>, path: &str, expected: &str) -> MergeResult<bool> {
    let trimmed_path = path.trim_end_matches('/').trim_start_matches('/');
    let metadata_path = if trimmed_path.is_empty() {
        "zarr.json".to_string()
    } else {
        format!("{trimmed_path}/zarr.json")
    };
    let metadata_key = StoreKey::new(&metadata_path).store_ctx("store key")?;

    match store.get(&metadata_key) {
        Ok(Some(data)) => {
            let json: Value = serde_json::from_slice(&data)?;
            Ok(json.get("node_type").and_then(|v| v.as_str()) == Some(expected))
        }
        _ => Ok(false),
    }
}

/// Create a Zarr group if it doesn't exist.
pub fn create_group_if_not_exists(store: &Arc<FilesystemStore>, path: &str) -> MergeResult<()> {
    if !group_exists(store, path)? {
        let group = GroupBuilder::new()
            .build(store.clone(), path)
            .store_ctx("create group")?;
        group.store_metadata().store_ctx("write group")?;
    }
    Ok(())
}

/// Read the attributes of a group, `{}` if the group is absent.
pub fn read_group_attributes(
    store: &Arc<FilesystemStore>,
    path: &str,
) -> MergeResult<Map<String, Value>> {
    if !group_exists(store, path)? {
        return Ok(Map::new());
    }
    let group = Group::open(store.clone(), path).store_ctx("open group")?;
    Ok(group.attributes().clone())
}

/// Merge key/value pairs into a group's attributes (last write wins per key).
pub fn update_group_attributes(
    store: &Arc<FilesystemStore>,
    path: &str,
    attrs: Map<String, Value>,
) -> MergeResult<()> {
    create_group_if_not_exists(store, path)?;
    let mut group = Group::open(store.clone(), path).store_ctx("open group")?;
    group.attributes_mut().extend(attrs);
    group.store_metadata().store_ctx("write group attributes")?;
    Ok(())
}

/// Read a whole 1-D uint64 array.
pub fn read_u64_array(store: &Arc<FilesystemStore>, path: &str) -> MergeResult<Vec<u64>> {
    let array = Array::open(store.clone(), path).store_ctx("open array")?;
    let len = array.shape()[0];
    if len == 0 {
        return Ok(Vec::new());
    }
    let subset =
        ArraySubset::new_with_start_shape(vec![0], vec![len]).store_ctx("array subset")?;
    let data = array
        .retrieve_array_subset_ndarray::<u64>(&subset)
        .store_ctx("read array")?;
    Ok(data.into_iter().collect())
}

/// Read a whole 2-D float64 array as rows.
pub fn read_f64_matrix(store: &Arc<FilesystemStore>, path: &str) -> MergeResult<Vec<Vec<f64>>> {
    let array = Array::open(store.clone(), path).store_ctx("open array")?;
    let shape = array.shape().to_vec();
    if shape[0] == 0 || shape[1] == 0 {
        return Ok(Vec::new());
    }
    let subset =
        ArraySubset::new_with_start_shape(vec![0, 0], shape.clone()).store_ctx("array subset")?;
    let data = array
        .retrieve_array_subset_ndarray::<f64>(&subset)
        .store_ctx("read array")?;
    let cols = shape[1] as usize;
    let flat: Vec<f64> = data.into_iter().collect();
    Ok(flat.chunks(cols).map(|row| row.to_vec()).collect())
}
