//! Probe Merge Toolbox - merging multi-probe spike-sorted recordings
//!
//! This crate merges the spike trains of several simultaneously recorded
//! probes ("datasets") into a single time-aligned dataset, and models the
//! recorded units and their putative monosynaptic connections as a graph.
//!
//! # Overview
//!
//! Each probe records against its own sample clock. A shared hardware sync
//! line, recorded by every probe, provides the correspondence points needed
//! to re-express all spike times on one reference clock. After alignment,
//! per-probe cluster ids are renumbered into collision-free global unit
//! ids, the spike arrays are concatenated and co-sorted by time, and the
//! result is persisted to a Zarr store that downstream analysis reads
//! directly.
//!
//! # Key Features
//!
//! - **Cross-probe alignment** from sync-pulse trains (piecewise-linear
//!   time warp, nearest-neighbor edge matching)
//! - **Collision-free unit renumbering** with a lossless id bijection
//! - **Idempotent merging** - unchanged inputs are never reprocessed;
//!   re-spike-sorted inputs are detected and re-merged
//! - **Unit connection graph** - a multigraph of units and significant
//!   cross-correlogram peaks, with edge-type filtering (`+`, `-`, `ci`,
//!   `main`), node/edge attribute accessors, and directed-graph derivation
//!   from lag asymmetry
//! - **Zarr v3 storage** for the merged arrays and unit position table
//!
//! # Command-Line Tools
//!
//! - `probe-merge` - merge datasets into a target store
//! - `probe-graph` - populate, filter and export the connection graph
//! - `probe-inspect` - inspect a merge target
//!
//! # Quick Start
//!
//! ```bash
//! # Merge two probe recordings (sync channel 3 on each)
//! probe-merge rec_probe1.zarr rec_probe2.zarr \
//!   --probe prb1 --probe prb2 \
//!   --sync-channel 0:3 --sync-channel 1:3
//!
//! # Build the connection graph from a correlation table and export it
//! probe-graph merged_rec_probe1_rec_probe2.zarr \
//!   --table correlations.json \
//!   --keep-types main --format edgelist
//!
//! # Inspect the result
//! probe-inspect merged_rec_probe1_rec_probe2.zarr
//! ```
//!
//! # Merge Target Structure
//!
//! ```text
//! merged_<names>.zarr/
//! ├── spikes/
//! │   ├── times     [N] uint64 (non-decreasing, reference clock)
//! │   └── units     [N] uint64 (global unit ids)
//! ├── units/
//! │   └── positions [U x 3] float64 (global id, x um, y um)
//! ├── network/      exported graph files
//! └── zarr.json     datasets table, cluster sets, provenance
//! ```
//!
//! # Library Usage
//!
//! The binaries are thin wrappers over the library modules:
//!
//! - [`merger`] - the merge engine
//! - [`align`] - sync-pulse matching and time warping
//! - [`identity`] - global unit id encoding
//! - [`graph`] - the unit connection graph and its operations
//! - [`dataset`] - dataset access traits and the bundled Zarr source
//! - [`zarr`] - merge-target store helpers

pub mod align;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod identity;
pub mod merger;
pub mod zarr;

use chrono::Datelike;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
    let version = env!("CARGO_PKG_VERSION");
    let current_year = chrono::Utc::now().year();
    let copyright_year = if current_year == 2025 {
        "2025".to_string()
    } else {
        format!("2025-{}", current_year)
    };

    println!("{} {} Copyright (C) {}", program_name, version, copyright_year);
    println!("This program comes with ABSOLUTELY NO WARRANTY.");
    println!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
    println!("This is free software, and you are welcome to redistribute it under certain conditions.");
    println!();
}
