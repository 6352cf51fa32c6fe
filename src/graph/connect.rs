//! Populating the graph from a correlation-significance table.
//!
//! Cross-correlogram computation and its significance testing live outside
//! this crate; what arrives here is the finished table of significant peaks
//! plus the criteria that produced it. One table row becomes one multi-edge.

use serde::{Deserialize, Serialize};

use crate::error::MergeResult;
use crate::identity::GlobalUnitId;

use super::{ConnectionEdge, ConnectionLabel, UnitGraph};

/// The statistical thresholds a correlation table was generated with.
///
/// Recorded on every edge so a curated graph stays interpretable after the
/// table itself is gone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignificanceCriteria {
    pub test: String,
    pub bin_ms: f64,
    pub window_ms: f64,
    pub p_threshold: f64,
    pub n_consecutive_bins: u32,
    pub baseline_fraction: f64,
    pub smoothing_sd: f64,
}

/// One significant correlogram peak between two units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub source: GlobalUnitId,
    pub target: GlobalUnitId,
    pub window_start_ms: f64,
    pub window_end_ms: f64,
    /// Signed peak amplitude, in z-scores.
    pub amplitude: f64,
    pub lag_ms: f64,
    pub n_triplets: u64,
    pub n_bincrossing: u64,
    pub bin_heights: Vec<f64>,
    pub entropy: f64,
}

/// Ordered rows plus the criteria they were generated under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationTable {
    pub criteria: SignificanceCriteria,
    pub rows: Vec<CorrelationRow>,
}

impl CorrelationTable {
    pub fn from_json_reader(reader: impl std::io::Read) -> MergeResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Reset the edge set of `graph` and populate it from `table`.
///
/// Rows whose endpoints are not nodes of the graph (units that were not
/// labeled good at merge time) are skipped with a warning rather than
/// inventing nodes. Returns the number of edges created.
pub fn connect_graph(graph: &mut UnitGraph, table: &CorrelationTable) -> MergeResult<usize> {
    graph.clear_edges();

    let mut added = 0;
    let mut skipped = 0;
    for row in &table.rows {
        if graph.node(row.source).is_none() || graph.node(row.target).is_none() {
            skipped += 1;
            continue;
        }
        graph.add_edge(ConnectionEdge {
            source: row.source,
            target: row.target,
            amplitude: row.amplitude,
            lag_ms: row.lag_ms,
            width_ms: row.window_end_ms - row.window_start_ms,
            label: ConnectionLabel::Unset,
            n_triplets: row.n_triplets,
            n_bincrossing: row.n_bincrossing,
            bin_heights: row.bin_heights.clone(),
            entropy: row.entropy,
            criteria: table.criteria.clone(),
        });
        added += 1;
    }
    if skipped > 0 {
        tracing::warn!(
            "skipped {skipped} correlation rows referencing units not present in the graph"
        );
    }
    Ok(added)
}
