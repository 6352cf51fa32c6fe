//! Edge-type classification algebra.
//!
//! Edges are classified from their correlogram peak alone:
//!
//! - `'+'` — positive peak with |lag| beyond the asymmetry threshold
//!   (putative excitatory connection),
//! - `'-'` — negative peak with |lag| beyond the threshold (putative
//!   inhibitory connection),
//! - `'ci'` — positive peak within the threshold (common input: both units
//!   driven by a shared source rather than one driving the other),
//! - `'main'` — per unordered node pair, the single edge with maximal
//!   absolute amplitude; pairs with one edge always pass.
//!
//! Several type filters combine under `'and'` (intersection) or `'or'`
//! (union). The identity element of each operator is explicit: an absent
//! filter type contributes the full edge set under `'and'` and the empty
//! set under `'or'`.

use std::collections::BTreeSet;

use crate::error::{MergeError, MergeResult};

use super::{EdgeId, UnitGraph};

/// Edge-type filters usable with [`UnitGraph::keep_edge_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// `'+'`: positive amplitude, |lag| > threshold.
    Excitatory,
    /// `'-'`: negative amplitude, |lag| > threshold.
    Inhibitory,
    /// `'ci'`: positive amplitude, |lag| <= threshold.
    CommonInput,
    /// `'main'`: strongest edge of each multi-edge group.
    Main,
}

impl std::str::FromStr for EdgeType {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(EdgeType::Excitatory),
            "-" => Ok(EdgeType::Inhibitory),
            "ci" => Ok(EdgeType::CommonInput),
            "main" => Ok(EdgeType::Main),
            other => Err(MergeError::EdgeType(other.to_string())),
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EdgeType::Excitatory => "+",
            EdgeType::Inhibitory => "-",
            EdgeType::CommonInput => "ci",
            EdgeType::Main => "main",
        })
    }
}

/// How several type-filter masks combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombineMode {
    #[default]
    And,
    Or,
}

impl std::str::FromStr for CombineMode {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(CombineMode::And),
            "or" => Ok(CombineMode::Or),
            other => Err(MergeError::EdgeType(format!(
                "unknown combine operator '{other}' (expected 'and' or 'or')"
            ))),
        }
    }
}

/// Evaluate the type filters over every edge of `graph` and return the set
/// of edges to keep.
pub fn type_mask(
    graph: &UnitGraph,
    types: &[EdgeType],
    combine: CombineMode,
    asymmetry_threshold_ms: f64,
) -> MergeResult<BTreeSet<EdgeId>> {
    if types.is_empty() {
        return Err(MergeError::EdgeType(
            "no edge type filter given".to_string(),
        ));
    }

    let all_edges = graph.edge_ids();
    if all_edges.is_empty() {
        tracing::warn!("edge type filter applied to a graph without edges");
        return Ok(BTreeSet::new());
    }

    let masks: Vec<BTreeSet<EdgeId>> = types
        .iter()
        .map(|&t| single_mask(graph, t, asymmetry_threshold_ms, &all_edges))
        .collect();

    // Fold from the operator's explicit identity element: the full edge set
    // for intersection, the empty set for union. A filter type that was not
    // requested therefore contributes nothing either way.
    let mask = match combine {
        CombineMode::And => {
            let identity: BTreeSet<EdgeId> = all_edges.iter().copied().collect();
            masks
                .into_iter()
                .fold(identity, |acc, m| acc.intersection(&m).copied().collect())
        }
        CombineMode::Or => {
            let identity = BTreeSet::new();
            masks
                .into_iter()
                .fold(identity, |acc, m| acc.union(&m).copied().collect())
        }
    };

    Ok(mask)
}

fn single_mask(
    graph: &UnitGraph,
    edge_type: EdgeType,
    asymmetry_threshold_ms: f64,
    all_edges: &[EdgeId],
) -> BTreeSet<EdgeId> {
    match edge_type {
        EdgeType::Excitatory => all_edges
            .iter()
            .filter(|id| {
                let e = graph.edge(id).expect("enumerated edge id");
                e.amplitude > 0.0 && e.lag_ms.abs() > asymmetry_threshold_ms
            })
            .copied()
            .collect(),
        EdgeType::Inhibitory => all_edges
            .iter()
            .filter(|id| {
                let e = graph.edge(id).expect("enumerated edge id");
                e.amplitude < 0.0 && e.lag_ms.abs() > asymmetry_threshold_ms
            })
            .copied()
            .collect(),
        EdgeType::CommonInput => all_edges
            .iter()
            .filter(|id| {
                let e = graph.edge(id).expect("enumerated edge id");
                e.amplitude > 0.0 && e.lag_ms.abs() <= asymmetry_threshold_ms
            })
            .copied()
            .collect(),
        EdgeType::Main => main_mask(graph, all_edges),
    }
}

/// For every unordered node pair keep the edge with maximal |amplitude|.
///
/// Exact amplitude ties within a pair are broken by random choice among the
/// tied edges (they describe the same correlogram, so any of them is an
/// equally valid representative). Pairs with a single edge always pass.
fn main_mask(graph: &UnitGraph, all_edges: &[EdgeId]) -> BTreeSet<EdgeId> {
    let mut mask = BTreeSet::new();
    let mut i = 0;
    while i < all_edges.len() {
        // Edge ids are sorted by (pair, key): one multi-edge group is a
        // contiguous run.
        let pair = (all_edges[i].a, all_edges[i].b);
        let mut group_end = i;
        while group_end < all_edges.len()
            && (all_edges[group_end].a, all_edges[group_end].b) == pair
        {
            group_end += 1;
        }
        let group = &all_edges[i..group_end];

        if group.len() == 1 {
            mask.insert(group[0]);
        } else {
            let amplitude =
                |id: &EdgeId| graph.edge(id).expect("enumerated edge id").amplitude.abs();
            let max_amp = group
                .iter()
                .map(&amplitude)
                .fold(f64::NEG_INFINITY, f64::max);
            let tied: Vec<EdgeId> = group
                .iter()
                .filter(|id| amplitude(id) == max_amp)
                .copied()
                .collect();
            let winner = if tied.len() == 1 {
                tied[0]
            } else {
                tied[fastrand::usize(..tied.len())]
            };
            mask.insert(winner);
        }

        i = group_end;
    }
    mask
}
