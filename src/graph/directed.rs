//! Directed graph derivation.
//!
//! Built from the undirected multigraph using time asymmetry alone: a
//! correlogram peak lagging more than the asymmetry threshold after the
//! source unit means source drives target, a peak leading by more than the
//! threshold means the reverse. Peaks within the threshold carry no
//! direction evidence; [`ZeroLagPolicy`] decides whether they become
//! bidirectional edge pairs or are dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MergeResult;
use crate::identity::GlobalUnitId;

use super::select::{CombineMode, EdgeType};
use super::{ConnectionEdge, UnitGraph, UnitNode};

/// What happens to edges whose |lag| does not exceed the asymmetry
/// threshold when deriving direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroLagPolicy {
    /// Materialise both directions — the pair is coupled but the driver is
    /// unknown.
    #[default]
    Bidirectional,
    /// Discard the edge from the directed view.
    Drop,
}

impl std::str::FromStr for ZeroLagPolicy {
    type Err = crate::error::MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bidirectional" => Ok(ZeroLagPolicy::Bidirectional),
            "drop" => Ok(ZeroLagPolicy::Drop),
            other => Err(crate::error::MergeError::EdgeType(format!(
                "unknown zero-lag policy '{other}' (expected 'bidirectional' or 'drop')"
            ))),
        }
    }
}

/// Derived directed multigraph. Disposable: recomputed from the undirected
/// graph, never independently mutated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "DirectedDoc", into = "DirectedDoc")]
pub struct DirectedGraph {
    nodes: BTreeMap<GlobalUnitId, UnitNode>,
    edges: BTreeMap<(GlobalUnitId, GlobalUnitId), Vec<ConnectionEdge>>,
}

/// Flat serialization form of [`DirectedGraph`]. Direction is distinct from
/// the source/target roles an edge records, so it is stored explicitly.
#[derive(Serialize, Deserialize)]
struct DirectedDoc {
    nodes: Vec<UnitNode>,
    edges: Vec<DirectedEdgeDoc>,
}

#[derive(Serialize, Deserialize)]
struct DirectedEdgeDoc {
    from: GlobalUnitId,
    to: GlobalUnitId,
    #[serde(flatten)]
    edge: ConnectionEdge,
}

impl From<DirectedGraph> for DirectedDoc {
    fn from(graph: DirectedGraph) -> Self {
        let edges = graph
            .edges()
            .map(|(from, to, _, edge)| DirectedEdgeDoc {
                from,
                to,
                edge: edge.clone(),
            })
            .collect();
        DirectedDoc {
            nodes: graph.nodes.into_values().collect(),
            edges,
        }
    }
}

impl From<DirectedDoc> for DirectedGraph {
    fn from(doc: DirectedDoc) -> Self {
        let mut graph = DirectedGraph {
            nodes: doc.nodes.into_iter().map(|n| (n.id, n)).collect(),
            edges: BTreeMap::new(),
        };
        for e in doc.edges {
            graph.add_edge(e.from, e.to, e.edge);
        }
        graph
    }
}

impl DirectedGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &UnitNode> {
        self.nodes.values()
    }

    /// Directed edges, keyed by (from, to), multiplicity within.
    pub fn edges(
        &self,
    ) -> impl Iterator<Item = (GlobalUnitId, GlobalUnitId, usize, &ConnectionEdge)> {
        self.edges.iter().flat_map(|(&(from, to), bundle)| {
            bundle
                .iter()
                .enumerate()
                .map(move |(key, edge)| (from, to, key, edge))
        })
    }

    /// Edges leaving `from` toward `to`.
    pub fn edges_between(&self, from: GlobalUnitId, to: GlobalUnitId) -> &[ConnectionEdge] {
        self.edges
            .get(&(from, to))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn add_edge(&mut self, from: GlobalUnitId, to: GlobalUnitId, edge: ConnectionEdge) {
        self.edges.entry((from, to)).or_default().push(edge);
    }
}

/// Derive a directed multigraph from `graph`.
///
/// With `only_main_edges`, multi-edge groups are first collapsed to their
/// strongest edge (the `'main'` filter), on a copy — `graph` itself is
/// never modified. All edge attributes carry over unchanged; only direction
/// and multiplicity keys are newly assigned.
pub fn build_directed(
    graph: &UnitGraph,
    asymmetry_threshold_ms: f64,
    only_main_edges: bool,
    zero_lag: ZeroLagPolicy,
) -> MergeResult<DirectedGraph> {
    let collapsed;
    let source = if only_main_edges {
        let mut copy = graph.clone();
        copy.keep_edge_types(&[EdgeType::Main], CombineMode::And, asymmetry_threshold_ms)?;
        collapsed = copy;
        &collapsed
    } else {
        graph
    };

    let mut digraph = DirectedGraph {
        nodes: source.nodes().map(|n| (n.id, n.clone())).collect(),
        edges: BTreeMap::new(),
    };

    for id in source.edge_ids() {
        let edge = source.edge(&id).expect("enumerated edge id");
        let lag = edge.lag_ms;
        if lag > asymmetry_threshold_ms {
            digraph.add_edge(edge.source, edge.target, edge.clone());
        } else if lag < -asymmetry_threshold_ms {
            digraph.add_edge(edge.target, edge.source, edge.clone());
        } else {
            match zero_lag {
                ZeroLagPolicy::Bidirectional => {
                    digraph.add_edge(edge.source, edge.target, edge.clone());
                    digraph.add_edge(edge.target, edge.source, edge.clone());
                }
                ZeroLagPolicy::Drop => {}
            }
        }
    }

    Ok(digraph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SignificanceCriteria;

    fn unit(local: u64) -> GlobalUnitId {
        GlobalUnitId::encode(local, 0).unwrap()
    }

    fn graph_with_lag(lag_ms: f64) -> UnitGraph {
        let mut g = UnitGraph::new();
        g.add_node(UnitNode::new(unit(5), (0.0, 0.0)));
        g.add_node(UnitNode::new(unit(7), (0.0, 80.0)));
        g.add_edge(ConnectionEdge {
            source: unit(5),
            target: unit(7),
            amplitude: 2.5,
            lag_ms,
            width_ms: 0.6,
            label: Default::default(),
            n_triplets: 0,
            n_bincrossing: 0,
            bin_heights: Vec::new(),
            entropy: 0.0,
            criteria: SignificanceCriteria::default(),
        });
        g
    }

    #[test]
    fn positive_lag_points_source_to_target() {
        let g = graph_with_lag(2.0);
        let d = build_directed(&g, 1.0, false, ZeroLagPolicy::Bidirectional).unwrap();
        assert_eq!(d.edge_count(), 1);
        assert_eq!(d.edges_between(unit(5), unit(7)).len(), 1);
        assert!(d.edges_between(unit(7), unit(5)).is_empty());
    }

    #[test]
    fn negative_lag_points_target_to_source() {
        let g = graph_with_lag(-2.0);
        let d = build_directed(&g, 1.0, false, ZeroLagPolicy::Bidirectional).unwrap();
        assert_eq!(d.edge_count(), 1);
        assert_eq!(d.edges_between(unit(7), unit(5)).len(), 1);
        assert!(d.edges_between(unit(5), unit(7)).is_empty());
    }

    #[test]
    fn near_zero_lag_follows_the_policy() {
        let g = graph_with_lag(0.5);
        let bidir = build_directed(&g, 1.0, false, ZeroLagPolicy::Bidirectional).unwrap();
        assert_eq!(bidir.edge_count(), 2);
        assert_eq!(bidir.edges_between(unit(5), unit(7)).len(), 1);
        assert_eq!(bidir.edges_between(unit(7), unit(5)).len(), 1);

        let dropped = build_directed(&g, 1.0, false, ZeroLagPolicy::Drop).unwrap();
        assert_eq!(dropped.edge_count(), 0);
        assert_eq!(dropped.node_count(), 2);
    }

    #[test]
    fn attributes_carry_over_unchanged() {
        let g = graph_with_lag(2.0);
        let d = build_directed(&g, 1.0, false, ZeroLagPolicy::Bidirectional).unwrap();
        let edge = &d.edges_between(unit(5), unit(7))[0];
        assert_eq!(edge.amplitude, 2.5);
        assert_eq!(edge.lag_ms, 2.0);
        assert_eq!(edge.width_ms, 0.6);
    }

    #[test]
    fn only_main_edges_collapses_before_deriving() {
        let mut g = graph_with_lag(2.0);
        g.add_edge(ConnectionEdge {
            source: unit(5),
            target: unit(7),
            amplitude: -6.0,
            lag_ms: -3.0,
            width_ms: 0.4,
            label: Default::default(),
            n_triplets: 0,
            n_bincrossing: 0,
            bin_heights: Vec::new(),
            entropy: 0.0,
            criteria: SignificanceCriteria::default(),
        });
        let d = build_directed(&g, 1.0, true, ZeroLagPolicy::Bidirectional).unwrap();
        // The -6.0 edge wins the main collapse; its negative lag directs 7 -> 5.
        assert_eq!(d.edge_count(), 1);
        assert_eq!(d.edges_between(unit(7), unit(5)).len(), 1);
        // The source graph is untouched.
        assert_eq!(g.edge_count(), 2);
    }
}
