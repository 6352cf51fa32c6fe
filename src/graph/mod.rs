//! Unit connection graph.
//!
//! Nodes are the merged dataset's good units; edges are putative
//! monosynaptic connections derived from significant cross-correlogram
//! peaks. A pair of units may carry several edges (one per significant
//! peak), so the authoritative structure is an undirected multigraph. The
//! directed graph is a derived, disposable view (see [`directed`]) and is
//! invalidated whenever the undirected edges change.
//!
//! Every operation of [`UnitGraphStore`] accepts an optional external
//! [`UnitGraph`]; when one is given, that graph is queried or mutated
//! instead of the owned one. The external graph is aliased, not copied —
//! callers wanting isolation clone first via [`UnitGraphStore::graph_copy`].

pub mod connect;
pub mod directed;
pub mod export;
pub mod select;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{MergeError, MergeResult};
use crate::identity::GlobalUnitId;

pub use connect::{CorrelationRow, CorrelationTable, SignificanceCriteria};
pub use directed::{DirectedGraph, ZeroLagPolicy};
pub use select::{CombineMode, EdgeType};

/// Verified connection-type tags, assigned during manual curation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionLabel {
    #[default]
    Unset,
    AsymInh,
    SymInh,
    AsymExc,
    SymExc,
    InhExc,
    PcCnc,
    CsSs,
    Oscill,
}

impl ConnectionLabel {
    pub const ALL: [ConnectionLabel; 8] = [
        ConnectionLabel::AsymInh,
        ConnectionLabel::SymInh,
        ConnectionLabel::AsymExc,
        ConnectionLabel::SymExc,
        ConnectionLabel::InhExc,
        ConnectionLabel::PcCnc,
        ConnectionLabel::CsSs,
        ConnectionLabel::Oscill,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionLabel::Unset => "unset",
            ConnectionLabel::AsymInh => "asym_inh",
            ConnectionLabel::SymInh => "sym_inh",
            ConnectionLabel::AsymExc => "asym_exc",
            ConnectionLabel::SymExc => "sym_exc",
            ConnectionLabel::InhExc => "inh_exc",
            ConnectionLabel::PcCnc => "pc_cnc",
            ConnectionLabel::CsSs => "cs_ss",
            ConnectionLabel::Oscill => "oscill",
        }
    }
}

impl std::str::FromStr for ConnectionLabel {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(ConnectionLabel::Unset),
            "asym_inh" => Ok(ConnectionLabel::AsymInh),
            "sym_inh" => Ok(ConnectionLabel::SymInh),
            "asym_exc" => Ok(ConnectionLabel::AsymExc),
            "sym_exc" => Ok(ConnectionLabel::SymExc),
            "inh_exc" => Ok(ConnectionLabel::InhExc),
            "pc_cnc" => Ok(ConnectionLabel::PcCnc),
            "cs_ss" => Ok(ConnectionLabel::CsSs),
            "oscill" => Ok(ConnectionLabel::Oscill),
            other => Err(MergeError::UnknownAttribute {
                kind: "connection label",
                name: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ConnectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One good unit of the merged dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitNode {
    pub id: GlobalUnitId,
    pub dataset_index: usize,
    /// Display label, `<dataset>_<local cluster id>` by default.
    pub unit_label: String,
    /// Peak waveform position in micrometers; x carries the per-dataset
    /// 100 um offset so probes render side by side.
    pub position_um: (f64, f64),
    pub putative_cell_type: String,
    pub groundtruth_cell_type: String,
    pub classified_cell_type: String,
}

impl UnitNode {
    pub fn new(id: GlobalUnitId, position_um: (f64, f64)) -> Self {
        Self {
            id,
            dataset_index: id.dataset_index(),
            unit_label: id.label(),
            position_um,
            putative_cell_type: String::new(),
            groundtruth_cell_type: String::new(),
            classified_cell_type: String::new(),
        }
    }
}

/// One putative connection between two units.
///
/// `source`/`target` record which unit played which role in the
/// correlogram; they do not imply direction (that is derived later from the
/// lag sign, see [`directed`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEdge {
    pub source: GlobalUnitId,
    pub target: GlobalUnitId,
    /// Peak amplitude as a signed z-score.
    pub amplitude: f64,
    /// Signed peak lag relative to the source/target roles, in ms.
    pub lag_ms: f64,
    pub width_ms: f64,
    pub label: ConnectionLabel,
    pub n_triplets: u64,
    pub n_bincrossing: u64,
    pub bin_heights: Vec<f64>,
    pub entropy: f64,
    /// The statistical thresholds that produced this edge.
    pub criteria: SignificanceCriteria,
}

impl ConnectionEdge {
    /// Sign of the correlogram peak, derived from the amplitude.
    pub fn sign(&self) -> i8 {
        if self.amplitude > 0.0 {
            1
        } else if self.amplitude < 0.0 {
            -1
        } else {
            0
        }
    }
}

/// Resolved reference to one multi-edge: normalized endpoint pair plus the
/// multiplicity key within that pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub a: GlobalUnitId,
    pub b: GlobalUnitId,
    pub key: usize,
}

/// Node attribute vocabulary exposed through the generic accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttr {
    Unit,
    GroundtruthCellType,
    ClassifiedCellType,
}

impl std::str::FromStr for NodeAttr {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(NodeAttr::Unit),
            "groundtruth_cell_type" => Ok(NodeAttr::GroundtruthCellType),
            "classified_cell_type" => Ok(NodeAttr::ClassifiedCellType),
            other => Err(MergeError::UnknownAttribute {
                kind: "node",
                name: other.to_string(),
            }),
        }
    }
}

/// Edge attribute vocabulary exposed through the generic accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAttr {
    Source,
    Target,
    Amplitude,
    LagMs,
    Sign,
    WidthMs,
    Label,
    NTriplets,
    NBincrossing,
    Entropy,
    Criteria,
}

impl std::str::FromStr for EdgeAttr {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(EdgeAttr::Source),
            "target" => Ok(EdgeAttr::Target),
            "amplitude" => Ok(EdgeAttr::Amplitude),
            "lag_ms" => Ok(EdgeAttr::LagMs),
            "sign" => Ok(EdgeAttr::Sign),
            "width_ms" => Ok(EdgeAttr::WidthMs),
            "label" => Ok(EdgeAttr::Label),
            "n_triplets" => Ok(EdgeAttr::NTriplets),
            "n_bincrossing" => Ok(EdgeAttr::NBincrossing),
            "entropy" => Ok(EdgeAttr::Entropy),
            "criteria" => Ok(EdgeAttr::Criteria),
            other => Err(MergeError::UnknownAttribute {
                kind: "edge",
                name: other.to_string(),
            }),
        }
    }
}

/// Dynamically-typed attribute value, for the generic accessors and
/// [`UnitGraph::select_edges`].
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Unit(GlobalUnitId),
    Float(f64),
    Int(i64),
    Label(ConnectionLabel),
    Criteria(SignificanceCriteria),
    Text(String),
}

impl AttrValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Comparison operators for [`UnitGraph::select_edges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::str::FromStr for CmpOp {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(CmpOp::Eq),
            "!=" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            "<=" => Ok(CmpOp::Le),
            ">" => Ok(CmpOp::Gt),
            ">=" => Ok(CmpOp::Ge),
            other => Err(MergeError::EdgeType(format!(
                "unknown comparison operator '{other}'"
            ))),
        }
    }
}

impl CmpOp {
    /// Compare two attribute values; `None` when the value kinds admit no
    /// such comparison (those edges are excluded from selections).
    pub fn evaluate(self, lhs: &AttrValue, rhs: &AttrValue) -> Option<bool> {
        if let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) {
            return Some(match self {
                CmpOp::Eq => l == r,
                CmpOp::Ne => l != r,
                CmpOp::Lt => l < r,
                CmpOp::Le => l <= r,
                CmpOp::Gt => l > r,
                CmpOp::Ge => l >= r,
            });
        }
        match self {
            CmpOp::Eq => Some(lhs == rhs),
            CmpOp::Ne => Some(lhs != rhs),
            _ => None,
        }
    }
}

fn pair_key(a: GlobalUnitId, b: GlobalUnitId) -> (GlobalUnitId, GlobalUnitId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Undirected multigraph of units and putative connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphDoc", into = "GraphDoc")]
pub struct UnitGraph {
    nodes: BTreeMap<GlobalUnitId, UnitNode>,
    edges: BTreeMap<(GlobalUnitId, GlobalUnitId), Vec<ConnectionEdge>>,
}

/// Flat serialization form of [`UnitGraph`] (edge endpoints are already
/// carried by each edge's source/target roles).
#[derive(Serialize, Deserialize)]
struct GraphDoc {
    nodes: Vec<UnitNode>,
    edges: Vec<ConnectionEdge>,
}

impl From<UnitGraph> for GraphDoc {
    fn from(graph: UnitGraph) -> Self {
        let edges = graph
            .edge_ids()
            .into_iter()
            .map(|id| graph.edge(&id).expect("enumerated edge id").clone())
            .collect();
        GraphDoc {
            nodes: graph.nodes.into_values().collect(),
            edges,
        }
    }
}

impl From<GraphDoc> for UnitGraph {
    fn from(doc: GraphDoc) -> Self {
        let mut graph = UnitGraph::new();
        for node in doc.nodes {
            graph.add_node(node);
        }
        for edge in doc.edges {
            graph.add_edge(edge);
        }
        graph
    }
}

impl UnitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- nodes -----------------------------------------------------------

    /// Insert a node; idempotent on identical id, last write wins for
    /// attributes.
    pub fn add_node(&mut self, node: UnitNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn node(&self, id: GlobalUnitId) -> Option<&UnitNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &UnitNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<GlobalUnitId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_attribute(&self, id: GlobalUnitId, attr: NodeAttr) -> MergeResult<String> {
        let node = self
            .nodes
            .get(&id)
            .ok_or(MergeError::NodeNotFound { id })?;
        Ok(match attr {
            NodeAttr::Unit => node.unit_label.clone(),
            NodeAttr::GroundtruthCellType => node.groundtruth_cell_type.clone(),
            NodeAttr::ClassifiedCellType => node.classified_cell_type.clone(),
        })
    }

    pub fn set_node_attribute(
        &mut self,
        id: GlobalUnitId,
        attr: NodeAttr,
        value: &str,
    ) -> MergeResult<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(MergeError::NodeNotFound { id })?;
        match attr {
            NodeAttr::Unit => node.unit_label = value.to_string(),
            NodeAttr::GroundtruthCellType => node.groundtruth_cell_type = value.to_string(),
            NodeAttr::ClassifiedCellType => node.classified_cell_type = value.to_string(),
        }
        Ok(())
    }

    /// Remove every node not in `allowed` (and its incident edges).
    ///
    /// An empty list is an intentional no-op: it guards against an empty
    /// upstream filter result silently wiping the graph.
    pub fn keep_nodes(&mut self, allowed: &[GlobalUnitId]) {
        if allowed.is_empty() {
            tracing::warn!("keep_nodes called with an empty list; leaving the graph unchanged");
            return;
        }
        for id in allowed {
            if !self.nodes.contains_key(id) {
                tracing::warn!("keep_nodes: unit {id} is not in the graph");
            }
        }
        self.nodes.retain(|id, _| allowed.contains(id));
        self.edges
            .retain(|(a, b), _| allowed.contains(a) && allowed.contains(b));
    }

    // ---- edges -----------------------------------------------------------

    /// Insert a new multi-edge; never overwrites an existing edge between
    /// the same pair. Returns the multiplicity key assigned.
    pub fn add_edge(&mut self, edge: ConnectionEdge) -> EdgeId {
        let (a, b) = pair_key(edge.source, edge.target);
        let bundle = self.edges.entry((a, b)).or_default();
        bundle.push(edge);
        EdgeId {
            a,
            b,
            key: bundle.len() - 1,
        }
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&ConnectionEdge> {
        self.edges
            .get(&(id.a, id.b))
            .and_then(|bundle| bundle.get(id.key))
    }

    fn edge_mut(&mut self, id: &EdgeId) -> Option<&mut ConnectionEdge> {
        self.edges
            .get_mut(&(id.a, id.b))
            .and_then(|bundle| bundle.get_mut(id.key))
    }

    /// All edge ids, in deterministic (pair, key) order.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        self.edges
            .iter()
            .flat_map(|(&(a, b), bundle)| {
                (0..bundle.len()).map(move |key| EdgeId { a, b, key })
            })
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Resolve an edge reference. Endpoints may be given in either order
    /// (undirected semantics). A 2-tuple reference (`key: None`) resolves to
    /// every multi-edge of the pair; a 3-tuple reference to exactly one.
    pub fn resolve(
        &self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        key: Option<usize>,
    ) -> MergeResult<Vec<EdgeId>> {
        let (a, b) = pair_key(u1, u2);
        let not_found = || MergeError::EdgeNotFound { a: u1, b: u2, key };
        let bundle = self.edges.get(&(a, b)).ok_or_else(not_found)?;
        match key {
            Some(k) if k < bundle.len() => Ok(vec![EdgeId { a, b, key: k }]),
            Some(_) => Err(not_found()),
            None => Ok((0..bundle.len()).map(|k| EdgeId { a, b, key: k }).collect()),
        }
    }

    pub fn edge_attribute_value(&self, id: &EdgeId, attr: EdgeAttr) -> Option<AttrValue> {
        let edge = self.edge(id)?;
        Some(match attr {
            EdgeAttr::Source => AttrValue::Unit(edge.source),
            EdgeAttr::Target => AttrValue::Unit(edge.target),
            EdgeAttr::Amplitude => AttrValue::Float(edge.amplitude),
            EdgeAttr::LagMs => AttrValue::Float(edge.lag_ms),
            EdgeAttr::Sign => AttrValue::Int(edge.sign() as i64),
            EdgeAttr::WidthMs => AttrValue::Float(edge.width_ms),
            EdgeAttr::Label => AttrValue::Label(edge.label),
            EdgeAttr::NTriplets => AttrValue::Int(edge.n_triplets as i64),
            EdgeAttr::NBincrossing => AttrValue::Int(edge.n_bincrossing as i64),
            EdgeAttr::Entropy => AttrValue::Float(edge.entropy),
            EdgeAttr::Criteria => AttrValue::Criteria(edge.criteria.clone()),
        })
    }

    /// Attribute of one exact edge (3-tuple reference).
    pub fn edge_attribute(
        &self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        key: usize,
        attr: EdgeAttr,
    ) -> MergeResult<AttrValue> {
        let ids = self.resolve(u1, u2, Some(key))?;
        Ok(self
            .edge_attribute_value(&ids[0], attr)
            .expect("resolved edge id"))
    }

    /// Attribute across every multi-edge of a pair (2-tuple reference),
    /// keyed by multiplicity index.
    pub fn edge_attributes(
        &self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        attr: EdgeAttr,
    ) -> MergeResult<BTreeMap<usize, AttrValue>> {
        let ids = self.resolve(u1, u2, None)?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let value = self
                    .edge_attribute_value(&id, attr)
                    .expect("resolved edge id");
                (id.key, value)
            })
            .collect())
    }

    /// Set one edge attribute. With `key: None` the value is applied to
    /// every multi-edge of the pair.
    ///
    /// Labels only transition forward: a verified label cannot be reset to
    /// `Unset` (remove the edge instead).
    pub fn set_edge_attribute(
        &mut self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        key: Option<usize>,
        attr: EdgeAttr,
        value: AttrValue,
    ) -> MergeResult<()> {
        let ids = self.resolve(u1, u2, key)?;
        for id in &ids {
            let edge = self.edge(id).expect("resolved edge id");
            match (attr, &value) {
                (EdgeAttr::Label, AttrValue::Label(new)) => {
                    if edge.label != ConnectionLabel::Unset && *new == ConnectionLabel::Unset {
                        return Err(MergeError::InvalidTransition(format!(
                            "edge {}-{} key {} is already labeled '{}'; labels cannot be \
                             cleared, remove the edge instead",
                            id.a, id.b, id.key, edge.label
                        )));
                    }
                }
                (EdgeAttr::Amplitude, AttrValue::Float(_))
                | (EdgeAttr::LagMs, AttrValue::Float(_))
                | (EdgeAttr::WidthMs, AttrValue::Float(_))
                | (EdgeAttr::Entropy, AttrValue::Float(_))
                | (EdgeAttr::NTriplets, AttrValue::Int(_))
                | (EdgeAttr::NBincrossing, AttrValue::Int(_))
                | (EdgeAttr::Criteria, AttrValue::Criteria(_)) => {}
                (EdgeAttr::Source | EdgeAttr::Target | EdgeAttr::Sign, _) => {
                    return Err(MergeError::UnknownAttribute {
                        kind: "writable edge",
                        name: format!("{attr:?}"),
                    });
                }
                _ => {
                    return Err(MergeError::UnknownAttribute {
                        kind: "edge value for",
                        name: format!("{attr:?}"),
                    });
                }
            }
        }
        for id in &ids {
            let edge = self.edge_mut(id).expect("resolved edge id");
            match (attr, &value) {
                (EdgeAttr::Label, AttrValue::Label(v)) => edge.label = *v,
                (EdgeAttr::Amplitude, AttrValue::Float(v)) => edge.amplitude = *v,
                (EdgeAttr::LagMs, AttrValue::Float(v)) => edge.lag_ms = *v,
                (EdgeAttr::WidthMs, AttrValue::Float(v)) => edge.width_ms = *v,
                (EdgeAttr::Entropy, AttrValue::Float(v)) => edge.entropy = *v,
                (EdgeAttr::NTriplets, AttrValue::Int(v)) => edge.n_triplets = *v as u64,
                (EdgeAttr::NBincrossing, AttrValue::Int(v)) => edge.n_bincrossing = *v as u64,
                (EdgeAttr::Criteria, AttrValue::Criteria(v)) => edge.criteria = v.clone(),
                _ => unreachable!("validated above"),
            }
        }
        Ok(())
    }

    /// Edges whose named attribute satisfies `op` against `value`.
    pub fn select_edges(&self, attr: EdgeAttr, op: CmpOp, value: &AttrValue) -> Vec<EdgeId> {
        self.edge_ids()
            .into_iter()
            .filter(|id| {
                self.edge_attribute_value(id, attr)
                    .and_then(|lhs| op.evaluate(&lhs, value))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Keep exactly the listed edges. 2-tuple entries (`key: None`) keep
    /// every multi-edge of the pair, 3-tuple entries exactly one.
    ///
    /// An empty list, or a list in which nothing resolves, leaves the graph
    /// unchanged (guard against an accidental full wipe).
    pub fn keep_edge_list(&mut self, keep: &[(GlobalUnitId, GlobalUnitId, Option<usize>)]) {
        if keep.is_empty() {
            tracing::warn!("keep_edges called with an empty list; leaving the graph unchanged");
            return;
        }
        let mut resolved: Vec<EdgeId> = Vec::new();
        for &(u1, u2, key) in keep {
            match self.resolve(u1, u2, key) {
                Ok(mut ids) => resolved.append(&mut ids),
                Err(e) => tracing::warn!("keep_edges: skipping unresolvable entry: {e}"),
            }
        }
        if resolved.is_empty() {
            tracing::warn!(
                "keep_edges: no listed edge exists in the graph; leaving it unchanged"
            );
            return;
        }
        self.retain_edges(|id| resolved.contains(id));
    }

    /// Keep the edges passing the type-filter algebra (see [`select`]).
    ///
    /// A filter that selects nothing leaves the graph unchanged rather than
    /// clearing it.
    pub fn keep_edge_types(
        &mut self,
        types: &[EdgeType],
        combine: CombineMode,
        asymmetry_threshold_ms: f64,
    ) -> MergeResult<()> {
        let keep = select::type_mask(self, types, combine, asymmetry_threshold_ms)?;
        if keep.is_empty() && self.edge_count() > 0 {
            tracing::warn!(
                "edge type filter selected no edges; leaving the graph unchanged"
            );
            return Ok(());
        }
        self.retain_edges(|id| keep.contains(id));
        Ok(())
    }

    /// Retain only the edges for which `pred` holds; multiplicity keys are
    /// re-assigned densely per pair.
    pub fn retain_edges(&mut self, pred: impl Fn(&EdgeId) -> bool) {
        let mut new_edges: BTreeMap<(GlobalUnitId, GlobalUnitId), Vec<ConnectionEdge>> =
            BTreeMap::new();
        for (&(a, b), bundle) in &self.edges {
            for (key, edge) in bundle.iter().enumerate() {
                if pred(&EdgeId { a, b, key }) {
                    new_edges.entry((a, b)).or_default().push(edge.clone());
                }
            }
        }
        self.edges = new_edges;
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> MergeResult<()> {
        let bundle = self
            .edges
            .get_mut(&(id.a, id.b))
            .ok_or(MergeError::EdgeNotFound {
                a: id.a,
                b: id.b,
                key: Some(id.key),
            })?;
        if id.key >= bundle.len() {
            return Err(MergeError::EdgeNotFound {
                a: id.a,
                b: id.b,
                key: Some(id.key),
            });
        }
        bundle.remove(id.key);
        if bundle.is_empty() {
            self.edges.remove(&(id.a, id.b));
        }
        Ok(())
    }

    pub fn clear_edges(&mut self) {
        self.edges.clear();
    }

    /// Neighbors of a unit: edge count and peak position per neighbor.
    pub fn node_edges(
        &self,
        id: GlobalUnitId,
    ) -> MergeResult<BTreeMap<GlobalUnitId, (usize, Option<(f64, f64)>)>> {
        if !self.nodes.contains_key(&id) {
            return Err(MergeError::NodeNotFound { id });
        }
        let mut neighbors = BTreeMap::new();
        for (&(a, b), bundle) in &self.edges {
            let neighbor = if a == id {
                b
            } else if b == id {
                a
            } else {
                continue;
            };
            let position = self.nodes.get(&neighbor).map(|n| n.position_um);
            neighbors.insert(neighbor, (bundle.len(), position));
        }
        Ok(neighbors)
    }
}

/// Owner of the authoritative undirected graph and its derived directed
/// view.
///
/// Wrapper operations take `src_graph: Option<&mut UnitGraph>`; with `Some`,
/// the external graph is operated on instead of the owned one (aliased, not
/// copied). Mutations of the owned graph invalidate the cached directed
/// view.
#[derive(Debug, Default)]
pub struct UnitGraphStore {
    undirected: UnitGraph,
    directed: Option<DirectedGraph>,
}

impl UnitGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(undirected: UnitGraph) -> Self {
        Self {
            undirected,
            directed: None,
        }
    }

    pub fn undirected(&self) -> &UnitGraph {
        &self.undirected
    }

    /// Mutable access to the owned graph; drops the derived directed view.
    pub fn undirected_mut(&mut self) -> &mut UnitGraph {
        self.directed = None;
        &mut self.undirected
    }

    /// Explicit deep copy, for callers wanting isolation from later store
    /// mutations.
    pub fn graph_copy(&self) -> UnitGraph {
        self.undirected.clone()
    }

    /// Recompute and cache the directed view (see
    /// [`directed::build_directed`]).
    pub fn make_directed(
        &mut self,
        asymmetry_threshold_ms: f64,
        only_main_edges: bool,
        zero_lag: ZeroLagPolicy,
    ) -> MergeResult<&DirectedGraph> {
        let digraph = directed::build_directed(
            &self.undirected,
            asymmetry_threshold_ms,
            only_main_edges,
            zero_lag,
        )?;
        self.directed = Some(digraph);
        Ok(self.directed.as_ref().expect("just cached"))
    }

    /// The cached directed view, if the undirected graph has not changed
    /// since [`Self::make_directed`].
    pub fn directed(&self) -> Option<&DirectedGraph> {
        self.directed.as_ref()
    }

    fn target<'a>(&'a mut self, src_graph: Option<&'a mut UnitGraph>) -> &'a mut UnitGraph {
        match src_graph {
            Some(g) => g,
            None => {
                self.directed = None;
                &mut self.undirected
            }
        }
    }

    fn target_ref<'a>(&'a self, src_graph: Option<&'a UnitGraph>) -> &'a UnitGraph {
        src_graph.unwrap_or(&self.undirected)
    }

    // ---- graph operations, with optional external-graph override ---------

    pub fn add_unit_node(&mut self, node: UnitNode, src_graph: Option<&mut UnitGraph>) {
        self.target(src_graph).add_node(node);
    }

    pub fn get_node_attribute(
        &self,
        id: GlobalUnitId,
        attr: NodeAttr,
        src_graph: Option<&UnitGraph>,
    ) -> MergeResult<String> {
        self.target_ref(src_graph).node_attribute(id, attr)
    }

    pub fn set_node_attribute(
        &mut self,
        id: GlobalUnitId,
        attr: NodeAttr,
        value: &str,
        src_graph: Option<&mut UnitGraph>,
    ) -> MergeResult<()> {
        self.target(src_graph).set_node_attribute(id, attr, value)
    }

    pub fn add_connection_edge(
        &mut self,
        edge: ConnectionEdge,
        src_graph: Option<&mut UnitGraph>,
    ) -> EdgeId {
        self.target(src_graph).add_edge(edge)
    }

    pub fn get_edge_attribute(
        &self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        key: usize,
        attr: EdgeAttr,
        src_graph: Option<&UnitGraph>,
    ) -> MergeResult<AttrValue> {
        self.target_ref(src_graph).edge_attribute(u1, u2, key, attr)
    }

    pub fn get_edge_attributes(
        &self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        attr: EdgeAttr,
        src_graph: Option<&UnitGraph>,
    ) -> MergeResult<BTreeMap<usize, AttrValue>> {
        self.target_ref(src_graph).edge_attributes(u1, u2, attr)
    }

    pub fn set_edge_attribute(
        &mut self,
        u1: GlobalUnitId,
        u2: GlobalUnitId,
        key: Option<usize>,
        attr: EdgeAttr,
        value: AttrValue,
        src_graph: Option<&mut UnitGraph>,
    ) -> MergeResult<()> {
        self.target(src_graph)
            .set_edge_attribute(u1, u2, key, attr, value)
    }

    pub fn select_edges(
        &self,
        attr: EdgeAttr,
        op: CmpOp,
        value: &AttrValue,
        src_graph: Option<&UnitGraph>,
    ) -> Vec<EdgeId> {
        self.target_ref(src_graph).select_edges(attr, op, value)
    }

    pub fn keep_nodes(&mut self, allowed: &[GlobalUnitId], src_graph: Option<&mut UnitGraph>) {
        self.target(src_graph).keep_nodes(allowed);
    }

    pub fn keep_edges(
        &mut self,
        keep: &[(GlobalUnitId, GlobalUnitId, Option<usize>)],
        src_graph: Option<&mut UnitGraph>,
    ) {
        self.target(src_graph).keep_edge_list(keep);
    }

    pub fn keep_edges_of_types(
        &mut self,
        types: &[EdgeType],
        combine: CombineMode,
        asymmetry_threshold_ms: f64,
        src_graph: Option<&mut UnitGraph>,
    ) -> MergeResult<()> {
        self.target(src_graph)
            .keep_edge_types(types, combine, asymmetry_threshold_ms)
    }

    pub fn get_node_edges(
        &self,
        id: GlobalUnitId,
        src_graph: Option<&UnitGraph>,
    ) -> MergeResult<BTreeMap<GlobalUnitId, (usize, Option<(f64, f64)>)>> {
        self.target_ref(src_graph).node_edges(id)
    }
}
