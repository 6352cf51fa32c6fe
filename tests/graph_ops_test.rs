use anyhow::Result;

use probe_merge_toolbox::error::MergeError;
use probe_merge_toolbox::graph::{
    AttrValue, CmpOp, CombineMode, ConnectionEdge, ConnectionLabel, EdgeAttr, EdgeType,
    NodeAttr, SignificanceCriteria, UnitGraphStore, UnitNode, ZeroLagPolicy,
};
use probe_merge_toolbox::identity::GlobalUnitId;

fn unit(local: u64) -> GlobalUnitId {
    GlobalUnitId::encode(local, 0).unwrap()
}

fn edge(source: u64, target: u64, amplitude: f64, lag_ms: f64) -> ConnectionEdge {
    ConnectionEdge {
        source: unit(source),
        target: unit(target),
        amplitude,
        lag_ms,
        width_ms: 0.8,
        label: ConnectionLabel::Unset,
        n_triplets: 10,
        n_bincrossing: 3,
        bin_heights: vec![0.2, 1.0, 0.4],
        entropy: 0.5,
        criteria: SignificanceCriteria::default(),
    }
}

/// Three units; 5-7 carries a three-peak multi-edge group, 5-9 a single
/// edge.
fn curated_store() -> UnitGraphStore {
    let mut store = UnitGraphStore::new();
    for (local, y) in [(5, 1200.0), (7, 800.0), (9, 400.0)] {
        store.add_unit_node(UnitNode::new(unit(local), (16.0, y)), None);
    }
    store.add_connection_edge(edge(5, 7, 3.1, 0.3), None);
    store.add_connection_edge(edge(5, 7, -2.0, 2.0), None);
    store.add_connection_edge(edge(5, 7, 4.4, -1.1), None);
    store.add_connection_edge(edge(9, 5, -1.2, 1.8), None);
    store
}

#[test]
fn keep_nodes_with_empty_list_is_a_noop() {
    let mut store = curated_store();
    let nodes_before = store.undirected().node_count();
    let edges_before = store.undirected().edge_count();

    store.keep_nodes(&[], None);

    assert_eq!(store.undirected().node_count(), nodes_before);
    assert_eq!(store.undirected().edge_count(), edges_before);
}

#[test]
fn keep_nodes_drops_incident_edges() {
    let mut store = curated_store();
    store.keep_nodes(&[unit(5), unit(7)], None);
    assert_eq!(store.undirected().node_count(), 2);
    // The 9-5 edge went with node 9.
    assert_eq!(store.undirected().edge_count(), 3);
}

#[test]
fn edge_accessors_tolerate_swapped_endpoints() -> Result<()> {
    let store = curated_store();

    // 2-tuple reference: all multi-edges, keyed by multiplicity index.
    let amps = store.get_edge_attributes(unit(7), unit(5), EdgeAttr::Amplitude, None)?;
    assert_eq!(amps.len(), 3);
    assert_eq!(amps.get(&0), Some(&AttrValue::Float(3.1)));
    assert_eq!(amps.get(&2), Some(&AttrValue::Float(4.4)));

    // 3-tuple reference: exact edge, either endpoint order.
    let a1 = store.get_edge_attribute(unit(5), unit(7), 1, EdgeAttr::Amplitude, None)?;
    let a2 = store.get_edge_attribute(unit(7), unit(5), 1, EdgeAttr::Amplitude, None)?;
    assert_eq!(a1, a2);

    // Derived sign attribute.
    let sign = store.get_edge_attribute(unit(5), unit(7), 1, EdgeAttr::Sign, None)?;
    assert_eq!(sign, AttrValue::Int(-1));
    Ok(())
}

#[test]
fn missing_edges_and_attributes_are_local_errors() {
    let mut store = curated_store();

    match store.get_edge_attribute(unit(5), unit(9), 7, EdgeAttr::Amplitude, None) {
        Err(MergeError::EdgeNotFound { .. }) => {}
        other => panic!("expected EdgeNotFound, got {other:?}"),
    }
    match store.get_edge_attributes(unit(7), unit(9), EdgeAttr::Amplitude, None) {
        Err(MergeError::EdgeNotFound { .. }) => {}
        other => panic!("expected EdgeNotFound, got {other:?}"),
    }
    assert!(matches!(
        "peak_channel".parse::<EdgeAttr>(),
        Err(MergeError::UnknownAttribute { .. })
    ));
    assert!(matches!(
        "cell_type".parse::<NodeAttr>(),
        Err(MergeError::UnknownAttribute { .. })
    ));

    // Failed operations leave the graph untouched.
    assert_eq!(store.undirected().edge_count(), 4);
    assert_eq!(store.undirected_mut().edge_count(), 4);
}

#[test]
fn select_edges_compares_one_attribute() {
    let store = curated_store();

    let strong = store.select_edges(
        EdgeAttr::Amplitude,
        CmpOp::Gt,
        &AttrValue::Float(3.0),
        None,
    );
    assert_eq!(strong.len(), 2);

    let negative = store.select_edges(EdgeAttr::Sign, CmpOp::Eq, &AttrValue::Int(-1), None);
    assert_eq!(negative.len(), 2);

    let unlabeled = store.select_edges(
        EdgeAttr::Label,
        CmpOp::Eq,
        &AttrValue::Label(ConnectionLabel::Unset),
        None,
    );
    assert_eq!(unlabeled.len(), 4);
}

#[test]
fn keep_edges_explicit_list_modes() {
    // 2-tuple entry: every multi-edge of the pair survives.
    let mut store = curated_store();
    store.keep_edges(&[(unit(7), unit(5), None)], None);
    assert_eq!(store.undirected().edge_count(), 3);

    // 3-tuple entry: exactly one multiplicity survives.
    let mut store = curated_store();
    store.keep_edges(&[(unit(5), unit(7), Some(2))], None);
    assert_eq!(store.undirected().edge_count(), 1);
    let amps = store
        .get_edge_attributes(unit(5), unit(7), EdgeAttr::Amplitude, None)
        .unwrap();
    assert_eq!(amps.get(&0), Some(&AttrValue::Float(4.4)));

    // A list where nothing resolves leaves the graph unchanged.
    let mut store = curated_store();
    store.keep_edges(&[(unit(5), unit(42), None)], None);
    assert_eq!(store.undirected().edge_count(), 4);
}

#[test]
fn label_transitions_are_one_way() {
    let mut store = curated_store();

    store
        .set_edge_attribute(
            unit(5),
            unit(7),
            Some(0),
            EdgeAttr::Label,
            AttrValue::Label(ConnectionLabel::AsymExc),
            None,
        )
        .unwrap();

    // Re-labeling to another verified type is allowed.
    store
        .set_edge_attribute(
            unit(5),
            unit(7),
            Some(0),
            EdgeAttr::Label,
            AttrValue::Label(ConnectionLabel::SymExc),
            None,
        )
        .unwrap();

    // Clearing a verified label is not.
    let err = store
        .set_edge_attribute(
            unit(5),
            unit(7),
            Some(0),
            EdgeAttr::Label,
            AttrValue::Label(ConnectionLabel::Unset),
            None,
        )
        .expect_err("labels must not transition backward");
    assert!(matches!(err, MergeError::InvalidTransition(_)));
}

#[test]
fn node_attributes_use_the_closed_vocabulary() -> Result<()> {
    let mut store = curated_store();

    store.set_node_attribute(unit(5), NodeAttr::GroundtruthCellType, "PC", None)?;
    assert_eq!(
        store.get_node_attribute(unit(5), NodeAttr::GroundtruthCellType, None)?,
        "PC"
    );
    // Unit labels default to <dataset>_<local>.
    assert_eq!(store.get_node_attribute(unit(5), NodeAttr::Unit, None)?, "0_5");

    match store.get_node_attribute(unit(42), NodeAttr::Unit, None) {
        Err(MergeError::NodeNotFound { .. }) => {}
        other => panic!("expected NodeNotFound, got {other:?}"),
    }
    Ok(())
}

#[test]
fn external_graph_override_leaves_owned_graph_alone() {
    let mut store = curated_store();
    let mut copy = store.graph_copy();

    store.keep_nodes(&[unit(5), unit(7)], Some(&mut copy));
    assert_eq!(copy.node_count(), 2);
    assert_eq!(store.undirected().node_count(), 3);

    store.keep_edges_of_types(&[EdgeType::Main], CombineMode::And, 1.0, Some(&mut copy))
        .unwrap();
    assert_eq!(copy.edge_count(), 1);
    assert_eq!(store.undirected().edge_count(), 4);
}

#[test]
fn node_edges_report_neighbors_with_multiplicity() -> Result<()> {
    let store = curated_store();
    let neighbors = store.get_node_edges(unit(5), None)?;
    assert_eq!(neighbors.len(), 2);
    let (count, position) = neighbors.get(&unit(7)).unwrap();
    assert_eq!(*count, 3);
    assert_eq!(*position, Some((16.0, 800.0)));
    Ok(())
}

#[test]
fn directed_view_is_invalidated_by_mutation() {
    let mut store = curated_store();

    store
        .make_directed(1.0, false, ZeroLagPolicy::Bidirectional)
        .unwrap();
    assert!(store.directed().is_some());
    // 3.1 within threshold -> both directions; -2.0 and 4.4 and -1.2 are
    // directional: 3 + 2 = 5 directed edges.
    assert_eq!(store.directed().unwrap().edge_count(), 5);

    // Any mutation of the undirected graph drops the derived view.
    store.undirected_mut().clear_edges();
    assert!(store.directed().is_none());
}
