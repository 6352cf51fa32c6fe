//! Graph export.
//!
//! Exported files live under `<merge target>/network/`. The edge list is
//! the minimal interchange form (one line per edge); JSON carries the full
//! node and edge records.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MergeError, MergeResult};

use super::{DirectedGraph, UnitGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    EdgeList,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::EdgeList => "edgelist",
            ExportFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edgelist" => Ok(ExportFormat::EdgeList),
            "json" => Ok(ExportFormat::Json),
            other => Err(MergeError::UnknownAttribute {
                kind: "export format",
                name: other.to_string(),
            }),
        }
    }
}

fn export_path(
    network_dir: &Path,
    prefix: &str,
    name: &str,
    format: ExportFormat,
    overwrite: bool,
) -> MergeResult<PathBuf> {
    std::fs::create_dir_all(network_dir)?;
    let file = network_dir.join(format!("{prefix}_{name}.{}", format.extension()));
    if file.exists() && !overwrite {
        return Err(MergeError::Store(format!(
            "export file {} already exists (pass overwrite to replace it)",
            file.display()
        )));
    }
    Ok(file)
}

/// Export the undirected graph as `graph_<name>.<ext>` under `network_dir`.
pub fn export_graph(
    graph: &UnitGraph,
    network_dir: &Path,
    name: &str,
    format: ExportFormat,
    overwrite: bool,
) -> MergeResult<PathBuf> {
    let file = export_path(network_dir, "graph", name, format, overwrite)?;
    match format {
        ExportFormat::EdgeList => {
            let mut out = std::fs::File::create(&file)?;
            for id in graph.edge_ids() {
                let edge = graph.edge(&id).expect("enumerated edge id");
                writeln!(
                    out,
                    "{} {} {} {:.6} {:.6} {}",
                    id.a,
                    id.b,
                    id.key,
                    edge.amplitude,
                    edge.lag_ms,
                    edge.label
                )?;
            }
        }
        ExportFormat::Json => {
            let out = std::fs::File::create(&file)?;
            serde_json::to_writer_pretty(out, graph)?;
        }
    }
    Ok(file)
}

/// Export a directed graph as `digraph_<name>.<ext>` under `network_dir`.
pub fn export_digraph(
    graph: &DirectedGraph,
    network_dir: &Path,
    name: &str,
    format: ExportFormat,
    overwrite: bool,
) -> MergeResult<PathBuf> {
    let file = export_path(network_dir, "digraph", name, format, overwrite)?;
    match format {
        ExportFormat::EdgeList => {
            let mut out = std::fs::File::create(&file)?;
            for (from, to, key, edge) in graph.edges() {
                writeln!(
                    out,
                    "{} {} {} {:.6} {:.6} {}",
                    from, to, key, edge.amplitude, edge.lag_ms, edge.label
                )?;
            }
        }
        ExportFormat::Json => {
            let out = std::fs::File::create(&file)?;
            serde_json::to_writer_pretty(out, graph)?;
        }
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConnectionEdge, SignificanceCriteria, UnitNode};
    use crate::identity::GlobalUnitId;

    #[test]
    fn edgelist_has_one_line_per_edge() {
        let u1 = GlobalUnitId::encode(1, 0).unwrap();
        let u2 = GlobalUnitId::encode(2, 0).unwrap();
        let mut g = UnitGraph::new();
        g.add_node(UnitNode::new(u1, (0.0, 0.0)));
        g.add_node(UnitNode::new(u2, (0.0, 20.0)));
        for (amp, lag) in [(1.5, 0.4), (-2.0, 1.3)] {
            g.add_edge(ConnectionEdge {
                source: u1,
                target: u2,
                amplitude: amp,
                lag_ms: lag,
                width_ms: 1.0,
                label: Default::default(),
                n_triplets: 0,
                n_bincrossing: 0,
                bin_heights: Vec::new(),
                entropy: 0.0,
                criteria: SignificanceCriteria::default(),
            });
        }

        let dir = tempfile::tempdir().unwrap();
        let file =
            export_graph(&g, dir.path(), "test", ExportFormat::EdgeList, false).unwrap();
        let contents = std::fs::read_to_string(&file).unwrap();
        assert_eq!(contents.lines().count(), 2);

        // A second export without overwrite refuses.
        assert!(export_graph(&g, dir.path(), "test", ExportFormat::EdgeList, false).is_err());
        assert!(export_graph(&g, dir.path(), "test", ExportFormat::EdgeList, true).is_ok());
    }

    #[test]
    fn json_roundtrips_the_graph() {
        let u1 = GlobalUnitId::encode(3, 0).unwrap();
        let mut g = UnitGraph::new();
        g.add_node(UnitNode::new(u1, (10.0, 200.0)));

        let dir = tempfile::tempdir().unwrap();
        let file = export_graph(&g, dir.path(), "rt", ExportFormat::Json, false).unwrap();
        let parsed: UnitGraph =
            serde_json::from_reader(std::fs::File::open(&file).unwrap()).unwrap();
        assert_eq!(parsed.node_count(), 1);
        assert_eq!(parsed.node(u1).unwrap().position_um, (10.0, 200.0));
    }
}
