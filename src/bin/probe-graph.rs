//! Probe Graph - build, filter and export the unit connection graph
//!
//! Populates the connection graph of a merged dataset from an externally
//! computed correlation-significance table, optionally filters it by edge
//! type, derives the directed graph, and exports the result under
//! `<target>/network/`.
//!
//! # Usage
//!
//! ```bash
//! # Populate the graph and export the full edge list
//! probe-graph merged.zarr --table correlations.json
//!
//! # Keep only the strongest edge per unit pair
//! probe-graph merged.zarr --table correlations.json --keep-types main
//!
//! # Putative excitatory or inhibitory connections (union of both types)
//! probe-graph merged.zarr --table correlations.json \
//!   --keep-types + --keep-types - --combine or
//!
//! # Derive the directed graph, dropping near-zero-lag edges
//! probe-graph merged.zarr --table correlations.json \
//!   --directed --zero-lag drop --t-asym 1.0
//!
//! # Full JSON export instead of the edge list
//! probe-graph merged.zarr --table correlations.json --format json --name curated
//! ```
//!
//! # Edge Types
//!
//! - `+`  - positive peak, |lag| above the asymmetry threshold
//! - `-`  - negative peak, |lag| above the threshold
//! - `ci` - positive peak within the threshold (common input)
//! - `main` - strongest edge of each multi-edge group

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use probe_merge_toolbox::graph::export::{self, ExportFormat};
use probe_merge_toolbox::graph::{
    CombineMode, CorrelationTable, EdgeType, UnitGraphStore, ZeroLagPolicy, connect,
};
use probe_merge_toolbox::merger;

#[derive(Parser)]
#[command(name = "probe-graph")]
#[command(about = "Build, filter and export the unit connection graph of a merged dataset")]
#[command(version)]
struct Args {
    /// Merge target store (output of probe-merge)
    target: PathBuf,

    /// Correlation-significance table (JSON)
    #[arg(long, short = 't')]
    table: PathBuf,

    /// Edge types to keep (repeatable: +, -, ci, main)
    #[arg(long)]
    keep_types: Vec<String>,

    /// How several --keep-types filters combine
    #[arg(long, default_value = "and")]
    #[arg(value_parser = ["and", "or"])]
    combine: String,

    /// Asymmetry threshold in ms separating directional peaks from common input
    #[arg(long, default_value = "1.0")]
    t_asym: f64,

    /// Also derive and export the directed graph
    #[arg(long)]
    directed: bool,

    /// Collapse multi-edges to their strongest edge before deriving direction
    #[arg(long)]
    only_main_edges: bool,

    /// What near-zero-lag edges become in the directed graph
    #[arg(long, default_value = "bidirectional")]
    #[arg(value_parser = ["bidirectional", "drop"])]
    zero_lag: String,

    /// Export format
    #[arg(long, default_value = "edgelist")]
    #[arg(value_parser = ["edgelist", "json"])]
    format: String,

    /// Name suffix of the exported files
    #[arg(long, default_value = "connections")]
    name: String,

    /// Overwrite existing export files
    #[arg(long)]
    overwrite: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    probe_merge_toolbox::display_license_notice("probe-graph");
    tracing_subscriber::fmt::init();

    println!("Probe Graph");
    println!("===========");
    println!();
    println!("Target: {}", args.target.display());
    println!("Table:  {}", args.table.display());
    println!();

    println!("Loading unit graph...");
    let graph = merger::load_unit_graph(&args.target)?;
    println!("\t{} unit(s)", graph.node_count());
    let mut store = UnitGraphStore::from_graph(graph);

    println!("Connecting from correlation table...");
    let table = CorrelationTable::from_json_reader(std::fs::File::open(&args.table)?)?;
    let added = connect::connect_graph(store.undirected_mut(), &table)?;
    println!("\t{} edge(s) from {} table row(s)", added, table.rows.len());
    println!();

    if !args.keep_types.is_empty() {
        let types: Vec<EdgeType> = args
            .keep_types
            .iter()
            .map(|t| t.parse())
            .collect::<Result<_, _>>()?;
        let combine: CombineMode = args.combine.parse()?;
        println!(
            "Filtering edges: {} ({})",
            args.keep_types.join(", "),
            args.combine
        );
        store.keep_edges_of_types(&types, combine, args.t_asym, None)?;
        println!("\t{} edge(s) kept", store.undirected().edge_count());
        println!();
    }

    let network_dir = args.target.join("network");
    let format: ExportFormat = args.format.parse()?;

    println!("Exporting...");
    let file = export::export_graph(
        store.undirected(),
        &network_dir,
        &args.name,
        format,
        args.overwrite,
    )?;
    println!("\tDone: {}", file.display());

    if args.directed {
        let zero_lag: ZeroLagPolicy = args.zero_lag.parse()?;
        let digraph = store.make_directed(args.t_asym, args.only_main_edges, zero_lag)?;
        if args.verbose {
            println!(
                "\tDirected: {} node(s), {} edge(s)",
                digraph.node_count(),
                digraph.edge_count()
            );
        }
        let file = export::export_digraph(
            digraph,
            &network_dir,
            &args.name,
            format,
            args.overwrite,
        )?;
        println!("\tDone: {}", file.display());
    }

    println!();
    println!("Export complete.");

    Ok(())
}
