//! Probe Inspect - inspect a merge target store
//!
//! Prints the datasets table, merged spike counts, provenance attributes
//! and a sort-invariant check for a store produced by probe-merge.
//!
//! # Usage
//!
//! ```bash
//! probe-inspect merged.zarr
//! probe-inspect merged.zarr --verbose
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use probe_merge_toolbox::dataset::DatasetRecord;
use probe_merge_toolbox::identity::GlobalUnitId;
use probe_merge_toolbox::zarr;

#[derive(Parser)]
#[command(name = "probe-inspect")]
#[command(about = "Inspect a merge target store")]
#[command(version)]
struct Args {
    /// Merge target store to inspect
    target: PathBuf,

    /// Verbose output (per-dataset spike counts, unit positions)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    probe_merge_toolbox::display_license_notice("probe-inspect");

    println!("Probe Inspect");
    println!("=============");
    println!();
    println!("Target: {}", args.target.display());
    println!();

    let store = zarr::open_store(&args.target)?;
    let attrs = zarr::read_group_attributes(&store, "/")?;

    if let Some(datasets) = attrs.get("datasets") {
        let records: Vec<DatasetRecord> = serde_json::from_value(datasets.clone())?;
        println!("Datasets ({}):", records.len());
        for record in &records {
            println!(
                "\t[{}] {} (probe '{}', {:.0} Hz)",
                record.dataset_index, record.name, record.probe_label, record.sampling_rate_hz
            );
            if args.verbose {
                println!("\t    source: {}", record.source_path.display());
            }
        }
        println!();
    } else {
        println!("WARNING: no datasets table found (was this store written by probe-merge?)");
        println!();
    }

    for key in ["merged_at", "merged_on", "toolbox_version"] {
        if let Some(value) = attrs.get(key).and_then(|v| v.as_str()) {
            println!("{key}:\t{value}");
        }
    }
    println!();

    if !zarr::array_exists(&store, "/spikes/times")? {
        println!("No merged spike arrays present.");
        return Ok(());
    }

    let times = zarr::read_u64_array(&store, "/spikes/times")?;
    let units = zarr::read_u64_array(&store, "/spikes/units")?;

    println!("Merged spikes: {}", times.len());
    let sorted = times.windows(2).all(|w| w[0] <= w[1]);
    let lengths_match = times.len() == units.len();
    println!(
        "\tTime-sorted:\t{}",
        if sorted { "yes" } else { "NO (corrupt store?)" }
    );
    println!(
        "\tArray lengths:\t{}",
        if lengths_match {
            "consistent"
        } else {
            "MISMATCHED (corrupt store?)"
        }
    );

    if args.verbose && lengths_match {
        let mut per_dataset: std::collections::BTreeMap<usize, usize> = Default::default();
        for &raw in &units {
            *per_dataset
                .entry(GlobalUnitId::from_raw(raw).dataset_index())
                .or_default() += 1;
        }
        println!("\tSpikes per dataset:");
        for (dataset, count) in per_dataset {
            println!("\t\t[{dataset}] {count}");
        }
    }
    println!();

    if zarr::array_exists(&store, "/units/positions")? {
        let rows = zarr::read_f64_matrix(&store, "/units/positions")?;
        println!("Good units: {}", rows.len());
        if args.verbose {
            for row in &rows {
                if row.len() >= 3 {
                    let id = GlobalUnitId::from_raw(row[0] as u64);
                    println!(
                        "\t{} (dataset {}): x={:.1} um, y={:.1} um",
                        id.label(),
                        id.dataset_index(),
                        row[1],
                        row[2]
                    );
                }
            }
        }
    }

    Ok(())
}
