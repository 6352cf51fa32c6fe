//! Probe Merge - merge multi-probe recordings into one dataset
//!
//! Merges the spike trains of several probe recordings into a single
//! time-aligned dataset with collision-free global unit ids.
//!
//! # Features
//!
//! - Aligns spike times across probes using their shared sync line
//! - Renumbers per-probe cluster ids into global unit ids
//! - Writes the merged, time-sorted arrays to a Zarr store
//! - Idempotent: unchanged inputs are served from the persisted arrays
//! - Detects re-spike-sorted inputs and re-merges automatically
//!
//! # Usage
//!
//! ```bash
//! # Merge two recordings, sync channel 3 on each probe
//! probe-merge rec_probe1.zarr rec_probe2.zarr \
//!   --probe prb1 --probe prb2 \
//!   --sync-channel 0:3 --sync-channel 1:3
//!
//! # Single dataset: no sync channel needed, alignment is the identity
//! probe-merge rec_probe1.zarr
//!
//! # Force a re-merge into an explicit target
//! probe-merge rec_probe1.zarr rec_probe2.zarr -o merged.zarr --force
//! ```
//!
//! # Workflow
//!
//! ```bash
//! # 1. Merge the recordings
//! probe-merge rec_probe1.zarr rec_probe2.zarr --sync-channel 0:3 --sync-channel 1:3
//!
//! # 2. Inspect the result
//! probe-inspect merged_rec_probe1_rec_probe2.zarr
//!
//! # 3. Build and export the connection graph
//! probe-graph merged_rec_probe1_rec_probe2.zarr --table correlations.json
//! ```

use anyhow::Result;
use clap::Parser;

use probe_merge_toolbox::cli::Args;
use probe_merge_toolbox::dataset::{FixedChannelSelector, ZarrDatasetSource};
use probe_merge_toolbox::merger::{MergeOutcome, Merger, MergerConfig};

fn main() -> Result<()> {
    let args = Args::parse();

    probe_merge_toolbox::display_license_notice("probe-merge");
    tracing_subscriber::fmt::init();

    println!("Probe Merge");
    println!("===========");
    println!();
    if args.verbose {
        println!("Configuration:");
        println!("\tDatasets:\t{}", args.datasets.len());
        for (i, path) in args.datasets.iter().enumerate() {
            println!("\t\t[{}] {} ({})", i, path.display(), args.probe_label(i));
        }
        println!("\tReference:\tdataset {}", args.reference);
        if let Some(output) = &args.output {
            println!("\tTarget:\t\t{}", output.display());
        }
        println!();
    }

    // Check inputs before any work.
    let missing: Vec<String> = args
        .datasets
        .iter()
        .filter(|p| !p.is_dir())
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    if !missing.is_empty() {
        println!("Error: the following datasets were not found:");
        for path in missing {
            println!("\t{path}");
        }
        std::process::exit(1);
    }

    let mut merger = Merger::new(MergerConfig {
        target: args.output.clone(),
        reference_index: args.reference,
        force_remerge: args.force,
    });

    println!("Loading datasets...");
    for (i, path) in args.datasets.iter().enumerate() {
        let source = ZarrDatasetSource::open(path)?;
        println!("\tDone: {}", path.display());
        merger.add_dataset(args.probe_label(i), Box::new(source))?;
    }
    println!();

    let selector = FixedChannelSelector::new(args.sync_channels()?);

    println!("Merging...");
    let merged = merger.merge(&selector)?;
    println!();

    match merged.outcome {
        MergeOutcome::Written => {
            println!("Merge complete: {} spikes written", merged.spike_log.spike_times.len());
        }
        MergeOutcome::Reused => {
            println!(
                "Inputs unchanged: served {} spikes from the existing merge",
                merged.spike_log.spike_times.len()
            );
        }
    }
    println!(
        "\t{} good unit(s) across {} dataset(s)",
        merged.graph.undirected().node_count(),
        merged.records.len()
    );
    println!("\tTarget: {}", merged.target.display());
    println!();
    println!("Next steps:");
    println!("\tprobe-inspect {}", merged.target.display());
    println!(
        "\tprobe-graph {} --table <correlations.json>",
        merged.target.display()
    );

    Ok(())
}
