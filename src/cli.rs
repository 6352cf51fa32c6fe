use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;

use crate::error::{MergeError, MergeResult};

#[derive(Parser, Clone)]
#[command(name = "probe-merge")]
#[command(about = "Merge multi-probe spike-sorted recordings into one time-aligned dataset")]
pub struct Args {
    #[arg(required = true, help = "Dataset stores to merge (one per probe)")]
    pub datasets: Vec<PathBuf>,

    #[arg(
        long,
        short = 'p',
        help = "Probe label per dataset, in dataset order (defaults to prb0, prb1, ...)"
    )]
    pub probe: Vec<String>,

    #[arg(
        long,
        short = 'o',
        help = "Merge target store (defaults to merged_<names>.zarr next to the first dataset)"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        default_value = "0",
        help = "Dataset index whose clock is the time reference"
    )]
    pub reference: usize,

    #[arg(
        long,
        value_name = "DATASET:CHANNEL",
        help = "Sync channel to use for a dataset, e.g. 0:3 (repeatable)"
    )]
    pub sync_channel: Vec<String>,

    #[arg(long, help = "Re-merge even if the persisted arrays look current")]
    pub force: bool,

    #[arg(short, long, help = "Verbose output")]
    pub verbose: bool,
}

impl Args {
    /// Probe label for dataset slot `index`.
    pub fn probe_label(&self, index: usize) -> String {
        self.probe
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("prb{index}"))
    }

    /// Parse the repeated `--sync-channel DATASET:CHANNEL` flags.
    pub fn sync_channels(&self) -> MergeResult<BTreeMap<usize, u32>> {
        let mut channels = BTreeMap::new();
        for entry in &self.sync_channel {
            let Some((dataset, channel)) = entry.split_once(':') else {
                return Err(MergeError::Alignment(format!(
                    "invalid --sync-channel '{entry}' (expected DATASET:CHANNEL, e.g. 0:3)"
                )));
            };
            let dataset: usize = dataset.parse().map_err(|_| {
                MergeError::Alignment(format!(
                    "invalid dataset index in --sync-channel '{entry}'"
                ))
            })?;
            let channel: u32 = channel.parse().map_err(|_| {
                MergeError::Alignment(format!(
                    "invalid channel id in --sync-channel '{entry}'"
                ))
            })?;
            channels.insert(dataset, channel);
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_channel_flags_parse() {
        let args = Args::parse_from(["probe-merge", "a.zarr", "--sync-channel", "0:3"]);
        let channels = args.sync_channels().unwrap();
        assert_eq!(channels.get(&0), Some(&3));
    }

    #[test]
    fn malformed_sync_channel_is_rejected() {
        let args = Args::parse_from(["probe-merge", "a.zarr", "--sync-channel", "three"]);
        assert!(args.sync_channels().is_err());
    }
}
