//! `mzproc align` - pose-clustering retention-time alignment of feature
//! maps onto a common reference.

use anyhow::{Context, Result};
use clap::Args;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use mzproc::algo::PoseClusteringAligner;
use mzproc::io::featurexml::{load_feature_map, store_feature_map};

#[derive(Args)]
pub struct AlignArgs {
    /// Input featureXML files; the reference is picked among them
    #[arg(long = "in", value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// 1-based index of the reference input (default: largest map)
    #[arg(long, value_name = "N")]
    reference_index: Option<usize>,

    /// Aligned featureXML output paths, parallel to --in
    #[arg(long = "out", value_name = "FILE")]
    outputs: Vec<PathBuf>,

    /// Transformation description JSON outputs, parallel to --in
    #[arg(long = "trafo-out", value_name = "FILE")]
    trafo_outputs: Vec<PathBuf>,

    /// Only feature pairs closer than this in m/z (Da) may vote
    #[arg(long, default_value_t = 0.5)]
    mz_pair_max_distance: f64,

    /// Cap on the number of top-intensity features considered per map
    #[arg(long, default_value_t = 1000)]
    max_num_peaks_considered: usize,

    /// Number of worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

pub fn run(args: AlignArgs) -> Result<()> {
    if args.inputs.len() == 1 {
        log::warn!("only one input file provided; nothing to align it against");
    }
    if !args.outputs.is_empty() && args.outputs.len() != args.inputs.len() {
        anyhow::bail!("--out must be given once per --in");
    }
    if !args.trafo_outputs.is_empty() && args.trafo_outputs.len() != args.inputs.len() {
        anyhow::bail!("--trafo-out must be given once per --in");
    }
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    let maps: Vec<_> = args
        .inputs
        .iter()
        .map(|path| {
            load_feature_map(path).with_context(|| format!("failed to read {}", path.display()))
        })
        .collect::<Result<_>>()?;

    let reference_index = match args.reference_index {
        Some(n) => {
            anyhow::ensure!(
                (1..=maps.len()).contains(&n),
                "reference index {n} out of range 1..={}",
                maps.len()
            );
            n - 1
        }
        None => {
            // Largest map makes the most stable reference.
            let idx = maps
                .iter()
                .enumerate()
                .max_by_key(|(_, m)| m.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            log::info!(
                "picked {} as reference ({} features)",
                args.inputs[idx].display(),
                maps[idx].len()
            );
            idx
        }
    };

    let aligner = PoseClusteringAligner {
        mz_pair_max_distance: args.mz_pair_max_distance,
        max_num_peaks_considered: args.max_num_peaks_considered,
        ..Default::default()
    };
    let reference = &maps[reference_index];

    // Each non-reference map aligns independently; fan out per file.
    let results: Vec<Result<()>> = maps
        .par_iter()
        .enumerate()
        .map(|(idx, map)| {
            let description = if idx == reference_index {
                mzproc::algo::TransformationDescription::identity()
            } else {
                let result = aligner.align(reference, map);
                if !result.refined {
                    log::warn!(
                        "{}: alignment degenerate, applying identity",
                        args.inputs[idx].display()
                    );
                }
                result.description
            };

            if let Some(out) = args.outputs.get(idx) {
                let mut aligned = map.clone();
                description.apply_to_features(&mut aligned);
                store_feature_map(out, &aligned)
                    .with_context(|| format!("cannot write {}", out.display()))?;
            }
            if let Some(trafo_out) = args.trafo_outputs.get(idx) {
                write_trafo(trafo_out, &description)?;
            }
            Ok(())
        })
        .collect();
    for result in results {
        result?;
    }
    Ok(())
}

fn write_trafo(
    path: &Path,
    description: &mzproc::algo::TransformationDescription,
) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), description)?;
    Ok(())
}
