//! `mzproc detect` - mass trace detection over centroided MS1 data,
//! written out as a featureXML-lite map.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use mzproc::algo::MassTraceDetection;
use mzproc::io::featurexml::store_feature_map;
use mzproc::io::mzml::load_experiment;
use mzproc::model::{Feature, FeatureMap, QuantMethod};

#[derive(Args)]
pub struct DetectArgs {
    /// Input mzML file (centroided)
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    /// Output featureXML file
    #[arg(long = "out", value_name = "FILE")]
    output: PathBuf,

    /// Mass tolerance around the trace centroid, in ppm
    #[arg(long, default_value_t = 20.0)]
    mass_error_ppm: f64,

    /// Ignore peaks at or below this intensity
    #[arg(long, default_value_t = 10.0)]
    noise_threshold: f64,

    /// Minimum RT span of a trace in seconds
    #[arg(long, default_value_t = 5.0)]
    min_trace_length: f64,

    /// Minimum number of peaks per trace
    #[arg(long, default_value_t = 3)]
    min_peaks: usize,

    /// Quantification method (area or median)
    #[arg(long, default_value = "area")]
    quant_method: String,
}

pub fn run(args: DetectArgs) -> Result<()> {
    anyhow::ensure!(args.mass_error_ppm > 0.0, "mass_error_ppm must be positive");
    let quant_method: QuantMethod = args
        .quant_method
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let experiment = load_experiment(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let detection = MassTraceDetection {
        mass_error_ppm: args.mass_error_ppm,
        noise_threshold_int: args.noise_threshold,
        min_trace_length: args.min_trace_length,
        min_peaks: args.min_peaks,
        quant_method,
        ..Default::default()
    };
    let traces = detection.run(&experiment.spectra);
    log::info!("{}: {} mass traces", args.input.display(), traces.len());

    // Traces come apex-intensity-first; the report is easier to scan in
    // elution order.
    let mut features: Vec<Feature> = traces
        .iter()
        .enumerate()
        .map(|(i, trace)| {
            let peaks = trace.peaks();
            Feature {
                id: i as u64,
                rt: trace.centroid_rt(),
                mz: trace.centroid_mz(),
                intensity: trace.intensity(false),
                charge: 0,
                quality: 0.0,
                rt_range: (peaks[0].rt, peaks[peaks.len() - 1].rt),
                peptide_sequences: Vec::new(),
            }
        })
        .collect();
    features.sort_by(|a, b| a.rt.partial_cmp(&b.rt).unwrap_or(std::cmp::Ordering::Equal));

    let map = FeatureMap { features };
    store_feature_map(&args.output, &map)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}
