//! `mzproc correct` - precursor m/z correction against MS1 peaks or
//! features.
//!
//! Three methods are available; exactly one runs per invocation:
//! `nearest_peak` (closest centroided MS1 peak), `highest_intensity_peak`
//! (most intense MS1 peak inside a window, suggested window 1/max expected
//! charge) and `feature` (enabled by `--feature:in`, also corrects the
//! charge).

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use mzproc::algo::precursor::{
    correct_to_highest_intensity_ms1_peak, correct_to_nearest_feature,
    correct_to_nearest_ms1_peak, write_correction_csv, CorrectionRecord, FeatureCorrectionParams,
};
use mzproc::io::featurexml::load_feature_map;
use mzproc::io::mzml::{load_experiment, MzMLWriter};
use mzproc::io::options::PeakFileOptions;
use mzproc::io::MsDataConsumer;

use super::MzToleranceUnit;

#[derive(Args)]
pub struct CorrectArgs {
    /// Input mzML file (centroided)
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    /// Output mzML file
    #[arg(long = "out", value_name = "FILE")]
    output: PathBuf,

    /// Features used for precursor correction; enables feature mode
    #[arg(long = "feature:in", value_name = "FILE")]
    feature_in: Option<PathBuf>,

    /// Precursor tolerance for matching feature mass traces
    #[arg(long = "feature:mz_tolerance", default_value_t = 5.0)]
    feature_mz_tolerance: f64,

    /// Unit of the feature m/z tolerance
    #[arg(long = "feature:mz_tolerance_unit", value_enum, default_value = "ppm")]
    feature_mz_tolerance_unit: MzToleranceUnit,

    /// Extra RT tolerance added to feature boundaries (seconds)
    #[arg(long = "feature:rt_tolerance", default_value_t = 0.0)]
    feature_rt_tolerance: f64,

    /// Highest isotopic trace considered when matching
    #[arg(long = "feature:max_trace", default_value_t = 2)]
    feature_max_trace: u32,

    /// Assume the recorded precursor charge is correct
    #[arg(long = "feature:believe_charge")]
    feature_believe_charge: bool,

    /// Keep the original MS2 and append corrected copies
    #[arg(long = "feature:keep_original")]
    feature_keep_original: bool,

    /// Correct against all matching features, not only the nearest
    #[arg(long = "feature:assign_all_matching")]
    feature_assign_all_matching: bool,

    /// Tolerance to the closest MS1 peak; 0 disables the method
    #[arg(long = "nearest_peak:mz_tolerance", default_value_t = 0.0)]
    nearest_peak_mz_tolerance: f64,

    /// Unit of the nearest-peak tolerance
    #[arg(long = "nearest_peak:mz_tolerance_unit", value_enum, default_value = "ppm")]
    nearest_peak_mz_tolerance_unit: MzToleranceUnit,

    /// Window for the highest-intensity MS1 peak; 0 disables the method
    #[arg(long = "highest_intensity_peak:mz_tolerance", default_value_t = 0.0)]
    highest_intensity_peak_mz_tolerance: f64,

    /// Unit of the highest-intensity window
    #[arg(long = "highest_intensity_peak:mz_tolerance_unit", value_enum, default_value = "ppm")]
    highest_intensity_peak_mz_tolerance_unit: MzToleranceUnit,

    /// Optional CSV log of the applied corrections
    #[arg(long = "out_csv", value_name = "FILE")]
    out_csv: Option<PathBuf>,
}

pub fn run(args: CorrectArgs) -> Result<()> {
    if args.nearest_peak_mz_tolerance <= 0.0
        && args.highest_intensity_peak_mz_tolerance <= 0.0
        && args.feature_in.is_none()
    {
        anyhow::bail!(
            "no correction method requested: provide --feature:in, or set \
             --nearest_peak:mz_tolerance > 0, or --highest_intensity_peak:mz_tolerance > 0"
        );
    }
    anyhow::ensure!(
        args.nearest_peak_mz_tolerance >= 0.0
            && args.highest_intensity_peak_mz_tolerance >= 0.0
            && args.feature_mz_tolerance >= 0.0
            && args.feature_rt_tolerance >= 0.0,
        "tolerances must be non-negative"
    );

    let mut experiment = load_experiment(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let mut records: Vec<CorrectionRecord> = Vec::new();

    if args.nearest_peak_mz_tolerance > 0.0 && args.highest_intensity_peak_mz_tolerance <= 0.0 {
        let corrected = correct_to_nearest_ms1_peak(
            &mut experiment,
            args.nearest_peak_mz_tolerance,
            args.nearest_peak_mz_tolerance_unit.is_ppm(),
            &mut records,
        );
        log::info!("corrected {} precursors to the nearest MS1 peak", corrected.len());
    }

    if args.highest_intensity_peak_mz_tolerance > 0.0 {
        let corrected = correct_to_highest_intensity_ms1_peak(
            &mut experiment,
            args.highest_intensity_peak_mz_tolerance,
            args.highest_intensity_peak_mz_tolerance_unit.is_ppm(),
            &mut records,
        );
        log::info!(
            "corrected {} precursors to the highest-intensity MS1 peak",
            corrected.len()
        );
    }

    if let Some(feature_path) = &args.feature_in {
        let features = load_feature_map(feature_path)
            .with_context(|| format!("failed to read {}", feature_path.display()))?;
        let params = FeatureCorrectionParams {
            mz_tolerance: args.feature_mz_tolerance,
            mz_unit_ppm: args.feature_mz_tolerance_unit.is_ppm(),
            rt_tolerance: args.feature_rt_tolerance,
            max_trace: args.feature_max_trace,
            believe_charge: args.feature_believe_charge,
            keep_original: args.feature_keep_original,
            assign_all_matching: args.feature_assign_all_matching,
        };
        let corrected =
            correct_to_nearest_feature(&features, &mut experiment, &params, &mut records);
        log::info!("corrected {} precursors to a feature", corrected.len());
    }

    let mut writer = MzMLWriter::create(&args.output, PeakFileOptions::default())
        .with_context(|| format!("cannot create {}", args.output.display()))?;
    writer.add_data_processing("precursor recalibration");
    writer.set_experimental_settings(&experiment.settings);
    writer.set_expected_size(experiment.spectra.len(), experiment.chromatograms.len());
    for spectrum in experiment.spectra.drain(..) {
        writer.consume_spectrum(spectrum)?;
    }
    for chromatogram in experiment.chromatograms.drain(..) {
        writer.consume_chromatogram(chromatogram)?;
    }
    writer.close()?;

    if let Some(csv_path) = &args.out_csv {
        write_correction_csv(csv_path, &records)
            .with_context(|| format!("cannot write {}", csv_path.display()))?;
        log::info!("wrote {} correction records to {}", records.len(), csv_path.display());
    }
    Ok(())
}
