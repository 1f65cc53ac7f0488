//! `mzproc convert` - stream an mzML file into an mzML or sqMass writer,
//! optionally re-encoding the binary arrays with Numpress and zlib.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use mzproc::io::consumer::NoopConsumer;
use mzproc::io::mzml::{transfer, transfer_with_counts, MzMLWriter};
use mzproc::io::numpress::{NumpressConfig, NumpressKind};
use mzproc::io::options::PeakFileOptions;
use mzproc::io::sqmass::SqMassWriter;
use mzproc::model::{Chromatogram, ChromatogramPoint};

use super::is_sqmass_path;

#[derive(Args)]
pub struct ConvertArgs {
    /// Input mzML file
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    /// Output file; format chosen by extension (.mzML or .sqMass)
    #[arg(long = "out", value_name = "FILE")]
    output: PathBuf,

    /// Compress binary arrays with Numpress (linear for m/z and RT,
    /// slof for intensities)
    #[arg(long)]
    numpress: bool,

    /// Numpress round-trip error tolerance; 0 disables verification
    #[arg(long, default_value_t = 1e-4)]
    numpress_tolerance: f64,

    /// Apply zlib to the binary payloads
    #[arg(long)]
    zlib: bool,

    /// Restrict conversion to these MS levels (repeatable)
    #[arg(long = "ms-level", value_name = "LEVEL")]
    ms_levels: Vec<u8>,

    /// Skip the trailing offset index and checksum (mzML output)
    #[arg(long)]
    no_index: bool,

    /// Append a TIC chromatogram computed from the consumed spectra
    #[arg(long)]
    write_tic: bool,

    /// Items buffered per transaction (sqMass output)
    #[arg(long, default_value_t = 100)]
    pool_size: usize,
}

fn build_options(args: &ConvertArgs) -> PeakFileOptions {
    let mut options = PeakFileOptions {
        ms_levels: args.ms_levels.clone(),
        zlib_compression: args.zlib,
        write_index: !args.no_index,
        pool_size: args.pool_size,
        ..Default::default()
    };
    if args.numpress {
        let mut linear = NumpressConfig::with_kind(NumpressKind::Linear);
        linear.error_tolerance = args.numpress_tolerance;
        let mut slof = NumpressConfig::with_kind(NumpressKind::Slof);
        slof.error_tolerance = args.numpress_tolerance;
        options.numpress_mass_time = linear;
        options.numpress_intensity = slof;
    }
    options
}

pub fn run(args: ConvertArgs) -> Result<()> {
    let options = build_options(&args);

    // Counting pass so the output lists carry correct sizes.
    let mut counter = NoopConsumer::new();
    let (n_spectra, n_chromatograms) = transfer(&args.input, &mut counter, &options)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    log::info!(
        "{}: {n_spectra} spectra, {n_chromatograms} chromatograms after filtering",
        args.input.display()
    );

    let extra_chromatograms = usize::from(args.write_tic);
    if is_sqmass_path(&args.output) {
        let mut writer = SqMassWriter::create(&args.output, options.clone())
            .with_context(|| format!("cannot create {}", args.output.display()))?;
        writer.store_metadata_blob(true);
        convert_into(&args, &options, n_spectra, n_chromatograms + extra_chromatograms, &mut writer)?;
    } else {
        let mut writer = MzMLWriter::create(&args.output, options.clone())
            .with_context(|| format!("cannot create {}", args.output.display()))?;
        convert_into(&args, &options, n_spectra, n_chromatograms + extra_chromatograms, &mut writer)?;
    }

    log::info!("wrote {}", args.output.display());
    Ok(())
}

fn convert_into<C>(
    args: &ConvertArgs,
    options: &PeakFileOptions,
    n_spectra: usize,
    n_chromatograms: usize,
    writer: &mut C,
) -> Result<()>
where
    C: mzproc::io::MsDataConsumer,
{
    if args.write_tic {
        // Collect the TIC while spectra stream through, then append it.
        let mut tic_points: Vec<ChromatogramPoint> = Vec::new();
        {
            let mut tee = TicTee {
                inner: writer,
                tic: &mut tic_points,
            };
            transfer_with_counts(&args.input, &mut tee, options, n_spectra, n_chromatograms)
                .with_context(|| format!("conversion of {} failed", args.input.display()))?;
        }
        let mut tic = Chromatogram::new("TIC");
        tic.points = tic_points;
        writer.consume_chromatogram(tic)?;
        writer.close()?;
    } else {
        transfer_with_counts(&args.input, writer, options, n_spectra, n_chromatograms)
            .with_context(|| format!("conversion of {} failed", args.input.display()))?;
    }
    Ok(())
}

/// Pass-through consumer that accumulates a TIC from consumed spectra.
struct TicTee<'a, C> {
    inner: &'a mut C,
    tic: &'a mut Vec<ChromatogramPoint>,
}

impl<C: mzproc::io::MsDataConsumer> mzproc::io::MsDataConsumer for TicTee<'_, C> {
    fn set_experimental_settings(&mut self, settings: &mzproc::model::ExperimentalSettings) {
        self.inner.set_experimental_settings(settings);
    }

    fn set_expected_size(&mut self, n_spectra: usize, n_chromatograms: usize) {
        self.inner.set_expected_size(n_spectra, n_chromatograms);
    }

    fn consume_spectrum(
        &mut self,
        spectrum: mzproc::model::Spectrum,
    ) -> std::result::Result<(), mzproc::io::ConsumerError> {
        if spectrum.ms_level == 1 {
            self.tic.push(ChromatogramPoint {
                rt: spectrum.rt,
                intensity: spectrum.total_ion_current() as f32,
            });
        }
        self.inner.consume_spectrum(spectrum)
    }

    fn consume_chromatogram(
        &mut self,
        chromatogram: Chromatogram,
    ) -> std::result::Result<(), mzproc::io::ConsumerError> {
        self.inner.consume_chromatogram(chromatogram)
    }

    fn close(&mut self) -> std::result::Result<(), mzproc::io::ConsumerError> {
        // The caller appends the TIC and closes the inner writer itself.
        Ok(())
    }
}
