use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod align;
mod convert;
mod correct;
mod detect;

/// mzproc - streaming mass spectrometry data processing
#[derive(Parser)]
#[command(name = "mzproc")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

/// m/z tolerance units accepted on the command line.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum MzToleranceUnit {
    /// Parts per million of the target m/z
    #[default]
    #[value(name = "ppm")]
    Ppm,
    /// Absolute Daltons
    #[value(name = "Da", alias = "da")]
    Da,
}

impl MzToleranceUnit {
    pub fn is_ppm(self) -> bool {
        matches!(self, MzToleranceUnit::Ppm)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert between mzML and sqMass, optionally re-encoding the
    /// binary arrays
    Convert(convert::ConvertArgs),

    /// Detect mass traces in centroided MS1 data
    Detect(detect::DetectArgs),

    /// Align feature maps onto a reference via pose clustering
    Align(align::AlignArgs),

    /// Correct MS2 precursor m/z against MS1 peaks or features
    Correct(correct::CorrectArgs),
}

/// Initialize env_logger with verbosity level.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Run the selected subcommand.
pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Convert(args) => convert::run(args),
        Commands::Detect(args) => detect::run(args),
        Commands::Align(args) => align::run(args),
        Commands::Correct(args) => correct::run(args),
    }
}

/// Output format selection by file extension.
pub(crate) fn is_sqmass_path(path: &PathBuf) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("sqmass"))
        .unwrap_or(false)
}
