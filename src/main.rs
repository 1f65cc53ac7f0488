//! # mzproc command line tool
//!
//! Streaming mass spectrometry data processing:
//!
//! ```bash
//! # Convert / re-encode (mzML -> mzML or sqMass, Numpress optional)
//! mzproc convert --in input.mzML --out output.sqMass --numpress
//!
//! # Detect mass traces and write them as featureXML
//! mzproc detect --in centroided.mzML --out features.featureXML
//!
//! # Align feature maps onto a reference by pose clustering
//! mzproc align --in ref.featureXML --in run2.featureXML --trafo-out run2.trafo.json
//!
//! # Correct MS2 precursor masses against MS1 evidence
//! mzproc correct --in input.mzML --out corrected.mzML --nearest_peak:mz_tolerance 5.0
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
