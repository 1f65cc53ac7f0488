//! # mzproc - Streaming Mass Spectrometry Data Processing
//!
//! `mzproc` is the numerical data plane of an LC-MS processing toolchain:
//! streaming mzML and sqMass I/O behind a push-consumer interface, the
//! Numpress codec stack, mass-trace detection, retention-time alignment
//! and precursor m/z correction.
//!
//! ## Key pieces
//!
//! - **Streaming I/O**: readers drive any [`io::MsDataConsumer`]; the mzML
//!   and sqMass writers sit behind that trait, so format conversion is
//!   pipeline composition with bounded memory.
//!
//! - **Codec stack**: [`io::numpress`] implements the MS-Numpress linear,
//!   pic and slof bitstreams with round-trip verification;
//!   [`io::binary`] chains Numpress, zlib and Base64 per data axis.
//!
//! - **Mass traces**: [`algo::MassTraceDetection`] assembles centroided
//!   MS1 peaks into [`model::MassTrace`]s with intensity-weighted
//!   centroids and FWHM estimates.
//!
//! - **Alignment**: [`algo::PoseClusteringAligner`] estimates an affine
//!   RT map between runs; [`algo::TransformationModel`] provides
//!   identity, linear and piecewise interpolated maps with explicit
//!   extrapolation policies.
//!
//! - **Precursor correction**: [`algo::precursor`] retargets MS2
//!   precursor m/z to nearby MS1 peaks or matching features.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mzproc::io::mzml::{transfer, MzMLWriter};
//! use mzproc::io::numpress::{NumpressConfig, NumpressKind};
//! use mzproc::io::PeakFileOptions;
//!
//! // Re-encode an mzML file with Numpress compression on both axes.
//! let mut options = PeakFileOptions::default();
//! options.numpress_mass_time = NumpressConfig::with_kind(NumpressKind::Linear);
//! options.numpress_intensity = NumpressConfig::with_kind(NumpressKind::Slof);
//!
//! let mut writer = MzMLWriter::create("out.mzML", options.clone())?;
//! transfer("in.mzML", &mut writer, &options)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

#![allow(clippy::too_many_arguments)]

pub mod algo;
pub mod io;
pub mod model;

/// Re-export of commonly used types.
pub mod prelude {
    pub use crate::algo::{
        ExtrapolationType, InterpolatedModel, InterpolationType, LinearModel,
        MassTraceDetection, PoseClusteringAligner, StablePairFinder,
        TransformationDescription, TransformationModel,
    };
    pub use crate::io::mzml::{MzMLReader, MzMLWriter};
    pub use crate::io::sqmass::SqMassWriter;
    pub use crate::io::{MsDataConsumer, NoopConsumer, PeakFileOptions};
    pub use crate::model::{
        Chromatogram, Experiment, ExperimentalSettings, Feature, FeatureMap, MassTrace, Peak1D,
        Peak2D, QuantMethod, Spectrum,
    };
}
