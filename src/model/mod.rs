//! Kernel data model: peaks, spectra, chromatograms, mass traces and
//! feature maps.
//!
//! These types are deliberately plain containers. All invariants that the
//! processing code relies on (m/z ordering inside spectra, strictly
//! increasing chromatogram RT, id-based consensus references) are stated on
//! the types themselves; the algorithms in [`crate::algo`] assume them.

mod feature;
mod spectrum;
mod trace;

pub use feature::{
    ConsensusFeature, ConsensusMap, Feature, FeatureHandle, FeatureMap,
};
pub use spectrum::{
    Chromatogram, ChromatogramPoint, Experiment, ExperimentalSettings, Peak1D, Peak2D, Precursor,
    Spectrum,
};
pub use trace::{MassTrace, QuantMethod};

/// Mass difference between the C13 and C12 isotopes in unified atomic mass
/// units. Used to place isotopic trace positions of a charged feature.
pub const C13C12_MASS_DIFF: f64 = 1.003_354_837_8;
