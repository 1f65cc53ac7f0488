//! User-facing filter and precision settings for peak file I/O.

use serde::{Deserialize, Serialize};

use super::numpress::NumpressConfig;

/// An optional closed interval used for RT/m/z/intensity windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Lower bound, inclusive
    pub min: f64,
    /// Upper bound, inclusive
    pub max: f64,
}

impl Range {
    /// Whether `value` falls inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Filter and encoding settings applied by readers and writers.
///
/// Options are fixed once a pipeline has been constructed from them;
/// writers copy the value and never observe later mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFileOptions {
    /// Restrict reading to this RT window
    pub rt_range: Option<Range>,
    /// Restrict reading to this m/z window
    pub mz_range: Option<Range>,
    /// Drop peaks outside this intensity window
    pub intensity_range: Option<Range>,
    /// Restrict reading to these MS levels; empty accepts all levels
    pub ms_levels: Vec<u8>,
    /// Apply zlib to binary payloads
    pub zlib_compression: bool,
    /// Store m/z and RT axes as 32-bit floats (Numpress disabled only)
    pub mz_32_bit: bool,
    /// Store intensity axes as 32-bit floats (Numpress disabled only)
    pub intensity_32_bit: bool,
    /// Numpress configuration for mass/time axes
    pub numpress_mass_time: NumpressConfig,
    /// Numpress configuration for intensity axes
    pub numpress_intensity: NumpressConfig,
    /// Write the trailing offset index + checksum (mzML only)
    pub write_index: bool,
    /// Items buffered per batch by pooling writers (sqMass)
    pub pool_size: usize,
}

impl Default for PeakFileOptions {
    fn default() -> Self {
        Self {
            rt_range: None,
            mz_range: None,
            intensity_range: None,
            ms_levels: Vec::new(),
            zlib_compression: false,
            mz_32_bit: false,
            intensity_32_bit: true,
            numpress_mass_time: NumpressConfig::default(),
            numpress_intensity: NumpressConfig::default(),
            write_index: true,
            pool_size: 100,
        }
    }
}

impl PeakFileOptions {
    /// Whether `ms_level` passes the level whitelist.
    pub fn accepts_ms_level(&self, ms_level: u8) -> bool {
        self.ms_levels.is_empty() || self.ms_levels.contains(&ms_level)
    }

    /// Whether a spectrum at `rt` with `ms_level` passes the scan filters.
    pub fn accepts_spectrum(&self, rt: f64, ms_level: u8) -> bool {
        self.accepts_ms_level(ms_level)
            && self.rt_range.map_or(true, |r| r.contains(rt))
    }
}
