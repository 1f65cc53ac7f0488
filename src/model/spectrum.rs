//! Spectrum and chromatogram containers plus the run-level settings that a
//! writer stamps into its output header.

use serde::{Deserialize, Serialize};

/// A single centroided peak in one spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Peak1D {
    /// Mass-to-charge ratio
    pub mz: f64,
    /// Signal intensity
    pub intensity: f32,
}

/// A centroided peak placed in the (RT, m/z) plane.
///
/// The atomic unit of mass-trace detection; immutable after read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Peak2D {
    /// Retention time in seconds
    pub rt: f64,
    /// Mass-to-charge ratio
    pub mz: f64,
    /// Signal intensity
    pub intensity: f32,
}

/// Precursor ion description attached to MS2+ spectra.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Precursor {
    /// Selected ion m/z
    pub mz: f64,
    /// Selected ion intensity, if recorded
    pub intensity: Option<f64>,
    /// Charge state, if recorded
    pub charge: Option<i32>,
    /// Isolation window lower offset (relative to `mz`)
    pub isolation_window_lower: Option<f64>,
    /// Isolation window upper offset (relative to `mz`)
    pub isolation_window_upper: Option<f64>,
}

/// An ordered sequence of 1D peaks with scan-level metadata.
///
/// Invariants: `peaks` sorted by m/z ascending, `ms_level >= 1`.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    /// Native spectrum id from the source file, e.g. `scan=42`
    pub native_id: String,
    /// MS level (1 for survey scans, 2 for fragment scans, ...)
    pub ms_level: u8,
    /// Retention time in seconds
    pub rt: f64,
    /// Precursors (empty for MS1)
    pub precursors: Vec<Precursor>,
    /// Centroided peaks, sorted by m/z ascending
    pub peaks: Vec<Peak1D>,
}

impl Spectrum {
    /// Create an empty spectrum at a given MS level and retention time.
    pub fn new(native_id: impl Into<String>, ms_level: u8, rt: f64) -> Self {
        Self {
            native_id: native_id.into(),
            ms_level,
            rt,
            precursors: Vec::new(),
            peaks: Vec::new(),
        }
    }

    /// Restore the m/z ordering invariant after bulk peak insertion.
    pub fn sort_by_mz(&mut self) {
        self.peaks
            .sort_by(|a, b| a.mz.partial_cmp(&b.mz).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Check the m/z ordering invariant.
    pub fn is_sorted_by_mz(&self) -> bool {
        self.peaks.windows(2).all(|w| w[0].mz <= w[1].mz)
    }

    /// Index of the peak closest in m/z to `mz`, using binary search over
    /// the sorted peak list. `None` on an empty spectrum.
    pub fn nearest_peak_idx(&self, mz: f64) -> Option<usize> {
        if self.peaks.is_empty() {
            return None;
        }
        let ins = self
            .peaks
            .partition_point(|p| p.mz < mz);
        let candidates = [ins.checked_sub(1), (ins < self.peaks.len()).then_some(ins)];
        candidates
            .into_iter()
            .flatten()
            .min_by(|&a, &b| {
                let da = (self.peaks[a].mz - mz).abs();
                let db = (self.peaks[b].mz - mz).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Total ion current (sum of peak intensities).
    pub fn total_ion_current(&self) -> f64 {
        self.peaks.iter().map(|p| p.intensity as f64).sum()
    }

    /// Parse the scan number out of common native id layouts
    /// (`scan=12345`, `controllerType=0 controllerNumber=1 scan=12345`,
    /// `S12345`); falls back to `None`.
    pub fn scan_number(&self) -> Option<i64> {
        if let Some(pos) = self.native_id.find("scan=") {
            let start = pos + 5;
            let end = self.native_id[start..]
                .find(|c: char| !c.is_ascii_digit())
                .map(|i| start + i)
                .unwrap_or(self.native_id.len());
            self.native_id[start..end].parse().ok()
        } else if let Some(rest) = self.native_id.strip_prefix('S') {
            rest.parse().ok()
        } else {
            None
        }
    }
}

/// A single (RT, intensity) point of a chromatogram.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChromatogramPoint {
    /// Retention time in seconds
    pub rt: f64,
    /// Signal intensity
    pub intensity: f32,
}

/// An ordered intensity-over-time trace.
///
/// Invariant: `points` strictly increasing in RT.
#[derive(Debug, Clone, Default)]
pub struct Chromatogram {
    /// Native chromatogram id, e.g. `TIC`
    pub native_id: String,
    /// Precursor isolation target (SRM/MRM), if any
    pub precursor_mz: Option<f64>,
    /// Product isolation target (SRM/MRM), if any
    pub product_mz: Option<f64>,
    /// Data points, strictly increasing in RT
    pub points: Vec<ChromatogramPoint>,
}

impl Chromatogram {
    /// Create an empty chromatogram.
    pub fn new(native_id: impl Into<String>) -> Self {
        Self {
            native_id: native_id.into(),
            precursor_mz: None,
            product_mz: None,
            points: Vec::new(),
        }
    }

    /// Check the strictly-increasing RT invariant.
    pub fn is_strictly_increasing(&self) -> bool {
        self.points.windows(2).all(|w| w[0].rt < w[1].rt)
    }
}

/// Run-level metadata stamped into output files by a writing consumer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExperimentalSettings {
    /// Run identifier
    pub run_id: String,
    /// Name of the originating raw/mzML file
    pub source_file: Option<String>,
    /// Sample name, if annotated
    pub sample_name: Option<String>,
    /// Instrument model description
    pub instrument_model: Option<String>,
    /// Data processing actions already applied, in order
    pub data_processing: Vec<String>,
}

/// An in-memory MS run: settings plus all spectra and chromatograms.
///
/// Streaming pipelines avoid this type; it exists for the algorithms that
/// genuinely need random access (precursor correction, trace detection).
#[derive(Debug, Clone, Default)]
pub struct Experiment {
    /// Run-level metadata
    pub settings: ExperimentalSettings,
    /// All spectra in acquisition order
    pub spectra: Vec<Spectrum>,
    /// All chromatograms
    pub chromatograms: Vec<Chromatogram>,
}

impl Experiment {
    /// Indices of all MS1 spectra, in acquisition order.
    pub fn ms1_indices(&self) -> Vec<usize> {
        self.spectra
            .iter()
            .enumerate()
            .filter(|(_, s)| s.ms_level == 1)
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of the most recent MS1 spectrum at or before `idx`, if any.
    pub fn preceding_ms1(&self, idx: usize) -> Option<usize> {
        self.spectra[..idx]
            .iter()
            .rposition(|s| s.ms_level == 1)
    }
}
