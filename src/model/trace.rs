//! Mass trace container: one ion followed across consecutive MS1 scans.

use super::Peak2D;

/// How a mass trace is quantified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantMethod {
    /// Trapezoidal area of the FWHM window
    #[default]
    Area,
    /// Median of the FWHM window intensities
    Median,
}

impl std::str::FromStr for QuantMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "area" => Ok(QuantMethod::Area),
            "median" => Ok(QuantMethod::Median),
            other => Err(format!("unknown quantification method '{other}'")),
        }
    }
}

/// A container gathering peaks similar in m/z and consecutive in RT.
///
/// Invariants: peaks are sorted by RT ascending; the centroid values are
/// functions of the current peak sequence; the FWHM indices reference the
/// current sequence (inclusive on both ends).
#[derive(Debug, Clone, Default)]
pub struct MassTrace {
    peaks: Vec<Peak2D>,
    centroid_mz: f64,
    centroid_rt: f64,
    centroid_sd: f64,
    label: String,
    smoothed_intensities: Vec<f64>,
    fwhm: f64,
    fwhm_start_idx: usize,
    fwhm_end_idx: usize,
    quant_method: QuantMethod,
}

impl MassTrace {
    /// Build a trace from a peak sequence sorted by RT. Centroids are
    /// computed immediately.
    pub fn new(peaks: Vec<Peak2D>) -> Self {
        let mut mt = Self {
            peaks,
            ..Default::default()
        };
        mt.update_weighted_mean_mz();
        mt.update_weighted_mean_rt();
        mt
    }

    /// Number of peaks in the trace.
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    /// Whether the trace holds no peaks.
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// The peaks, sorted by RT.
    pub fn peaks(&self) -> &[Peak2D] {
        &self.peaks
    }

    /// Intensity-weighted centroid m/z.
    pub fn centroid_mz(&self) -> f64 {
        self.centroid_mz
    }

    /// Intensity-weighted centroid RT.
    pub fn centroid_rt(&self) -> f64 {
        self.centroid_rt
    }

    /// Intensity-weighted m/z standard deviation.
    pub fn centroid_sd(&self) -> f64 {
        self.centroid_sd
    }

    /// Trace label (assigned by the detector, e.g. `T12`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Set the trace label.
    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// FWHM of the chromatographic peak in seconds. Zero until
    /// [`estimate_fwhm`](Self::estimate_fwhm) has run.
    pub fn fwhm(&self) -> f64 {
        self.fwhm
    }

    /// Inclusive `[start, end]` peak indices of the FWHM window.
    pub fn fwhm_borders(&self) -> (usize, usize) {
        (self.fwhm_start_idx, self.fwhm_end_idx)
    }

    /// The quantification method used by [`intensity`](Self::intensity).
    pub fn quant_method(&self) -> QuantMethod {
        self.quant_method
    }

    /// Choose area or median quantification.
    pub fn set_quant_method(&mut self, method: QuantMethod) {
        self.quant_method = method;
    }

    /// Smoothed intensities, empty unless smoothing was done externally.
    pub fn smoothed_intensities(&self) -> &[f64] {
        &self.smoothed_intensities
    }

    /// Attach externally smoothed intensities. The buffer length must equal
    /// the peak count.
    pub fn set_smoothed_intensities(&mut self, smoothed: Vec<f64>) {
        assert_eq!(
            smoothed.len(),
            self.peaks.len(),
            "smoothed intensity count deviates from mass trace size"
        );
        self.smoothed_intensities = smoothed;
    }

    /// RT span between the first and last peak.
    pub fn trace_length(&self) -> f64 {
        match (self.peaks.first(), self.peaks.last()) {
            (Some(first), Some(last)) if self.peaks.len() > 1 => (last.rt - first.rt).abs(),
            _ => 0.0,
        }
    }

    /// Recompute the centroid m/z as the intensity-weighted mean.
    pub fn update_weighted_mean_mz(&mut self) {
        let denom: f64 = self.peaks.iter().map(|p| p.intensity as f64).sum();
        if denom > 0.0 {
            let num: f64 = self
                .peaks
                .iter()
                .map(|p| p.mz * p.intensity as f64)
                .sum();
            self.centroid_mz = num / denom;
        }
    }

    /// Recompute the centroid RT as the intensity-weighted mean.
    pub fn update_weighted_mean_rt(&mut self) {
        let denom: f64 = self.peaks.iter().map(|p| p.intensity as f64).sum();
        if denom > 0.0 {
            let num: f64 = self
                .peaks
                .iter()
                .map(|p| p.rt * p.intensity as f64)
                .sum();
            self.centroid_rt = num / denom;
        }
    }

    /// Recompute the centroid m/z as the median of m/z values.
    pub fn update_median_mz(&mut self) {
        if self.peaks.is_empty() {
            return;
        }
        let mut mzs: Vec<f64> = self.peaks.iter().map(|p| p.mz).collect();
        mzs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.centroid_mz = median_of_sorted(&mzs);
    }

    /// Recompute the intensity-weighted m/z standard deviation around the
    /// current centroid. Call after one of the centroid updates.
    pub fn update_weighted_mz_sd(&mut self) {
        let denom: f64 = self.peaks.iter().map(|p| p.intensity as f64).sum();
        if denom > 0.0 {
            let var: f64 = self
                .peaks
                .iter()
                .map(|p| {
                    let d = p.mz - self.centroid_mz;
                    p.intensity as f64 * d * d
                })
                .sum::<f64>()
                / denom;
            self.centroid_sd = var.sqrt();
        }
    }

    /// Index of the most intense peak, optionally on the smoothed buffer.
    pub fn find_max_by_int_peak(&self, use_smoothed: bool) -> usize {
        let n = self.peaks.len();
        if n == 0 {
            return 0;
        }
        (0..n)
            .max_by(|&a, &b| {
                let ia = self.intensity_at(a, use_smoothed);
                let ib = self.intensity_at(b, use_smoothed);
                ia.partial_cmp(&ib).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0)
    }

    /// Estimate the FWHM around the most intense peak by walking outward
    /// until the intensity drops below half the maximum. Stores the window
    /// and returns the FWHM in seconds.
    ///
    /// The stored borders `[a, b]` satisfy `intensity(a) >= max/2` and, when
    /// `a > 0`, `intensity(a - 1) < max/2` (symmetrically at `b`).
    /// Single-peak traces bypass estimation and report zero width.
    pub fn estimate_fwhm(&mut self, use_smoothed: bool) -> f64 {
        if self.peaks.len() <= 1 {
            self.fwhm_start_idx = 0;
            self.fwhm_end_idx = 0;
            self.fwhm = 0.0;
            return self.fwhm;
        }
        let max_idx = self.find_max_by_int_peak(use_smoothed);
        let half_max = self.intensity_at(max_idx, use_smoothed) / 2.0;

        let mut left = max_idx;
        while left > 0 && self.intensity_at(left - 1, use_smoothed) >= half_max {
            left -= 1;
        }
        let mut right = max_idx;
        while right + 1 < self.peaks.len() && self.intensity_at(right + 1, use_smoothed) >= half_max
        {
            right += 1;
        }

        self.fwhm_start_idx = left;
        self.fwhm_end_idx = right;
        self.fwhm = (self.peaks[right].rt - self.peaks[left].rt).abs();
        self.fwhm
    }

    /// Trapezoidal area under the whole trace.
    pub fn compute_peak_area(&self) -> f64 {
        trapezoid(&self.peaks, 0, self.peaks.len().saturating_sub(1), |i| {
            self.peaks[i].intensity as f64
        })
    }

    /// Trapezoidal area restricted to the FWHM window.
    pub fn compute_fwhm_area(&self) -> f64 {
        trapezoid(&self.peaks, self.fwhm_start_idx, self.fwhm_end_idx, |i| {
            self.peaks[i].intensity as f64
        })
    }

    /// Trapezoidal area over the FWHM window on the smoothed intensities.
    pub fn compute_fwhm_area_smooth(&self) -> f64 {
        if self.smoothed_intensities.len() != self.peaks.len() {
            return 0.0;
        }
        trapezoid(&self.peaks, self.fwhm_start_idx, self.fwhm_end_idx, |i| {
            self.smoothed_intensities[i]
        })
    }

    /// Quantify the trace with the configured method. Single-peak traces
    /// report the peak intensity itself.
    pub fn intensity(&self, use_smoothed: bool) -> f64 {
        if self.peaks.len() == 1 {
            return self.peaks[0].intensity as f64;
        }
        match self.quant_method {
            QuantMethod::Area => {
                if use_smoothed {
                    self.compute_fwhm_area_smooth()
                } else {
                    self.compute_fwhm_area()
                }
            }
            QuantMethod::Median => self.compute_median_fwhm_intensity(use_smoothed),
        }
    }

    fn compute_median_fwhm_intensity(&self, use_smoothed: bool) -> f64 {
        let (a, b) = (self.fwhm_start_idx, self.fwhm_end_idx);
        if a > b || b >= self.peaks.len() {
            return 0.0;
        }
        let mut ints: Vec<f64> = (a..=b).map(|i| self.intensity_at(i, use_smoothed)).collect();
        ints.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
        median_of_sorted(&ints)
    }

    fn intensity_at(&self, idx: usize, use_smoothed: bool) -> f64 {
        if use_smoothed && self.smoothed_intensities.len() == self.peaks.len() {
            self.smoothed_intensities[idx]
        } else {
            self.peaks[idx].intensity as f64
        }
    }
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn trapezoid<F: Fn(usize) -> f64>(peaks: &[Peak2D], start: usize, end: usize, intensity: F) -> f64 {
    if peaks.is_empty() || start >= end || end >= peaks.len() {
        return 0.0;
    }
    let mut area = 0.0;
    for i in start..end {
        let dt = peaks[i + 1].rt - peaks[i].rt;
        area += (intensity(i) + intensity(i + 1)) / 2.0 * dt;
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(data: &[(f64, f64, f32)]) -> MassTrace {
        MassTrace::new(
            data.iter()
                .map(|&(rt, mz, intensity)| Peak2D { rt, mz, intensity })
                .collect(),
        )
    }

    #[test]
    fn weighted_centroid_matches_direct_formula() {
        let mt = trace(&[
            (10.0, 500.00, 100.0),
            (11.0, 500.01, 300.0),
            (12.0, 500.02, 100.0),
        ]);
        let expected =
            (500.00 * 100.0 + 500.01 * 300.0 + 500.02 * 100.0) / (100.0 + 300.0 + 100.0);
        assert!((mt.centroid_mz() - expected).abs() < 1e-12);
    }

    #[test]
    fn fwhm_borders_satisfy_half_max_property() {
        let mut mt = trace(&[
            (0.0, 500.0, 10.0),
            (1.0, 500.0, 40.0),
            (2.0, 500.0, 100.0),
            (3.0, 500.0, 60.0),
            (4.0, 500.0, 20.0),
        ]);
        let fwhm = mt.estimate_fwhm(false);
        let (a, b) = mt.fwhm_borders();
        assert_eq!((a, b), (2, 3));
        assert!((fwhm - 1.0).abs() < 1e-12);
        let half = 50.0;
        assert!(mt.peaks()[a].intensity as f64 >= half);
        assert!((mt.peaks()[a - 1].intensity as f64) < half);
        assert!(mt.peaks()[b].intensity as f64 >= half);
        assert!((mt.peaks()[b + 1].intensity as f64) < half);
    }

    #[test]
    fn single_peak_trace_bypasses_fwhm() {
        let mut mt = trace(&[(5.0, 400.0, 77.0)]);
        assert_eq!(mt.estimate_fwhm(false), 0.0);
        assert_eq!(mt.fwhm_borders(), (0, 0));
        assert!((mt.intensity(false) - 77.0).abs() < 1e-9);
    }

    #[test]
    fn trapezoid_area_over_whole_trace() {
        let mt = trace(&[(0.0, 1.0, 0.0), (1.0, 1.0, 2.0), (3.0, 1.0, 0.0)]);
        // (0+2)/2*1 + (2+0)/2*2 = 3
        assert!((mt.compute_peak_area() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn median_quantification_over_fwhm_window() {
        let mut mt = trace(&[
            (0.0, 1.0, 1.0),
            (1.0, 1.0, 8.0),
            (2.0, 1.0, 10.0),
            (3.0, 1.0, 6.0),
            (4.0, 1.0, 1.0),
        ]);
        mt.estimate_fwhm(false);
        mt.set_quant_method(QuantMethod::Median);
        assert_eq!(mt.fwhm_borders(), (1, 3));
        assert!((mt.intensity(false) - 8.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "smoothed intensity count")]
    fn smoothed_buffer_length_is_enforced() {
        let mut mt = trace(&[(0.0, 1.0, 1.0), (1.0, 1.0, 2.0)]);
        mt.set_smoothed_intensities(vec![1.0]);
    }

    #[test]
    fn weighted_sd_is_zero_for_constant_mz() {
        let mut mt = trace(&[(0.0, 500.0, 5.0), (1.0, 500.0, 9.0)]);
        mt.update_weighted_mz_sd();
        assert!(mt.centroid_sd().abs() < 1e-12);
    }
}
