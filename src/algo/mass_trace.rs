//! Mass trace detection over centroided MS1 spectra.
//!
//! Seeded-growth assembly: peaks from all MS1 scans are pooled and sorted
//! by intensity; each unused apex seeds a trace that is extended forward
//! and backward across adjacent MS1 scans, always attaching the peak
//! closest in m/z to the current intensity-weighted centroid. Extension
//! stops after a configurable number of consecutive scans without a match.
//!
//! Output traces appear in apex-intensity-descending (insertion) order;
//! callers that need RT ordering must sort themselves.

use crate::model::{MassTrace, Peak2D, QuantMethod, Spectrum};

/// Parameters of the mass-trace detector.
#[derive(Debug, Clone)]
pub struct MassTraceDetection {
    /// Mass tolerance around the trace centroid, in ppm
    pub mass_error_ppm: f64,
    /// Peaks at or below this intensity are ignored entirely
    pub noise_threshold_int: f64,
    /// Minimum RT span of an accepted trace, in seconds
    pub min_trace_length: f64,
    /// Minimum number of peaks of an accepted trace
    pub min_peaks: usize,
    /// Consecutive scans without a matching peak before extension stops
    pub trace_termination_outliers: usize,
    /// Recompute the intensity-weighted m/z standard deviation per trace
    pub reestimate_mt_sd: bool,
    /// Quantification method stamped on accepted traces
    pub quant_method: QuantMethod,
}

impl Default for MassTraceDetection {
    fn default() -> Self {
        Self {
            mass_error_ppm: 20.0,
            noise_threshold_int: 10.0,
            min_trace_length: 5.0,
            min_peaks: 3,
            trace_termination_outliers: 5,
            reestimate_mt_sd: true,
            quant_method: QuantMethod::Area,
        }
    }
}

/// Iterative update of an intensity-weighted mean m/z.
///
/// Given the cached numerator and denominator partial sums, folds one more
/// `(mz, intensity)` observation into the centroid. Numerically preferred
/// over recomputing the full sums on every extension step.
pub fn update_iterative_weighted_mean_mz(
    added_mz: f64,
    added_intensity: f64,
    centroid_mz: &mut f64,
    prev_numerator: &mut f64,
    prev_denominator: &mut f64,
) {
    let numerator = *prev_numerator + added_mz * added_intensity;
    let denominator = *prev_denominator + added_intensity;
    if denominator > 0.0 {
        *centroid_mz = numerator / denominator;
    }
    *prev_numerator = numerator;
    *prev_denominator = denominator;
}

impl MassTraceDetection {
    /// Run detection over a sequence of spectra ordered by RT. Non-MS1
    /// spectra are skipped without affecting scan adjacency.
    pub fn run(&self, spectra: &[Spectrum]) -> Vec<MassTrace> {
        let work: Vec<&Spectrum> = spectra.iter().filter(|s| s.ms_level == 1).collect();
        if work.is_empty() {
            return Vec::new();
        }

        // Pool every peak above the noise floor, apex candidates first.
        let mut apices: Vec<(usize, usize, f32)> = Vec::new();
        for (scan_idx, spectrum) in work.iter().enumerate() {
            for (peak_idx, peak) in spectrum.peaks.iter().enumerate() {
                if peak.intensity as f64 > self.noise_threshold_int {
                    apices.push((scan_idx, peak_idx, peak.intensity));
                }
            }
        }
        apices.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut visited: Vec<Vec<bool>> = work.iter().map(|s| vec![false; s.peaks.len()]).collect();
        let mut traces: Vec<MassTrace> = Vec::new();

        for &(apex_scan, apex_peak, _) in &apices {
            if visited[apex_scan][apex_peak] {
                continue;
            }
            visited[apex_scan][apex_peak] = true;

            let seed = &work[apex_scan].peaks[apex_peak];
            let mut centroid_mz = seed.mz;
            let mut numerator = seed.mz * seed.intensity as f64;
            let mut denominator = seed.intensity as f64;

            let seed_peak = Peak2D {
                rt: work[apex_scan].rt,
                mz: seed.mz,
                intensity: seed.intensity,
            };
            let mut forward: Vec<Peak2D> = Vec::new();
            let mut backward: Vec<Peak2D> = Vec::new();

            // Forward along later scans, then backward along earlier ones.
            for direction in [1i64, -1i64] {
                let mut misses = 0usize;
                let mut scan = apex_scan as i64 + direction;
                while scan >= 0 && (scan as usize) < work.len() {
                    let scan_idx = scan as usize;
                    match self.match_peak(work[scan_idx], &visited[scan_idx], centroid_mz) {
                        Some(peak_idx) => {
                            visited[scan_idx][peak_idx] = true;
                            let peak = &work[scan_idx].peaks[peak_idx];
                            update_iterative_weighted_mean_mz(
                                peak.mz,
                                peak.intensity as f64,
                                &mut centroid_mz,
                                &mut numerator,
                                &mut denominator,
                            );
                            let found = Peak2D {
                                rt: work[scan_idx].rt,
                                mz: peak.mz,
                                intensity: peak.intensity,
                            };
                            if direction > 0 {
                                forward.push(found);
                            } else {
                                backward.push(found);
                            }
                            misses = 0;
                        }
                        None => {
                            misses += 1;
                            if misses > self.trace_termination_outliers {
                                break;
                            }
                        }
                    }
                    scan += direction;
                }
            }

            let mut peaks = Vec::with_capacity(backward.len() + 1 + forward.len());
            peaks.extend(backward.into_iter().rev());
            peaks.push(seed_peak);
            peaks.extend(forward);

            if peaks.len() < self.min_peaks {
                continue;
            }
            let span = peaks[peaks.len() - 1].rt - peaks[0].rt;
            if span < self.min_trace_length {
                continue;
            }
            if peaks.iter().map(|p| p.intensity as f64).sum::<f64>() <= 0.0 {
                continue;
            }

            let mut trace = MassTrace::new(peaks);
            trace.set_label(format!("T{}", traces.len() + 1));
            trace.set_quant_method(self.quant_method);
            trace.estimate_fwhm(false);
            if self.reestimate_mt_sd {
                trace.update_weighted_mz_sd();
            }
            traces.push(trace);
        }

        log::debug!(
            "mass trace detection: {} apices above noise, {} traces",
            apices.len(),
            traces.len()
        );
        traces
    }

    /// Nearest unconsumed peak to `centroid_mz` within tolerance, if any.
    fn match_peak(
        &self,
        spectrum: &Spectrum,
        visited: &[bool],
        centroid_mz: f64,
    ) -> Option<usize> {
        let idx = spectrum.nearest_peak_idx(centroid_mz)?;
        let peak = &spectrum.peaks[idx];
        let tolerance = centroid_mz * self.mass_error_ppm * 1e-6;
        if (peak.mz - centroid_mz).abs() > tolerance {
            return None;
        }
        if visited[idx] || peak.intensity as f64 <= self.noise_threshold_int {
            return None;
        }
        Some(idx)
    }
}
