//! Precursor m/z correction against MS1 evidence.
//!
//! Three exclusive modes: retarget each MS2 precursor to the nearest peak
//! of the most recent MS1 spectrum, to the highest-intensity MS1 peak
//! inside a tolerance window, or to matching features (which also allows
//! charge correction). Every correction is recorded as a
//! `(RT, uncalibrated, calibrated)` triple for the optional CSV log.

use std::collections::BTreeSet;
use std::path::Path;

use crate::model::{Experiment, Feature, FeatureMap, Spectrum};

/// Column names of the correction CSV log.
pub const CSV_HEADER: [&str; 4] = ["RT", "uncalibratedMZ", "calibratedMZ", "deltaMZ"];

/// One applied correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionRecord {
    /// RT of the corrected MS2 spectrum (seconds)
    pub rt: f64,
    /// Precursor m/z before correction
    pub uncalibrated_mz: f64,
    /// Precursor m/z after correction
    pub calibrated_mz: f64,
}

impl CorrectionRecord {
    /// Signed correction delta.
    pub fn delta_mz(&self) -> f64 {
        self.calibrated_mz - self.uncalibrated_mz
    }
}

fn tolerance_window(mz: f64, tolerance: f64, unit_ppm: bool) -> f64 {
    if unit_ppm {
        mz * tolerance * 1e-6
    } else {
        tolerance
    }
}

/// Retarget each MS2 precursor to the closest peak (in m/z) of the most
/// recent MS1 spectrum, when that peak lies within the tolerance. Returns
/// the indices of corrected spectra.
pub fn correct_to_nearest_ms1_peak(
    experiment: &mut Experiment,
    mz_tolerance: f64,
    unit_ppm: bool,
    records: &mut Vec<CorrectionRecord>,
) -> BTreeSet<usize> {
    assert!(mz_tolerance >= 0.0, "negative m/z tolerance");
    correct_against_ms1(experiment, records, |ms1, precursor_mz| {
        let idx = ms1.nearest_peak_idx(precursor_mz)?;
        let candidate = ms1.peaks[idx].mz;
        let window = tolerance_window(precursor_mz, mz_tolerance, unit_ppm);
        ((candidate - precursor_mz).abs() <= window).then_some(candidate)
    })
}

/// Retarget each MS2 precursor to the highest-intensity peak of the most
/// recent MS1 spectrum inside the tolerance window. A window of roughly
/// `1 / max_charge` Da is recommended. Returns the corrected indices.
pub fn correct_to_highest_intensity_ms1_peak(
    experiment: &mut Experiment,
    mz_tolerance: f64,
    unit_ppm: bool,
    records: &mut Vec<CorrectionRecord>,
) -> BTreeSet<usize> {
    assert!(mz_tolerance >= 0.0, "negative m/z tolerance");
    correct_against_ms1(experiment, records, |ms1, precursor_mz| {
        let window = tolerance_window(precursor_mz, mz_tolerance, unit_ppm);
        let lo = ms1.peaks.partition_point(|p| p.mz < precursor_mz - window);
        let hi = ms1.peaks.partition_point(|p| p.mz <= precursor_mz + window);
        ms1.peaks[lo..hi]
            .iter()
            .max_by(|a, b| {
                a.intensity
                    .partial_cmp(&b.intensity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|p| p.mz)
    })
}

fn correct_against_ms1<F>(
    experiment: &mut Experiment,
    records: &mut Vec<CorrectionRecord>,
    pick: F,
) -> BTreeSet<usize>
where
    F: Fn(&Spectrum, f64) -> Option<f64>,
{
    let mut corrections: Vec<(usize, usize, f64)> = Vec::new();
    for idx in 0..experiment.spectra.len() {
        if experiment.spectra[idx].ms_level != 2 {
            continue;
        }
        let Some(ms1_idx) = experiment.preceding_ms1(idx) else {
            continue;
        };
        let ms1 = &experiment.spectra[ms1_idx];
        for (pi, precursor) in experiment.spectra[idx].precursors.iter().enumerate() {
            if let Some(new_mz) = pick(ms1, precursor.mz) {
                corrections.push((idx, pi, new_mz));
            }
        }
    }

    let mut corrected = BTreeSet::new();
    for (idx, pi, new_mz) in corrections {
        let rt = experiment.spectra[idx].rt;
        let precursor = &mut experiment.spectra[idx].precursors[pi];
        records.push(CorrectionRecord {
            rt,
            uncalibrated_mz: precursor.mz,
            calibrated_mz: new_mz,
        });
        precursor.mz = new_mz;
        corrected.insert(idx);
    }
    corrected
}

/// Feature-based correction policy.
#[derive(Debug, Clone)]
pub struct FeatureCorrectionParams {
    /// m/z tolerance for matching a precursor to a feature trace
    pub mz_tolerance: f64,
    /// Interpret `mz_tolerance` as ppm
    pub mz_unit_ppm: bool,
    /// Extra RT tolerance added to the feature hull bounds (seconds)
    pub rt_tolerance: f64,
    /// Highest isotopic trace index considered when matching
    pub max_trace: u32,
    /// Only consider features whose charge matches the recorded precursor
    pub believe_charge: bool,
    /// Keep the original MS2 and append corrected copies
    pub keep_original: bool,
    /// With `keep_original`, emit one copy per matching feature instead of
    /// only the nearest
    pub assign_all_matching: bool,
}

impl Default for FeatureCorrectionParams {
    fn default() -> Self {
        Self {
            mz_tolerance: 5.0,
            mz_unit_ppm: true,
            rt_tolerance: 0.0,
            max_trace: 2,
            believe_charge: false,
            keep_original: false,
            assign_all_matching: false,
        }
    }
}

/// Match each MS2 precursor to enclosing features and retarget it to the
/// feature's monoisotopic m/z (and charge, unless `believe_charge`).
/// Returns the indices of corrected spectra, including appended copies.
pub fn correct_to_nearest_feature(
    features: &FeatureMap,
    experiment: &mut Experiment,
    params: &FeatureCorrectionParams,
    records: &mut Vec<CorrectionRecord>,
) -> BTreeSet<usize> {
    assert!(params.mz_tolerance >= 0.0, "negative m/z tolerance");
    assert!(params.rt_tolerance >= 0.0, "negative RT tolerance");

    let mut corrected = BTreeSet::new();
    let mut appended: Vec<Spectrum> = Vec::new();

    for idx in 0..experiment.spectra.len() {
        let spectrum = &experiment.spectra[idx];
        if spectrum.ms_level != 2 || spectrum.precursors.is_empty() {
            continue;
        }
        let rt = spectrum.rt;
        let precursor = &spectrum.precursors[0];

        let mut matching: Vec<&Feature> = features
            .features
            .iter()
            .filter(|f| {
                rt >= f.rt_range.0 - params.rt_tolerance
                    && rt <= f.rt_range.1 + params.rt_tolerance
            })
            .filter(|f| {
                if params.believe_charge {
                    match precursor.charge {
                        Some(charge) => f.charge == charge,
                        None => true,
                    }
                } else {
                    true
                }
            })
            .filter(|f| trace_match(f, precursor.mz, params).is_some())
            .collect();
        if matching.is_empty() {
            continue;
        }
        matching.sort_by(|a, b| {
            let da = (a.mz - precursor.mz).abs();
            let db = (b.mz - precursor.mz).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

        if params.keep_original {
            let chosen: &[&Feature] = if params.assign_all_matching {
                &matching
            } else {
                &matching[..1]
            };
            for (copy_nr, feature) in chosen.iter().enumerate() {
                let mut copy = experiment.spectra[idx].clone();
                copy.native_id = format!("{}_corrected_{}", copy.native_id, copy_nr);
                apply_feature(&mut copy, feature, params, records);
                appended.push(copy);
            }
        } else {
            let nearest = matching[0];
            // Reborrow mutably; `matching` only borrowed `features`.
            let nearest = nearest.clone();
            let spectrum = &mut experiment.spectra[idx];
            apply_feature(spectrum, &nearest, params, records);
            corrected.insert(idx);
        }
    }

    for spectrum in appended {
        experiment.spectra.push(spectrum);
        corrected.insert(experiment.spectra.len() - 1);
    }
    corrected
}

/// The isotopic trace index of `feature` that matches `precursor_mz`, if
/// any, up to `max_trace`.
fn trace_match(feature: &Feature, precursor_mz: f64, params: &FeatureCorrectionParams) -> Option<u32> {
    (0..=params.max_trace).find(|&trace| {
        let trace_mz = feature.isotope_trace_mz(trace);
        let window = tolerance_window(trace_mz, params.mz_tolerance, params.mz_unit_ppm);
        (precursor_mz - trace_mz).abs() <= window
    })
}

fn apply_feature(
    spectrum: &mut Spectrum,
    feature: &Feature,
    params: &FeatureCorrectionParams,
    records: &mut Vec<CorrectionRecord>,
) {
    let rt = spectrum.rt;
    let precursor = &mut spectrum.precursors[0];
    records.push(CorrectionRecord {
        rt,
        uncalibrated_mz: precursor.mz,
        calibrated_mz: feature.mz,
    });
    precursor.mz = feature.mz;
    if !params.believe_charge && feature.charge != 0 {
        precursor.charge = Some(feature.charge);
    }
}

/// Write the correction log as CSV with the standard header.
pub fn write_correction_csv(
    path: impl AsRef<Path>,
    records: &[CorrectionRecord],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record(&[
            format!("{:.6}", record.rt),
            format!("{:.10}", record.uncalibrated_mz),
            format!("{:.10}", record.calibrated_mz),
            format!("{:.10}", record.delta_mz()),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Peak1D, Precursor};

    fn experiment_with_ms1_peaks(peaks: &[(f64, f32)], precursor_mz: f64) -> Experiment {
        let mut exp = Experiment::default();
        let mut ms1 = Spectrum::new("scan=1", 1, 100.0);
        ms1.peaks = peaks
            .iter()
            .map(|&(mz, intensity)| Peak1D { mz, intensity })
            .collect();
        exp.spectra.push(ms1);

        let mut ms2 = Spectrum::new("scan=2", 2, 100.5);
        ms2.precursors.push(Precursor {
            mz: precursor_mz,
            charge: Some(2),
            ..Default::default()
        });
        exp.spectra.push(ms2);
        exp
    }

    #[test]
    fn nearest_peak_mode_rewrites_within_tolerance() {
        let mut exp = experiment_with_ms1_peaks(&[(500.1234, 100.0)], 500.1240);
        let mut records = Vec::new();
        // 5 ppm of 500 is ~0.0025; the 0.0006 delta is inside.
        let corrected = correct_to_nearest_ms1_peak(&mut exp, 5.0, true, &mut records);
        assert_eq!(corrected, BTreeSet::from([1]));
        assert!((exp.spectra[1].precursors[0].mz - 500.1234).abs() < 1e-12);
        assert_eq!(records.len(), 1);
        assert!((records[0].delta_mz() - (500.1234 - 500.1240)).abs() < 1e-9);
    }

    #[test]
    fn nearest_peak_mode_respects_tolerance() {
        let mut exp = experiment_with_ms1_peaks(&[(500.5, 100.0)], 500.1240);
        let mut records = Vec::new();
        let corrected = correct_to_nearest_ms1_peak(&mut exp, 5.0, true, &mut records);
        assert!(corrected.is_empty());
        assert!((exp.spectra[1].precursors[0].mz - 500.1240).abs() < 1e-12);
        assert!(records.is_empty());
    }

    #[test]
    fn highest_intensity_mode_prefers_intensity_over_proximity() {
        let mut exp = experiment_with_ms1_peaks(
            &[(500.120, 50.0), (500.1239, 10.0), (500.128, 200.0)],
            500.1240,
        );
        let mut records = Vec::new();
        let corrected =
            correct_to_highest_intensity_ms1_peak(&mut exp, 0.01, false, &mut records);
        assert_eq!(corrected.len(), 1);
        assert!((exp.spectra[1].precursors[0].mz - 500.128).abs() < 1e-12);
    }

    fn feature_at(rt: f64, mz: f64, charge: i32) -> Feature {
        Feature {
            id: 1,
            rt,
            mz,
            intensity: 1000.0,
            charge,
            quality: 1.0,
            rt_range: (rt - 10.0, rt + 10.0),
            peptide_sequences: Vec::new(),
        }
    }

    #[test]
    fn feature_mode_corrects_mz_and_charge() {
        let mut exp = experiment_with_ms1_peaks(&[], 500.1250);
        let features = FeatureMap {
            features: vec![feature_at(100.0, 500.1234, 3)],
        };
        let mut records = Vec::new();
        let params = FeatureCorrectionParams::default();
        let corrected = correct_to_nearest_feature(&features, &mut exp, &params, &mut records);
        assert_eq!(corrected, BTreeSet::from([1]));
        let precursor = &exp.spectra[1].precursors[0];
        assert!((precursor.mz - 500.1234).abs() < 1e-12);
        assert_eq!(precursor.charge, Some(3));
    }

    #[test]
    fn feature_mode_matches_isotope_traces() {
        // Precursor sits on the first isotopic trace of a 2+ feature.
        let feature = feature_at(100.0, 500.0, 2);
        let trace1 = feature.isotope_trace_mz(1);
        let mut exp = experiment_with_ms1_peaks(&[], trace1);
        let features = FeatureMap {
            features: vec![feature],
        };
        let mut records = Vec::new();
        let params = FeatureCorrectionParams::default();
        let corrected = correct_to_nearest_feature(&features, &mut exp, &params, &mut records);
        assert_eq!(corrected.len(), 1);
        assert!((exp.spectra[1].precursors[0].mz - 500.0).abs() < 1e-12);
    }

    #[test]
    fn believe_charge_filters_features() {
        let mut exp = experiment_with_ms1_peaks(&[], 500.1234);
        let features = FeatureMap {
            features: vec![feature_at(100.0, 500.1234, 3)],
        };
        let mut records = Vec::new();
        let params = FeatureCorrectionParams {
            believe_charge: true,
            ..Default::default()
        };
        // Recorded charge is 2, feature is 3+: no candidates.
        let corrected = correct_to_nearest_feature(&features, &mut exp, &params, &mut records);
        assert!(corrected.is_empty());
    }

    #[test]
    fn keep_original_appends_copies() {
        let mut exp = experiment_with_ms1_peaks(&[], 500.1234);
        let features = FeatureMap {
            features: vec![
                feature_at(100.0, 500.1234, 2),
                feature_at(100.0, 500.1236, 3),
            ],
        };
        let mut records = Vec::new();
        let params = FeatureCorrectionParams {
            keep_original: true,
            assign_all_matching: true,
            ..Default::default()
        };
        let corrected = correct_to_nearest_feature(&features, &mut exp, &params, &mut records);
        assert_eq!(exp.spectra.len(), 4);
        assert_eq!(corrected, BTreeSet::from([2, 3]));
        // Original untouched
        assert!((exp.spectra[1].precursors[0].mz - 500.1234).abs() < 1e-12);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rt_window_excludes_distant_features() {
        let mut exp = experiment_with_ms1_peaks(&[], 500.1234);
        let features = FeatureMap {
            features: vec![feature_at(500.0, 500.1234, 2)],
        };
        let mut records = Vec::new();
        let params = FeatureCorrectionParams::default();
        let corrected = correct_to_nearest_feature(&features, &mut exp, &params, &mut records);
        assert!(corrected.is_empty());
    }

    #[test]
    fn csv_log_has_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deltas.csv");
        let records = vec![CorrectionRecord {
            rt: 100.5,
            uncalibrated_mz: 500.1240,
            calibrated_mz: 500.1234,
        }];
        write_correction_csv(&path, &records).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "RT,uncalibratedMZ,calibratedMZ,deltaMZ");
        let row = lines.next().unwrap();
        assert!(row.starts_with("100.5"));
        assert!(row.contains("500.1234"));
    }
}
