//! Stable feature pairing between two consensus maps.
//!
//! A dedicated distance functor scores candidate pairs from RT, m/z and
//! intensity differences; the pair finder then links features that are
//! mutual nearest neighbours and whose distance beats both second-nearest
//! distances by a configurable gap factor. Pairs outside the hard windows
//! are "invalid": they may still tighten the second-best distances used in
//! the gap test, but can never become a best match themselves.

use std::collections::BTreeSet;

use crate::model::{ConsensusFeature, ConsensusMap};

/// Parameters of the feature distance functor.
#[derive(Debug, Clone)]
pub struct DistanceParams {
    /// Hard RT window (seconds); larger deltas make a pair invalid
    pub max_rt_difference: f64,
    /// RT term exponent
    pub rt_exponent: f64,
    /// RT term weight
    pub rt_weight: f64,
    /// Hard m/z window, in Da or ppm depending on `mz_unit_ppm`
    pub max_mz_difference: f64,
    /// Interpret `max_mz_difference` as ppm of the feature m/z
    pub mz_unit_ppm: bool,
    /// m/z term exponent
    pub mz_exponent: f64,
    /// m/z term weight
    pub mz_weight: f64,
    /// Intensity term exponent
    pub intensity_exponent: f64,
    /// Intensity term weight (0 disables the term)
    pub intensity_weight: f64,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            max_rt_difference: 100.0,
            rt_exponent: 1.0,
            rt_weight: 1.0,
            max_mz_difference: 0.3,
            mz_unit_ppm: false,
            mz_exponent: 2.0,
            mz_weight: 2.0,
            intensity_exponent: 1.0,
            intensity_weight: 0.0,
        }
    }
}

/// Distance functor over consensus features.
#[derive(Debug, Clone)]
pub struct FeatureDistance {
    params: DistanceParams,
    /// Largest intensity over both input maps, for normalisation
    max_intensity: f64,
}

impl FeatureDistance {
    /// Create a functor; `max_intensity` normalises the intensity term.
    pub fn new(params: DistanceParams, max_intensity: f64) -> Self {
        Self {
            params,
            max_intensity: max_intensity.max(f64::MIN_POSITIVE),
        }
    }

    /// Score a candidate pair. Returns `(valid, distance)`: invalid pairs
    /// exceed a hard RT/m z window but still carry a finite distance.
    pub fn distance(&self, a: &ConsensusFeature, b: &ConsensusFeature) -> (bool, f64) {
        let p = &self.params;

        let delta_rt = (a.rt - b.rt).abs();
        let max_mz = if p.mz_unit_ppm {
            p.max_mz_difference * 1e-6 * a.mz.max(b.mz)
        } else {
            p.max_mz_difference
        };
        let delta_mz = (a.mz - b.mz).abs();
        let valid = delta_rt <= p.max_rt_difference && delta_mz <= max_mz;

        let rt_term = (delta_rt / p.max_rt_difference).powf(p.rt_exponent) * p.rt_weight;
        let mz_term = (delta_mz / max_mz).powf(p.mz_exponent) * p.mz_weight;
        let int_term = if p.intensity_weight > 0.0 {
            ((a.intensity - b.intensity).abs() / self.max_intensity)
                .powf(p.intensity_exponent)
                * p.intensity_weight
        } else {
            0.0
        };

        let total_weight = p.rt_weight + p.mz_weight + p.intensity_weight;
        (valid, (rt_term + mz_term + int_term) / total_weight)
    }
}

/// Errors raised by the pair finder.
#[derive(Debug, thiserror::Error)]
pub enum PairFinderError {
    /// The algorithm links exactly two maps at a time
    #[error("exactly two input maps required, got {0}")]
    WrongMapCount(usize),

    /// The gap factor must be at least one
    #[error("second_nearest_gap must be >= 1, got {0}")]
    InvalidGap(f64),
}

/// Mutual-best-match pairing with a second-nearest gap guard.
#[derive(Debug, Clone)]
pub struct StablePairFinder {
    /// Required ratio between the second-nearest and best distance
    pub second_nearest_gap: f64,
    /// Never link features annotated with different peptide sets
    pub use_identifications: bool,
    /// Distance functor parameters
    pub distance_params: DistanceParams,
}

impl Default for StablePairFinder {
    fn default() -> Self {
        Self {
            second_nearest_gap: 2.0,
            use_identifications: false,
            distance_params: DistanceParams::default(),
        }
    }
}

impl StablePairFinder {
    /// Link two consensus maps into one; paired features become merged
    /// consensus features, unpaired ones are carried over as singletons
    /// with quality zero. The output is sorted by m/z.
    pub fn run(&self, input_maps: &[ConsensusMap]) -> Result<ConsensusMap, PairFinderError> {
        if input_maps.len() != 2 {
            return Err(PairFinderError::WrongMapCount(input_maps.len()));
        }
        if self.second_nearest_gap < 1.0 {
            return Err(PairFinderError::InvalidGap(self.second_nearest_gap));
        }
        let (map0, map1) = (&input_maps[0], &input_maps[1]);

        let max_intensity = map0.max_intensity().max(map1.max_intensity());
        let functor = FeatureDistance::new(self.distance_params.clone(), max_intensity);

        const NONE: usize = usize::MAX;
        let infinity = (f64::INFINITY, f64::INFINITY);
        // Per feature: nearest-neighbour index and (best, second-best)
        // distances in the other map.
        let mut nn_index_0 = vec![NONE; map0.len()];
        let mut nn_distance_0 = vec![infinity; map0.len()];
        let mut nn_index_1 = vec![NONE; map1.len()];
        let mut nn_distance_1 = vec![infinity; map1.len()];

        for (fi0, feat0) in map0.features.iter().enumerate() {
            for (fi1, feat1) in map1.features.iter().enumerate() {
                if self.use_identifications && !compatible_ids(feat0, feat1) {
                    continue;
                }
                let (valid, distance) = functor.distance(feat0, feat1);
                // Invalid pairs may only shrink the second-best distance;
                // a best match must satisfy the hard windows.
                if distance < nn_distance_0[fi0].1 {
                    if valid && distance < nn_distance_0[fi0].0 {
                        nn_distance_0[fi0].1 = nn_distance_0[fi0].0;
                        nn_distance_0[fi0].0 = distance;
                        nn_index_0[fi0] = fi1;
                    } else {
                        nn_distance_0[fi0].1 = distance;
                    }
                }
                if distance < nn_distance_1[fi1].1 {
                    if valid && distance < nn_distance_1[fi1].0 {
                        nn_distance_1[fi1].1 = nn_distance_1[fi1].0;
                        nn_distance_1[fi1].0 = distance;
                        nn_index_1[fi1] = fi0;
                    } else {
                        nn_distance_1[fi1].1 = distance;
                    }
                }
            }
        }

        let mut result = ConsensusMap::default();
        let mut is_singleton = [vec![true; map0.len()], vec![true; map1.len()]];

        for fi0 in 0..map0.len() {
            let fi1 = nn_index_0[fi0];
            if fi1 == NONE {
                continue;
            }
            let (best0, second0) = nn_distance_0[fi0];
            if !(best0.is_finite() && best0 * self.second_nearest_gap <= second0) {
                continue;
            }
            let (best1, second1) = nn_distance_1[fi1];
            if !(nn_index_1[fi1] == fi0 && best1 * self.second_nearest_gap <= second1) {
                continue;
            }

            let feat0 = &map0.features[fi0];
            let feat1 = &map1.features[fi1];
            let mut linked = ConsensusFeature::default();
            for handle in feat0.handles.iter().chain(&feat1.handles) {
                linked.handles.push(*handle);
            }
            for seq in feat0.peptide_sequences.iter().chain(&feat1.peptide_sequences) {
                if !linked.peptide_sequences.contains(seq) {
                    linked.peptide_sequences.push(seq.clone());
                }
            }
            linked.compute_consensus();

            let quality = 1.0 - best0;
            let quality0 = 1.0 - best0 * self.second_nearest_gap / second0;
            let quality1 = 1.0 - best1 * self.second_nearest_gap / second1;
            let mut quality = quality * quality0 * quality1;

            // Blend with pre-existing qualities, weighted by how many
            // constituents each side already had.
            let size0 = feat0.len().max(1);
            let size1 = feat1.len().max(1);
            let prior0 = feat0.quality * (size0 - 1) as f64;
            let prior1 = feat1.quality * (size1 - 1) as f64;
            quality = (quality + prior0 + prior1) / (size0 + size1 - 1) as f64;
            linked.quality = quality;

            result.features.push(linked);
            is_singleton[0][fi0] = false;
            is_singleton[1][fi1] = false;
        }

        for (input, map) in [map0, map1].into_iter().enumerate() {
            for (index, feature) in map.features.iter().enumerate() {
                if is_singleton[input][index] {
                    let mut single = feature.clone();
                    if single.len() < 2 {
                        single.quality = 0.0;
                    }
                    result.features.push(single);
                }
            }
        }

        result.sort_by_mz();
        Ok(result)
    }
}

/// Features without identifications always match; otherwise the sets of
/// best-hit sequences must be equal.
fn compatible_ids(a: &ConsensusFeature, b: &ConsensusFeature) -> bool {
    if a.peptide_sequences.is_empty() || b.peptide_sequences.is_empty() {
        return true;
    }
    let set_a: BTreeSet<&str> = a.peptide_sequences.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.peptide_sequences.iter().map(String::as_str).collect();
    set_a == set_b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Feature, FeatureMap};

    fn map_from(features: Vec<(f64, f64, f64)>, map_index: usize) -> ConsensusMap {
        let feature_map = FeatureMap {
            features: features
                .into_iter()
                .enumerate()
                .map(|(i, (rt, mz, intensity))| Feature {
                    id: i as u64,
                    rt,
                    mz,
                    intensity,
                    charge: 2,
                    quality: 0.0,
                    rt_range: (rt - 5.0, rt + 5.0),
                    peptide_sequences: Vec::new(),
                })
                .collect(),
        };
        ConsensusMap::from_feature_map(map_index, &feature_map)
    }

    fn well_separated() -> Vec<(f64, f64, f64)> {
        vec![
            (100.0, 400.0, 1000.0),
            (200.0, 500.0, 2000.0),
            (300.0, 600.0, 1500.0),
            (400.0, 700.0, 800.0),
        ]
    }

    #[test]
    fn identical_maps_pair_feature_with_itself() {
        let map0 = map_from(well_separated(), 0);
        let map1 = map_from(well_separated(), 1);
        let result = StablePairFinder::default()
            .run(&[map0, map1])
            .unwrap();

        assert_eq!(result.len(), 4);
        for cf in &result.features {
            assert_eq!(cf.len(), 2, "no singletons expected");
            assert_eq!(cf.handles[0].feature_id, cf.handles[1].feature_id);
            assert!((cf.quality - 1.0).abs() < 1e-9, "quality {}", cf.quality);
        }
    }

    #[test]
    fn emitted_pairs_are_unique_and_mutual() {
        let map0 = map_from(well_separated(), 0);
        // Slightly perturbed copy
        let map1 = map_from(
            vec![
                (101.0, 400.001, 900.0),
                (202.0, 500.001, 2100.0),
                (299.0, 599.999, 1400.0),
                (401.0, 700.001, 850.0),
            ],
            1,
        );
        let result = StablePairFinder::default().run(&[map0, map1]).unwrap();

        let mut seen0 = BTreeSet::new();
        let mut seen1 = BTreeSet::new();
        for cf in result.features.iter().filter(|cf| cf.len() == 2) {
            for handle in &cf.handles {
                let fresh = match handle.map_index {
                    0 => seen0.insert(handle.feature_id),
                    1 => seen1.insert(handle.feature_id),
                    other => panic!("unexpected map index {other}"),
                };
                assert!(fresh, "feature used in two pairs");
            }
        }
        assert_eq!(seen0.len(), 4);
        assert_eq!(seen1.len(), 4);
    }

    #[test]
    fn unmatched_features_become_singletons_with_zero_quality() {
        let map0 = map_from(well_separated(), 0);
        let map1 = map_from(vec![(100.0, 400.0, 1000.0)], 1);
        let result = StablePairFinder::default().run(&[map0, map1]).unwrap();

        assert_eq!(result.len(), 4);
        let singletons: Vec<_> = result.features.iter().filter(|cf| cf.len() == 1).collect();
        assert_eq!(singletons.len(), 3);
        for cf in singletons {
            assert_eq!(cf.quality, 0.0);
        }
    }

    #[test]
    fn ambiguous_pairs_fail_the_gap_test() {
        // Two target features equally close to the same reference feature:
        // the second-nearest distance equals the best, failing gap >= 2.
        let map0 = map_from(vec![(100.0, 400.0, 1000.0)], 0);
        let map1 = map_from(
            vec![(98.0, 400.0, 1000.0), (102.0, 400.0, 1000.0)],
            1,
        );
        let result = StablePairFinder::default().run(&[map0, map1]).unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.features.iter().all(|cf| cf.len() == 1));
    }

    #[test]
    fn mismatched_identifications_block_pairing() {
        let mut map0 = map_from(vec![(100.0, 400.0, 1000.0)], 0);
        let mut map1 = map_from(vec![(100.0, 400.0, 1000.0)], 1);
        map0.features[0].peptide_sequences = vec!["PEPTIDEK".into()];
        map1.features[0].peptide_sequences = vec!["OTHERSEQ".into()];

        let finder = StablePairFinder {
            use_identifications: true,
            ..Default::default()
        };
        let result = finder.run(&[map0, map1]).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.features.iter().all(|cf| cf.len() == 1));
    }

    #[test]
    fn wrong_map_count_is_rejected() {
        let err = StablePairFinder::default().run(&[ConsensusMap::default()]);
        assert!(matches!(err, Err(PairFinderError::WrongMapCount(1))));
    }
}
