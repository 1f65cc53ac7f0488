//! Pose-clustering retention-time alignment.
//!
//! Estimates an affine map `RT_target -> RT_reference` between two feature
//! maps. Pairs of m/z-compatible feature matches each determine one
//! `(slope, intercept)` candidate; candidates vote into a 2D histogram
//! weighted by normalised intensity products, the densest bin seeds the
//! model, and an OLS refinement over the inlier re-pairing under that
//! model produces the final fit. Degenerate inputs fall back to the
//! identity and report the failure through the result.

use crate::algo::transform::{
    LinearModel, TransformationDescription, TransformationModel,
};
use crate::model::{Feature, FeatureMap};

/// Parameters of the pose-clustering aligner.
#[derive(Debug, Clone)]
pub struct PoseClusteringAligner {
    /// Only feature pairs closer than this in m/z (Da) may vote
    pub mz_pair_max_distance: f64,
    /// Cap on the number of top-intensity features considered per map
    pub max_num_peaks_considered: usize,
    /// Accepted slope interval of the affine map
    pub slope_bounds: (f64, f64),
    /// Number of histogram buckets per axis
    pub num_bins: usize,
    /// RT tolerance (seconds) for inlier pairs during refinement
    pub refinement_rt_tolerance: f64,
}

impl Default for PoseClusteringAligner {
    fn default() -> Self {
        Self {
            mz_pair_max_distance: 0.5,
            max_num_peaks_considered: 1000,
            slope_bounds: (0.5, 2.0),
            num_bins: 40,
            refinement_rt_tolerance: 30.0,
        }
    }
}

/// Outcome of one alignment.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    /// The fitted transformation (identity on degenerate input)
    pub description: TransformationDescription,
    /// Number of inlier pairs behind the final fit
    pub n_pairs: usize,
    /// Whether the OLS refinement ran (false means identity fallback)
    pub refined: bool,
}

struct Vote {
    slope: f64,
    intercept: f64,
    weight: f64,
}

impl PoseClusteringAligner {
    /// Compute the affine `RT_target -> RT_reference` transformation.
    pub fn align(&self, reference: &FeatureMap, target: &FeatureMap) -> AlignmentResult {
        let reference = self.top_features(reference);
        let target = self.top_features(target);

        let votes = self.collect_votes(&reference, &target);
        if votes.len() < 3 {
            log::warn!(
                "pose clustering: only {} compatible pose candidates, falling back to identity",
                votes.len()
            );
            return AlignmentResult {
                description: TransformationDescription::identity(),
                n_pairs: 0,
                refined: false,
            };
        }

        let (slope, intercept) = self.densest_bin(&votes);
        let initial = LinearModel { slope, intercept };

        // Re-pair under the initial map and refit on the inliers.
        let inliers = self.inlier_pairs(&reference, &target, &initial);
        if inliers.len() < 3 {
            log::warn!(
                "pose clustering: refinement found only {} inliers, falling back to identity",
                inliers.len()
            );
            return AlignmentResult {
                description: TransformationDescription::identity(),
                n_pairs: inliers.len(),
                refined: false,
            };
        }
        let model = match LinearModel::fit(&inliers) {
            Ok(lm) => lm,
            Err(_) => {
                log::warn!("pose clustering: degenerate inlier fit, falling back to identity");
                return AlignmentResult {
                    description: TransformationDescription::identity(),
                    n_pairs: inliers.len(),
                    refined: false,
                };
            }
        };

        log::info!(
            "pose clustering: slope {:.4}, intercept {:.2}s over {} inlier pairs",
            model.slope,
            model.intercept,
            inliers.len()
        );
        AlignmentResult {
            n_pairs: inliers.len(),
            description: TransformationDescription {
                model: TransformationModel::Linear(model),
                data: inliers,
            },
            refined: true,
        }
    }

    /// The `max_num_peaks_considered` most intense features, keeping the
    /// runtime bounded regardless of input size.
    fn top_features(&self, map: &FeatureMap) -> Vec<Feature> {
        let mut features = map.features.clone();
        features.sort_by(|a, b| {
            b.intensity
                .partial_cmp(&a.intensity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        features.truncate(self.max_num_peaks_considered);
        features
    }

    fn collect_votes(&self, reference: &[Feature], target: &[Feature]) -> Vec<Vote> {
        let ref_max = reference
            .iter()
            .map(|f| f.intensity)
            .fold(0.0f64, f64::max)
            .max(f64::MIN_POSITIVE);
        let tgt_max = target
            .iter()
            .map(|f| f.intensity)
            .fold(0.0f64, f64::max)
            .max(f64::MIN_POSITIVE);

        // m/z-compatible match hypotheses with normalised weights
        let mut matches: Vec<(f64, f64, f64)> = Vec::new();
        for r in reference {
            for t in target {
                if (r.mz - t.mz).abs() < self.mz_pair_max_distance {
                    let weight = (r.intensity / ref_max) * (t.intensity / tgt_max);
                    matches.push((t.rt, r.rt, weight));
                }
            }
        }

        // The vote loop is quadratic in the match count; keep the heaviest
        // hypotheses so runtime stays bounded for dense maps.
        const MAX_MATCHES: usize = 400;
        if matches.len() > MAX_MATCHES {
            matches.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
            matches.truncate(MAX_MATCHES);
        }

        // Two match hypotheses determine one affine candidate.
        let mut votes = Vec::new();
        for i in 0..matches.len() {
            for j in (i + 1)..matches.len() {
                let (t_i, r_i, w_i) = matches[i];
                let (t_j, r_j, w_j) = matches[j];
                if (t_i - t_j).abs() < f64::EPSILON {
                    continue;
                }
                let slope = (r_i - r_j) / (t_i - t_j);
                if slope < self.slope_bounds.0 || slope > self.slope_bounds.1 {
                    continue;
                }
                let intercept = r_i - slope * t_i;
                votes.push(Vote {
                    slope,
                    intercept,
                    weight: w_i * w_j,
                });
            }
        }
        votes
    }

    /// Weighted mean pose of the heaviest histogram bucket.
    fn densest_bin(&self, votes: &[Vote]) -> (f64, f64) {
        let (b_min, b_max) = votes.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), v| (lo.min(v.intercept), hi.max(v.intercept)),
        );
        let b_span = (b_max - b_min).max(f64::MIN_POSITIVE);
        let a_span = self.slope_bounds.1 - self.slope_bounds.0;
        let bins = self.num_bins.max(1);

        let mut histogram = vec![(0.0f64, 0.0f64, 0.0f64); bins * bins];
        for vote in votes {
            let ai = (((vote.slope - self.slope_bounds.0) / a_span) * bins as f64) as usize;
            let bi = (((vote.intercept - b_min) / b_span) * bins as f64) as usize;
            let cell = &mut histogram[ai.min(bins - 1) * bins + bi.min(bins - 1)];
            cell.0 += vote.weight;
            cell.1 += vote.slope * vote.weight;
            cell.2 += vote.intercept * vote.weight;
        }

        let best = histogram
            .iter()
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
            .unwrap_or((0.0, 0.0, 0.0));
        if best.0 > 0.0 {
            (best.1 / best.0, best.2 / best.0)
        } else {
            (1.0, 0.0)
        }
    }

    /// `(target RT, reference RT)` pairs consistent with the initial map.
    fn inlier_pairs(
        &self,
        reference: &[Feature],
        target: &[Feature],
        initial: &LinearModel,
    ) -> Vec<(f64, f64)> {
        let mut pairs = Vec::new();
        for t in target {
            let predicted = initial.evaluate(t.rt);
            let best = reference
                .iter()
                .filter(|r| (r.mz - t.mz).abs() < self.mz_pair_max_distance)
                .map(|r| (r, (r.rt - predicted).abs()))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((r, delta)) = best {
                if delta <= self.refinement_rt_tolerance {
                    pairs.push((t.rt, r.rt));
                }
            }
        }
        pairs
    }
}
