//! Feature and consensus-feature containers.
//!
//! Consensus features reference their constituents through
//! [`FeatureHandle`]s carrying `(map index, feature id)` plus cached
//! coordinates. Back-references are rebuilt from ids on demand, so maps can
//! be moved and serialised without a pointer graph.

/// A chromatographic feature: an eluting analyte with an RT x m/z extent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feature {
    /// Unique id inside its owning map
    pub id: u64,
    /// Apex retention time in seconds
    pub rt: f64,
    /// Monoisotopic m/z
    pub mz: f64,
    /// Integrated intensity
    pub intensity: f64,
    /// Charge state (0 = unknown)
    pub charge: i32,
    /// Overall quality in [0, 1]
    pub quality: f64,
    /// RT extent of the feature hull (start, end), seconds
    pub rt_range: (f64, f64),
    /// Best-hit peptide sequences from attached identifications
    pub peptide_sequences: Vec<String>,
}

impl Feature {
    /// Expected m/z of the `trace`-th isotopic mass trace for this
    /// feature's charge. Trace 0 is the monoisotopic position.
    pub fn isotope_trace_mz(&self, trace: u32) -> f64 {
        let charge = self.charge.unsigned_abs().max(1) as f64;
        self.mz + trace as f64 * super::C13C12_MASS_DIFF / charge
    }
}

/// A collection of features from one run.
#[derive(Debug, Clone, Default)]
pub struct FeatureMap {
    /// The features; order carries no meaning
    pub features: Vec<Feature>,
}

impl FeatureMap {
    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Maximum feature intensity, 0 for an empty map.
    pub fn max_intensity(&self) -> f64 {
        self.features
            .iter()
            .map(|f| f.intensity)
            .fold(0.0, f64::max)
    }

    /// Look up a feature by id.
    pub fn by_id(&self, id: u64) -> Option<&Feature> {
        self.features.iter().find(|f| f.id == id)
    }
}

/// Reference to a constituent feature of a consensus feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureHandle {
    /// Index of the originating map in the grouping input
    pub map_index: usize,
    /// Feature id inside that map
    pub feature_id: u64,
    /// Cached RT of the referenced feature
    pub rt: f64,
    /// Cached m/z of the referenced feature
    pub mz: f64,
    /// Cached intensity of the referenced feature
    pub intensity: f64,
}

/// A grouping of features across maps believed to be the same analyte.
#[derive(Debug, Clone, Default)]
pub struct ConsensusFeature {
    /// Consensus retention time (intensity-weighted mean of handles)
    pub rt: f64,
    /// Consensus m/z (intensity-weighted mean of handles)
    pub mz: f64,
    /// Summed intensity of the handles
    pub intensity: f64,
    /// Grouping quality in [0, 1]
    pub quality: f64,
    /// Handles to the constituent features
    pub handles: Vec<FeatureHandle>,
    /// Best-hit peptide sequences pooled from the constituents
    pub peptide_sequences: Vec<String>,
}

impl ConsensusFeature {
    /// Build a consensus feature around one constituent.
    pub fn singleton(map_index: usize, feature: &Feature) -> Self {
        let mut cf = Self {
            rt: feature.rt,
            mz: feature.mz,
            intensity: feature.intensity,
            quality: feature.quality,
            peptide_sequences: feature.peptide_sequences.clone(),
            ..Default::default()
        };
        cf.handles.push(FeatureHandle {
            map_index,
            feature_id: feature.id,
            rt: feature.rt,
            mz: feature.mz,
            intensity: feature.intensity,
        });
        cf
    }

    /// Add a constituent without recomputing the consensus coordinates.
    pub fn insert(&mut self, map_index: usize, feature: &Feature) {
        self.handles.push(FeatureHandle {
            map_index,
            feature_id: feature.id,
            rt: feature.rt,
            mz: feature.mz,
            intensity: feature.intensity,
        });
        for seq in &feature.peptide_sequences {
            if !self.peptide_sequences.contains(seq) {
                self.peptide_sequences.push(seq.clone());
            }
        }
    }

    /// Recompute RT/m/z as intensity-weighted means of the handles and the
    /// intensity as their sum. Falls back to plain means when all handle
    /// intensities are zero.
    pub fn compute_consensus(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let total: f64 = self.handles.iter().map(|h| h.intensity).sum();
        if total > 0.0 {
            self.rt = self.handles.iter().map(|h| h.rt * h.intensity).sum::<f64>() / total;
            self.mz = self.handles.iter().map(|h| h.mz * h.intensity).sum::<f64>() / total;
        } else {
            let n = self.handles.len() as f64;
            self.rt = self.handles.iter().map(|h| h.rt).sum::<f64>() / n;
            self.mz = self.handles.iter().map(|h| h.mz).sum::<f64>() / n;
        }
        self.intensity = total;
    }

    /// Number of constituent features.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the consensus feature has no constituents.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// A collection of consensus features.
#[derive(Debug, Clone, Default)]
pub struct ConsensusMap {
    /// The consensus features
    pub features: Vec<ConsensusFeature>,
}

impl ConsensusMap {
    /// Number of consensus features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Maximum consensus intensity, 0 for an empty map.
    pub fn max_intensity(&self) -> f64 {
        self.features
            .iter()
            .map(|f| f.intensity)
            .fold(0.0, f64::max)
    }

    /// Wrap every feature of a feature map into a singleton consensus.
    pub fn from_feature_map(map_index: usize, map: &FeatureMap) -> Self {
        Self {
            features: map
                .features
                .iter()
                .map(|f| ConsensusFeature::singleton(map_index, f))
                .collect(),
        }
    }

    /// Canonical output ordering for grouping results.
    pub fn sort_by_mz(&mut self) {
        self.features
            .sort_by(|a, b| a.mz.partial_cmp(&b.mz).unwrap_or(std::cmp::Ordering::Equal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(id: u64, rt: f64, mz: f64, intensity: f64) -> Feature {
        Feature {
            id,
            rt,
            mz,
            intensity,
            charge: 2,
            quality: 0.0,
            rt_range: (rt - 5.0, rt + 5.0),
            peptide_sequences: Vec::new(),
        }
    }

    #[test]
    fn consensus_weighted_mean() {
        let mut cf = ConsensusFeature::singleton(0, &feature(1, 100.0, 500.0, 10.0));
        cf.insert(1, &feature(2, 110.0, 500.2, 30.0));
        cf.compute_consensus();
        assert!((cf.rt - 107.5).abs() < 1e-9);
        assert!((cf.mz - 500.15).abs() < 1e-9);
        assert!((cf.intensity - 40.0).abs() < 1e-12);
    }

    #[test]
    fn isotope_trace_spacing_scales_with_charge() {
        let f = feature(1, 0.0, 400.0, 1.0);
        let d1 = f.isotope_trace_mz(1) - f.isotope_trace_mz(0);
        assert!((d1 - crate::model::C13C12_MASS_DIFF / 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_intensity_consensus_uses_plain_mean() {
        let mut cf = ConsensusFeature::singleton(0, &feature(1, 100.0, 500.0, 0.0));
        cf.insert(1, &feature(2, 200.0, 502.0, 0.0));
        cf.compute_consensus();
        assert!((cf.rt - 150.0).abs() < 1e-9);
        assert!((cf.mz - 501.0).abs() < 1e-9);
    }
}
