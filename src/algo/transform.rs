//! Retention-time transformation models.
//!
//! All models consume `(x, y)` pairs and expose `evaluate(x) -> y`. The
//! interpolated form separates the interior interpolator (linear, natural
//! cubic spline or Akima) from the extrapolation policy applied outside
//! the data range; the two compose freely.

use serde::{Deserialize, Serialize};

/// Errors raised during model construction.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Interpolated models need at least three unique x values
    #[error("interpolation requires at least 3 data points with unique x values, got {0}")]
    NotEnoughPoints(usize),

    /// A linear fit over degenerate data (all x equal)
    #[error("linear regression requires at least 2 distinct x values")]
    DegenerateFit,

    /// Unknown interpolation type string
    #[error("unknown/unsupported interpolation type '{0}'")]
    UnknownInterpolation(String),

    /// Unknown extrapolation type string
    #[error("unknown/unsupported extrapolation type '{0}'")]
    UnknownExtrapolation(String),
}

/// Interior interpolator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationType {
    /// Piecewise linear between consecutive points
    Linear,
    /// Natural cubic spline
    #[default]
    CubicSpline,
    /// Akima sub-spline; robust against overshoot
    Akima,
}

impl std::str::FromStr for InterpolationType {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(InterpolationType::Linear),
            "cspline" => Ok(InterpolationType::CubicSpline),
            "akima" => Ok(InterpolationType::Akima),
            other => Err(TransformError::UnknownInterpolation(other.into())),
        }
    }
}

/// Extrapolation policy outside the data range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtrapolationType {
    /// One linear model fitted to all data; may be discontinuous at the
    /// borders
    GlobalLinear,
    /// One linear model through the first and last data point
    #[default]
    TwoPointLinear,
    /// Two linear models through the two outermost points on each side
    FourPointLinear,
}

impl std::str::FromStr for ExtrapolationType {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global-linear" => Ok(ExtrapolationType::GlobalLinear),
            "two-point-linear" => Ok(ExtrapolationType::TwoPointLinear),
            "four-point-linear" => Ok(ExtrapolationType::FourPointLinear),
            other => Err(TransformError::UnknownExtrapolation(other.into())),
        }
    }
}

/// An affine map `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Slope
    pub slope: f64,
    /// Intercept
    pub intercept: f64,
}

impl LinearModel {
    /// Identity map.
    pub fn identity() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }

    /// Ordinary least squares over `(x, y)` pairs.
    pub fn fit(data: &[(f64, f64)]) -> Result<Self, TransformError> {
        let n = data.len() as f64;
        if data.len() < 2 {
            return Err(TransformError::DegenerateFit);
        }
        let mean_x = data.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = data.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = data.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
        if sxx == 0.0 {
            return Err(TransformError::DegenerateFit);
        }
        let sxy: f64 = data
            .iter()
            .map(|p| (p.0 - mean_x) * (p.1 - mean_y))
            .sum();
        let slope = sxy / sxx;
        Ok(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    /// The line through two points.
    pub fn through(p0: (f64, f64), p1: (f64, f64)) -> Result<Self, TransformError> {
        if p0.0 == p1.0 {
            return Err(TransformError::DegenerateFit);
        }
        let slope = (p1.1 - p0.1) / (p1.0 - p0.0);
        Ok(Self {
            slope,
            intercept: p0.1 - slope * p0.0,
        })
    }

    /// Evaluate the line.
    pub fn evaluate(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Interior interpolator over strictly increasing xs.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Interpolator {
    Linear,
    /// Second derivatives at the knots (natural boundary conditions)
    CubicSpline { m: Vec<f64> },
    /// Hermite slopes at the knots (Akima weighting)
    Akima { slopes: Vec<f64> },
}

impl Interpolator {
    fn build(kind: InterpolationType, xs: &[f64], ys: &[f64]) -> Self {
        match kind {
            InterpolationType::Linear => Interpolator::Linear,
            InterpolationType::CubicSpline => Interpolator::CubicSpline {
                m: natural_spline_second_derivatives(xs, ys),
            },
            InterpolationType::Akima => Interpolator::Akima {
                slopes: akima_slopes(xs, ys),
            },
        }
    }

    /// Evaluate at `x`, which is guaranteed to satisfy
    /// `xs[0] <= x <= xs[n-1]`.
    fn eval(&self, xs: &[f64], ys: &[f64], x: f64) -> f64 {
        let idx = match xs.partition_point(|&v| v <= x) {
            // x == xs[0]
            0 => return ys[0],
            i if i >= xs.len() => xs.len() - 1,
            i => i,
        };
        let (x0, x1) = (xs[idx - 1], xs[idx]);
        let (y0, y1) = (ys[idx - 1], ys[idx]);
        let h = x1 - x0;
        let t = (x - x0) / h;

        match self {
            Interpolator::Linear => y0 + (y1 - y0) * t,
            Interpolator::CubicSpline { m } => {
                let a = (x1 - x) / h;
                let b = (x - x0) / h;
                a * y0
                    + b * y1
                    + ((a.powi(3) - a) * m[idx - 1] + (b.powi(3) - b) * m[idx]) * h * h / 6.0
            }
            Interpolator::Akima { slopes } => {
                let (s0, s1) = (slopes[idx - 1], slopes[idx]);
                // Cubic Hermite on the interval
                let h00 = 2.0 * t.powi(3) - 3.0 * t.powi(2) + 1.0;
                let h10 = t.powi(3) - 2.0 * t.powi(2) + t;
                let h01 = -2.0 * t.powi(3) + 3.0 * t.powi(2);
                let h11 = t.powi(3) - t.powi(2);
                h00 * y0 + h10 * h * s0 + h01 * y1 + h11 * h * s1
            }
        }
    }
}

/// Natural cubic spline second derivatives via the tridiagonal system.
fn natural_spline_second_derivatives(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }
    let mut u = vec![0.0; n];
    for i in 1..n - 1 {
        let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
        let p = sig * m[i - 1] + 2.0;
        m[i] = (sig - 1.0) / p;
        u[i] = (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i])
            - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
        u[i] = (6.0 * u[i] / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
    }
    for i in (0..n - 1).rev() {
        m[i] = m[i] * m[i + 1] + u[i];
    }
    m[n - 1] = 0.0;
    m
}

/// Hermite slopes per Akima's weighting, with quadratic extension of the
/// segment slopes beyond both ends. Requires strictly monotone x.
fn akima_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut d = Vec::with_capacity(n + 3);
    for i in 0..n - 1 {
        d.push((ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]));
    }
    // Extended slopes: d[-2], d[-1] in front, d[n-1], d[n] behind.
    let front2 = 3.0 * d[0] - 2.0 * d[1.min(d.len() - 1)];
    let front1 = 2.0 * d[0] - d[1.min(d.len() - 1)];
    let back1 = 2.0 * d[d.len() - 1] - d[d.len().saturating_sub(2)];
    let back2 = 3.0 * d[d.len() - 1] - 2.0 * d[d.len().saturating_sub(2)];
    let mut ext = Vec::with_capacity(d.len() + 4);
    ext.push(front2);
    ext.push(front1);
    ext.extend_from_slice(&d);
    ext.push(back1);
    ext.push(back2);

    let mut slopes = Vec::with_capacity(n);
    for i in 0..n {
        // Segment slopes around knot i in the extended indexing.
        let m1 = ext[i];
        let m2 = ext[i + 1];
        let m3 = ext[i + 2];
        let m4 = ext[i + 3];
        let w1 = (m4 - m3).abs();
        let w2 = (m2 - m1).abs();
        if w1 + w2 == 0.0 {
            slopes.push((m2 + m3) / 2.0);
        } else {
            slopes.push((w1 * m2 + w2 * m3) / (w1 + w2));
        }
    }
    slopes
}

/// Piecewise interpolated model with linear extrapolation outside the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpolatedModel {
    xs: Vec<f64>,
    ys: Vec<f64>,
    interpolation: InterpolationType,
    extrapolation: ExtrapolationType,
    interp: Interpolator,
    lm_front: LinearModel,
    lm_back: LinearModel,
}

impl InterpolatedModel {
    /// Build from data pairs. Duplicate xs are collapsed by averaging
    /// their ys; at least three unique xs must remain.
    pub fn new(
        data: &[(f64, f64)],
        interpolation: InterpolationType,
        extrapolation: ExtrapolationType,
    ) -> Result<Self, TransformError> {
        let (xs, ys) = preprocess_data_points(data);
        if xs.len() < 3 {
            return Err(TransformError::NotEnoughPoints(xs.len()));
        }

        let interp = Interpolator::build(interpolation, &xs, &ys);
        let n = xs.len();
        let (lm_front, lm_back) = match extrapolation {
            ExtrapolationType::GlobalLinear => {
                let lm = LinearModel::fit(data)?;
                (lm, lm)
            }
            ExtrapolationType::TwoPointLinear => {
                let lm = LinearModel::through((xs[0], ys[0]), (xs[n - 1], ys[n - 1]))?;
                (lm, lm)
            }
            ExtrapolationType::FourPointLinear => (
                LinearModel::through((xs[0], ys[0]), (xs[1], ys[1]))?,
                LinearModel::through((xs[n - 2], ys[n - 2]), (xs[n - 1], ys[n - 1]))?,
            ),
        };

        Ok(Self {
            xs,
            ys,
            interpolation,
            extrapolation,
            interp,
            lm_front,
            lm_back,
        })
    }

    /// The unique, sorted x values after preprocessing.
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    /// Evaluate the model; interior points interpolate, exterior points
    /// use the configured extrapolators.
    pub fn evaluate(&self, x: f64) -> f64 {
        if x < self.xs[0] {
            self.lm_front.evaluate(x)
        } else if x > self.xs[self.xs.len() - 1] {
            self.lm_back.evaluate(x)
        } else {
            self.interp.eval(&self.xs, &self.ys, x)
        }
    }

    /// The configured interpolation type.
    pub fn interpolation(&self) -> InterpolationType {
        self.interpolation
    }

    /// The configured extrapolation type.
    pub fn extrapolation(&self) -> ExtrapolationType {
        self.extrapolation
    }
}

/// Collapse duplicate xs (averaging ys) and sort ascending.
fn preprocess_data_points(data: &[(f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let mut sorted: Vec<(f64, f64)> = data.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut xs = Vec::with_capacity(sorted.len());
    let mut ys = Vec::with_capacity(sorted.len());
    let mut i = 0;
    while i < sorted.len() {
        let x = sorted[i].0;
        let mut sum = 0.0;
        let mut count = 0usize;
        while i < sorted.len() && sorted[i].0 == x {
            sum += sorted[i].1;
            count += 1;
            i += 1;
        }
        xs.push(x);
        ys.push(sum / count as f64);
    }
    (xs, ys)
}

/// A retention-time map `f: RT -> RT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransformationModel {
    /// The identity map
    Identity,
    /// An affine map
    Linear(LinearModel),
    /// A piecewise interpolated map
    Interpolated(InterpolatedModel),
}

impl TransformationModel {
    /// Evaluate the model at `x`.
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            TransformationModel::Identity => x,
            TransformationModel::Linear(lm) => lm.evaluate(x),
            TransformationModel::Interpolated(im) => im.evaluate(x),
        }
    }

    /// Whether this is the identity map.
    pub fn is_identity(&self) -> bool {
        matches!(self, TransformationModel::Identity)
    }
}

/// A fitted transformation together with the pairs it was fitted on;
/// serialised by the alignment tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationDescription {
    /// The fitted model
    pub model: TransformationModel,
    /// The `(target RT, reference RT)` pairs behind the fit
    pub data: Vec<(f64, f64)>,
}

impl TransformationDescription {
    /// An identity description with no backing data.
    pub fn identity() -> Self {
        Self {
            model: TransformationModel::Identity,
            data: Vec::new(),
        }
    }

    /// Apply the model to every spectrum and chromatogram RT of an
    /// experiment.
    pub fn apply_to_experiment(&self, experiment: &mut crate::model::Experiment) {
        for spectrum in &mut experiment.spectra {
            spectrum.rt = self.model.evaluate(spectrum.rt);
        }
        for chromatogram in &mut experiment.chromatograms {
            for point in &mut chromatogram.points {
                point.rt = self.model.evaluate(point.rt);
            }
        }
    }

    /// Apply the model to every feature of a map (apex and hull bounds).
    pub fn apply_to_features(&self, map: &mut crate::model::FeatureMap) {
        for feature in &mut map.features {
            feature.rt = self.model.evaluate(feature.rt);
            feature.rt_range = (
                self.model.evaluate(feature.rt_range.0),
                self.model.evaluate(feature.rt_range.1),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 1.0), (2.0, 4.0), (3.0, 9.0), (4.0, 16.0)]
    }

    #[test]
    fn linear_fit_recovers_exact_line() {
        let data: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        let lm = LinearModel::fit(&data).unwrap();
        assert!((lm.slope - 2.0).abs() < 1e-12);
        assert!((lm.intercept - 1.0).abs() < 1e-12);
    }

    #[test]
    fn interpolated_needs_three_unique_xs() {
        let data = vec![(1.0, 1.0), (1.0, 2.0), (2.0, 3.0)];
        let err = InterpolatedModel::new(
            &data,
            InterpolationType::Linear,
            ExtrapolationType::TwoPointLinear,
        );
        assert!(matches!(err, Err(TransformError::NotEnoughPoints(2))));
    }

    #[test]
    fn duplicate_xs_average_their_ys() {
        let data = vec![(0.0, 0.0), (1.0, 2.0), (1.0, 4.0), (2.0, 6.0)];
        let model = InterpolatedModel::new(
            &data,
            InterpolationType::Linear,
            ExtrapolationType::TwoPointLinear,
        )
        .unwrap();
        assert!((model.evaluate(1.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn linear_interpolation_is_piecewise_and_continuous() {
        let data = vec![(0.0, 0.0), (1.0, 2.0), (2.0, 0.0), (3.0, 2.0)];
        let model = InterpolatedModel::new(
            &data,
            InterpolationType::Linear,
            ExtrapolationType::TwoPointLinear,
        )
        .unwrap();
        assert!((model.evaluate(0.5) - 1.0).abs() < 1e-12);
        assert!((model.evaluate(1.5) - 1.0).abs() < 1e-12);
        // continuity at the knots
        assert!((model.evaluate(1.0 - 1e-9) - model.evaluate(1.0 + 1e-9)).abs() < 1e-6);
    }

    #[test]
    fn cspline_matches_knots_and_four_point_extrapolation() {
        let model = InterpolatedModel::new(
            &squares(),
            InterpolationType::CubicSpline,
            ExtrapolationType::FourPointLinear,
        )
        .unwrap();
        assert!((model.evaluate(2.0) - 4.0).abs() < 1e-9);
        // front line through (0,0),(1,1); back line through (3,9),(4,16)
        assert!((model.evaluate(-1.0) - -1.0).abs() < 1e-9);
        assert!((model.evaluate(5.0) - 23.0).abs() < 1e-9);
    }

    #[test]
    fn two_point_extrapolation_uses_outermost_points() {
        let model = InterpolatedModel::new(
            &squares(),
            InterpolationType::CubicSpline,
            ExtrapolationType::TwoPointLinear,
        )
        .unwrap();
        // line through (0,0) and (4,16): slope 4
        assert!((model.evaluate(-1.0) - -4.0).abs() < 1e-9);
        assert!((model.evaluate(5.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn extrapolation_is_continuous_at_borders() {
        for extrapolation in [
            ExtrapolationType::TwoPointLinear,
            ExtrapolationType::FourPointLinear,
        ] {
            let model = InterpolatedModel::new(
                &squares(),
                InterpolationType::CubicSpline,
                extrapolation,
            )
            .unwrap();
            let eps = 1e-7;
            assert!(
                (model.evaluate(0.0 - eps) - model.evaluate(0.0)).abs() < 1e-4,
                "{extrapolation:?} discontinuous at front"
            );
            assert!(
                (model.evaluate(4.0 + eps) - model.evaluate(4.0)).abs() < 1e-4,
                "{extrapolation:?} discontinuous at back"
            );
        }
    }

    #[test]
    fn akima_interpolates_knots_exactly() {
        let data = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 0.5), (3.0, 2.0), (4.0, 1.0)];
        let model = InterpolatedModel::new(
            &data,
            InterpolationType::Akima,
            ExtrapolationType::TwoPointLinear,
        )
        .unwrap();
        for (x, y) in &data {
            assert!((model.evaluate(*x) - y).abs() < 1e-9, "knot at {x}");
        }
    }

    #[test]
    fn akima_reproduces_straight_lines() {
        let data: Vec<(f64, f64)> = (0..6).map(|i| (i as f64, 3.0 * i as f64 - 1.0)).collect();
        let model = InterpolatedModel::new(
            &data,
            InterpolationType::Akima,
            ExtrapolationType::TwoPointLinear,
        )
        .unwrap();
        assert!((model.evaluate(2.5) - 6.5).abs() < 1e-9);
    }

    #[test]
    fn type_strings_parse() {
        assert_eq!(
            "cspline".parse::<InterpolationType>().unwrap(),
            InterpolationType::CubicSpline
        );
        assert!("quintic".parse::<InterpolationType>().is_err());
        assert_eq!(
            "four-point-linear".parse::<ExtrapolationType>().unwrap(),
            ExtrapolationType::FourPointLinear
        );
        assert!("cubic".parse::<ExtrapolationType>().is_err());
    }

    #[test]
    fn identity_model_is_identity() {
        let model = TransformationModel::Identity;
        assert_eq!(model.evaluate(42.5), 42.5);
        assert!(model.is_identity());
    }
}
