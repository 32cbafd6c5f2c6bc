#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dual::{Dual, Scalar};
use crate::error::{MotifError, MotifResult};
use crate::motif::{MotifModel, Normalization, DEGENERATE_RANGE};

/// Execution tier for per-point work (gradient fields, candidate fitting).
///
/// - `Scalar`: single-threaded, deterministic order (default)
/// - `Parallel`: rayon work-stealing (requires `parallel` feature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    Parallel,
}

impl ExecutionTier {
    /// The tier that will actually run, after compile-time feature gates.
    pub fn effective(self) -> ExecutionTier {
        match self {
            ExecutionTier::Scalar => ExecutionTier::Scalar,
            ExecutionTier::Parallel => {
                #[cfg(feature = "parallel")]
                {
                    ExecutionTier::Parallel
                }
                #[cfg(not(feature = "parallel"))]
                {
                    ExecutionTier::Scalar
                }
            }
        }
    }
}

/// Closed input interval shared by both grid axes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawInputRange"))]
pub struct InputRange {
    pub lo: f64,
    pub hi: f64,
}

impl InputRange {
    pub fn new(lo: f64, hi: f64) -> MotifResult<Self> {
        let r = Self { lo, hi };
        r.validate()?;
        Ok(r)
    }

    pub fn validate(&self) -> MotifResult<()> {
        if !self.lo.is_finite() || !self.hi.is_finite() || self.lo >= self.hi {
            return Err(MotifError::arg(format!(
                "input range must be finite with lo < hi, got [{}, {}]",
                self.lo, self.hi
            )));
        }
        Ok(())
    }

    /// Distance between neighbouring grid samples.
    pub fn spacing(&self, points: usize) -> f64 {
        (self.hi - self.lo) / (points.max(2) - 1) as f64
    }

    /// Equally spaced axis samples including both endpoints.
    pub fn axis(&self, points: usize) -> Vec<f64> {
        let h = self.spacing(points);
        (0..points)
            .map(|k| {
                if k + 1 == points {
                    self.hi
                } else {
                    self.lo + h * k as f64
                }
            })
            .collect()
    }
}

impl Default for InputRange {
    fn default() -> Self {
        Self { lo: -1.0, hi: 1.0 }
    }
}

/// Dense row-major `points x points` surface. Row index follows input 1.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawGrid"))]
pub struct Grid {
    points: usize,
    values: Vec<f64>,
}

impl Grid {
    pub fn from_values(points: usize, values: Vec<f64>) -> MotifResult<Self> {
        if points == 0 || values.len() != points * points {
            return Err(MotifError::arg(format!(
                "grid of {points}x{points} needs {} values, got {}",
                points * points,
                values.len()
            )));
        }
        Ok(Self { points, values })
    }

    pub fn zeros(points: usize) -> Self {
        Self {
            points,
            values: vec![0.0; points * points],
        }
    }

    pub fn points(&self) -> usize {
        self.points
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.points + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.values[i * self.points + j] = v;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn range(&self) -> f64 {
        self.max() - self.min()
    }
}

/// A motif's sampled output surface, one grid per output channel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawLandscape"))]
pub struct Landscape {
    range: InputRange,
    channels: Vec<Grid>,
}

// Decoded shapes are re-checked by the same constructors.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawInputRange {
    lo: f64,
    hi: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<RawInputRange> for InputRange {
    type Error = MotifError;

    fn try_from(raw: RawInputRange) -> MotifResult<Self> {
        InputRange::new(raw.lo, raw.hi)
    }
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawGrid {
    points: usize,
    values: Vec<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawGrid> for Grid {
    type Error = MotifError;

    fn try_from(raw: RawGrid) -> MotifResult<Self> {
        Grid::from_values(raw.points, raw.values)
    }
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawLandscape {
    range: InputRange,
    channels: Vec<Grid>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawLandscape> for Landscape {
    type Error = MotifError;

    fn try_from(raw: RawLandscape) -> MotifResult<Self> {
        Landscape::new(raw.range, raw.channels)
    }
}

impl Landscape {
    pub fn new(range: InputRange, channels: Vec<Grid>) -> MotifResult<Self> {
        range.validate()?;
        let Some(first) = channels.first() else {
            return Err(MotifError::arg("landscape needs at least one channel"));
        };
        if first.points < 2 || channels.iter().any(|g| g.points != first.points) {
            return Err(MotifError::arg(
                "landscape channels must share a grid of at least 2x2",
            ));
        }
        Ok(Self { range, channels })
    }

    pub fn range(&self) -> InputRange {
        self.range
    }

    pub fn points(&self) -> usize {
        self.channels[0].points
    }

    pub fn spacing(&self) -> f64 {
        self.range.spacing(self.points())
    }

    pub fn channels(&self) -> &[Grid] {
        &self.channels
    }

    pub fn channel(&self, c: usize) -> Option<&Grid> {
        self.channels.get(c)
    }

    /// Global value range across all channels.
    pub fn value_range(&self) -> f64 {
        let lo = self.channels.iter().map(Grid::min).fold(f64::INFINITY, f64::min);
        let hi = self
            .channels
            .iter()
            .map(Grid::max)
            .fold(f64::NEG_INFINITY, f64::max);
        hi - lo
    }

    /// All values flattened channel-major, matching [`LandscapeSampler::grid_inputs`] per channel.
    pub fn flat_values(&self) -> Vec<f64> {
        self.channels
            .iter()
            .flat_map(|g| g.values.iter().copied())
            .collect()
    }
}

/// Evaluates motifs over a regular 2-D input grid.
#[derive(Debug, Clone)]
pub struct LandscapeSampler {
    range: InputRange,
    points: usize,
    tier: ExecutionTier,
}

impl LandscapeSampler {
    pub const MIN_POINTS: usize = 2;

    pub fn new(range: InputRange, points: usize) -> MotifResult<Self> {
        range.validate()?;
        if points < Self::MIN_POINTS {
            return Err(MotifError::arg(format!(
                "grid needs at least {} points per axis, got {points}",
                Self::MIN_POINTS
            )));
        }
        Ok(Self {
            range,
            points,
            tier: ExecutionTier::Scalar,
        })
    }

    pub fn with_execution_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn range(&self) -> InputRange {
        self.range
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn spacing(&self) -> f64 {
        self.range.spacing(self.points)
    }

    /// Row-major Cartesian product of the two input axes.
    pub fn grid_inputs(&self) -> Vec<(f64, f64)> {
        let axis = self.range.axis(self.points);
        let mut inputs = Vec::with_capacity(self.points * self.points);
        for &x1 in &axis {
            for &x2 in &axis {
                inputs.push((x1, x2));
            }
        }
        inputs
    }

    /// Evaluate the whole grid as one batch.
    pub fn sample(&self, model: &MotifModel) -> MotifResult<Landscape> {
        let outputs = model.evaluate(&self.grid_inputs());
        self.assemble(outputs)
    }

    /// Per-point Euclidean norm of d(output)/d(x1, x2).
    ///
    /// Under batch normalization the batch range is held fixed, so the field
    /// is the raw gradient scaled by each channel's normalization factor.
    pub fn gradient_field(&self, model: &MotifModel) -> MotifResult<Landscape> {
        let inputs = self.grid_inputs();
        let channels = model.output_channels();

        let scales: Vec<f64> = match model.normalization() {
            Normalization::Raw => vec![1.0; channels],
            Normalization::BatchMinMax => {
                let raw = model
                    .clone()
                    .with_normalization(Normalization::Raw)
                    .evaluate(&inputs);
                raw.iter()
                    .map(|col| {
                        let lo = col.iter().copied().fold(f64::INFINITY, f64::min);
                        let hi = col.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        if hi - lo < DEGENERATE_RANGE {
                            1.0
                        } else {
                            2.0 / (hi - lo)
                        }
                    })
                    .collect()
            }
        };

        let params: Vec<Dual<2>> = model
            .parameter_values()
            .into_iter()
            .map(Dual::constant)
            .collect();
        let point_grad = |&(x1, x2): &(f64, f64)| -> [f64; 2] {
            let y = model.forward_raw(&params, Dual::variable(x1, 0), Dual::variable(x2, 1));
            [y[0].gradient_norm(), y[1].gradient_norm()]
        };

        let norms: Vec<[f64; 2]> = match self.tier.effective() {
            #[cfg(feature = "parallel")]
            ExecutionTier::Parallel => inputs.par_iter().map(point_grad).collect(),
            _ => inputs.iter().map(point_grad).collect(),
        };

        let outputs: Vec<Vec<f64>> = (0..channels)
            .map(|c| norms.iter().map(|n| n[c] * scales[c]).collect())
            .collect();
        self.assemble(outputs)
    }

    fn assemble(&self, outputs: Vec<Vec<f64>>) -> MotifResult<Landscape> {
        let grids = outputs
            .into_iter()
            .map(|values| Grid::from_values(self.points, values))
            .collect::<MotifResult<Vec<_>>>()?;
        Landscape::new(self.range, grids)
    }
}

/// Sample `model` over a `points x points` grid spanning `range`.
pub fn landscape(model: &MotifModel, range: InputRange, points: usize) -> MotifResult<Landscape> {
    LandscapeSampler::new(range, points)?.sample(model)
}

/// Gradient-magnitude field of `model` over the same grid as [`landscape`].
pub fn gradient_field(
    model: &MotifModel,
    range: InputRange,
    points: usize,
) -> MotifResult<Landscape> {
    LandscapeSampler::new(range, points)?.gradient_field(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motif::{MotifSpec, Topology};
    use crate::prng::Prng;

    fn collider() -> MotifModel {
        let spec = MotifSpec::new(Topology::Collider, 2, &["relu"], &["sum"]).unwrap();
        MotifModel::with_parameters(spec, &[0.4955, -0.0408], &[0.9734]).unwrap()
    }

    #[test]
    fn grid_is_row_major_and_spans_range() {
        let sampler = LandscapeSampler::new(InputRange::new(-1.0, 1.0).unwrap(), 3).unwrap();
        let inputs = sampler.grid_inputs();
        assert_eq!(inputs.len(), 9);
        assert_eq!(inputs[0], (-1.0, -1.0));
        assert_eq!(inputs[1], (-1.0, 0.0));
        assert_eq!(inputs[3], (0.0, -1.0));
        assert_eq!(inputs[8], (1.0, 1.0));
    }

    #[test]
    fn rejects_bad_grids() {
        assert!(InputRange::new(1.0, -1.0).is_err());
        assert!(InputRange::new(0.0, f64::NAN).is_err());
        assert!(LandscapeSampler::new(InputRange::default(), 1).is_err());
        assert!(matches!(
            landscape(&collider(), InputRange::default(), 0),
            Err(MotifError::InvalidArgument(_))
        ));
    }

    #[test]
    fn sampling_is_deterministic() {
        let model = collider();
        let a = landscape(&model, InputRange::default(), 41).unwrap();
        let b = landscape(&model, InputRange::default(), 41).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.points(), 41);
        assert_eq!(a.channels().len(), 1);
        assert!(a.channels()[0].values().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn fork_landscape_has_two_channels() {
        let spec = MotifSpec::new(Topology::Fork, 3, &["tanh", "relu"], &[]).unwrap();
        let mut rng = Prng::new(3);
        let model = MotifModel::random(spec, &mut rng);
        let l = landscape(&model, InputRange::default(), 9).unwrap();
        assert_eq!(l.channels().len(), 2);
        // Fork ignores input 2: each row is constant.
        for g in l.channels() {
            for i in 0..9 {
                for j in 1..9 {
                    assert_eq!(g.get(i, j), g.get(i, 0));
                }
            }
        }
    }

    #[test]
    fn gradient_field_of_linear_collider() {
        // relu stays in its linear region on [-1, 1], so the raw gradient is |w|.
        let model = collider();
        let field = gradient_field(&model, InputRange::default(), 11).unwrap();
        let raw = (0.4955_f64.powi(2) + 0.0408_f64.powi(2)).sqrt();
        let span = 2.0 * (0.4955 + 0.0408);
        let expected = raw * 2.0 / span;
        for v in field.channels()[0].values() {
            assert!((v - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn gradient_field_tiers_agree() {
        let spec =
            MotifSpec::new(Topology::CoherentLoop, 2, &["tanh", "sigmoid"], &["sum", "avg"]).unwrap();
        let mut rng = Prng::new(8);
        let model = MotifModel::random(spec, &mut rng);
        let sampler = LandscapeSampler::new(InputRange::default(), 15).unwrap();
        let scalar = sampler.gradient_field(&model).unwrap();
        let parallel = sampler
            .clone()
            .with_execution_tier(ExecutionTier::Parallel)
            .gradient_field(&model)
            .unwrap();
        assert_eq!(scalar, parallel);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn decoding_rechecks_grid_shapes() {
        let grid = Grid::from_values(2, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let l = Landscape::new(InputRange::default(), vec![grid]).unwrap();
        let json = serde_json::to_value(&l).unwrap();
        assert_eq!(serde_json::from_value::<Landscape>(json.clone()).unwrap(), l);

        let mut short = json.clone();
        short["channels"][0]["values"] = serde_json::json!([0.0, 1.0]);
        assert!(serde_json::from_value::<Landscape>(short).is_err());

        let mut empty = json.clone();
        empty["channels"] = serde_json::json!([]);
        assert!(serde_json::from_value::<Landscape>(empty).is_err());

        let mut flipped = json;
        flipped["range"] = serde_json::json!({"lo": 1.0, "hi": -1.0});
        assert!(serde_json::from_value::<Landscape>(flipped).is_err());
    }
}
