//! Finite-difference robustness metrics over sampled landscapes.
//!
//! For a grid offset `(di, dj)` the four symmetric pairings `(±di, ±dj)`
//! collapse to two unordered directions: along `(di, dj)` and along
//! `(di, -dj)`. Both directions contribute the same number of pairs, so
//! pooling them gives the same max/mean/median/min as pooling all four.

use std::borrow::Cow;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{MotifError, MotifResult};
use crate::landscape::{gradient_field, landscape, Grid, InputRange, Landscape};
use crate::motif::{MotifModel, DEGENERATE_RANGE};

/// Input-space distance used to scale output differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NormType {
    L1,
    L2,
    LInf,
}

impl NormType {
    pub fn name(self) -> &'static str {
        match self {
            NormType::L1 => "l1",
            NormType::L2 => "l2",
            NormType::LInf => "linf",
        }
    }

    #[inline]
    pub fn distance(self, dx: f64, dy: f64) -> f64 {
        match self {
            NormType::L1 => dx.abs() + dy.abs(),
            NormType::L2 => (dx * dx + dy * dy).sqrt(),
            NormType::LInf => dx.abs().max(dy.abs()),
        }
    }
}

impl FromStr for NormType {
    type Err = MotifError;

    fn from_str(s: &str) -> MotifResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l1" | "1" | "manhattan" => Ok(NormType::L1),
            "l2" | "2" | "euclidean" => Ok(NormType::L2),
            "linf" | "inf" | "l_inf" | "chebyshev" => Ok(NormType::LInf),
            other => Err(MotifError::arg(format!("unknown norm type '{other}'"))),
        }
    }
}

/// Statistic used to summarize the absolute differences at one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ComputeType {
    Max,
    Mean,
    Median,
    Min,
}

impl ComputeType {
    pub fn name(self) -> &'static str {
        match self {
            ComputeType::Max => "max",
            ComputeType::Mean => "mean",
            ComputeType::Median => "median",
            ComputeType::Min => "min",
        }
    }

    /// Reduce a non-empty sample; reorders `values` for the median.
    pub fn reduce(self, values: &mut [f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            ComputeType::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ComputeType::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            ComputeType::Mean => values.iter().sum::<f64>() / values.len() as f64,
            ComputeType::Median => median(values),
        }
    }
}

impl FromStr for ComputeType {
    type Err = MotifError;

    fn from_str(s: &str) -> MotifResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(ComputeType::Max),
            "mean" | "avg" => Ok(ComputeType::Mean),
            "median" => Ok(ComputeType::Median),
            "min" => Ok(ComputeType::Min),
            other => Err(MotifError::arg(format!("unknown compute type '{other}'"))),
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Anything the estimators can read a landscape from.
pub trait Sampled {
    fn sampled(&self, range: InputRange, points: usize) -> MotifResult<Cow<'_, Landscape>>;
}

impl Sampled for Landscape {
    fn sampled(&self, range: InputRange, points: usize) -> MotifResult<Cow<'_, Landscape>> {
        if self.points() != points || self.range() != range {
            return Err(MotifError::arg(format!(
                "landscape is {}x{} over [{}, {}], caller asked for {points}x{points} over [{}, {}]",
                self.points(),
                self.points(),
                self.range().lo,
                self.range().hi,
                range.lo,
                range.hi
            )));
        }
        Ok(Cow::Borrowed(self))
    }
}

impl Sampled for MotifModel {
    fn sampled(&self, range: InputRange, points: usize) -> MotifResult<Cow<'_, Landscape>> {
        Ok(Cow::Owned(landscape(self, range, points)?))
    }
}

/// Push `|L[a] - L[a + offset]|` for both unordered directions of `(di, dj)`.
fn offset_differences(grid: &Grid, di: usize, dj: usize, out: &mut Vec<f64>) {
    let n = grid.points();
    if di >= n || dj >= n {
        return;
    }
    for i in 0..n - di {
        for j in 0..n - dj {
            out.push((grid.get(i + di, j + dj) - grid.get(i, j)).abs());
            out.push((grid.get(i + di, j) - grid.get(i, j + dj)).abs());
        }
    }
}

fn max_offset_difference(grid: &Grid, di: usize, dj: usize) -> f64 {
    let n = grid.points();
    let mut best = 0.0_f64;
    for i in 0..n - di {
        for j in 0..n - dj {
            let a = (grid.get(i + di, j + dj) - grid.get(i, j)).abs();
            let b = (grid.get(i + di, j) - grid.get(i, j + dj)).abs();
            best = best.max(a).max(b);
        }
    }
    best
}

/// Largest observed `|ΔL| / ‖Δx‖` over every grid offset and channel.
pub fn estimate_lipschitz(landscape: &Landscape, norm: NormType) -> f64 {
    let n = landscape.points();
    let h = landscape.spacing();
    let mut best = 0.0_f64;
    for grid in landscape.channels() {
        if grid.range() < DEGENERATE_RANGE {
            continue;
        }
        for di in 0..n {
            for dj in 0..n {
                if di + dj == 0 {
                    continue;
                }
                let dist = norm.distance(di as f64 * h, dj as f64 * h);
                best = best.max(max_offset_difference(grid, di, dj) / dist);
            }
        }
    }
    best
}

/// Offset-indexed matrix of reduced absolute differences, normalized by the
/// landscape's global value range. Entry `(0, 0)` is zero.
pub fn evaluate_propagation(landscape: &Landscape, compute: ComputeType) -> Grid {
    let n = landscape.points();
    let mut out = Grid::zeros(n);
    let span = landscape.value_range();
    if span < DEGENERATE_RANGE {
        return out;
    }

    let mut diffs = Vec::new();
    for di in 0..n {
        for dj in 0..n {
            if di + dj == 0 {
                continue;
            }
            diffs.clear();
            for grid in landscape.channels() {
                offset_differences(grid, di, dj, &mut diffs);
            }
            out.set(di, dj, compute.reduce(&mut diffs) / span);
        }
    }
    out
}

/// Lipschitz estimate from a landscape or a live model.
pub fn lipschitz<S: Sampled + ?Sized>(
    source: &S,
    range: InputRange,
    points: usize,
    norm: &str,
) -> MotifResult<f64> {
    let norm: NormType = norm.parse()?;
    let l = source.sampled(range, points)?;
    Ok(estimate_lipschitz(&l, norm))
}

/// Propagation matrix from a landscape or a live model.
pub fn propagation<S: Sampled + ?Sized>(
    source: &S,
    range: InputRange,
    points: usize,
    compute: &str,
) -> MotifResult<Grid> {
    let compute: ComputeType = compute.parse()?;
    let l = source.sampled(range, points)?;
    Ok(evaluate_propagation(&l, compute))
}

/// Roughness summary of a gradient-magnitude field.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rugosity {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
}

impl Rugosity {
    pub fn from_field(field: &Landscape) -> Self {
        let mut values = field.flat_values();
        let mean = ComputeType::Mean.reduce(&mut values);
        let max = ComputeType::Max.reduce(&mut values);
        let median = ComputeType::Median.reduce(&mut values);
        Self { mean, median, max }
    }
}

/// Sample the gradient field of `model` and summarize it.
pub fn rugosity(model: &MotifModel, range: InputRange, points: usize) -> MotifResult<Rugosity> {
    let field = gradient_field(model, range, points)?;
    Ok(Rugosity::from_field(&field))
}
