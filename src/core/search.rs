#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::dual::{Dual, Scalar};
use crate::error::{MotifError, MotifResult};
use crate::landscape::{ExecutionTier, InputRange, LandscapeSampler};
use crate::motif::{MotifModel, MAX_PARAMS};
use crate::observer::{NoProgress, Progress};

type ParamDual = Dual<MAX_PARAMS>;

/// Knobs shared by the inner minimum-search and the outer max-min search.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SearchConfig {
    /// Adam step size for both descent (inner) and ascent (outer).
    pub learn_rate: f64,
    /// A loop stops once its loss spread over the last `check_window`
    /// iterations falls below this.
    pub loss_threshold: f64,
    pub check_window: usize,
    /// Iteration cap per candidate fit.
    pub inner_cap: usize,
    /// Iteration cap for the max-min outer loop.
    pub outer_cap: usize,

    pub range: InputRange,
    pub points: usize,

    /// Seed each inner search with the previous outer iteration's fitted pool.
    pub warm_start: bool,

    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,

    pub tier: ExecutionTier,
}

impl Default for SearchConfig {
    /// Defaults sized for a 21x21 grid over [-1, 1].
    ///
    /// - Adam (0.9, 0.999, 1e-8) at step 0.01
    /// - Stop when the loss moves less than 1e-6 across 10 iterations
    fn default() -> Self {
        Self {
            learn_rate: 0.01,
            loss_threshold: 1e-6,
            check_window: 10,
            inner_cap: 1000,
            outer_cap: 100,
            range: InputRange::default(),
            points: 21,
            warm_start: true,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            tier: ExecutionTier::Scalar,
        }
    }
}

impl SearchConfig {
    pub fn with_learn_rate(mut self, rate: f64) -> Self {
        self.learn_rate = rate;
        self
    }

    pub fn with_stopping(mut self, loss_threshold: f64, check_window: usize) -> Self {
        self.loss_threshold = loss_threshold;
        self.check_window = check_window;
        self
    }

    pub fn with_caps(mut self, inner_cap: usize, outer_cap: usize) -> Self {
        self.inner_cap = inner_cap;
        self.outer_cap = outer_cap;
        self
    }

    pub fn with_grid(mut self, range: InputRange, points: usize) -> Self {
        self.range = range;
        self.points = points;
        self
    }

    pub fn with_execution_tier(mut self, tier: ExecutionTier) -> Self {
        self.tier = tier;
        self
    }

    /// Validate the configuration, returning an error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.learn_rate.is_finite() || self.learn_rate <= 0.0 {
            return Err("learn_rate must be finite and > 0");
        }
        if !self.loss_threshold.is_finite() || self.loss_threshold < 0.0 {
            return Err("loss_threshold must be finite and >= 0");
        }
        if self.check_window < 2 {
            return Err("check_window must be >= 2");
        }
        if self.inner_cap == 0 || self.outer_cap == 0 {
            return Err("iteration caps must be >= 1");
        }
        if self.points < LandscapeSampler::MIN_POINTS {
            return Err("points must be >= 2");
        }
        if self.range.validate().is_err() {
            return Err("range must be finite with lo < hi");
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err("Adam betas must be in [0, 1)");
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err("epsilon must be finite and > 0");
        }
        Ok(())
    }
}

/// How a search loop ended. Both are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Termination {
    ConvergedByThreshold,
    ConvergedByCap,
}

/// Per-parameter adaptive first-order optimizer.
#[derive(Debug, Clone)]
pub struct Adam {
    m: Vec<f64>,
    v: Vec<f64>,
    t: i32,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
}

impl Adam {
    pub fn new(cfg: &SearchConfig, len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
            t: 0,
            lr: cfg.learn_rate,
            beta1: cfg.beta1,
            beta2: cfg.beta2,
            eps: cfg.epsilon,
        }
    }

    /// Descend `params` along `grad`. Negate `grad` to ascend.
    pub fn step(&mut self, params: &mut [f64], grad: &[f64]) {
        self.t = self.t.saturating_add(1);
        let b1c = 1.0 - self.beta1.powi(self.t);
        let b2c = 1.0 - self.beta2.powi(self.t);
        for (i, (p, &g)) in params.iter_mut().zip(grad.iter()).enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let mhat = self.m[i] / b1c;
            let vhat = self.v[i] / b2c;
            *p -= self.lr * mhat / (vhat.sqrt() + self.eps);
        }
    }
}

#[inline]
fn huber<T: Scalar>(d: T, delta: f64) -> T {
    let a = d.abs();
    if a.value() <= delta {
        T::from_f64(0.5) * d * d
    } else {
        T::from_f64(delta) * (a - T::from_f64(0.5 * delta))
    }
}

/// True once the last `window` losses span less than `threshold`.
pub fn converged(trace: &[f64], window: usize, threshold: f64) -> bool {
    if window == 0 || trace.len() < window {
        return false;
    }
    let tail = &trace[trace.len() - window..];
    let lo = tail.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = tail.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    hi - lo < threshold
}

/// One candidate after fitting.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub model: MotifModel,
    pub final_loss: f64,
    pub loss_trace: Vec<f64>,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct MinimumSearchOutcome {
    /// Index of the winning candidate in the pool.
    pub best_index: usize,
    pub best_target: MotifModel,
    pub final_loss: f64,
    pub loss_trace: Vec<f64>,
    pub termination: Termination,
    /// Every candidate after fitting, in pool order.
    pub fitted_pool: Vec<MotifModel>,
}

/// One outer iteration of the max-min search.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchSnapshot {
    pub source: MotifModel,
    pub target: MotifModel,
    pub inner_loss_trace: Vec<f64>,
    pub outer_loss: f64,
}

/// Append-only history of one max-min run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchRecord {
    pub snapshots: Vec<SearchSnapshot>,
    pub termination: Termination,
}

impl SearchRecord {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn last(&self) -> Option<&SearchSnapshot> {
        self.snapshots.last()
    }

    pub fn outer_losses(&self) -> Vec<f64> {
        self.snapshots.iter().map(|s| s.outer_loss).collect()
    }
}

/// Bi-level similarity search over one fixed grid.
pub struct SimilaritySearch<'p> {
    cfg: SearchConfig,
    sampler: LandscapeSampler,
    inputs: Vec<(ParamDual, ParamDual)>,
    delta: f64,
    progress: &'p dyn Progress,
}

impl SimilaritySearch<'static> {
    pub fn new(cfg: SearchConfig) -> MotifResult<Self> {
        cfg.validate().map_err(MotifError::arg)?;
        let sampler = LandscapeSampler::new(cfg.range, cfg.points)?.with_execution_tier(cfg.tier);
        let inputs = sampler
            .grid_inputs()
            .into_iter()
            .map(|(a, b)| (Dual::constant(a), Dual::constant(b)))
            .collect();
        let delta = sampler.spacing();
        Ok(Self {
            cfg,
            sampler,
            inputs,
            delta,
            progress: &NoProgress,
        })
    }
}

impl<'p> SimilaritySearch<'p> {
    /// Report progress through `progress` instead of discarding it.
    pub fn with_progress<'q>(self, progress: &'q dyn Progress) -> SimilaritySearch<'q> {
        SimilaritySearch {
            cfg: self.cfg,
            sampler: self.sampler,
            inputs: self.inputs,
            delta: self.delta,
            progress,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.cfg
    }

    pub fn sampler(&self) -> &LandscapeSampler {
        &self.sampler
    }

    /// Huber distance between `model`'s landscape and a fixed target
    /// (channel-major values), with its gradient w.r.t. `model`'s parameters.
    pub fn distance_with_gradient(&self, model: &MotifModel, target: &[f64]) -> (f64, Vec<f64>) {
        let values = model.parameter_values();
        let p: Vec<ParamDual> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| Dual::variable(v, i))
            .collect();
        let out = model.forward_with(&p, &self.inputs);

        let mut total = ParamDual::constant(0.0);
        let mut count = 0usize;
        for (y, &t) in out.iter().flatten().zip(target.iter()) {
            total = total + huber(*y - ParamDual::constant(t), self.delta);
            count += 1;
        }
        let loss = total / ParamDual::constant(count.max(1) as f64);
        (loss.re, loss.eps[..values.len()].to_vec())
    }

    fn target_values(&self, model: &MotifModel) -> MotifResult<Vec<f64>> {
        Ok(self.sampler.sample(model)?.flat_values())
    }

    /// Descend one candidate towards `target` until the stopping rule fires.
    pub fn fit_candidate(&self, candidate: &MotifModel, target: &[f64]) -> FitResult {
        let mut model = candidate.clone();
        let mut adam = Adam::new(&self.cfg, model.parameters().len());
        let mut trace = Vec::new();

        let termination = loop {
            let (loss, grad) = self.distance_with_gradient(&model, target);
            trace.push(loss);
            // An exact match cannot improve further.
            if loss < self.cfg.loss_threshold
                || converged(&trace, self.cfg.check_window, self.cfg.loss_threshold)
            {
                break Termination::ConvergedByThreshold;
            }
            if trace.len() >= self.cfg.inner_cap {
                break Termination::ConvergedByCap;
            }
            let mut values = model.parameter_values();
            adam.step(&mut values, &grad);
            model.set_parameter_values(&values);
        };

        FitResult {
            model,
            final_loss: trace.last().copied().unwrap_or(f64::INFINITY),
            loss_trace: trace,
            termination,
        }
    }

    fn check_pool(&self, source: &MotifModel, pool: &[MotifModel]) -> MotifResult<()> {
        if pool.is_empty() {
            return Err(MotifError::arg("target pool is empty"));
        }
        let channels = source.output_channels();
        if let Some(bad) = pool.iter().find(|m| m.output_channels() != channels) {
            return Err(MotifError::arg(format!(
                "{} has {} output channel(s) but source {} has {channels}",
                bad.spec(),
                bad.output_channels(),
                source.spec()
            )));
        }
        Ok(())
    }

    /// Fit every pool member to `source`'s landscape and return the closest.
    pub fn minimum_search(
        &self,
        source: &MotifModel,
        pool: &[MotifModel],
    ) -> MotifResult<MinimumSearchOutcome> {
        self.check_pool(source, pool)?;
        let target = self.target_values(source)?;
        let total = pool.len();

        let done = AtomicUsize::new(0);
        let fit_one = |c: &MotifModel| {
            let fit = self.fit_candidate(c, &target);
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            self.progress.on_progress(current, total, "candidate fitted");
            fit
        };
        let fits: Vec<FitResult> = match self.cfg.tier.effective() {
            #[cfg(feature = "parallel")]
            ExecutionTier::Parallel => pool.par_iter().map(fit_one).collect(),
            _ => pool.iter().map(fit_one).collect(),
        };

        // Lowest final loss wins; ties keep the earliest candidate.
        let mut best_index = 0;
        for (i, fit) in fits.iter().enumerate() {
            if fit.final_loss < fits[best_index].final_loss {
                best_index = i;
            }
        }

        let mut fitted_pool = Vec::with_capacity(fits.len());
        let mut best = None;
        for (i, fit) in fits.into_iter().enumerate() {
            if i == best_index {
                best = Some(fit.clone());
            }
            fitted_pool.push(fit.model);
        }
        let best = best.ok_or_else(|| MotifError::arg("target pool is empty"))?;

        debug!(
            source = %source.spec(),
            best = %best.model.spec(),
            best_index,
            final_loss = best.final_loss,
            iterations = best.loss_trace.len(),
            termination = ?best.termination,
            "minimum search finished"
        );

        Ok(MinimumSearchOutcome {
            best_index,
            best_target: best.model,
            final_loss: best.final_loss,
            loss_trace: best.loss_trace,
            termination: best.termination,
            fitted_pool,
        })
    }

    /// Alternate nearest-match fitting with ascent steps that push `source`
    /// away from its nearest match.
    pub fn max_min_search(
        &self,
        source: &MotifModel,
        pool: &[MotifModel],
    ) -> MotifResult<SearchRecord> {
        self.check_pool(source, pool)?;

        let mut source = source.clone();
        let mut pool = pool.to_vec();
        let mut adam = Adam::new(&self.cfg, source.parameters().len());
        let mut snapshots: Vec<SearchSnapshot> = Vec::new();
        let mut outer = Vec::new();

        let termination = loop {
            let inner = self.minimum_search(&source, &pool)?;
            let target = self.target_values(&inner.best_target)?;
            let outer_loss = inner.final_loss;

            outer.push(outer_loss);
            snapshots.push(SearchSnapshot {
                source: source.clone(),
                target: inner.best_target.clone(),
                inner_loss_trace: inner.loss_trace,
                outer_loss,
            });
            self.progress.on_progress(
                snapshots.len(),
                self.cfg.outer_cap,
                &format!("outer loss {outer_loss:.6e}"),
            );

            if converged(&outer, self.cfg.check_window, self.cfg.loss_threshold) {
                break Termination::ConvergedByThreshold;
            }
            if outer.len() >= self.cfg.outer_cap {
                break Termination::ConvergedByCap;
            }

            // Ascent: descend on the negated distance, then project.
            let (_, grad) = self.distance_with_gradient(&source, &target);
            let ascent: Vec<f64> = grad.iter().map(|g| -g).collect();
            let mut values = source.parameter_values();
            adam.step(&mut values, &ascent);
            source.set_parameter_values(&values);

            if self.cfg.warm_start {
                pool = inner.fitted_pool;
            }
        };

        debug!(
            source = %source.spec(),
            iterations = snapshots.len(),
            termination = ?termination,
            "max-min search finished"
        );

        Ok(SearchRecord {
            snapshots,
            termination,
        })
    }
}

/// Closest member of `pool` to `source` under `cfg`.
pub fn minimum_search(
    source: &MotifModel,
    pool: &[MotifModel],
    cfg: &SearchConfig,
) -> MotifResult<MinimumSearchOutcome> {
    SimilaritySearch::new(*cfg)?.minimum_search(source, pool)
}

/// Full max-min run of `source` against `pool` under `cfg`.
pub fn max_min_search(
    source: &MotifModel,
    pool: &[MotifModel],
    cfg: &SearchConfig,
) -> MotifResult<SearchRecord> {
    SimilaritySearch::new(*cfg)?.max_min_search(source, pool)
}
