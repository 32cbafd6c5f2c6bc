use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dual::Scalar;
use crate::error::{MotifError, MotifResult};
use crate::prng::Prng;

/// Largest learnable-parameter count of any topology (loops: 3 weights + 2 biases).
pub const MAX_PARAMS: usize = 5;

/// Closed interval `[lo, hi]`. For weights this is a *magnitude* range.
pub type Bound = [f64; 2];

/// Default weight magnitude box.
pub const DEFAULT_WEIGHT_BOUND: Bound = [1e-3, 1.0];

/// Default bias box.
pub const DEFAULT_BIAS_BOUND: Bound = [-1.0, 1.0];

/// Batch output range below which normalization centers instead of rescaling.
pub const DEGENERATE_RANGE: f64 = 1e-12;

/// The five fixed 3-node topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Topology {
    Collider,
    Fork,
    Chain,
    CoherentLoop,
    IncoherentLoop,
}

// Sign tables, indexed by sub-type - 1. Loop weight order is
// (x1 -> mediator, x1 -> out, mediator -> out).
const PAIR_SIGNS: [[f64; 2]; 4] = [[1.0, 1.0], [1.0, -1.0], [-1.0, 1.0], [-1.0, -1.0]];
const COHERENT_SIGNS: [[f64; 3]; 4] = [
    [1.0, 1.0, 1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, -1.0],
    [-1.0, 1.0, -1.0],
];
const INCOHERENT_SIGNS: [[f64; 3]; 4] = [
    [1.0, 1.0, -1.0],
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

impl Topology {
    pub const ALL: [Topology; 5] = [
        Topology::Collider,
        Topology::Fork,
        Topology::Chain,
        Topology::CoherentLoop,
        Topology::IncoherentLoop,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topology::Collider => "collider",
            Topology::Fork => "fork",
            Topology::Chain => "chain",
            Topology::CoherentLoop => "coherent-loop",
            Topology::IncoherentLoop => "incoherent-loop",
        }
    }

    pub fn parse(name: &str) -> MotifResult<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "collider" => Ok(Topology::Collider),
            "fork" => Ok(Topology::Fork),
            "chain" => Ok(Topology::Chain),
            "coherent-loop" | "coherent" => Ok(Topology::CoherentLoop),
            "incoherent-loop" | "incoherent" => Ok(Topology::IncoherentLoop),
            other => Err(MotifError::spec(format!("unknown topology '{other}'"))),
        }
    }

    pub fn weight_count(self) -> usize {
        match self {
            Topology::Collider | Topology::Fork | Topology::Chain => 2,
            Topology::CoherentLoop | Topology::IncoherentLoop => 3,
        }
    }

    pub fn bias_count(self) -> usize {
        match self {
            Topology::Collider => 1,
            _ => 2,
        }
    }

    pub fn parameter_count(self) -> usize {
        self.weight_count() + self.bias_count()
    }

    pub fn activation_count(self) -> usize {
        match self {
            Topology::Collider => 1,
            _ => 2,
        }
    }

    pub fn aggregation_count(self) -> usize {
        match self {
            Topology::Collider => 1,
            Topology::Fork | Topology::Chain => 0,
            Topology::CoherentLoop | Topology::IncoherentLoop => 2,
        }
    }

    /// Fork has one output node per branch; everything else has one.
    pub fn output_channels(self) -> usize {
        match self {
            Topology::Fork => 2,
            _ => 1,
        }
    }

    /// Fork and chain read only the first input.
    pub fn input_count(self) -> usize {
        match self {
            Topology::Fork | Topology::Chain => 1,
            _ => 2,
        }
    }

    /// Fixed weight signs for `subtype` in 1..=4.
    pub fn sign_table(self, subtype: u8) -> MotifResult<&'static [f64]> {
        if !(1..=4).contains(&subtype) {
            return Err(MotifError::spec(format!(
                "sub-type index must be in 1..=4, got {subtype}"
            )));
        }
        let i = usize::from(subtype - 1);
        Ok(match self {
            Topology::Collider | Topology::Fork | Topology::Chain => &PAIR_SIGNS[i],
            Topology::CoherentLoop => &COHERENT_SIGNS[i],
            Topology::IncoherentLoop => &INCOHERENT_SIGNS[i],
        })
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn name(self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        }
    }

    pub fn parse(name: &str) -> MotifResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            other => Err(MotifError::spec(format!("unknown activation '{other}'"))),
        }
    }

    #[inline]
    pub fn apply<T: Scalar>(self, x: T) -> T {
        match self {
            Activation::Relu => x.relu(),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => x.sigmoid(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Aggregation {
    Sum,
    Avg,
    Max,
}

impl Aggregation {
    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Max => "max",
        }
    }

    pub fn parse(name: &str) -> MotifResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "avg" | "mean" => Ok(Aggregation::Avg),
            "max" => Ok(Aggregation::Max),
            other => Err(MotifError::spec(format!("unknown aggregation '{other}'"))),
        }
    }

    #[inline]
    pub fn apply<T: Scalar>(self, a: T, b: T) -> T {
        match self {
            Aggregation::Sum => a + b,
            Aggregation::Avg => (a + b) * T::from_f64(0.5),
            Aggregation::Max => a.max(b),
        }
    }
}

/// Immutable motif descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawMotifSpec"))]
pub struct MotifSpec {
    topology: Topology,
    subtype: u8,
    activations: Vec<Activation>,
    aggregations: Vec<Aggregation>,
}

impl MotifSpec {
    /// Build a spec from activation/aggregation names.
    pub fn new(
        topology: Topology,
        subtype: u8,
        activations: &[&str],
        aggregations: &[&str],
    ) -> MotifResult<Self> {
        let activations = activations
            .iter()
            .map(|a| Activation::parse(a))
            .collect::<MotifResult<Vec<_>>>()?;
        let aggregations = aggregations
            .iter()
            .map(|a| Aggregation::parse(a))
            .collect::<MotifResult<Vec<_>>>()?;
        Self::from_parts(topology, subtype, activations, aggregations)
    }

    pub fn from_parts(
        topology: Topology,
        subtype: u8,
        activations: Vec<Activation>,
        aggregations: Vec<Aggregation>,
    ) -> MotifResult<Self> {
        topology.sign_table(subtype)?;
        if activations.len() != topology.activation_count() {
            return Err(MotifError::spec(format!(
                "{topology} needs {} activation(s), got {}",
                topology.activation_count(),
                activations.len()
            )));
        }
        if aggregations.len() != topology.aggregation_count() {
            return Err(MotifError::spec(format!(
                "{topology} needs {} aggregation(s), got {}",
                topology.aggregation_count(),
                aggregations.len()
            )));
        }
        Ok(Self {
            topology,
            subtype,
            activations,
            aggregations,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    /// Weight signs for this topology/sub-type.
    pub fn signs(&self) -> &'static [f64] {
        // Validated at construction.
        self.topology.sign_table(self.subtype).unwrap_or(&[])
    }

    /// Canonical descriptor, e.g. `coherent-loop-1-relu_tanh-sum_max`.
    pub fn label(&self) -> String {
        let acts: Vec<&str> = self.activations.iter().map(|a| a.name()).collect();
        let mut out = format!("{}-{}-{}", self.topology, self.subtype, acts.join("_"));
        if !self.aggregations.is_empty() {
            let aggs: Vec<&str> = self.aggregations.iter().map(|a| a.name()).collect();
            out.push('-');
            out.push_str(&aggs.join("_"));
        }
        out
    }

    /// Persistence/batch key for the `index`-th motif of this spec.
    pub fn descriptor(&self, index: usize) -> String {
        format!("{}#{index}", self.label())
    }

    /// Inverse of [`MotifSpec::descriptor`]; the `#index` suffix is optional.
    pub fn parse_descriptor(descriptor: &str) -> MotifResult<(Self, usize)> {
        let (label, index) = match descriptor.rsplit_once('#') {
            Some((label, idx)) => {
                let index = idx
                    .parse::<usize>()
                    .map_err(|_| MotifError::spec(format!("bad descriptor index '{idx}'")))?;
                (label, index)
            }
            None => (descriptor, 0),
        };

        // Topology names contain '-', so match the known prefixes first.
        let topology = Topology::ALL
            .iter()
            .copied()
            .filter(|t| label.starts_with(&format!("{}-", t.name())))
            .max_by_key(|t| t.name().len())
            .ok_or_else(|| MotifError::spec(format!("bad descriptor '{descriptor}'")))?;
        let rest = &label[topology.name().len() + 1..];
        let mut parts = rest.split('-');

        let subtype = parts
            .next()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or_else(|| MotifError::spec(format!("bad descriptor '{descriptor}'")))?;
        let acts: Vec<&str> = parts.next().map(|s| s.split('_').collect()).unwrap_or_default();
        let aggs: Vec<&str> = parts.next().map(|s| s.split('_').collect()).unwrap_or_default();
        if parts.next().is_some() {
            return Err(MotifError::spec(format!("bad descriptor '{descriptor}'")));
        }

        Ok((Self::new(topology, subtype, &acts, &aggs)?, index))
    }
}

// Decoded specs go through the same checks as constructed ones.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawMotifSpec {
    topology: Topology,
    subtype: u8,
    activations: Vec<Activation>,
    #[serde(default)]
    aggregations: Vec<Aggregation>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawMotifSpec> for MotifSpec {
    type Error = MotifError;

    fn try_from(raw: RawMotifSpec) -> MotifResult<Self> {
        Self::from_parts(raw.topology, raw.subtype, raw.activations, raw.aggregations)
    }
}

impl fmt::Display for MotifSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Project a weight into its signed magnitude box.
#[inline]
pub fn clamp_weight(value: f64, sign: f64, bound: Bound) -> f64 {
    if sign >= 0.0 {
        value.clamp(bound[0], bound[1])
    } else {
        value.clamp(-bound[1], -bound[0])
    }
}

/// Project a bias into its box.
#[inline]
pub fn clamp_bias(value: f64, bound: Bound) -> f64 {
    value.clamp(bound[0], bound[1])
}

#[inline]
fn clamp_scalar<T: Scalar>(x: T, lo: f64, hi: f64) -> T {
    if x.value() < lo {
        T::from_f64(lo)
    } else if x.value() > hi {
        T::from_f64(hi)
    } else {
        x
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightParam {
    pub value: f64,
    pub sign: f64,
    pub bound: Bound,
}

impl WeightParam {
    /// Signed interval `[lo, hi]` the value must lie in.
    pub fn interval(&self) -> Bound {
        if self.sign >= 0.0 {
            self.bound
        } else {
            [-self.bound[1], -self.bound[0]]
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        let [lo, hi] = self.interval();
        value.is_finite() && lo <= value && value <= hi
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BiasParam {
    pub value: f64,
    pub bound: Bound,
}

impl BiasParam {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && self.bound[0] <= value && value <= self.bound[1]
    }
}

/// Learnable scalars of one motif: weights first, then biases.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSet {
    pub weights: Vec<WeightParam>,
    pub biases: Vec<BiasParam>,
}

impl ParameterSet {
    pub fn len(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened `[w.., b..]` values.
    pub fn values(&self) -> Vec<f64> {
        self.weights
            .iter()
            .map(|w| w.value)
            .chain(self.biases.iter().map(|b| b.value))
            .collect()
    }

    /// Overwrite values from a flattened slice. Values are stored as given;
    /// call [`ParameterSet::restrict`] afterwards.
    pub fn set_values(&mut self, values: &[f64]) {
        let nw = self.weights.len();
        for (w, v) in self.weights.iter_mut().zip(values.iter()) {
            w.value = *v;
        }
        for (b, v) in self.biases.iter_mut().zip(values.iter().skip(nw)) {
            b.value = *v;
        }
    }

    /// Clamp every value back into its box. Idempotent.
    pub fn restrict(&mut self) {
        for w in &mut self.weights {
            w.value = clamp_weight(w.value, w.sign, w.bound);
        }
        for b in &mut self.biases {
            b.value = clamp_bias(b.value, b.bound);
        }
    }

    pub fn is_within_box(&self) -> bool {
        self.weights.iter().all(|w| w.contains(w.value))
            && self.biases.iter().all(|b| b.contains(b.value))
    }
}

/// Whether forward returns batch-normalized or raw outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Normalization {
    /// Min-max rescale each output channel over the evaluated batch to [-1, 1].
    #[default]
    BatchMinMax,
    /// Unscaled node outputs.
    Raw,
}

/// One motif instance: spec, constrained parameters and forward rule.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawMotifModel"))]
pub struct MotifModel {
    spec: MotifSpec,
    params: ParameterSet,
    normalization: Normalization,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawMotifModel {
    spec: MotifSpec,
    params: ParameterSet,
    #[serde(default)]
    normalization: Normalization,
}

#[cfg(feature = "serde")]
impl TryFrom<RawMotifModel> for MotifModel {
    type Error = MotifError;

    fn try_from(raw: RawMotifModel) -> MotifResult<Self> {
        Self::from_parts(raw.spec, raw.params, raw.normalization)
    }
}

impl MotifModel {
    /// Random initialization uniformly inside the default boxes.
    pub fn random(spec: MotifSpec, rng: &mut Prng) -> Self {
        let weights = spec
            .signs()
            .iter()
            .map(|&sign| {
                let bound = DEFAULT_WEIGHT_BOUND;
                WeightParam {
                    value: sign * rng.gen_range_f64(bound[0], bound[1]),
                    sign,
                    bound,
                }
            })
            .collect();
        let biases = (0..spec.topology().bias_count())
            .map(|_| {
                let bound = DEFAULT_BIAS_BOUND;
                BiasParam {
                    value: rng.gen_range_f64(bound[0], bound[1]),
                    bound,
                }
            })
            .collect();

        Self {
            spec,
            params: ParameterSet { weights, biases },
            normalization: Normalization::default(),
        }
    }

    /// Construct from explicit values, validated against the default boxes.
    pub fn with_parameters(spec: MotifSpec, weights: &[f64], biases: &[f64]) -> MotifResult<Self> {
        let weights = validate_weights(&spec, weights)?;
        let biases = validate_biases(&spec, biases)?;
        Ok(Self {
            spec,
            params: ParameterSet { weights, biases },
            normalization: Normalization::default(),
        })
    }

    /// Reassemble a model from stored parts. Counts, signs and bounds must
    /// agree with `spec` and every value must already lie in its box.
    pub fn from_parts(
        spec: MotifSpec,
        params: ParameterSet,
        normalization: Normalization,
    ) -> MotifResult<Self> {
        let signs = spec.signs();
        if params.weights.len() != signs.len()
            || params.biases.len() != spec.topology.bias_count()
        {
            return Err(MotifError::spec(format!(
                "{spec} needs {} weight(s) and {} bias(es), got {} and {}",
                signs.len(),
                spec.topology.bias_count(),
                params.weights.len(),
                params.biases.len()
            )));
        }
        for (i, (w, &sign)) in params.weights.iter().zip(signs.iter()).enumerate() {
            let [lo, hi] = w.bound;
            if w.sign != sign || !lo.is_finite() || !hi.is_finite() || lo < 0.0 || lo > hi {
                return Err(MotifError::spec(format!(
                    "weight {i} has sign {} and bound {:?}, {spec} expects sign {sign}",
                    w.sign, w.bound
                )));
            }
        }
        for (i, b) in params.biases.iter().enumerate() {
            let [lo, hi] = b.bound;
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(MotifError::spec(format!("bias {i} has bad bound {:?}", b.bound)));
            }
        }
        if !params.is_within_box() {
            return Err(MotifError::spec(format!(
                "parameters {:?} outside their boxes for {spec}",
                params.values()
            )));
        }
        Ok(Self {
            spec,
            params,
            normalization,
        })
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn spec(&self) -> &MotifSpec {
        &self.spec
    }

    pub fn topology(&self) -> Topology {
        self.spec.topology
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    pub fn parameter_values(&self) -> Vec<f64> {
        self.params.values()
    }

    /// Overwrite parameters and project them back into their boxes.
    pub fn set_parameter_values(&mut self, values: &[f64]) {
        self.params.set_values(values);
        self.params.restrict();
    }

    /// Post-update projection; must follow every optimizer step.
    pub fn restrict(&mut self) {
        self.params.restrict();
    }

    pub fn output_channels(&self) -> usize {
        self.spec.topology.output_channels()
    }

    /// Raw single-sample forward rule. `p` is the flattened `[w.., b..]` vector;
    /// the second output is zero for single-channel topologies.
    pub fn forward_raw<T: Scalar>(&self, p: &[T], x1: T, x2: T) -> [T; 2] {
        let nw = self.params.weights.len();
        let w = |i: usize| {
            let [lo, hi] = self.params.weights[i].interval();
            clamp_scalar(p[i], lo, hi)
        };
        let b = |i: usize| {
            let [lo, hi] = self.params.biases[i].bound;
            clamp_scalar(p[nw + i], lo, hi)
        };
        let act = &self.spec.activations;
        let agg = &self.spec.aggregations;
        let zero = T::from_f64(0.0);

        match self.spec.topology {
            Topology::Collider => {
                let s = agg[0].apply(w(0) * x1, w(1) * x2);
                [act[0].apply(s + b(0)), zero]
            }
            Topology::Fork => [
                act[0].apply(w(0) * x1 + b(0)),
                act[1].apply(w(1) * x1 + b(1)),
            ],
            Topology::Chain => {
                let h = act[0].apply(w(0) * x1 + b(0));
                [act[1].apply(w(1) * h + b(1)), zero]
            }
            Topology::CoherentLoop | Topology::IncoherentLoop => {
                let aux = w(0) * x1;
                let mediator = act[0].apply(agg[0].apply(aux, x2) + b(0));
                let out = agg[1].apply(w(1) * x1, w(2) * mediator);
                [act[1].apply(out + b(1)), zero]
            }
        }
    }

    /// Evaluate a batch with generic scalars. Returns `channels x batch`.
    pub fn forward_with<T: Scalar>(&self, p: &[T], inputs: &[(T, T)]) -> Vec<Vec<T>> {
        let channels = self.output_channels();
        let mut out: Vec<Vec<T>> = (0..channels)
            .map(|_| Vec::with_capacity(inputs.len()))
            .collect();
        for &(x1, x2) in inputs {
            let y = self.forward_raw(p, x1, x2);
            for (c, col) in out.iter_mut().enumerate() {
                col.push(y[c]);
            }
        }
        if self.normalization == Normalization::BatchMinMax {
            for col in &mut out {
                normalize_batch(col);
            }
        }
        out
    }

    /// Evaluate a batch of `(x1, x2)` inputs with the current parameters.
    pub fn evaluate(&self, inputs: &[(f64, f64)]) -> Vec<Vec<f64>> {
        let p = self.params.values();
        self.forward_with(&p, inputs)
    }

    /// Human-readable one-line summary.
    pub fn describe(&self) -> String {
        let w: Vec<String> = self
            .params
            .weights
            .iter()
            .map(|w| format!("{:+.4}", w.value))
            .collect();
        let b: Vec<String> = self
            .params
            .biases
            .iter()
            .map(|b| format!("{:+.4}", b.value))
            .collect();
        format!("{} w=[{}] b=[{}]", self.spec, w.join(", "), b.join(", "))
    }
}

/// Batch-relative min-max rescale to [-1, 1]; centers on zero when degenerate.
pub fn normalize_batch<T: Scalar>(col: &mut [T]) {
    let Some(&first) = col.first() else {
        return;
    };
    let (lo, hi) = col
        .iter()
        .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if range.value() < DEGENERATE_RANGE {
        let n = T::from_f64(col.len() as f64);
        let mean = col.iter().fold(T::from_f64(0.0), |acc, &v| acc + v) / n;
        for v in col.iter_mut() {
            *v = *v - mean;
        }
        return;
    }
    let two = T::from_f64(2.0);
    let one = T::from_f64(1.0);
    for v in col.iter_mut() {
        *v = two * (*v - lo) / range - one;
    }
}

fn validate_weights(spec: &MotifSpec, weights: &[f64]) -> MotifResult<Vec<WeightParam>> {
    let signs = spec.signs();
    if weights.len() != signs.len() {
        return Err(MotifError::spec(format!(
            "{} needs {} weight(s), got {}",
            spec.topology,
            signs.len(),
            weights.len()
        )));
    }
    weights
        .iter()
        .zip(signs.iter())
        .enumerate()
        .map(|(i, (&value, &sign))| {
            let param = WeightParam {
                value,
                sign,
                bound: DEFAULT_WEIGHT_BOUND,
            };
            if param.contains(value) {
                Ok(param)
            } else {
                let [lo, hi] = param.interval();
                Err(MotifError::spec(format!(
                    "weight {i} = {value} outside [{lo}, {hi}] for {spec}"
                )))
            }
        })
        .collect()
}

fn validate_biases(spec: &MotifSpec, biases: &[f64]) -> MotifResult<Vec<BiasParam>> {
    let expected = spec.topology.bias_count();
    if biases.len() != expected {
        return Err(MotifError::spec(format!(
            "{} needs {expected} bias(es), got {}",
            spec.topology,
            biases.len()
        )));
    }
    biases
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let param = BiasParam {
                value,
                bound: DEFAULT_BIAS_BOUND,
            };
            if param.contains(value) {
                Ok(param)
            } else {
                Err(MotifError::spec(format!(
                    "bias {i} = {value} outside {:?}",
                    DEFAULT_BIAS_BOUND
                )))
            }
        })
        .collect()
}

/// Try every sign flip of `magnitudes` (power-set order, mask 0 = as given)
/// and return the first assignment that validates against the sign table.
pub fn resolve_signs(spec: &MotifSpec, magnitudes: &[f64]) -> MotifResult<Vec<f64>> {
    let n = magnitudes.len();
    if n != spec.topology.weight_count() {
        return Err(MotifError::spec(format!(
            "{} needs {} weight(s), got {n}",
            spec.topology,
            spec.topology.weight_count()
        )));
    }
    for mask in 0u32..(1u32 << n) {
        let candidate: Vec<f64> = magnitudes
            .iter()
            .enumerate()
            .map(|(i, &m)| if mask & (1 << i) != 0 { -m } else { m })
            .collect();
        if validate_weights(spec, &candidate).is_ok() {
            return Ok(candidate);
        }
    }
    Err(MotifError::spec(format!(
        "no sign assignment of {magnitudes:?} fits {spec}"
    )))
}

/// Build one motif; missing weights/biases are drawn uniformly inside the box.
pub fn build_motif(
    spec: &MotifSpec,
    weights: Option<&[f64]>,
    biases: Option<&[f64]>,
    rng: &mut Prng,
) -> MotifResult<MotifModel> {
    let random = MotifModel::random(spec.clone(), rng);
    let weights = match weights {
        Some(w) => w.to_vec(),
        None => random.params.weights.iter().map(|w| w.value).collect(),
    };
    let biases = match biases {
        Some(b) => b.to_vec(),
        None => random.params.biases.iter().map(|b| b.value).collect(),
    };
    MotifModel::with_parameters(spec.clone(), &weights, &biases)
}

/// Build `sample_count` motifs of one spec. Supplied weights are treated as
/// unsigned nominal magnitudes and resolved against the sign table.
pub fn build_motif_population(
    spec: &MotifSpec,
    sample_count: usize,
    weights: Option<&[f64]>,
    biases: Option<&[f64]>,
    seed: u64,
) -> MotifResult<Vec<MotifModel>> {
    let signed = weights.map(|w| resolve_signs(spec, w)).transpose()?;
    (0..sample_count)
        .map(|i| {
            let mut rng = Prng::fork(seed, i as u64);
            build_motif(spec, signed.as_deref(), biases, &mut rng)
        })
        .collect()
}
