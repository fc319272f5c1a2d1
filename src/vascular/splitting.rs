//! Radius splitting rules.
//!
//! At a split, each child branch receives a radius fraction `f_i = r_i / r_p`
//! determined by the children's reduced resistances `R` and flows `Q`. The
//! rules here are generalized Murray's laws: `c_i = (R_i Q_i)^(1/4)` and
//! `f_i = c_i / ||c||_e`, so that `sum f_i^e = 1`. The exponent may be
//! constant or depend on the total flow through the split, see
//! [`FlowVariableMurray`]. [`ConstantRadius`] and [`UntetheredSplitting`] do
//! not conserve a Murray sum at all.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::DMatrix;

use super::tree::{NodeId, Tree};
use crate::error::{AngioError, Result};

/// Determines child radius fractions at a split.
pub trait SplittingRule: std::fmt::Debug + Send + Sync {
    /// Whether the rule can split into `children` branches.
    fn supports(&self, children: usize) -> bool {
        children >= 2
    }

    /// Radius fractions of each child.
    fn fractions(&self, resistances: &[f64], flows: &[f64]) -> Vec<f64>;

    /// Jacobians `(df_i/dR_j, df_i/dQ_j)`, indexed `[(i, j)]`.
    fn gradients(&self, resistances: &[f64], flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>);

    /// Radius fractions of the children of `split`.
    ///
    /// Rules that keep per-split state override this; the default ignores
    /// the node.
    fn fractions_at(&self, split: NodeId, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        let _ = split;
        self.fractions(resistances, flows)
    }

    /// Jacobians of [`SplittingRule::fractions_at`].
    fn gradients_at(
        &self,
        split: NodeId,
        resistances: &[f64],
        flows: &[f64],
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let _ = split;
        self.gradients(resistances, flows)
    }
}

/// Grouped terms `c_i = (R_i Q_i)^(1/4)`.
fn ratios(resistances: &[f64], flows: &[f64]) -> Vec<f64> {
    resistances
        .iter()
        .zip(flows)
        .map(|(r, q)| (r * q).powf(0.25))
        .collect()
}

/// Murray's law with a constant exponent, for any number of children.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantMurray {
    /// Exponent `e` in `r_p^e = sum r_i^e`.
    pub exponent: f64,
}

impl Default for ConstantMurray {
    fn default() -> Self {
        Self { exponent: 3.0 }
    }
}

impl ConstantMurray {
    /// Rule with exponent `exponent`.
    pub fn new(exponent: f64) -> Self {
        Self { exponent }
    }
}

impl SplittingRule for ConstantMurray {
    fn fractions(&self, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        let mut f = ratios(resistances, flows);
        let s = f
            .iter()
            .map(|c| c.powf(self.exponent))
            .sum::<f64>()
            .powf(-1.0 / self.exponent);
        f.iter_mut().for_each(|c| *c *= s);
        f
    }

    fn gradients(&self, resistances: &[f64], flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        let f = self.fractions(resistances, flows);
        let fe: Vec<f64> = f.iter().map(|fi| fi.powf(self.exponent)).collect();
        let n = f.len();

        // df_i/dA_i = f_i (1 - f_i^e) / 4A_i, df_i/dA_j = -f_i f_j^e / 4A_j
        let jacobian = |a: &[f64]| {
            DMatrix::from_fn(n, n, |i, j| {
                if i == j {
                    f[i] * (1.0 - fe[i]) * 0.25 / a[i]
                } else {
                    -f[i] * fe[j] * 0.25 / a[j]
                }
            })
        };
        (jacobian(resistances), jacobian(flows))
    }
}

/// Two-child Murray's law.
///
/// Gives the same fractions as [`ConstantMurray`] but only accepts
/// bifurcations, differentiating through the grouped terms `c_i` directly.
/// Called with any other number of children it falls back to
/// [`ConstantMurray`] with the same exponent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Murray {
    /// Exponent `e` in `r_p^e = r_0^e + r_1^e`.
    pub exponent: f64,
}

impl Default for Murray {
    fn default() -> Self {
        Self { exponent: 3.0 }
    }
}

impl Murray {
    /// Rule with exponent `exponent`.
    pub fn new(exponent: f64) -> Self {
        Self { exponent }
    }

    /// `(df_i/dc_i, df_j/dc_i)` for the grouped terms of a bifurcation.
    fn group_gradient(&self, ci: f64, cj: f64) -> (f64, f64) {
        let e = self.exponent;
        let cie = ci.powf(e);
        let cje = cj.powf(e);
        let s = (cie + cje).powf(-(e + 1.0) / e);
        (cje * s, -cj * ci.powf(e - 1.0) * s)
    }
}

impl SplittingRule for Murray {
    fn supports(&self, children: usize) -> bool {
        children == 2
    }

    fn fractions(&self, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        if resistances.len() != 2 {
            return ConstantMurray::new(self.exponent).fractions(resistances, flows);
        }
        let c0 = (resistances[0] * flows[0]).powf(0.25);
        let c1 = (resistances[1] * flows[1]).powf(0.25);
        let s = (c0.powf(self.exponent) + c1.powf(self.exponent)).powf(-1.0 / self.exponent);
        vec![c0 * s, c1 * s]
    }

    fn gradients(&self, resistances: &[f64], flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        if resistances.len() != 2 {
            return ConstantMurray::new(self.exponent).gradients(resistances, flows);
        }
        let c = [
            (resistances[0] * flows[0]).powf(0.25),
            (resistances[1] * flows[1]).powf(0.25),
        ];
        let mut dr = DMatrix::zeros(2, 2);
        let mut dq = DMatrix::zeros(2, 2);
        for i in 0..2 {
            let j = 1 - i;
            let (dfi, dfj) = self.group_gradient(c[i], c[j]);
            let dc_dr = 0.25 * flows[i] * c[i].powi(-3);
            let dc_dq = 0.25 * resistances[i] * c[i].powi(-3);
            dr[(i, i)] = dfi * dc_dr;
            dr[(j, i)] = dfj * dc_dr;
            dq[(i, i)] = dfi * dc_dq;
            dq[(j, i)] = dfj * dc_dq;
        }
        (dr, dq)
    }
}

/// A Murray exponent that varies with the total flow through a split.
pub trait FlowExponent: std::fmt::Debug + Send + Sync {
    /// Exponent at total flow `flow`.
    fn exponent(&self, flow: f64) -> f64;

    /// Derivative of [`FlowExponent::exponent`] by the total flow.
    fn exponent_gradient(&self, flow: f64) -> f64;
}

/// Exponent decaying from `e_max` at `q_min` to `e_min` at `q_max`:
/// `e(Q) = a exp(-bQ) + c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialExponent {
    a: f64,
    b: f64,
    c: f64,
}

impl ExponentialExponent {
    /// Exponent through `(q_min, e_max)` and `(q_max, e_min)` decaying at `rate`.
    pub fn new(q_min: f64, e_max: f64, q_max: f64, e_min: f64, rate: f64) -> Result<Self> {
        if !(q_max > q_min && q_max.is_finite()) {
            return Err(AngioError::invalid_param("q_max", q_max, "must exceed q_min"));
        }
        if !(rate > 0.0 && rate.is_finite()) {
            return Err(AngioError::invalid_param(
                "rate",
                rate,
                "must be positive and finite",
            ));
        }
        Ok(Self::through(q_min, e_max, q_max, e_min, rate))
    }

    /// Exponent through `(q_min, e_max)` and `(q_max, e_min)` whose rate is
    /// chosen so that it also passes within `tolerance` of `(q_mid, e_mid)`.
    ///
    /// The rate is bracketed by doubling or halving `1 / (q_max - q_min)`,
    /// then bisected. Each phase takes at most `iterations` steps; a
    /// midpoint that cannot be bracketed is an error.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        q_min: f64,
        e_max: f64,
        q_max: f64,
        e_min: f64,
        q_mid: f64,
        e_mid: f64,
        tolerance: f64,
        iterations: usize,
    ) -> Result<Self> {
        let initial = Self::new(q_min, e_max, q_max, e_min, 1.0 / (q_max - q_min))?;
        let miss = |rate: f64| {
            let e = Self::through(q_min, e_max, q_max, e_min, rate);
            (e, e.exponent(q_mid) - e_mid)
        };

        // Faster decay lowers the exponent at the midpoint.
        let d0 = initial.exponent(q_mid) - e_mid;
        if d0.abs() <= tolerance {
            return Ok(initial);
        }
        let (mut lo, mut hi) = (initial.b, initial.b);
        let mut bracketed = false;
        for _ in 0..iterations {
            let rate = if d0 > 0.0 { hi * 2.0 } else { lo * 0.5 };
            let (e, d) = miss(rate);
            if d.abs() <= tolerance {
                return Ok(e);
            }
            if d0 > 0.0 {
                lo = hi;
                hi = rate;
            } else {
                hi = lo;
                lo = rate;
            }
            if !d.is_finite() {
                break;
            }
            if d.signum() != d0.signum() {
                bracketed = true;
                break;
            }
        }
        if !bracketed {
            return Err(AngioError::invalid_param(
                "e_mid",
                e_mid,
                "no decay rate reaches the midpoint exponent",
            ));
        }

        let mut best = initial;
        for _ in 0..iterations {
            let rate = 0.5 * (lo + hi);
            let (e, d) = miss(rate);
            best = e;
            if d.abs() <= tolerance {
                break;
            }
            if d > 0.0 {
                lo = rate;
            } else {
                hi = rate;
            }
        }
        Ok(best)
    }

    fn through(q_min: f64, e_max: f64, q_max: f64, e_min: f64, rate: f64) -> Self {
        let b = rate;
        let a = (e_max - e_min) / ((-b * q_min).exp() - (-b * q_max).exp());
        let c = e_max - a * (-b * q_min).exp();
        Self { a, b, c }
    }

    /// Decay rate `b`.
    pub fn rate(&self) -> f64 {
        self.b
    }
}

impl FlowExponent for ExponentialExponent {
    fn exponent(&self, flow: f64) -> f64 {
        self.a * (-self.b * flow).exp() + self.c
    }

    fn exponent_gradient(&self, flow: f64) -> f64 {
        -self.a * self.b * (-self.b * flow).exp()
    }
}

/// Holds an inner exponent constant outside `[q_lo, q_hi]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampedExponent<E> {
    /// Flow below which the exponent is `e_lo`.
    pub q_lo: f64,
    /// Exponent below `q_lo`.
    pub e_lo: f64,
    /// Flow above which the exponent is `e_hi`.
    pub q_hi: f64,
    /// Exponent above `q_hi`.
    pub e_hi: f64,
    /// Exponent within `[q_lo, q_hi]`.
    pub inner: E,
}

impl<E: FlowExponent> ClampedExponent<E> {
    /// Clamps `inner` to its own values at `q_lo` and `q_hi`.
    pub fn continuous(q_lo: f64, q_hi: f64, inner: E) -> Self {
        Self {
            q_lo,
            e_lo: inner.exponent(q_lo),
            q_hi,
            e_hi: inner.exponent(q_hi),
            inner,
        }
    }
}

impl<E: FlowExponent> FlowExponent for ClampedExponent<E> {
    fn exponent(&self, flow: f64) -> f64 {
        if flow < self.q_lo {
            self.e_lo
        } else if flow > self.q_hi {
            self.e_hi
        } else {
            self.inner.exponent(flow)
        }
    }

    fn exponent_gradient(&self, flow: f64) -> f64 {
        if flow < self.q_lo || flow > self.q_hi {
            0.0
        } else {
            self.inner.exponent_gradient(flow)
        }
    }
}

/// Murray's law whose exponent depends on the total flow `Q = sum Q_i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowVariableMurray<E> {
    /// Exponent as a function of total flow.
    pub exponent: E,
}

/// Murray's law with an exponentially decaying exponent.
pub type ExponentialMurray = FlowVariableMurray<ExponentialExponent>;

/// Murray's law with a flow-dependent exponent held constant at the extremes.
pub type ClampedMurray<E> = FlowVariableMurray<ClampedExponent<E>>;

impl<E: FlowExponent> FlowVariableMurray<E> {
    /// Rule with a flow-dependent `exponent`.
    pub fn new(exponent: E) -> Self {
        Self { exponent }
    }
}

impl<E: FlowExponent> SplittingRule for FlowVariableMurray<E> {
    fn fractions(&self, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        let e = self.exponent.exponent(flows.iter().sum());
        ConstantMurray::new(e).fractions(resistances, flows)
    }

    fn gradients(&self, resistances: &[f64], flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        let total: f64 = flows.iter().sum();
        let e = self.exponent.exponent(total);
        let (dr, mut dq) = ConstantMurray::new(e).gradients(resistances, flows);

        // f_i = c_i a^b, a = sum c^e, b = -1/e; every Q_j moves e.
        let c = ratios(resistances, flows);
        let a: f64 = c.iter().map(|ci| ci.powf(e)).sum();
        let da_de: f64 = c.iter().map(|ci| ci.powf(e) * ci.ln()).sum();
        let b = -1.0 / e;
        let db_de = 1.0 / (e * e);
        let dscale_de = b * a.powf(b - 1.0) * da_de + a.powf(b) * a.ln() * db_de;
        let dscale_dq = self.exponent.exponent_gradient(total) * dscale_de;
        for (i, ci) in c.iter().enumerate() {
            for j in 0..c.len() {
                dq[(i, j)] += ci * dscale_dq;
            }
        }
        (dr, dq)
    }
}

/// Every child keeps the parent radius.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstantRadius;

impl SplittingRule for ConstantRadius {
    fn fractions(&self, resistances: &[f64], _flows: &[f64]) -> Vec<f64> {
        vec![1.0; resistances.len()]
    }

    fn gradients(&self, resistances: &[f64], _flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = resistances.len();
        (DMatrix::zeros(n, n), DMatrix::zeros(n, n))
    }
}

/// Frees each split from a conservation law once it has a sensible radius.
///
/// A tethered split stores a factor `k` and gives `f_i = c_i / k`, so its
/// child radii follow their own resistances and flows independently.
/// Splits without a factor use the `initial` rule. [`UntetheredSplitting::tether`]
/// records factors that reproduce an updated tree's current fractions.
#[derive(Debug, Clone)]
pub struct UntetheredSplitting {
    initial: Arc<dyn SplittingRule>,
    factors: HashMap<NodeId, f64>,
}

impl Default for UntetheredSplitting {
    fn default() -> Self {
        Self::new(Arc::new(ConstantMurray::default()))
    }
}

impl UntetheredSplitting {
    /// Untethered splitting with no factors yet.
    pub fn new(initial: Arc<dyn SplittingRule>) -> Self {
        Self {
            initial,
            factors: HashMap::new(),
        }
    }

    /// Records a factor for every split of `tree` that has none yet, chosen
    /// so that the split keeps the fractions of the last update.
    pub fn tether(&mut self, tree: &Tree) {
        for id in tree.node_ids() {
            let Some(node) = tree.node(id) else { continue };
            if !node.kind().is_split() {
                continue;
            }
            let Some(first) = node.downstream().first().and_then(|&b| tree.branch(b)) else {
                continue;
            };
            let ratio = (first.flow() * first.reduced_resistance()).powf(0.25);
            if first.fraction() > 0.0 && ratio.is_finite() {
                self.factors.entry(id).or_insert(ratio / first.fraction());
            }
        }
    }

    /// Drops the factors of nodes that are no longer splits of `tree`.
    pub fn restrict_to(&mut self, tree: &Tree) {
        self.factors
            .retain(|&id, _| tree.node(id).is_some_and(|n| n.kind().is_split()));
        self.factors.shrink_to_fit();
    }

    /// Stored factor of `split`, if tethered.
    pub fn factor(&self, split: NodeId) -> Option<f64> {
        self.factors.get(&split).copied()
    }

    /// Tether `split` with factor `factor`.
    pub fn set_factor(&mut self, split: NodeId, factor: f64) -> Result<()> {
        if !(factor > 0.0 && factor.is_finite()) {
            return Err(AngioError::invalid_param(
                "factor",
                factor,
                "must be positive and finite",
            ));
        }
        self.factors.insert(split, factor);
        Ok(())
    }

    /// All stored factors.
    pub fn factors(&self) -> &HashMap<NodeId, f64> {
        &self.factors
    }
}

impl SplittingRule for UntetheredSplitting {
    fn supports(&self, children: usize) -> bool {
        self.initial.supports(children)
    }

    fn fractions(&self, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        self.initial.fractions(resistances, flows)
    }

    fn gradients(&self, resistances: &[f64], flows: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
        self.initial.gradients(resistances, flows)
    }

    fn fractions_at(&self, split: NodeId, resistances: &[f64], flows: &[f64]) -> Vec<f64> {
        match self.factor(split) {
            Some(k) => ratios(resistances, flows).iter().map(|c| c / k).collect(),
            None => self.initial.fractions_at(split, resistances, flows),
        }
    }

    fn gradients_at(
        &self,
        split: NodeId,
        resistances: &[f64],
        flows: &[f64],
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let Some(k) = self.factor(split) else {
            return self.initial.gradients_at(split, resistances, flows);
        };
        let c = ratios(resistances, flows);
        let n = c.len();
        let dr = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                0.25 * c[i] / k / resistances[i]
            } else {
                0.0
            }
        });
        let dq = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                0.25 * c[i] / k / flows[i]
            } else {
                0.0
            }
        });
        (dr, dq)
    }
}
