//! Scalar costs of a tree and their gradients.
//!
//! Every cost is evaluated from a [`HierarchicalGradients`] snapshot. After
//! [`HierarchicalCost::set_cache`] the cost value and all of its gradients are
//! fixed until the next call, so queries need neither the tree nor the cache.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use nalgebra::Vector3;

use super::effective_lengths::EffectiveLengths;
use super::gradients::{GlobalGradient, HierarchicalGradients};
use super::tree::{BranchId, NodeId, Tree};
use crate::error::{AngioError, Result};

/// A differentiable cost of a tree.
pub trait HierarchicalCost: Send + Sync {
    /// Evaluate the cost and its gradients from an up to date cache of `tree`.
    fn set_cache(&mut self, tree: &Tree, cache: &HierarchicalGradients) -> Result<()>;

    /// Cost as of the last `set_cache`.
    fn cost(&self) -> f64;

    /// Gradient by a node's position.
    fn position_gradient(&self, node: NodeId) -> Vector3<f64>;

    /// Derivative by a branch's flow.
    fn flow_gradient(&self, branch: BranchId) -> f64;

    /// Derivative by a branch's reduced resistance.
    fn reduced_resistance_gradient(&self, branch: BranchId) -> f64;

    /// Derivative by a branch's effective length.
    fn effective_length_gradient(&self, _branch: BranchId) -> f64 {
        0.0
    }

    /// Cost of `tree` and its gradient at every mobile node.
    fn evaluate(&mut self, tree: &Tree) -> Result<(f64, HashMap<NodeId, Vector3<f64>>)> {
        let cache = HierarchicalGradients::from_tree(tree)?;
        self.set_cache(tree, &cache)?;
        let gradients = tree
            .mobile_nodes()
            .into_iter()
            .map(|node| (node, self.position_gradient(node)))
            .collect();
        Ok((self.cost(), gradients))
    }
}

/// `a * EL(root) * r_root^r`, the sum of `a L^l r^r` over all branches.
#[derive(Debug, Clone)]
pub struct PolynomialCost {
    /// Multiplier `a`.
    pub multiplier: f64,
    lengths: EffectiveLengths,
    global: Vec<GlobalGradient>,
    positions: HashMap<NodeId, Vector3<f64>>,
    dc_dle: f64,
    dc_dre: f64,
    dc_dqe: f64,
}

impl PolynomialCost {
    /// Cost `multiplier * sum L^l r^r`.
    pub fn new(multiplier: f64, l: f64, r: f64) -> Self {
        Self {
            multiplier,
            lengths: EffectiveLengths::new(r, l),
            global: Vec::new(),
            positions: HashMap::new(),
            dc_dle: 0.0,
            dc_dre: 0.0,
            dc_dqe: 0.0,
        }
    }

    /// The underlying effective lengths.
    pub fn effective_lengths(&self) -> &EffectiveLengths {
        &self.lengths
    }

    /// `(dC/dQ, dC/dR, dC/dL)` for a branch.
    pub fn gradients(&self, branch: BranchId) -> (f64, f64, f64) {
        (
            self.flow_gradient(branch),
            self.reduced_resistance_gradient(branch),
            self.effective_length_gradient(branch),
        )
    }

    fn global(&self, branch: BranchId) -> GlobalGradient {
        self.global.get(branch.index()).copied().unwrap_or_default()
    }
}

impl HierarchicalCost for PolynomialCost {
    fn set_cache(&mut self, tree: &Tree, cache: &HierarchicalGradients) -> Result<()> {
        self.lengths.set_lengths(tree)?;
        self.lengths.set_gradients(tree, cache)?;

        let r = self.lengths.r_exponent;
        let radius = cache.root_radius();
        let (dr_dr, dr_dq) = cache.radius_gradients();
        self.dc_dle = radius.powf(r) * self.multiplier;
        let c = r * radius.powf(r - 1.0) * self.lengths.value() * self.multiplier;
        self.dc_dre = c * dr_dr;
        self.dc_dqe = c * dr_dq;

        self.global = tree.branch_ids().map(|b| cache.global(b)).collect();
        self.positions = cache
            .nodes()
            .map(|node| {
                let gradient = self.lengths.position_gradient(node) * self.dc_dle
                    + cache.position_gradient(node) * self.dc_dre;
                (node, gradient)
            })
            .collect();
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.lengths.value() * self.dc_dle
    }

    fn position_gradient(&self, node: NodeId) -> Vector3<f64> {
        self.positions.get(&node).copied().unwrap_or_else(Vector3::zeros)
    }

    fn flow_gradient(&self, branch: BranchId) -> f64 {
        self.dc_dle * self.lengths.gradients(branch).dle_dq
            + self.dc_dre * self.global(branch).dre_dq
            + self.dc_dqe
    }

    fn reduced_resistance_gradient(&self, branch: BranchId) -> f64 {
        self.dc_dle * self.lengths.gradients(branch).dle_dr
            + self.dc_dre * self.global(branch).dre_dr
    }

    fn effective_length_gradient(&self, branch: BranchId) -> f64 {
        self.dc_dle * self.lengths.gradients(branch).dle_dl
    }
}

/// Pumping work `k Q^2 R / r^4` at the root.
#[derive(Debug, Clone)]
pub struct PumpingWorkCost {
    /// Multiplier `k`.
    pub multiplier: f64,
    /// Flow used in place of the tree's own, if any.
    pub fixed_flow: Option<f64>,
    cost: f64,
    dw_dq: f64,
    dw_dr: f64,
    global: Vec<GlobalGradient>,
    positions: HashMap<NodeId, Vector3<f64>>,
}

impl PumpingWorkCost {
    /// Work with multiplier `multiplier`, at `fixed_flow` if given.
    pub fn new(multiplier: f64, fixed_flow: Option<f64>) -> Self {
        Self {
            multiplier,
            fixed_flow,
            cost: 0.0,
            dw_dq: 0.0,
            dw_dr: 0.0,
            global: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// `(dW/dQ, dW/dR)` for a branch.
    pub fn gradients(&self, branch: BranchId) -> (f64, f64) {
        (
            self.flow_gradient(branch),
            self.reduced_resistance_gradient(branch),
        )
    }

    fn global(&self, branch: BranchId) -> GlobalGradient {
        self.global.get(branch.index()).copied().unwrap_or_default()
    }
}

impl HierarchicalCost for PumpingWorkCost {
    fn set_cache(&mut self, tree: &Tree, cache: &HierarchicalGradients) -> Result<()> {
        let root = tree
            .branch(tree.root()?)
            .ok_or_else(|| AngioError::InvalidState("missing root branch".to_string()))?;
        let (dr_dr, dr_dq) = cache.radius_gradients();
        let r = cache.root_radius();
        let r4i = r.powi(-4);
        let q = self.fixed_flow.unwrap_or_else(|| root.flow());
        let resistance = root.reduced_resistance();

        self.cost = self.multiplier * q * q * resistance * r4i;
        let explicit_q = match self.fixed_flow {
            Some(_) => 0.0,
            None => 2.0 * self.multiplier * resistance * r4i * q,
        };
        self.dw_dq = explicit_q - 4.0 * self.cost / r * dr_dq;
        self.dw_dr = self.multiplier * q * q * r4i - 4.0 * self.cost / r * dr_dr;

        self.global = tree.branch_ids().map(|b| cache.global(b)).collect();
        self.positions = cache
            .nodes()
            .map(|node| (node, cache.position_gradient(node) * self.dw_dr))
            .collect();
        Ok(())
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn position_gradient(&self, node: NodeId) -> Vector3<f64> {
        self.positions.get(&node).copied().unwrap_or_else(Vector3::zeros)
    }

    fn flow_gradient(&self, branch: BranchId) -> f64 {
        self.dw_dq + self.dw_dr * self.global(branch).dre_dq
    }

    fn reduced_resistance_gradient(&self, branch: BranchId) -> f64 {
        self.dw_dr * self.global(branch).dre_dr
    }
}

/// Combines the values of several costs into one.
pub type Combiner = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Partial derivatives of a [`Combiner`] by each of its inputs.
pub type CombinerGradient = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// A function of several costs, differentiated by the chain rule.
pub struct CombinedCost {
    costs: Vec<Box<dyn HierarchicalCost>>,
    combiner: Combiner,
    weights: CombinerGradient,
    values: Vec<f64>,
    gradients: Vec<f64>,
}

impl CombinedCost {
    /// Cost `combiner(costs)` with partials `weights(costs)`.
    pub fn new(
        costs: Vec<Box<dyn HierarchicalCost>>,
        combiner: Combiner,
        weights: CombinerGradient,
    ) -> Self {
        Self {
            costs,
            combiner,
            weights,
            values: Vec::new(),
            gradients: Vec::new(),
        }
    }

    /// Plain sum of `costs`.
    pub fn sum(costs: Vec<Box<dyn HierarchicalCost>>) -> Self {
        let n = costs.len();
        Self::new(
            costs,
            Arc::new(|c: &[f64]| c.iter().sum()),
            Arc::new(move |_: &[f64]| vec![1.0; n]),
        )
    }

    /// Values of the combined costs.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn combine<F: Fn(&dyn HierarchicalCost) -> f64>(&self, f: F) -> f64 {
        self.costs
            .iter()
            .zip(&self.gradients)
            .map(|(c, w)| f(c.as_ref()) * w)
            .sum()
    }
}

impl std::fmt::Debug for CombinedCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedCost")
            .field("costs", &self.costs.len())
            .field("values", &self.values)
            .field("gradients", &self.gradients)
            .finish_non_exhaustive()
    }
}

impl HierarchicalCost for CombinedCost {
    fn set_cache(&mut self, tree: &Tree, cache: &HierarchicalGradients) -> Result<()> {
        for cost in &mut self.costs {
            cost.set_cache(tree, cache)?;
        }
        self.values = self.costs.iter().map(|c| c.cost()).collect();
        self.gradients = (self.weights)(self.values.as_slice());
        if self.gradients.len() != self.costs.len() {
            return Err(AngioError::invalid_param(
                "weights",
                self.gradients.len(),
                "must give one partial per cost",
            ));
        }
        Ok(())
    }

    fn cost(&self) -> f64 {
        (self.combiner)(self.values.as_slice())
    }

    fn position_gradient(&self, node: NodeId) -> Vector3<f64> {
        self.costs
            .iter()
            .zip(&self.gradients)
            .fold(Vector3::zeros(), |acc, (c, w)| acc + c.position_gradient(node) * *w)
    }

    fn flow_gradient(&self, branch: BranchId) -> f64 {
        self.combine(|c| c.flow_gradient(branch))
    }

    fn reduced_resistance_gradient(&self, branch: BranchId) -> f64 {
        self.combine(|c| c.reduced_resistance_gradient(branch))
    }

    fn effective_length_gradient(&self, branch: BranchId) -> f64 {
        self.combine(|c| c.effective_length_gradient(branch))
    }
}

/// Physical constants for the standard costs.
///
/// Lengths are in units of `1 / length_unit` metres, so the default treats
/// positions as millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardCosts {
    /// Length units per metre.
    pub length_unit: f64,
    /// Blood viscosity in Pa s.
    pub viscosity: f64,
    /// Metabolic cost of maintaining a unit volume of blood.
    pub murray_coefficient: f64,
}

impl Default for StandardCosts {
    fn default() -> Self {
        Self {
            length_unit: 1e3,
            viscosity: 3.6e-3,
            murray_coefficient: 640.0,
        }
    }
}

impl StandardCosts {
    /// Set the length unit.
    pub fn with_length_unit(mut self, value: f64) -> Self {
        self.length_unit = value;
        self
    }

    /// Set the viscosity.
    pub fn with_viscosity(mut self, value: f64) -> Self {
        self.viscosity = value;
        self
    }

    /// Set the Murray coefficient.
    pub fn with_murray_coefficient(mut self, value: f64) -> Self {
        self.murray_coefficient = value;
        self
    }

    fn work_multiplier(&self) -> f64 {
        self.viscosity * 8.0 / (PI * self.length_unit.powi(3))
    }

    /// Vessel wall area.
    pub fn surface_area(&self) -> PolynomialCost {
        PolynomialCost::new(2.0 * PI / self.length_unit.powi(2), 1.0, 1.0)
    }

    /// Area covered by the vessels seen from above, for planar trees.
    pub fn projected_area(&self) -> PolynomialCost {
        PolynomialCost::new(2.0 / self.length_unit.powi(2), 1.0, 1.0)
    }

    /// Lumen volume.
    pub fn volume(&self) -> PolynomialCost {
        PolynomialCost::new(PI / self.length_unit.powi(3), 1.0, 2.0)
    }

    /// Pumping work, at `flow` if given.
    pub fn work(&self, flow: Option<f64>) -> PumpingWorkCost {
        PumpingWorkCost::new(self.work_multiplier(), flow)
    }

    /// Flow resistance of the whole tree.
    pub fn resistance(&self) -> PumpingWorkCost {
        PumpingWorkCost::new(self.work_multiplier(), Some(1.0))
    }

    /// Pumping work plus the metabolic cost of the blood volume.
    pub fn murray_cost(&self, flow: Option<f64>) -> CombinedCost {
        let volume = PolynomialCost::new(
            PI / self.length_unit.powi(3) * self.murray_coefficient,
            1.0,
            2.0,
        );
        let costs: Vec<Box<dyn HierarchicalCost>> =
            vec![Box::new(self.work(flow)), Box::new(volume)];
        CombinedCost::sum(costs)
    }

    /// Negated useful tissue volume per unit running cost, for a domain of volume `dv`.
    pub fn volume_efficiency(&self, dv: f64, flow: Option<f64>) -> CombinedCost {
        let mb = self.murray_coefficient;
        let costs: Vec<Box<dyn HierarchicalCost>> =
            vec![Box::new(self.work(flow)), Box::new(self.volume())];
        CombinedCost::new(
            costs,
            Arc::new(move |c: &[f64]| -(dv - c[1]) / (c[0] + mb * c[1])),
            Arc::new(move |c: &[f64]| {
                let den = (c[0] + mb * c[1]).powi(2);
                vec![(dv - c[1]) / den, (mb * dv + c[0]) / den]
            }),
        )
    }

    /// Negated unoccluded area per unit running cost, for a planar domain of area `da`.
    ///
    /// With `with_murray` the running cost includes blood maintenance.
    pub fn projected_area_efficiency(
        &self,
        da: f64,
        flow: Option<f64>,
        with_murray: bool,
    ) -> CombinedCost {
        let work: Box<dyn HierarchicalCost> = Box::new(self.work(flow));
        let area: Box<dyn HierarchicalCost> = Box::new(self.projected_area());
        if !with_murray {
            return CombinedCost::new(
                vec![work, area],
                Arc::new(move |c: &[f64]| -(da - c[1]) / c[0]),
                Arc::new(move |c: &[f64]| vec![(da - c[1]) / (c[0] * c[0]), 1.0 / c[0]]),
            );
        }
        let mb = self.murray_coefficient;
        let volume: Box<dyn HierarchicalCost> = Box::new(self.volume());
        CombinedCost::new(
            vec![work, volume, area],
            Arc::new(move |c: &[f64]| -(da - c[2]) / (c[0] + mb * c[1])),
            Arc::new(move |c: &[f64]| {
                let den = c[0] + mb * c[1];
                vec![
                    (da - c[2]) / (den * den),
                    (da - c[2]) * mb / (den * den),
                    1.0 / den,
                ]
            }),
        )
    }
}
