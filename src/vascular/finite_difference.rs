//! Central-difference estimates for checking analytic gradients.
//!
//! Each estimate clones the tree, perturbs it, runs [`Tree::update`] and
//! evaluates the supplied cost function, so these are far too slow for
//! optimization and exist to validate the hierarchical gradients.

use nalgebra::Vector3;

use super::cost::HierarchicalCost;
use super::gradients::HierarchicalGradients;
use super::tree::{BranchId, NodeId, NodeKind, Tree};
use crate::error::{AngioError, Result};

/// Central-difference gradient of `cost` by the position of `node`.
pub fn position_gradient<F>(tree: &Tree, node: NodeId, h: f64, mut cost: F) -> Result<Vector3<f64>>
where
    F: FnMut(&Tree) -> Result<f64>,
{
    check_step(h)?;
    let mut perturbed = tree.clone();
    let x = tree
        .node(node)
        .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", node)))?
        .position();
    let mut gradient = Vector3::zeros();
    for axis in 0..3 {
        let mut offset = Vector3::zeros();
        offset[axis] = h;

        perturbed.set_position(node, x + offset)?;
        perturbed.update()?;
        let up = cost(&perturbed)?;

        perturbed.set_position(node, x - offset)?;
        perturbed.update()?;
        let down = cost(&perturbed)?;

        gradient[axis] = (up - down) / (2.0 * h);
    }
    Ok(gradient)
}

/// Central-difference derivative of `cost` by the flow of a terminal branch.
pub fn flow_gradient<F>(tree: &Tree, branch: BranchId, h: f64, mut cost: F) -> Result<f64>
where
    F: FnMut(&Tree) -> Result<f64>,
{
    check_step(h)?;
    let end = tree
        .branch(branch)
        .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", branch)))?
        .end();
    let kind = tree
        .node(end)
        .map(|n| *n.kind())
        .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", end)))?;
    let NodeKind::Terminal { flow, .. } = kind else {
        return Err(AngioError::invalid_param(
            "branch",
            format!("{:?}", branch),
            "flow gradients need a terminal branch",
        ));
    };

    let mut perturbed = tree.clone();
    perturbed.set_flow(end, flow + h)?;
    perturbed.update()?;
    let up = cost(&perturbed)?;

    perturbed.set_flow(end, flow - h)?;
    perturbed.update()?;
    let down = cost(&perturbed)?;

    Ok((up - down) / (2.0 * h))
}

/// Adapts a cost for the estimators above, re-caching it for every evaluation.
pub fn cost_function<C>(cost: &mut C) -> impl FnMut(&Tree) -> Result<f64> + '_
where
    C: HierarchicalCost + ?Sized,
{
    move |tree| {
        let cache = HierarchicalGradients::from_tree(tree)?;
        cost.set_cache(tree, &cache)?;
        Ok(cost.cost())
    }
}

fn check_step(h: f64) -> Result<()> {
    if h > 0.0 && h.is_finite() {
        Ok(())
    } else {
        Err(AngioError::invalid_param("h", h, "must be positive and finite"))
    }
}
