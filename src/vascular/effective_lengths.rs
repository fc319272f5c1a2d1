//! Effective lengths: recursive length-radius power sums.
//!
//! For exponents `l` and `r`, each branch has
//!
//! ```text
//! EL(terminal) = L^l
//! EL(branch)   = L^l + sum_i f_i^r EL(child_i)
//! ```
//!
//! so that `EL(root) * r_root^r = sum L^l r^r` over all branches. Total length,
//! surface area and volume are all of this form.
//!
//! Gradients of `EL(root)` are accumulated top-down. Each branch carries
//! `(dLe_dQ, dLe_dR, dLe_dL)`, the derivatives of the root value by the
//! branch's flow, reduced resistance and own effective length. The root starts
//! at `(0, 0, 1)`, and a child `i` of a split receives
//!
//! ```text
//! dLe_dQ[i] = LL * sum_j c_j df_j/dQ_i + dRp_dQi * LR + LQ
//! dLe_dR[i] = LL * sum_j c_j df_j/dR_i + dRp_dRi * LR
//! dLe_dL[i] = LL * f_i^r
//! ```
//!
//! with `c_j = r f_j^(r-1) EL(child_j)` and `(LQ, LR, LL)` the parent's terms.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::gradients::{HierarchicalGradients, LocalGradient};
use super::tree::{BranchId, NodeId, Tree};
use crate::error::{AngioError, Result};

/// Derivatives of the root effective length with respect to one branch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectiveLengthGradient {
    /// By the branch's flow.
    pub dle_dq: f64,
    /// By the branch's reduced resistance.
    pub dle_dr: f64,
    /// By the branch's own effective length.
    pub dle_dl: f64,
}

/// Effective lengths of a tree and their gradients.
#[derive(Debug, Clone)]
pub struct EffectiveLengths {
    /// Exponent of the radius fractions.
    pub r_exponent: f64,
    /// Exponent of the branch lengths.
    pub l_exponent: f64,
    values: Vec<f64>,
    gradients: Vec<EffectiveLengthGradient>,
    positions: HashMap<NodeId, Vector3<f64>>,
}

impl EffectiveLengths {
    /// Effective lengths with radius exponent `r_exponent` and length exponent `l_exponent`.
    pub fn new(r_exponent: f64, l_exponent: f64) -> Self {
        Self {
            r_exponent,
            l_exponent,
            values: Vec::new(),
            gradients: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Effective length of the root branch.
    pub fn value(&self) -> f64 {
        self.values.first().copied().unwrap_or(0.0)
    }

    /// Effective length of a branch.
    pub fn branch_value(&self, branch: BranchId) -> Option<f64> {
        self.values.get(branch.index()).copied()
    }

    /// Gradients of the root value with respect to a branch.
    pub fn gradients(&self, branch: BranchId) -> EffectiveLengthGradient {
        self.gradients
            .get(branch.index())
            .copied()
            .unwrap_or_default()
    }

    /// Gradient of the root value by a node's position.
    pub fn position_gradient(&self, node: NodeId) -> Vector3<f64> {
        self.positions.get(&node).copied().unwrap_or_else(Vector3::zeros)
    }

    /// Compute every branch value bottom-up.
    ///
    /// Lengths are measured at the current node positions. Fractions are
    /// those of the last [`Tree::update`].
    pub fn set_lengths(&mut self, tree: &Tree) -> Result<()> {
        self.values = vec![0.0; tree.num_branches()];
        for id in (0..tree.num_branches()).rev() {
            self.values[id] = self.own_value(tree, BranchId::new(id))?;
        }
        Ok(())
    }

    fn own_value(&self, tree: &Tree, id: BranchId) -> Result<f64> {
        let branch = tree
            .branch(id)
            .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", id)))?;
        let mut value = tree.measure(id).powf(self.l_exponent);
        for &child in branch.children() {
            let fraction = tree.branch(child).map_or(0.0, |c| c.fraction());
            let el = self.values.get(child.index()).copied().ok_or_else(|| {
                AngioError::InvalidState("effective lengths are not set".to_string())
            })?;
            value += fraction.powf(self.r_exponent) * el;
        }
        Ok(value)
    }

    /// Compute branch and position gradients from `cache`.
    ///
    /// [`EffectiveLengths::set_lengths`] must have run on the same tree.
    pub fn set_gradients(&mut self, tree: &Tree, cache: &HierarchicalGradients) -> Result<()> {
        if self.values.len() != tree.num_branches() || self.values.is_empty() {
            return Err(AngioError::InvalidState(
                "effective lengths are not set".to_string(),
            ));
        }
        let (l, r) = (self.l_exponent, self.r_exponent);

        self.gradients = vec![EffectiveLengthGradient::default(); tree.num_branches()];
        self.gradients[0].dle_dl = 1.0;
        for id in tree.branch_ids() {
            let Some(split) = tree.branch(id).and_then(|b| cache.split_record(b.end())) else {
                continue;
            };
            let parent = self.gradients[id.index()];
            let n = split.downstream.len();
            let c: Vec<f64> = (0..n)
                .map(|j| {
                    r * split.fractions[j].powf(r - 1.0) * self.values[split.downstream[j].index()]
                })
                .collect();
            for (i, child) in split.downstream.iter().enumerate() {
                let dlq: f64 = (0..n).map(|j| c[j] * split.dfi_dqj[(j, i)]).sum();
                let dlr: f64 = (0..n).map(|j| c[j] * split.dfi_drj[(j, i)]).sum();
                self.gradients[child.index()] = EffectiveLengthGradient {
                    dle_dq: dlq * parent.dle_dl + split.drp_dqi[i] * parent.dle_dr + parent.dle_dq,
                    dle_dr: dlr * parent.dle_dl + split.drp_dri[i] * parent.dle_dr,
                    dle_dl: split.fractions[i].powf(r) * parent.dle_dl,
                };
            }
        }

        self.positions.clear();
        for node in cache.nodes() {
            let gradient = match cache.local(node) {
                Some(LocalGradient::Split(split)) => {
                    let g = self.gradients[split.upstream.index()];
                    let mut del = split.dlp_dx * (l * split.lp.powf(l - 1.0));
                    for (i, child) in split.downstream.iter().enumerate() {
                        let f = split.fractions[i];
                        del += split.dli_dx[i] * (l * split.li[i].powf(l - 1.0) * f.powf(r));
                        del += split.dfi_dx[i]
                            * (self.values[child.index()] * r * f.powf(r - 1.0));
                    }
                    split.drp_dx * g.dle_dr + del * g.dle_dl
                }
                Some(LocalGradient::Segment {
                    branch,
                    length,
                    dl_dx,
                }) => {
                    let g = self.gradients(*branch);
                    dl_dx * (g.dle_dr + g.dle_dl * l * length.powf(l - 1.0))
                }
                None => continue,
            };
            self.positions.insert(node, gradient);
        }
        Ok(())
    }

    /// Re-sum the values after `node` moved.
    ///
    /// Only the branches touching `node` and their ancestors are visited. The
    /// fractions and gradients of the last full evaluation are kept, so this is
    /// only valid while the topology is unchanged.
    pub fn propagate(&mut self, tree: &Tree, node: NodeId) -> Result<()> {
        let n = tree
            .node(node)
            .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", node)))?;
        match n.upstream() {
            Some(upstream) => {
                for &child in n.downstream() {
                    self.set_own_value(tree, child)?;
                }
                self.propagate_branch(tree, upstream)
            }
            None => match n.downstream().first() {
                Some(&root) => self.propagate_branch(tree, root),
                None => Ok(()),
            },
        }
    }

    /// Re-sum `branch` and every ancestor.
    pub fn propagate_branch(&mut self, tree: &Tree, branch: BranchId) -> Result<()> {
        let mut current = Some(branch);
        while let Some(id) = current {
            self.set_own_value(tree, id)?;
            current = tree.branch(id).and_then(|b| b.parent());
        }
        Ok(())
    }

    fn set_own_value(&mut self, tree: &Tree, id: BranchId) -> Result<()> {
        let value = self.own_value(tree, id)?;
        let slot = self.values.get_mut(id.index()).ok_or_else(|| {
            AngioError::InvalidState("effective lengths are not set".to_string())
        })?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vascular::finite_difference;
    use crate::vascular::tree::tests::random_tree;
    use crate::vascular::tree::{NodeKind, SourceKind};
    use nalgebra::Point3;

    fn root_value(l: f64, r: f64) -> impl FnMut(&Tree) -> Result<f64> {
        move |tree| {
            let mut el = EffectiveLengths::new(r, l);
            el.set_lengths(tree)?;
            Ok(el.value())
        }
    }

    fn evaluated(tree: &Tree, l: f64, r: f64) -> EffectiveLengths {
        let cache = HierarchicalGradients::from_tree(tree).unwrap();
        let mut el = EffectiveLengths::new(r, l);
        el.set_lengths(tree).unwrap();
        el.set_gradients(tree, &cache).unwrap();
        el
    }

    #[test]
    fn test_total_length() {
        let tree = random_tree(2, SourceKind::Radius { radius: 1.0 });
        let mut el = EffectiveLengths::new(0.0, 1.0);
        el.set_lengths(&tree).unwrap();
        let total: f64 = tree.branch_ids().map(|b| tree.branch(b).unwrap().length()).sum();
        assert!((el.value() - total).abs() < 1e-12);
    }

    #[test]
    fn test_volume_matches_radii() {
        let tree = random_tree(4, SourceKind::Pressure { pressure: 3.0 });
        let mut el = EffectiveLengths::new(2.0, 1.0);
        el.set_lengths(&tree).unwrap();
        let sum: f64 = tree
            .branch_ids()
            .map(|b| tree.branch(b).unwrap().length() * tree.radius(b).unwrap().powi(2))
            .sum();
        let r0 = tree.root_radius().unwrap();
        assert!((el.value() * r0 * r0 - sum).abs() < 1e-10 * sum);
    }

    #[test]
    fn test_position_gradients_match_finite_differences() {
        let tree = random_tree(9, SourceKind::Radius { radius: 1.0 });
        for (l, r) in [(1.0, 2.0), (2.0, 3.0)] {
            let el = evaluated(&tree, l, r);
            for node in tree.mobile_nodes() {
                let numeric =
                    finite_difference::position_gradient(&tree, node, 1e-6, root_value(l, r))
                        .unwrap();
                let analytic = el.position_gradient(node);
                let scale = analytic.norm().max(numeric.norm());
                assert!(
                    (analytic - numeric).norm() <= 1e-5 * scale + 1e-12,
                    "l={} r={} {:?}: {:?} vs {:?}",
                    l,
                    r,
                    node,
                    analytic,
                    numeric
                );
            }
        }
    }

    #[test]
    fn test_flow_gradients_match_finite_differences() {
        let tree = random_tree(13, SourceKind::Radius { radius: 1.0 });
        let el = evaluated(&tree, 1.0, 2.0);
        for branch in tree.branch_ids() {
            let end = tree.branch(branch).unwrap().end();
            if !matches!(tree.node(end).unwrap().kind(), NodeKind::Terminal { .. }) {
                continue;
            }
            let numeric =
                finite_difference::flow_gradient(&tree, branch, 1e-6, root_value(1.0, 2.0))
                    .unwrap();
            let analytic = el.gradients(branch).dle_dq;
            assert!(
                (analytic - numeric).abs() <= 1e-5 * analytic.abs().max(numeric.abs()) + 1e-12,
                "{:?}: {} vs {}",
                branch,
                analytic,
                numeric
            );
        }
    }

    #[test]
    fn test_own_length_gradient() {
        let tree = random_tree(21, SourceKind::Radius { radius: 1.0 });
        let el = evaluated(&tree, 1.0, 2.0);
        assert_eq!(el.gradients(BranchId::new(0)).dle_dl, 1.0);

        // dLe_dL is the product of f^r along the path from the root.
        for b in tree.branch_ids().skip(1) {
            let mut expected = 1.0;
            let mut current = Some(b);
            while let Some(id) = current {
                let branch = tree.branch(id).unwrap();
                expected *= branch.fraction().powi(2);
                current = branch.parent();
            }
            assert!((el.gradients(b).dle_dl - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_propagate_matches_full_sum() {
        let mut tree = random_tree(17, SourceKind::Radius { radius: 1.0 });
        let mut el = EffectiveLengths::new(2.0, 1.0);
        el.set_lengths(&tree).unwrap();

        let moves = tree.mobile_nodes();
        for (k, &node) in moves.iter().enumerate() {
            let p = tree.position(node) + nalgebra::Vector3::new(0.05, -0.02, 0.01 * k as f64);
            tree.set_position(node, p).unwrap();
            el.propagate(&tree, node).unwrap();

            let mut fresh = EffectiveLengths::new(2.0, 1.0);
            fresh.set_lengths(&tree).unwrap();
            assert!((el.value() - fresh.value()).abs() < 1e-12);
        }

        tree.set_position(tree.root_node(), Point3::new(-0.5, 0.0, 0.0))
            .unwrap();
        el.propagate(&tree, tree.root_node()).unwrap();
        let mut fresh = EffectiveLengths::new(2.0, 1.0);
        fresh.set_lengths(&tree).unwrap();
        assert!((el.value() - fresh.value()).abs() < 1e-12);
    }

    #[test]
    fn test_gradients_require_lengths() {
        let tree = random_tree(1, SourceKind::Radius { radius: 1.0 });
        let cache = HierarchicalGradients::from_tree(&tree).unwrap();
        let mut el = EffectiveLengths::new(2.0, 1.0);
        assert!(matches!(
            el.set_gradients(&tree, &cache),
            Err(AngioError::InvalidState(_))
        ));
    }
}
