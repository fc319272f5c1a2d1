//! Reduced-resistance sensitivities propagated through the tree.
//!
//! [`HierarchicalGradients::set_cache`] walks a freshly updated [`Tree`] and
//! records, for each node, the local derivatives of branch lengths and of the
//! upstream reduced resistance with respect to its position. At every split
//! the record also holds the Jacobian of the child fractions and of the
//! parent reduced resistance with respect to each child's reduced resistance
//! and flow.
//!
//! The global pass then runs top-down from the root branch with
//! `(dRe_dR, dRe_dQ) = (1, 0)`, giving each child
//!
//! ```text
//! dRe_dR[child] = dRp_dRi * dRe_dR[parent]
//! dRe_dQ[child] = dRe_dQ[parent] + dRe_dR[parent] * dRp_dQi
//! ```
//!
//! where `Re` is the reduced resistance at the root. The cache is a snapshot:
//! any change of positions, flows or topology requires a new `set_cache`.

use std::collections::HashMap;

use nalgebra::{DMatrix, Vector3};

use super::tree::{BranchId, NodeId, Tree};
use crate::error::{AngioError, Result};

/// Sensitivity of the root reduced resistance to one branch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalGradient {
    /// Derivative with respect to the branch's reduced resistance.
    pub dre_dr: f64,
    /// Derivative with respect to the branch's flow.
    pub dre_dq: f64,
}

/// Local derivatives at a split.
#[derive(Debug, Clone)]
pub struct SplitRecord {
    /// Branch ending at the split.
    pub upstream: BranchId,
    /// Branches leaving the split.
    pub downstream: Vec<BranchId>,
    /// Child radius fractions.
    pub fractions: Vec<f64>,
    /// `df_i/dR_j`.
    pub dfi_drj: DMatrix<f64>,
    /// `df_i/dQ_j`.
    pub dfi_dqj: DMatrix<f64>,
    /// Derivative of the upstream reduced resistance by each child's.
    pub drp_dri: Vec<f64>,
    /// Derivative of the upstream reduced resistance by each child's flow.
    pub drp_dqi: Vec<f64>,
    /// Upstream branch length.
    pub lp: f64,
    /// Child branch lengths.
    pub li: Vec<f64>,
    /// Gradient of the upstream length by the split position.
    pub dlp_dx: Vector3<f64>,
    /// Gradients of the child lengths by the split position.
    pub dli_dx: Vec<Vector3<f64>>,
    /// Gradient of the upstream reduced resistance by the split position.
    pub drp_dx: Vector3<f64>,
    /// Gradients of the child fractions by the split position.
    pub dfi_dx: Vec<Vector3<f64>>,
}

impl SplitRecord {
    fn new(tree: &Tree, node: NodeId, upstream: BranchId) -> Result<Self> {
        let missing = || AngioError::InvalidState(format!("{:?} is detached", node));
        let x = tree.position(node);
        let parent = tree.branch(upstream).ok_or_else(missing)?;
        let before = parent.nodes()[parent.nodes().len() - 2];
        let downstream = tree.node(node).ok_or_else(missing)?.downstream().to_vec();
        let n = downstream.len();

        let mut resistances = Vec::with_capacity(n);
        let mut flows = Vec::with_capacity(n);
        let mut fractions = Vec::with_capacity(n);
        let mut li = Vec::with_capacity(n);
        let mut dli_dx = Vec::with_capacity(n);
        for &child in &downstream {
            let branch = tree.branch(child).ok_or_else(missing)?;
            resistances.push(branch.reduced_resistance());
            flows.push(branch.flow());
            fractions.push(branch.fraction());
            li.push(branch.length());
            dli_dx.push((x - tree.position(branch.nodes()[1])).normalize());
        }
        let (dfi_drj, dfi_dqj) = tree.rule().gradients_at(node, &resistances, &flows);

        // Rp = Lp + 1/u, u = sum f_i^4 / R_i
        let ui: Vec<f64> = (0..n).map(|i| fractions[i].powi(4) / resistances[i]).collect();
        let u: f64 = ui.iter().sum();
        let drp_du = -u.powi(-2);
        let du_dfi: Vec<f64> = (0..n).map(|i| 4.0 * ui[i] / fractions[i]).collect();

        let mut drp_dri = Vec::with_capacity(n);
        let mut drp_dqi = Vec::with_capacity(n);
        for i in 0..n {
            let mut du_dri = -ui[i] / resistances[i];
            let mut du_dqi = 0.0;
            for j in 0..n {
                du_dri += du_dfi[j] * dfi_drj[(j, i)];
                du_dqi += du_dfi[j] * dfi_dqj[(j, i)];
            }
            drp_dri.push(drp_du * du_dri);
            drp_dqi.push(drp_du * du_dqi);
        }

        let dlp_dx = (x - tree.position(before)).normalize();
        let mut drp_dx = dlp_dx;
        let mut dfi_dx = Vec::with_capacity(n);
        for i in 0..n {
            drp_dx += dli_dx[i] * drp_dri[i];
            dfi_dx.push((0..n).fold(Vector3::zeros(), |acc, j| acc + dli_dx[j] * dfi_drj[(i, j)]));
        }

        Ok(Self {
            upstream,
            downstream,
            fractions,
            dfi_drj,
            dfi_dqj,
            drp_dri,
            drp_dqi,
            lp: parent.length(),
            li,
            dlp_dx,
            dli_dx,
            drp_dx,
            dfi_dx,
        })
    }
}

/// Local derivatives at a node.
#[derive(Debug, Clone)]
pub enum LocalGradient {
    /// The node ends one branch and starts several.
    Split(SplitRecord),
    /// The node changes the length of a single branch.
    Segment {
        /// The branch whose length the node changes.
        branch: BranchId,
        /// Its length.
        length: f64,
        /// Gradient of its length by the node position.
        dl_dx: Vector3<f64>,
    },
}

/// Cached reduced-resistance gradients of a tree.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalGradients {
    local: HashMap<NodeId, LocalGradient>,
    global: Vec<GlobalGradient>,
    root_radius: f64,
    radius_gradients: (f64, f64),
}

impl HierarchicalGradients {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache for `tree`, which must be up to date.
    pub fn from_tree(tree: &Tree) -> Result<Self> {
        let mut cache = Self::new();
        cache.set_cache(tree)?;
        Ok(cache)
    }

    /// Recompute every record from `tree`.
    ///
    /// Fails with [`AngioError::UnrecognizedSource`] when the root is not a
    /// source. Branch lengths must be strictly positive.
    pub fn set_cache(&mut self, tree: &Tree) -> Result<()> {
        let source = tree.source()?;
        let root = tree.root()?;

        self.local.clear();
        for id in tree.node_ids() {
            let Some(node) = tree.node(id) else { continue };
            let record = match node.upstream() {
                Some(upstream) if node.kind().is_split() => {
                    LocalGradient::Split(SplitRecord::new(tree, id, upstream)?)
                }
                Some(branch) => segment_record(tree, id, branch),
                None => segment_record(tree, id, root),
            };
            self.local.insert(id, record);
        }

        self.global = vec![GlobalGradient::default(); tree.num_branches()];
        self.global[root.index()] = GlobalGradient {
            dre_dr: 1.0,
            dre_dq: 0.0,
        };
        for id in tree.branch_ids() {
            let Some(branch) = tree.branch(id) else { continue };
            let Some(LocalGradient::Split(split)) = self.local.get(&branch.end()) else {
                continue;
            };
            let parent = self.global[id.index()];
            for (i, child) in split.downstream.iter().enumerate() {
                self.global[child.index()] = GlobalGradient {
                    dre_dr: split.drp_dri[i] * parent.dre_dr,
                    dre_dq: parent.dre_dq + parent.dre_dr * split.drp_dqi[i],
                };
            }
        }

        let root_branch = tree
            .branch(root)
            .ok_or_else(|| AngioError::InvalidState("missing root branch".to_string()))?;
        let (resistance, flow) = (root_branch.reduced_resistance(), root_branch.flow());
        self.root_radius = source.radius(resistance, flow)?;
        self.radius_gradients = source.radius_gradients(resistance, flow);
        log::trace!(
            "cached gradients for {} nodes, {} branches",
            self.local.len(),
            self.global.len()
        );
        Ok(())
    }

    /// Global sensitivity of a branch.
    pub fn global(&self, branch: BranchId) -> GlobalGradient {
        self.global.get(branch.index()).copied().unwrap_or_default()
    }

    /// Local record of a node.
    pub fn local(&self, node: NodeId) -> Option<&LocalGradient> {
        self.local.get(&node)
    }

    /// Local record of a split node.
    pub fn split_record(&self, node: NodeId) -> Option<&SplitRecord> {
        match self.local.get(&node) {
            Some(LocalGradient::Split(split)) => Some(split),
            _ => None,
        }
    }

    /// Nodes with a local record.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.local.keys().copied()
    }

    /// Root radius at the time of caching.
    pub fn root_radius(&self) -> f64 {
        self.root_radius
    }

    /// `(dr/dR, dr/dQ)` of the root radius by the root reduced resistance and flow.
    pub fn radius_gradients(&self) -> (f64, f64) {
        self.radius_gradients
    }

    /// Gradient of the root reduced resistance by a node's position.
    pub fn position_gradient(&self, node: NodeId) -> Vector3<f64> {
        match self.local.get(&node) {
            Some(LocalGradient::Split(split)) => {
                split.drp_dx * self.global(split.upstream).dre_dr
            }
            Some(LocalGradient::Segment { branch, dl_dx, .. }) => {
                dl_dx * self.global(*branch).dre_dr
            }
            None => Vector3::zeros(),
        }
    }
}

fn segment_record(tree: &Tree, node: NodeId, branch: BranchId) -> LocalGradient {
    let Some(b) = tree.branch(branch) else {
        return LocalGradient::Segment {
            branch,
            length: 0.0,
            dl_dx: Vector3::zeros(),
        };
    };
    let x = tree.position(node);
    let nodes = b.nodes();
    let mut dl_dx = Vector3::zeros();
    if let Some(k) = nodes.iter().position(|&n| n == node) {
        if k > 0 {
            dl_dx += (x - tree.position(nodes[k - 1])).normalize();
        }
        if k + 1 < nodes.len() {
            dl_dx -= (tree.position(nodes[k + 1]) - x).normalize();
        }
    }
    LocalGradient::Segment {
        branch,
        length: b.length(),
        dl_dx,
    }
}
