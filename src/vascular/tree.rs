//! Branching vessel tree with cached flow-physics quantities.
//!
//! A [`Tree`] stores nodes and branches in arenas addressed by [`NodeId`] and
//! [`BranchId`]. A branch is a chain of nodes running from a start node (the
//! root or a split) to an end node (a split or a terminal), with transients in
//! between. Branches are always created after their parent, so a parent's id
//! is smaller than any of its children's and iterating branches by id visits
//! the tree top-down.
//!
//! [`Tree::update`] recomputes lengths, flows, child radius fractions and
//! reduced resistances bottom-up. Reduced resistance is the resistance of a
//! subtree with the branch radius factored out: a terminal branch has
//! `R = L`, and a branch ending in a split has `R = L + 1 / sum(f_i^4 / R_i)`.

use std::sync::Arc;

use nalgebra::Point3;

use super::splitting::{ConstantMurray, SplittingRule};
use crate::error::{AngioError, Result};
use crate::mesh::impl_index_type;

impl_index_type!(
    /// A type-safe tree node index.
    NodeId,
    "N"
);
impl_index_type!(
    /// A type-safe tree branch index.
    BranchId,
    "B"
);

/// How the root radius is determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceKind {
    /// The root radius is fixed.
    Radius {
        /// Root radius.
        radius: f64,
    },
    /// The root radius follows from a fixed pressure drop.
    Pressure {
        /// Pressure drop across the tree.
        pressure: f64,
    },
}

impl SourceKind {
    /// Root radius for a tree of reduced resistance `resistance` carrying `flow`.
    pub fn radius(&self, resistance: f64, flow: f64) -> Result<f64> {
        match *self {
            SourceKind::Radius { radius } => Ok(radius),
            SourceKind::Pressure { pressure } => {
                if pressure.is_nan() || pressure <= 0.0 {
                    return Err(AngioError::invalid_param(
                        "pressure",
                        pressure,
                        "must be positive",
                    ));
                }
                Ok((resistance * flow / pressure).powf(0.25))
            }
        }
    }

    /// `(dr/dR, dr/dQ)` of the root radius.
    pub fn radius_gradients(&self, resistance: f64, flow: f64) -> (f64, f64) {
        match *self {
            SourceKind::Radius { .. } => (0.0, 0.0),
            SourceKind::Pressure { pressure } => {
                let rq = resistance * flow / pressure;
                let c = 0.25 * rq.powf(-0.75) / pressure;
                (c * flow, c * resistance)
            }
        }
    }
}

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    /// Tree inlet.
    Source(SourceKind),
    /// A bend within a branch.
    Transient,
    /// A split into two children.
    Bifurcation,
    /// A split into any number of children.
    HigherSplit,
    /// A tree outlet.
    Terminal {
        /// Flow delivered through this outlet.
        flow: f64,
        /// Whether the optimizer may move it.
        mobile: bool,
    },
}

impl NodeKind {
    /// Mobile terminal with `flow`.
    pub fn terminal(flow: f64) -> Self {
        NodeKind::Terminal { flow, mobile: true }
    }

    /// Whether the node splits flow between children.
    pub fn is_split(&self) -> bool {
        matches!(self, NodeKind::Bifurcation | NodeKind::HigherSplit)
    }

    /// Whether gradient descent may move the node.
    pub fn is_mobile(&self) -> bool {
        match self {
            NodeKind::Source(_) => false,
            NodeKind::Terminal { mobile, .. } => *mobile,
            _ => true,
        }
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub struct Node {
    position: Point3<f64>,
    kind: NodeKind,
    upstream: Option<BranchId>,
    downstream: Vec<BranchId>,
}

impl Node {
    /// Position.
    pub fn position(&self) -> Point3<f64> {
        self.position
    }

    /// Kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The branch this node lies on or ends, if any.
    pub fn upstream(&self) -> Option<BranchId> {
        self.upstream
    }

    /// Branches starting at this node.
    pub fn downstream(&self) -> &[BranchId] {
        &self.downstream
    }
}

/// A chain of nodes between two splits, or between a split and a terminal.
#[derive(Debug, Clone)]
pub struct Branch {
    nodes: Vec<NodeId>,
    parent: Option<BranchId>,
    children: Vec<BranchId>,
    length: f64,
    flow: f64,
    reduced_resistance: f64,
    fraction: f64,
}

impl Branch {
    /// Nodes from start to end.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// First node.
    pub fn start(&self) -> NodeId {
        self.nodes[0]
    }

    /// Last node.
    pub fn end(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Parent branch, `None` for the root branch.
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// Child branches, in creation order.
    pub fn children(&self) -> &[BranchId] {
        &self.children
    }

    /// Length as of the last update.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Flow as of the last update.
    pub fn flow(&self) -> f64 {
        self.flow
    }

    /// Reduced resistance as of the last update.
    pub fn reduced_resistance(&self) -> f64 {
        self.reduced_resistance
    }

    /// Radius relative to the parent branch. The root branch has 1.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

/// A rooted vessel tree.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    branches: Vec<Branch>,
    rule: Arc<dyn SplittingRule>,
}

impl Tree {
    /// Empty tree with a root node at `position`.
    ///
    /// The root is normally a [`NodeKind::Source`]. A tree rooted at any
    /// other kind can still be built and updated, but radius evaluation
    /// fails with [`AngioError::UnrecognizedSource`].
    pub fn new(position: Point3<f64>, root: NodeKind, rule: Arc<dyn SplittingRule>) -> Self {
        Self {
            nodes: vec![Node {
                position,
                kind: root,
                upstream: None,
                downstream: Vec::new(),
            }],
            branches: Vec::new(),
            rule,
        }
    }

    /// Tree with a source root, split by Murray's law with exponent 3.
    pub fn with_source(position: Point3<f64>, source: SourceKind) -> Self {
        Self::new(
            position,
            NodeKind::Source(source),
            Arc::new(ConstantMurray::default()),
        )
    }

    /// Grow a branch from `start` through `path` to a new `end` node.
    ///
    /// `start` must be the root (which takes a single branch) or a split
    /// ending an existing branch. The end node must be a split or a terminal.
    pub fn add_branch(
        &mut self,
        start: NodeId,
        path: &[Point3<f64>],
        end: Point3<f64>,
        kind: NodeKind,
    ) -> Result<BranchId> {
        if matches!(kind, NodeKind::Source(_) | NodeKind::Transient) {
            return Err(AngioError::invalid_param(
                "kind",
                format!("{:?}", kind),
                "branches must end in a split or a terminal",
            ));
        }
        let node = self
            .nodes
            .get(start.index())
            .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", start)))?;
        let parent = node.upstream;
        match parent {
            None if start != self.root_node() => {
                return Err(AngioError::InvalidState(format!(
                    "{:?} is not attached to the tree",
                    start
                )))
            }
            None if !node.downstream.is_empty() => {
                return Err(AngioError::InvalidState(
                    "the root already has a branch".to_string(),
                ))
            }
            Some(_) if !node.kind.is_split() => {
                return Err(AngioError::InvalidState(format!(
                    "{:?} is not a split",
                    start
                )))
            }
            Some(_) if node.kind == NodeKind::Bifurcation && node.downstream.len() >= 2 => {
                return Err(AngioError::InvalidState(format!(
                    "{:?} already has two children",
                    start
                )))
            }
            _ => {}
        }

        let id = BranchId::new(self.branches.len());
        let mut nodes = Vec::with_capacity(path.len() + 2);
        nodes.push(start);
        for &position in path {
            nodes.push(self.push_node(position, NodeKind::Transient, id));
        }
        nodes.push(self.push_node(end, kind, id));

        self.nodes[start.index()].downstream.push(id);
        if let Some(parent) = parent {
            self.branches[parent.index()].children.push(id);
        }
        self.branches.push(Branch {
            nodes,
            parent,
            children: Vec::new(),
            length: 0.0,
            flow: 0.0,
            reduced_resistance: 0.0,
            fraction: 1.0,
        });
        Ok(id)
    }

    fn push_node(&mut self, position: Point3<f64>, kind: NodeKind, upstream: BranchId) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node {
            position,
            kind,
            upstream: Some(upstream),
            downstream: Vec::new(),
        });
        id
    }

    /// The root node.
    pub fn root_node(&self) -> NodeId {
        NodeId::new(0)
    }

    /// The branch leaving the root.
    pub fn root(&self) -> Result<BranchId> {
        if self.branches.is_empty() {
            Err(AngioError::InvalidState("tree has no branches".to_string()))
        } else {
            Ok(BranchId::new(0))
        }
    }

    /// The source kind of the root.
    pub fn source(&self) -> Result<SourceKind> {
        match self.nodes[0].kind {
            NodeKind::Source(source) => Ok(source),
            _ => Err(AngioError::UnrecognizedSource { node: 0 }),
        }
    }

    /// Replace the source kind of the root.
    pub fn set_source(&mut self, source: SourceKind) {
        self.nodes[0].kind = NodeKind::Source(source);
    }

    /// The splitting rule.
    pub fn rule(&self) -> &dyn SplittingRule {
        self.rule.as_ref()
    }

    /// Replaces the splitting rule. Takes effect at the next update.
    pub fn set_rule(&mut self, rule: Arc<dyn SplittingRule>) {
        self.rule = rule;
    }

    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Get a branch by id.
    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.get(id.index())
    }

    /// Position of a node. Panics on an id from another tree.
    pub fn position(&self, id: NodeId) -> Point3<f64> {
        self.nodes[id.index()].position
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of branches.
    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    /// All node ids.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// All branch ids, parents before children.
    pub fn branch_ids(&self) -> impl Iterator<Item = BranchId> + '_ {
        (0..self.branches.len()).map(BranchId::new)
    }

    /// Nodes the optimizer may move.
    pub fn mobile_nodes(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&n| {
                let node = &self.nodes[n.index()];
                node.upstream.is_some() && node.kind.is_mobile()
            })
            .collect()
    }

    /// Move a node. Cached quantities are stale until [`Tree::update`].
    pub fn set_position(&mut self, id: NodeId, position: Point3<f64>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id.index())
            .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", id)))?;
        node.position = position;
        Ok(())
    }

    /// Change the flow of a terminal.
    pub fn set_flow(&mut self, id: NodeId, value: f64) -> Result<()> {
        match self.nodes.get_mut(id.index()).map(|n| &mut n.kind) {
            Some(NodeKind::Terminal { flow, .. }) => {
                *flow = value;
                Ok(())
            }
            _ => Err(AngioError::InvalidState(format!("{:?} is not a terminal", id))),
        }
    }

    /// Length of a branch at the current node positions.
    pub fn measure(&self, id: BranchId) -> f64 {
        self.branches[id.index()]
            .nodes
            .windows(2)
            .map(|w| (self.position(w[1]) - self.position(w[0])).norm())
            .sum()
    }

    /// Recompute lengths, flows, fractions and reduced resistances.
    pub fn update(&mut self) -> Result<()> {
        self.root()?;
        for id in (0..self.branches.len()).rev() {
            let length = self.measure(BranchId::new(id));
            let end = self.branches[id].end();
            let node = &self.nodes[end.index()];
            let children = self.branches[id].children.clone();

            let (flow, resistance) = match node.kind {
                NodeKind::Terminal { flow, .. } => {
                    if !(flow > 0.0 && flow.is_finite()) {
                        return Err(AngioError::invalid_param(
                            "flow",
                            flow,
                            "terminal flow must be positive and finite",
                        ));
                    }
                    (flow, length)
                }
                NodeKind::Bifurcation if children.len() != 2 => {
                    return Err(AngioError::InvalidState(format!(
                        "bifurcation {:?} has {} children",
                        end,
                        children.len()
                    )))
                }
                _ => {
                    if children.len() < 2 || !self.rule.supports(children.len()) {
                        return Err(AngioError::InvalidState(format!(
                            "split {:?} cannot divide into {} children",
                            end,
                            children.len()
                        )));
                    }
                    let resistances: Vec<f64> = children
                        .iter()
                        .map(|c| self.branches[c.index()].reduced_resistance)
                        .collect();
                    let flows: Vec<f64> =
                        children.iter().map(|c| self.branches[c.index()].flow).collect();
                    let fractions = self.rule.fractions_at(end, &resistances, &flows);
                    let mut u = 0.0;
                    for ((c, f), r) in children.iter().zip(&fractions).zip(&resistances) {
                        self.branches[c.index()].fraction = *f;
                        u += f.powi(4) / r;
                    }
                    (flows.iter().sum(), length + 1.0 / u)
                }
            };

            let branch = &mut self.branches[id];
            branch.length = length;
            branch.flow = flow;
            branch.reduced_resistance = resistance;
        }
        self.branches[0].fraction = 1.0;
        Ok(())
    }

    /// Root radius as of the last update.
    pub fn root_radius(&self) -> Result<f64> {
        let root = &self.branches[self.root()?.index()];
        self.source()?.radius(root.reduced_resistance, root.flow)
    }

    /// Radius of a branch as of the last update.
    pub fn radius(&self, id: BranchId) -> Result<f64> {
        let mut radius = self.root_radius()?;
        let mut current = Some(id);
        while let Some(b) = current {
            let branch = self
                .branch(b)
                .ok_or_else(|| AngioError::InvalidState(format!("{:?} does not exist", b)))?;
            radius *= branch.fraction;
            current = branch.parent;
        }
        Ok(radius)
    }
}
