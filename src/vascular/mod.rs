//! Vascular trees and the hierarchical gradients of their costs.
//!
//! # Overview
//!
//! A [`Tree`] holds the vessel network. After [`Tree::update`], a
//! [`HierarchicalGradients`] cache records how the root reduced resistance
//! responds to every branch and node. Costs implementing [`HierarchicalCost`]
//! build on that cache to give their value and a gradient for every mobile
//! node, which a gradient-descent optimizer can consume directly.
//!
//! # Costs
//!
//! - [`PolynomialCost`] - `a * sum L^l r^r`, covering length, area and volume
//! - [`PumpingWorkCost`] - `k Q^2 R / r^4` at the root
//! - [`CombinedCost`] - any differentiable function of other costs
//! - [`StandardCosts`] - physically scaled instances of the above
//!
//! # Example
//!
//! ```
//! use angiomesh::vascular::{HierarchicalCost, NodeKind, SourceKind, StandardCosts, Tree};
//! use nalgebra::Point3;
//!
//! let mut tree = Tree::with_source(Point3::origin(), SourceKind::Pressure { pressure: 1.0 });
//! let root = tree
//!     .add_branch(tree.root_node(), &[], Point3::new(1.0, 0.0, 0.0), NodeKind::Bifurcation)
//!     .unwrap();
//! let split = tree.branch(root).unwrap().end();
//! tree.add_branch(split, &[], Point3::new(2.0, 1.0, 0.0), NodeKind::terminal(1.0))
//!     .unwrap();
//! tree.add_branch(split, &[], Point3::new(2.0, -1.0, 0.0), NodeKind::terminal(1.0))
//!     .unwrap();
//! tree.update().unwrap();
//!
//! let mut volume = StandardCosts::default().with_length_unit(1.0).volume();
//! let (cost, gradients) = volume.evaluate(&tree).unwrap();
//! assert!(cost > 0.0);
//! // Pulling the split back towards the source reduces the volume.
//! assert!(gradients[&split].x > 0.0);
//! ```

mod cost;
mod effective_lengths;
pub mod finite_difference;
mod gradients;
mod splitting;
mod tree;

pub use cost::{
    CombinedCost, Combiner, CombinerGradient, HierarchicalCost, PolynomialCost, PumpingWorkCost,
    StandardCosts,
};
pub use effective_lengths::{EffectiveLengthGradient, EffectiveLengths};
pub use gradients::{GlobalGradient, HierarchicalGradients, LocalGradient, SplitRecord};
pub use splitting::{
    ClampedExponent, ClampedMurray, ConstantMurray, ConstantRadius, ExponentialExponent,
    ExponentialMurray, FlowExponent, FlowVariableMurray, Murray, SplittingRule,
    UntetheredSplitting,
};
pub use tree::{Branch, BranchId, Node, NodeId, NodeKind, SourceKind, Tree};
