//! Error-bounded edge-collapse decimation.
//!
//! A [`Decimation`] session owns a mesh together with the state needed to
//! simplify it incrementally:
//!
//! - every triangle carries the original sample points that project onto it
//!   and the largest squared distance among them;
//! - a cache of candidate collapses, keyed by directed `(kept, lost)` vertex
//!   pairs;
//! - the `remeshing` and `recosting` sets of pairs whose candidates are stale.
//!
//! Each iteration re-evaluates the stale candidates in parallel, sorts the
//! valid ones by ascending cost and applies them greedily. Applying a collapse
//! marks its neighbourhood stale, which both keeps later collapses in the same
//! batch from touching it and schedules it for the next iteration. The loop
//! ends when nothing is stale.
//!
//! A collapse removes the lost vertex and retriangulates its ring as a fan
//! from the kept vertex. It is accepted when:
//!
//! - the edge is collapsible without breaking manifoldness;
//! - the lost vertex is not protected as boundary;
//! - no new triangle is degenerate;
//! - every tracked point stays within `max_error_squared` of the new triangles;
//! - every new or bordering edge keeps its dihedral cosine above
//!   `min_dihedral_cosine`;
//! - no new triangle exceeds `max_shape_cost`.
//!
//! # Example
//!
//! ```
//! use angiomesh::algo::decimate::{Decimation, DecimationOptions};
//! use angiomesh::algo::extract::extract_function;
//! use angiomesh::algo::{CancellationToken, Progress};
//! use angiomesh::geometry::Aabb;
//! use nalgebra::Point3;
//!
//! let centre = Point3::new(5.0, 5.0, 5.0);
//! let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
//! let mesh = extract_function(|p| (p - centre).norm() - 4.0, &bounds, 1.0).unwrap();
//! let before = mesh.num_triangles();
//!
//! let options = DecimationOptions::default().with_max_error_squared(0.01);
//! let mut session = Decimation::new(mesh, options);
//! session.decimate(&Progress::none(), &CancellationToken::new()).unwrap();
//! assert!(session.mesh().num_triangles() < before);
//! assert!(session.mesh().is_closed());
//! ```

mod session;

use std::sync::Arc;

use nalgebra::Point3;

pub use session::{Decimation, OriginalPoints};

use super::extract::NonManifoldPolicy;

/// Combines an old and a new cost term into a collapse cost.
pub type CostCombiner = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Cost of an edge given the cosine of its dihedral angle.
pub type DihedralCost = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Cost of a triangle's shape.
pub type ShapeCost = Arc<dyn Fn(&[Point3<f64>; 3]) -> f64 + Send + Sync>;

/// Options for edge-collapse decimation.
#[derive(Clone)]
pub struct DecimationOptions {
    /// Largest squared distance allowed between a tracked point and its
    /// triangle. Collapses must stay strictly below it, so zero disables
    /// decimation.
    pub max_error_squared: f64,

    /// Squared cross product magnitude at or below which a new triangle
    /// counts as degenerate.
    pub normal_tolerance_squared: f64,

    /// Candidates evaluated per parallel work item.
    pub edges_per_chunk: usize,

    /// Threads used to evaluate candidates.
    pub max_concurrent_chunks: usize,

    /// Forget tracked points after every iteration.
    pub drop_errors: bool,

    /// Also protect the neighbours of boundary vertices.
    pub extend_boundary: bool,

    /// Smallest dihedral cosine allowed on new or bordering edges.
    pub min_dihedral_cosine: f64,

    /// Per-edge dihedral cost. `None` scores every collapse as free.
    pub dihedral_cost: Option<DihedralCost>,

    /// Combines old and new largest point errors.
    pub combine_error: CostCombiner,

    /// Combines old and new dihedral cost sums.
    pub combine_dihedral: CostCombiner,

    /// Combines old and new shape cost sums.
    pub combine_shape: CostCombiner,

    /// Per-triangle shape cost. `None` disables shape checks.
    pub shape_cost: Option<ShapeCost>,

    /// Largest shape cost a new triangle may have.
    pub max_shape_cost: f64,

    /// Attach point error summaries to step events.
    pub report_errors: bool,

    /// Handling of triangles that cannot be inserted while merging sessions.
    pub non_manifold: NonManifoldPolicy,
}

impl Default for DecimationOptions {
    fn default() -> Self {
        Self {
            max_error_squared: 0.0,
            normal_tolerance_squared: 1e-12,
            edges_per_chunk: 1024,
            max_concurrent_chunks: 1,
            drop_errors: false,
            extend_boundary: true,
            min_dihedral_cosine: -0.5,
            dihedral_cost: Some(Arc::new(|cosine: f64| -cosine)),
            combine_error: Arc::new(|_: f64, _: f64| 0.0),
            combine_dihedral: Arc::new(|old: f64, new: f64| new - old),
            combine_shape: Arc::new(|_: f64, _: f64| 0.0),
            shape_cost: None,
            max_shape_cost: f64::INFINITY,
            report_errors: false,
            non_manifold: NonManifoldPolicy::Error,
        }
    }
}

impl DecimationOptions {
    /// Set the error bound.
    pub fn with_max_error_squared(mut self, value: f64) -> Self {
        self.max_error_squared = value;
        self
    }

    /// Set the degenerate triangle tolerance.
    pub fn with_normal_tolerance_squared(mut self, value: f64) -> Self {
        self.normal_tolerance_squared = value;
        self
    }

    /// Set the number of candidates per work item.
    pub fn with_edges_per_chunk(mut self, value: usize) -> Self {
        self.edges_per_chunk = value;
        self
    }

    /// Set the number of evaluation threads.
    pub fn with_max_concurrent_chunks(mut self, value: usize) -> Self {
        self.max_concurrent_chunks = value;
        self
    }

    /// Set whether tracked points are forgotten after each iteration.
    pub fn with_drop_errors(mut self, value: bool) -> Self {
        self.drop_errors = value;
        self
    }

    /// Set whether boundary neighbours are protected.
    pub fn with_extend_boundary(mut self, value: bool) -> Self {
        self.extend_boundary = value;
        self
    }

    /// Set the dihedral cosine floor.
    pub fn with_min_dihedral_cosine(mut self, value: f64) -> Self {
        self.min_dihedral_cosine = value;
        self
    }

    /// Set the per-edge dihedral cost.
    pub fn with_dihedral_cost<F>(mut self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.dihedral_cost = Some(Arc::new(f));
        self
    }

    /// Score collapses without dihedral costs.
    pub fn without_dihedral_cost(mut self) -> Self {
        self.dihedral_cost = None;
        self
    }

    /// Set the per-triangle shape cost and its upper bound.
    pub fn with_shape_cost<F>(mut self, f: F, max_shape_cost: f64) -> Self
    where
        F: Fn(&[Point3<f64>; 3]) -> f64 + Send + Sync + 'static,
    {
        self.shape_cost = Some(Arc::new(f));
        self.max_shape_cost = max_shape_cost;
        self
    }

    /// Set how point errors enter the cost.
    pub fn with_combine_error<F>(mut self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.combine_error = Arc::new(f);
        self
    }

    /// Set how dihedral costs enter the cost.
    pub fn with_combine_dihedral<F>(mut self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.combine_dihedral = Arc::new(f);
        self
    }

    /// Set how shape costs enter the cost.
    pub fn with_combine_shape<F>(mut self, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.combine_shape = Arc::new(f);
        self
    }

    /// Set whether step events carry error summaries.
    pub fn with_report_errors(mut self, value: bool) -> Self {
        self.report_errors = value;
        self
    }

    /// Set the non-manifold handling policy for merges.
    pub fn with_non_manifold(mut self, policy: NonManifoldPolicy) -> Self {
        self.non_manifold = policy;
        self
    }
}

impl std::fmt::Debug for DecimationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecimationOptions")
            .field("max_error_squared", &self.max_error_squared)
            .field("normal_tolerance_squared", &self.normal_tolerance_squared)
            .field("edges_per_chunk", &self.edges_per_chunk)
            .field("max_concurrent_chunks", &self.max_concurrent_chunks)
            .field("drop_errors", &self.drop_errors)
            .field("extend_boundary", &self.extend_boundary)
            .field("min_dihedral_cosine", &self.min_dihedral_cosine)
            .field("dihedral_cost", &self.dihedral_cost.is_some())
            .field("shape_cost", &self.shape_cost.is_some())
            .field("max_shape_cost", &self.max_shape_cost)
            .field("report_errors", &self.report_errors)
            .field("non_manifold", &self.non_manifold)
            .finish_non_exhaustive()
    }
}

/// Longest edge squared over area, scaled so an equilateral triangle scores 1.
///
/// Degenerate triangles score infinity.
pub fn aspect_ratio(tri: &[Point3<f64>; 3]) -> f64 {
    let [a, b, c] = tri;
    let longest = (b - a)
        .norm_squared()
        .max((c - b).norm_squared())
        .max((a - c).norm_squared());
    let area = 0.5 * (b - a).cross(&(c - a)).norm();
    if area > 0.0 {
        longest * 3f64.sqrt() / (4.0 * area)
    } else {
        f64::INFINITY
    }
}
