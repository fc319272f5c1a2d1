//! # Angiomesh
//!
//! Surface meshes and cost gradients for vascular networks.
//!
//! Angiomesh turns vessel networks into closed triangle surfaces and provides
//! the analytic cost gradients used to optimize the networks themselves.
//!
//! ## Features
//!
//! - **Marching tetrahedra**: body-centred-cubic lattice extraction with exact
//!   chunk stitching
//! - **Edge-collapse decimation**: bounded reprojection error, dihedral and
//!   shape costs, parallel candidate evaluation
//! - **Chunked triangulation**: concurrent sampling, extraction and decimation
//!   of vessel segments, optionally carved out of a boundary surface
//! - **Hierarchical gradients**: reduced-resistance, effective-length and cost
//!   gradients for every node of a branching tree
//!
//! ## Quick Start
//!
//! ```
//! use angiomesh::prelude::*;
//! use nalgebra::Point3;
//!
//! let vessels = vec![
//!     Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0), 1.0),
//!     Segment::new(Point3::new(4.0, 0.0, 0.0), Point3::new(6.0, 2.0, 0.0), 0.7),
//! ];
//! let options = TriangulatorOptions::default()
//!     .with_stride(0.5)
//!     .with_decimation(DecimationOptions::default().with_max_error_squared(0.01));
//! let mesh = Triangulator::new(options)
//!     .unwrap()
//!     .triangulate(&vessels, None, &Progress::none(), &CancellationToken::new())
//!     .unwrap();
//!
//! assert!(mesh.is_closed());
//! assert_eq!(mesh.genus(), 0);
//! ```
//!
//! ## Tree Gradients
//!
//! ```
//! use angiomesh::prelude::*;
//! use nalgebra::Point3;
//!
//! let mut tree = Tree::with_source(Point3::origin(), SourceKind::Radius { radius: 1.0 });
//! let root = tree
//!     .add_branch(tree.root_node(), &[], Point3::new(1.0, 0.0, 0.0), NodeKind::Bifurcation)
//!     .unwrap();
//! let split = tree.branch(root).unwrap().end();
//! tree.add_branch(split, &[], Point3::new(2.0, 1.0, 0.0), NodeKind::terminal(2.0))
//!     .unwrap();
//! tree.add_branch(split, &[], Point3::new(2.0, -1.0, 0.0), NodeKind::terminal(1.0))
//!     .unwrap();
//! tree.update().unwrap();
//!
//! let cache = HierarchicalGradients::from_tree(&tree).unwrap();
//! let gradient = cache.position_gradient(split);
//! assert!(gradient.norm() > 0.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod error;
pub mod geometry;
pub mod mesh;
pub mod vascular;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use angiomesh::prelude::*;
/// ```
pub mod prelude {
    pub use crate::algo::decimate::{Decimation, DecimationOptions};
    pub use crate::algo::extract::{extract_function, ExtractOptions, MarchingTetrahedra};
    pub use crate::algo::triangulate::{Triangulator, TriangulatorOptions};
    pub use crate::algo::{CancellationToken, Progress, ProgressEvent};
    pub use crate::error::{AngioError, Result};
    pub use crate::geometry::{Aabb, BoundarySurface, Segment};
    pub use crate::mesh::{build_from_triangles, EdgeId, TriMesh, TriangleId, VertexId};
    pub use crate::vascular::{
        HierarchicalCost, HierarchicalGradients, NodeKind, SourceKind, StandardCosts, Tree,
    };
}

// Re-export nalgebra types for convenience
pub use nalgebra;

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use nalgebra::Point3;

    #[test]
    fn test_tetrahedron() {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];

        let faces = vec![
            [0, 2, 1], // bottom
            [0, 1, 3], // front
            [1, 2, 3], // right
            [2, 0, 3], // left
        ];

        let mesh: TriMesh = build_from_triangles(&vertices, &faces).unwrap();

        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_triangles(), 4);
        assert_eq!(mesh.num_edges(), 6);
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.euler_characteristic(), 2);

        for v in mesh.vertex_ids() {
            assert!(mesh.is_interior(v), "vertex {:?} should not be on boundary", v);
        }
    }

    #[test]
    fn test_sphere_pipeline() {
        let centre = Point3::new(0.0, 0.0, 0.0);
        let bounds = Aabb::new(Point3::new(-3.0, -3.0, -3.0), Point3::new(3.0, 3.0, 3.0));
        let mesh = extract_function(|p| (p - centre).norm() - 2.0, &bounds, 0.5).unwrap();
        let raw = mesh.num_triangles();

        let options = DecimationOptions::default().with_max_error_squared(0.01);
        let mut session = Decimation::new(mesh, options);
        session
            .decimate(&Progress::none(), &CancellationToken::new())
            .unwrap();
        let mesh = session.into_mesh();
        assert!(mesh.num_triangles() < raw);
        assert!(mesh.is_closed());
        assert_eq!(mesh.genus(), 0);
    }
}
