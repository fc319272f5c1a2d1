//! Core mesh data structures.
//!
//! This module provides the arena triangle mesh used by extraction and
//! decimation.
//!
//! # Overview
//!
//! The primary type is [`TriMesh`], a triangle mesh with explicit vertex,
//! edge and triangle adjacency. Vertices are identified by their position:
//! adding a triangle whose corner lands exactly on an existing vertex reuses
//! that vertex. Every edge carries at most two triangles; operations that
//! would create a third fail without touching the mesh.
//!
//! # Index Types
//!
//! - [`VertexId`] - Identifies a vertex
//! - [`EdgeId`] - Identifies an unordered vertex pair
//! - [`TriangleId`] - Identifies a triangle
//!
//! Ids are never recycled, so a stale id resolves to `None`.
//!
//! # Construction
//!
//! ```
//! use angiomesh::mesh::{build_from_triangles, TriMesh};
//! use nalgebra::Point3;
//!
//! let vertices = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.5, 1.0, 0.0),
//! ];
//! let faces = vec![[0, 1, 2]];
//!
//! let mesh: TriMesh = build_from_triangles(&vertices, &faces).unwrap();
//! assert_eq!(mesh.num_triangles(), 1);
//! assert!(mesh.has_boundary());
//! ```

mod builder;
mod index;
mod trimesh;

pub use builder::{build_from_triangles, to_face_vertex};
pub(crate) use index::impl_index_type;
pub use index::{EdgeId, TriangleId, VertexId, INVALID_INDEX};
pub use trimesh::{Edge, PositionKey, TriMesh, Triangle, Vertex};

#[cfg(test)]
pub(crate) use trimesh::tests;
