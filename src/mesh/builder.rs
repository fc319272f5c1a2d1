//! Mesh construction utilities.
//!
//! Conversion between [`TriMesh`] and indexed face-vertex lists.

use std::collections::HashMap;

use nalgebra::Point3;

use super::index::VertexId;
use super::trimesh::TriMesh;
use crate::error::{AngioError, Result};

/// Build a mesh from vertices and triangle faces.
///
/// Vertices at identical positions are unified, so duplicated input vertices
/// stitch together.
///
/// # Arguments
/// * `vertices` - List of vertex positions
/// * `faces` - List of triangle faces, each as [v0, v1, v2] indices
///
/// # Example
/// ```
/// use angiomesh::mesh::build_from_triangles;
/// use nalgebra::Point3;
///
/// let vertices = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.5, 1.0, 0.0),
///     Point3::new(0.5, 0.5, 1.0),
/// ];
/// let faces = vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]];
///
/// let mesh = build_from_triangles(&vertices, &faces).unwrap();
/// assert!(mesh.is_closed());
/// ```
pub fn build_from_triangles(vertices: &[Point3<f64>], faces: &[[usize; 3]]) -> Result<TriMesh> {
    if faces.is_empty() {
        return Err(AngioError::EmptyMesh);
    }

    for (fi, face) in faces.iter().enumerate() {
        for &vi in face {
            if vi >= vertices.len() {
                return Err(AngioError::InvalidVertexIndex { face: fi, vertex: vi });
            }
        }
    }

    let mut mesh = TriMesh::with_capacity(vertices.len(), faces.len());
    for face in faces {
        mesh.add_triangle(vertices[face[0]], vertices[face[1]], vertices[face[2]])?;
    }
    Ok(mesh)
}

/// Convert a mesh to compact vertex and face lists.
///
/// Removed vertices are skipped and the remaining ones renumbered densely.
pub fn to_face_vertex(mesh: &TriMesh) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
    let mut remap: HashMap<VertexId, usize> = HashMap::with_capacity(mesh.num_vertices());
    let mut vertices = Vec::with_capacity(mesh.num_vertices());
    for v in mesh.vertex_ids() {
        remap.insert(v, vertices.len());
        vertices.push(mesh.position(v));
    }

    let faces = mesh
        .triangles()
        .filter_map(|(_, t)| {
            let [a, b, c] = t.vertices();
            Some([*remap.get(&a)?, *remap.get(&b)?, *remap.get(&c)?])
        })
        .collect();

    (vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_index() {
        let vertices = vec![Point3::new(0.0, 0.0, 0.0)];
        assert!(matches!(
            build_from_triangles(&vertices, &[[0, 1, 2]]),
            Err(AngioError::InvalidVertexIndex { face: 0, vertex: 1 })
        ));
        assert!(matches!(
            build_from_triangles(&vertices, &[]),
            Err(AngioError::EmptyMesh)
        ));
    }

    #[test]
    fn test_face_vertex_after_removal() {
        let mut mesh = crate::mesh::tests::create_octahedron();
        let top = mesh.find_vertex(&Point3::new(0.0, 0.0, 1.0)).unwrap();
        mesh.remove_vertex(top);

        let (vertices, faces) = to_face_vertex(&mesh);
        assert_eq!(vertices.len(), 5);
        assert_eq!(faces.len(), 4);
        assert!(faces.iter().flatten().all(|&i| i < vertices.len()));

        let rebuilt = build_from_triangles(&vertices, &faces).unwrap();
        assert_eq!(rebuilt.num_edges(), mesh.num_edges());
        assert!(rebuilt.is_one_sided());
    }
}
