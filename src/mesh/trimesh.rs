//! Arena triangle mesh with position-keyed vertex identity.
//!
//! Vertices, edges and triangles are stored in tombstoned arenas and are never
//! recycled, so a stale id always resolves to "removed" instead of to an
//! unrelated element. Vertices at bit-identical positions are unified.

use std::collections::{HashMap, HashSet};

use nalgebra::{Point3, Vector3};

use super::index::{EdgeId, TriangleId, VertexId};
use crate::error::{AngioError, Result};
use crate::geometry::Aabb;

/// Hashable identity of a vertex position.
///
/// `-0.0` is folded into `0.0` so that both compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey([u64; 3]);

impl PositionKey {
    /// Key for a position.
    pub fn new(p: &Point3<f64>) -> Self {
        let bits = |x: f64| if x == 0.0 { 0.0f64.to_bits() } else { x.to_bits() };
        Self([bits(p.x), bits(p.y), bits(p.z)])
    }
}

/// Adjacency of a live vertex.
#[derive(Debug, Clone, Default)]
pub struct Vertex {
    edges: Vec<EdgeId>,
    triangles: Vec<TriangleId>,
}

impl Vertex {
    /// Incident edges.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Incident triangles.
    pub fn triangles(&self) -> &[TriangleId] {
        &self.triangles
    }
}

/// An unordered vertex pair with its incident triangles.
#[derive(Debug, Clone)]
pub struct Edge {
    vertices: [VertexId; 2],
    triangles: Vec<TriangleId>,
}

impl Edge {
    /// The two endpoints, in creation order.
    pub fn vertices(&self) -> [VertexId; 2] {
        self.vertices
    }

    /// Incident triangles (one on a boundary, two in the interior).
    pub fn triangles(&self) -> &[TriangleId] {
        &self.triangles
    }

    /// The endpoint that is not `v`.
    pub fn other(&self, v: VertexId) -> VertexId {
        if self.vertices[0] == v {
            self.vertices[1]
        } else {
            self.vertices[0]
        }
    }

    /// Whether `v` is an endpoint.
    pub fn contains(&self, v: VertexId) -> bool {
        self.vertices[0] == v || self.vertices[1] == v
    }
}

/// Three ordered vertices and the unit normal of that winding.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    vertices: [VertexId; 3],
    normal: Vector3<f64>,
}

impl Triangle {
    /// Corner vertices in winding order.
    pub fn vertices(&self) -> [VertexId; 3] {
        self.vertices
    }

    /// Unit normal.
    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    /// Whether `v` is a corner.
    pub fn contains(&self, v: VertexId) -> bool {
        self.vertices.contains(&v)
    }

    /// The corner that is neither `a` nor `b`.
    pub fn opposite(&self, a: VertexId, b: VertexId) -> Option<VertexId> {
        self.vertices.iter().copied().find(|&v| v != a && v != b)
    }

    /// The two corners following `v` in winding order.
    pub fn rotated_from(&self, v: VertexId) -> Option<(VertexId, VertexId)> {
        let [a, b, c] = self.vertices;
        if a == v {
            Some((b, c))
        } else if b == v {
            Some((c, a))
        } else if c == v {
            Some((a, b))
        } else {
            None
        }
    }

    /// Whether the directed edge `a -> b` appears in the winding.
    pub fn has_directed_edge(&self, a: VertexId, b: VertexId) -> bool {
        matches!(self.rotated_from(a), Some((next, _)) if next == b)
    }
}

/// A mutable triangle mesh with vertex/edge/triangle adjacency.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    positions: Vec<Point3<f64>>,
    vertices: Vec<Option<Vertex>>,
    edges: Vec<Option<Edge>>,
    triangles: Vec<Option<Triangle>>,
    vertex_lookup: HashMap<PositionKey, VertexId>,
    edge_lookup: HashMap<(VertexId, VertexId), EdgeId>,
    num_vertices: usize,
    num_edges: usize,
    num_triangles: usize,
}

fn edge_key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl TriMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mesh with reserved capacity.
    pub fn with_capacity(num_vertices: usize, num_triangles: usize) -> Self {
        Self {
            positions: Vec::with_capacity(num_vertices),
            vertices: Vec::with_capacity(num_vertices),
            edges: Vec::with_capacity(num_vertices + num_triangles),
            triangles: Vec::with_capacity(num_triangles),
            vertex_lookup: HashMap::with_capacity(num_vertices),
            edge_lookup: HashMap::with_capacity(num_vertices + num_triangles),
            ..Self::default()
        }
    }

    // ==================== Accessors ====================

    /// Number of live vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    /// Number of live edges.
    #[inline]
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    /// Number of live triangles.
    #[inline]
    pub fn num_triangles(&self) -> usize {
        self.num_triangles
    }

    /// Whether the mesh has no triangles.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_triangles == 0
    }

    /// Position of a vertex. Positions of removed vertices stay readable.
    #[inline]
    pub fn position(&self, v: VertexId) -> Point3<f64> {
        self.positions[v.index()]
    }

    /// Vertex adjacency, or `None` if removed.
    #[inline]
    pub fn vertex(&self, v: VertexId) -> Option<&Vertex> {
        self.vertices.get(v.index()).and_then(Option::as_ref)
    }

    /// Edge, or `None` if removed.
    #[inline]
    pub fn edge(&self, e: EdgeId) -> Option<&Edge> {
        self.edges.get(e.index()).and_then(Option::as_ref)
    }

    /// Triangle, or `None` if removed.
    #[inline]
    pub fn triangle(&self, t: TriangleId) -> Option<&Triangle> {
        self.triangles.get(t.index()).and_then(Option::as_ref)
    }

    /// Corner positions of a live triangle.
    pub fn triangle_positions(&self, t: TriangleId) -> Option<[Point3<f64>; 3]> {
        self.triangle(t).map(|tri| tri.vertices.map(|v| self.position(v)))
    }

    /// Vertex at exactly this position.
    pub fn find_vertex(&self, p: &Point3<f64>) -> Option<VertexId> {
        self.vertex_lookup.get(&PositionKey::new(p)).copied()
    }

    /// Edge joining two vertices.
    pub fn edge_between(&self, a: VertexId, b: VertexId) -> Option<EdgeId> {
        self.edge_lookup.get(&edge_key(a, b)).copied()
    }

    /// Edges incident to a vertex (empty if removed).
    pub fn vertex_edges(&self, v: VertexId) -> &[EdgeId] {
        self.vertex(v).map_or(&[], |vx| vx.edges.as_slice())
    }

    /// Triangles incident to a vertex (empty if removed).
    pub fn vertex_triangles(&self, v: VertexId) -> &[TriangleId] {
        self.vertex(v).map_or(&[], |vx| vx.triangles.as_slice())
    }

    /// Number of edges at a vertex.
    pub fn valence(&self, v: VertexId) -> usize {
        self.vertex_edges(v).len()
    }

    // ==================== Iteration ====================

    /// Iterate over live vertex ids.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some())
            .map(|(i, _)| VertexId::new(i))
    }

    /// Iterate over live edges.
    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (EdgeId::new(i), e)))
    }

    /// Iterate over live triangles.
    pub fn triangles(&self) -> impl Iterator<Item = (TriangleId, &Triangle)> + '_ {
        self.triangles
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TriangleId::new(i), t)))
    }

    /// Corner positions of every live triangle.
    pub fn triangle_soup(&self) -> Vec<[Point3<f64>; 3]> {
        self.triangles()
            .map(|(_, t)| t.vertices.map(|v| self.position(v)))
            .collect()
    }

    // ==================== Construction ====================

    /// Add a triangle by corner positions, unifying vertices by position.
    ///
    /// Fails without mutating the mesh if two corners coincide, the corners
    /// are collinear, or any edge already has two triangles.
    pub fn add_triangle(
        &mut self,
        a: Point3<f64>,
        b: Point3<f64>,
        c: Point3<f64>,
    ) -> Result<TriangleId> {
        let keys = [PositionKey::new(&a), PositionKey::new(&b), PositionKey::new(&c)];
        if keys[0] == keys[1] || keys[1] == keys[2] || keys[0] == keys[2] {
            return Err(AngioError::DegenerateTriangle {
                details: format!("coincident corners {:?}, {:?}, {:?}", a, b, c),
            });
        }
        let cross = (b - a).cross(&(c - a));
        let norm = cross.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err(AngioError::DegenerateTriangle {
                details: format!("collinear corners {:?}, {:?}, {:?}", a, b, c),
            });
        }

        let existing = keys.map(|k| self.vertex_lookup.get(&k).copied());
        for i in 0..3 {
            if let (Some(v0), Some(v1)) = (existing[i], existing[(i + 1) % 3]) {
                if let Some(e) = self.edge_between(v0, v1).and_then(|e| self.edge(e)) {
                    if e.triangles.len() >= 2 {
                        return Err(AngioError::NonManifoldEdge {
                            v0: v0.index(),
                            v1: v1.index(),
                        });
                    }
                }
            }
        }

        let ids = [
            self.get_or_add_vertex(a, keys[0]),
            self.get_or_add_vertex(b, keys[1]),
            self.get_or_add_vertex(c, keys[2]),
        ];
        let t = TriangleId::new(self.triangles.len());
        self.triangles.push(Some(Triangle {
            vertices: ids,
            normal: cross / norm,
        }));
        self.num_triangles += 1;

        for i in 0..3 {
            let e = self.get_or_add_edge(ids[i], ids[(i + 1) % 3]);
            if let Some(edge) = self.edges[e.index()].as_mut() {
                edge.triangles.push(t);
            }
            if let Some(vx) = self.vertices[ids[i].index()].as_mut() {
                vx.triangles.push(t);
            }
        }
        Ok(t)
    }

    fn get_or_add_vertex(&mut self, p: Point3<f64>, key: PositionKey) -> VertexId {
        if let Some(&v) = self.vertex_lookup.get(&key) {
            return v;
        }
        let v = VertexId::new(self.vertices.len());
        self.positions.push(p);
        self.vertices.push(Some(Vertex::default()));
        self.vertex_lookup.insert(key, v);
        self.num_vertices += 1;
        v
    }

    fn get_or_add_edge(&mut self, a: VertexId, b: VertexId) -> EdgeId {
        if let Some(e) = self.edge_between(a, b) {
            return e;
        }
        let e = EdgeId::new(self.edges.len());
        self.edges.push(Some(Edge {
            vertices: [a, b],
            triangles: Vec::with_capacity(2),
        }));
        self.edge_lookup.insert(edge_key(a, b), e);
        for v in [a, b] {
            if let Some(vx) = self.vertices[v.index()].as_mut() {
                vx.edges.push(e);
            }
        }
        self.num_edges += 1;
        e
    }

    /// Remove a triangle, then any edges and vertices it leaves orphaned.
    ///
    /// Returns `false` if the triangle was already removed.
    pub fn remove_triangle(&mut self, t: TriangleId) -> bool {
        let Some(tri) = self.triangles.get_mut(t.index()).and_then(Option::take) else {
            return false;
        };
        self.num_triangles -= 1;

        let ids = tri.vertices;
        for i in 0..3 {
            let (a, b) = (ids[i], ids[(i + 1) % 3]);
            if let Some(e) = self.edge_between(a, b) {
                let orphaned = match self.edges[e.index()].as_mut() {
                    Some(edge) => {
                        edge.triangles.retain(|&x| x != t);
                        edge.triangles.is_empty()
                    }
                    None => false,
                };
                if orphaned {
                    self.remove_edge(e);
                }
            }
            if let Some(vx) = self.vertices[a.index()].as_mut() {
                vx.triangles.retain(|&x| x != t);
            }
        }

        for v in ids {
            let orphaned = self.vertex(v).is_some_and(|vx| vx.edges.is_empty());
            if orphaned {
                self.vertices[v.index()] = None;
                self.vertex_lookup.remove(&PositionKey::new(&self.positions[v.index()]));
                self.num_vertices -= 1;
            }
        }
        true
    }

    fn remove_edge(&mut self, e: EdgeId) {
        if let Some(edge) = self.edges[e.index()].take() {
            let [a, b] = edge.vertices;
            self.edge_lookup.remove(&edge_key(a, b));
            for v in [a, b] {
                if let Some(vx) = self.vertices[v.index()].as_mut() {
                    vx.edges.retain(|&x| x != e);
                }
            }
            self.num_edges -= 1;
        }
    }

    /// Remove a vertex together with every incident triangle.
    pub fn remove_vertex(&mut self, v: VertexId) -> bool {
        let triangles = self.vertex_triangles(v).to_vec();
        if triangles.is_empty() {
            return false;
        }
        for t in triangles {
            self.remove_triangle(t);
        }
        true
    }

    /// Re-add every triangle of `other`, unifying shared positions.
    ///
    /// Returns the id each of `other`'s triangles received, in iteration order.
    pub fn merge(&mut self, other: &TriMesh) -> Result<Vec<(TriangleId, TriangleId)>> {
        let mut mapping = Vec::with_capacity(other.num_triangles());
        for (t, _) in other.triangles() {
            if let Some([a, b, c]) = other.triangle_positions(t) {
                mapping.push((t, self.add_triangle(a, b, c)?));
            }
        }
        Ok(mapping)
    }

    /// Flip the winding (and normal) of every triangle.
    pub fn reverse_normals(&mut self) {
        for tri in self.triangles.iter_mut().flatten() {
            tri.vertices.swap(1, 2);
            tri.normal = -tri.normal;
        }
    }

    // ==================== Topology Queries ====================

    /// Whether every incident edge of `v` has two triangles.
    pub fn is_interior(&self, v: VertexId) -> bool {
        let edges = self.vertex_edges(v);
        !edges.is_empty()
            && edges
                .iter()
                .all(|&e| self.edge(e).is_some_and(|e| e.triangles.len() == 2))
    }

    /// Neighbouring vertices in no particular order.
    pub fn unordered_fan(&self, v: VertexId) -> Vec<VertexId> {
        self.vertex_edges(v)
            .iter()
            .filter_map(|&e| self.edge(e).map(|e| e.other(v)))
            .collect()
    }

    /// The ordered ring of neighbours of `v`, starting at `start`.
    ///
    /// Consecutive entries `(f[i], f[i+1])` together with `v` form the incident
    /// triangles `(v, f[i], f[i+1])` in their stored winding. Returns `None` if
    /// the incident triangles do not form a single closed disc around `v`.
    pub fn fan_from(&self, v: VertexId, start: VertexId) -> Option<Vec<VertexId>> {
        let triangles = self.vertex_triangles(v);
        if triangles.is_empty() {
            return None;
        }
        let mut next: HashMap<VertexId, VertexId> = HashMap::with_capacity(triangles.len());
        for &t in triangles {
            let (a, b) = self.triangle(t)?.rotated_from(v)?;
            if next.insert(a, b).is_some() {
                return None;
            }
        }

        let mut fan = Vec::with_capacity(triangles.len());
        let mut current = start;
        loop {
            fan.push(current);
            current = *next.get(&current)?;
            if current == start {
                break;
            }
            if fan.len() > triangles.len() {
                return None;
            }
        }
        (fan.len() == triangles.len()).then_some(fan)
    }

    /// The ordered ring of neighbours of `v`, starting anywhere.
    pub fn fan(&self, v: VertexId) -> Option<Vec<VertexId>> {
        let &t = self.vertex_triangles(v).first()?;
        let (start, _) = self.triangle(t)?.rotated_from(v)?;
        self.fan_from(v, start)
    }

    /// Whether collapsing along `e` keeps the mesh 2-manifold.
    ///
    /// Holds when the unordered fans of the two endpoints share exactly the two
    /// vertices opposite the edge.
    pub fn can_collapse(&self, e: EdgeId) -> bool {
        let Some(edge) = self.edge(e) else {
            return false;
        };
        let [a, b] = edge.vertices;
        let fan_a: HashSet<VertexId> = self.unordered_fan(a).into_iter().collect();
        let shared = self
            .unordered_fan(b)
            .into_iter()
            .filter(|v| fan_a.contains(v))
            .count();
        shared == 2
    }

    /// The triangle on `e` that does not contain `v`, if any.
    pub fn triangle_across(&self, e: EdgeId, v: VertexId) -> Option<TriangleId> {
        self.edge(e)?
            .triangles
            .iter()
            .copied()
            .find(|&t| self.triangle(t).is_some_and(|tri| !tri.contains(v)))
    }

    /// Cosine of the angle between the normals of the two triangles on `e`.
    pub fn dihedral_cosine(&self, e: EdgeId) -> Option<f64> {
        let edge = self.edge(e)?;
        if edge.triangles.len() != 2 {
            return None;
        }
        let n0 = self.triangle(edge.triangles[0])?.normal;
        let n1 = self.triangle(edge.triangles[1])?.normal;
        Some(n0.dot(&n1))
    }

    /// Whether the two triangles on `e` traverse it in opposite directions.
    pub fn check_normal_consistency(&self, e: EdgeId) -> bool {
        let Some(edge) = self.edge(e) else {
            return false;
        };
        if edge.triangles.len() != 2 {
            return true;
        }
        let [a, b] = edge.vertices;
        match (self.triangle(edge.triangles[0]), self.triangle(edge.triangles[1])) {
            (Some(t0), Some(t1)) => t0.has_directed_edge(a, b) != t1.has_directed_edge(a, b),
            _ => false,
        }
    }

    // ==================== Validation ====================

    /// Whether every edge has one or two triangles.
    pub fn verify_edge_counts(&self) -> bool {
        self.edges()
            .all(|(_, e)| !e.triangles.is_empty() && e.triangles.len() <= 2)
    }

    /// Whether every edge has exactly two triangles.
    pub fn is_closed(&self) -> bool {
        self.num_edges > 0 && self.edges().all(|(_, e)| e.triangles.len() == 2)
    }

    /// Whether any edge has a single triangle.
    pub fn has_boundary(&self) -> bool {
        self.edges().any(|(_, e)| e.triangles.len() == 1)
    }

    /// Whether all adjacent triangles agree on orientation.
    pub fn is_one_sided(&self) -> bool {
        self.edges().all(|(e, _)| self.check_normal_consistency(e))
    }

    /// V - E + F.
    pub fn euler_characteristic(&self) -> i64 {
        self.num_vertices as i64 - self.num_edges as i64 + self.num_triangles as i64
    }

    /// Genus of a closed connected surface.
    pub fn genus(&self) -> i64 {
        (2 - self.euler_characteristic()) / 2
    }

    // ==================== Geometry ====================

    /// Total area of all live triangles.
    pub fn surface_area(&self) -> f64 {
        self.triangles()
            .map(|(_, t)| {
                let [a, b, c] = t.vertices.map(|v| self.position(v));
                0.5 * (b - a).cross(&(c - a)).norm()
            })
            .sum()
    }

    /// Axis-aligned bounds of all live vertices.
    pub fn bounding_box(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertex_ids().map(|v| self.position(v)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn create_tetrahedron() -> TriMesh {
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let mut mesh = TriMesh::new();
        for [a, b, c] in [[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]] {
            mesh.add_triangle(p[a], p[b], p[c]).unwrap();
        }
        mesh
    }

    pub(crate) fn create_octahedron() -> TriMesh {
        let p = [
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, -1.0),
        ];
        let faces = [
            [0, 2, 4],
            [2, 1, 4],
            [1, 3, 4],
            [3, 0, 4],
            [2, 0, 5],
            [1, 2, 5],
            [3, 1, 5],
            [0, 3, 5],
        ];
        let mut mesh = TriMesh::new();
        for [a, b, c] in faces {
            mesh.add_triangle(p[a], p[b], p[c]).unwrap();
        }
        mesh
    }

    /// Flat `n x n` grid in the z = 0 plane with normals along +z.
    pub(crate) fn create_grid_mesh(n: usize) -> TriMesh {
        let p = |i: usize, j: usize| Point3::new(i as f64, j as f64, 0.0);
        let mut mesh = TriMesh::new();
        for j in 0..n {
            for i in 0..n {
                mesh.add_triangle(p(i, j), p(i + 1, j), p(i + 1, j + 1)).unwrap();
                mesh.add_triangle(p(i, j), p(i + 1, j + 1), p(i, j + 1)).unwrap();
            }
        }
        mesh
    }

    #[test]
    fn test_add_triangle_dedups_vertices() {
        let mesh = create_tetrahedron();
        assert_eq!(mesh.num_vertices(), 4);
        assert_eq!(mesh.num_edges(), 6);
        assert_eq!(mesh.num_triangles(), 4);
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_eq!(mesh.genus(), 0);
    }

    #[test]
    fn test_negative_zero_is_same_vertex() {
        let mut mesh = TriMesh::new();
        mesh.add_triangle(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert_eq!(
            mesh.find_vertex(&Point3::new(-0.0, 0.0, -0.0)),
            Some(VertexId::new(0))
        );
    }

    #[test]
    fn test_degenerate_triangle_rejected() {
        let mut mesh = TriMesh::new();
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        assert!(matches!(
            mesh.add_triangle(a, b, a),
            Err(AngioError::DegenerateTriangle { .. })
        ));
        assert!(matches!(
            mesh.add_triangle(a, b, Point3::new(2.0, 0.0, 0.0)),
            Err(AngioError::DegenerateTriangle { .. })
        ));
        assert!(mesh.is_empty());
        assert_eq!(mesh.num_vertices(), 0);
    }

    #[test]
    fn test_third_triangle_on_edge_rejected_without_mutation() {
        let mut mesh = create_tetrahedron();
        let before = (mesh.num_vertices(), mesh.num_edges(), mesh.num_triangles());
        let result = mesh.add_triangle(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.5, -1.0, 0.0),
        );
        assert!(matches!(result, Err(AngioError::NonManifoldEdge { .. })));
        assert_eq!(
            before,
            (mesh.num_vertices(), mesh.num_edges(), mesh.num_triangles())
        );
    }

    #[test]
    fn test_remove_triangle_cleans_up() {
        let mut mesh = TriMesh::new();
        let t = mesh
            .add_triangle(
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            )
            .unwrap();
        assert!(mesh.remove_triangle(t));
        assert!(!mesh.remove_triangle(t));
        assert_eq!(mesh.num_vertices(), 0);
        assert_eq!(mesh.num_edges(), 0);
        assert!(mesh.find_vertex(&Point3::new(0.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn test_remove_vertex_opens_hole() {
        let mut mesh = create_octahedron();
        let top = mesh.find_vertex(&Point3::new(0.0, 0.0, 1.0)).unwrap();
        assert!(mesh.remove_vertex(top));
        assert_eq!(mesh.num_triangles(), 4);
        assert_eq!(mesh.num_vertices(), 5);
        assert!(mesh.has_boundary());
        assert!(mesh.verify_edge_counts());
        assert!(mesh.vertex(top).is_none());
    }

    #[test]
    fn test_fan_from_keeps_winding() {
        let mesh = create_octahedron();
        let top = mesh.find_vertex(&Point3::new(0.0, 0.0, 1.0)).unwrap();
        let px = mesh.find_vertex(&Point3::new(1.0, 0.0, 0.0)).unwrap();
        let fan = mesh.fan_from(top, px).unwrap();
        assert_eq!(fan.len(), 4);
        assert_eq!(fan[0], px);
        for i in 0..fan.len() {
            let (a, b) = (fan[i], fan[(i + 1) % fan.len()]);
            let found = mesh
                .vertex_triangles(top)
                .iter()
                .any(|&t| mesh.triangle(t).unwrap().rotated_from(top) == Some((a, b)));
            assert!(found, "missing triangle ({:?}, {:?}, {:?})", top, a, b);
        }
    }

    #[test]
    fn test_fan_of_boundary_vertex_is_none() {
        let mesh = create_grid_mesh(2);
        let corner = mesh.find_vertex(&Point3::new(0.0, 0.0, 0.0)).unwrap();
        let center = mesh.find_vertex(&Point3::new(1.0, 1.0, 0.0)).unwrap();
        assert!(mesh.fan(corner).is_none());
        assert_eq!(mesh.fan(center).map(|f| f.len()), Some(6));
        assert!(!mesh.is_interior(corner));
        assert!(mesh.is_interior(center));
    }

    #[test]
    fn test_can_collapse() {
        let oct = create_octahedron();
        for (e, _) in oct.edges() {
            assert!(oct.can_collapse(e));
        }

        // Tetrahedron with its bottom face split around a centre vertex.
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.5, 1.0, 0.0);
        let d = Point3::new(0.5, 0.5, 1.0);
        let centre = Point3::new(0.5, 0.4, -0.1);
        let mut mesh = TriMesh::new();
        for [p, q, r] in [
            [a, c, centre],
            [c, b, centre],
            [b, a, centre],
            [a, b, d],
            [b, c, d],
            [c, a, d],
        ] {
            mesh.add_triangle(p, q, r).unwrap();
        }
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());

        let va = mesh.find_vertex(&a).unwrap();
        let vb = mesh.find_vertex(&b).unwrap();
        let ve = mesh.find_vertex(&centre).unwrap();
        // A and B share three neighbours, so collapsing would pinch the surface.
        assert!(!mesh.can_collapse(mesh.edge_between(va, vb).unwrap()));
        assert!(mesh.can_collapse(mesh.edge_between(va, ve).unwrap()));
    }

    #[test]
    fn test_dihedral_cosine_flat_and_folded() {
        let grid = create_grid_mesh(1);
        let a = grid.find_vertex(&Point3::new(0.0, 0.0, 0.0)).unwrap();
        let b = grid.find_vertex(&Point3::new(1.0, 1.0, 0.0)).unwrap();
        let diagonal = grid.edge_between(a, b).unwrap();
        assert!((grid.dihedral_cosine(diagonal).unwrap() - 1.0).abs() < 1e-12);

        // Adjacent octahedron normals differ in one sign, e.g. (1, 1, 1) and
        // (1, 1, -1) over sqrt(3).
        let oct = create_octahedron();
        for (e, _) in oct.edges() {
            assert!((oct.dihedral_cosine(e).unwrap() - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_reverse_normals_preserves_consistency() {
        let mut mesh = create_octahedron();
        let area = mesh.surface_area();
        let (t, tri) = mesh.triangles().next().map(|(t, tri)| (t, *tri)).unwrap();
        mesh.reverse_normals();
        assert!(mesh.is_one_sided());
        assert!((mesh.triangle(t).unwrap().normal() + tri.normal()).norm() < 1e-12);
        assert!((mesh.surface_area() - area).abs() < 1e-12);
    }

    #[test]
    fn test_inconsistent_winding_detected() {
        let mut mesh = TriMesh::new();
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        mesh.add_triangle(p[0], p[1], p[2]).unwrap();
        mesh.add_triangle(p[1], p[2], p[3]).unwrap();
        assert!(!mesh.is_one_sided());
    }

    #[test]
    fn test_merge_unifies_shared_edge() {
        let mut a = TriMesh::new();
        a.add_triangle(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let mut b = TriMesh::new();
        b.add_triangle(
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        let mapping = a.merge(&b).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(a.num_vertices(), 4);
        assert_eq!(a.num_edges(), 5);
        assert!(a.is_one_sided());
        assert!((a.surface_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bounding_box() {
        let mesh = create_octahedron();
        let bounds = mesh.bounding_box().unwrap();
        assert_eq!(bounds.lower, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(bounds.upper, Point3::new(1.0, 1.0, 1.0));
        assert!(TriMesh::new().bounding_box().is_none());
    }
}
