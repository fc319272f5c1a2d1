//! Closed triangulated boundary surfaces.

use std::collections::HashSet;

use nalgebra::{Point3, Vector3};

use super::{triangle, Aabb, Bounded, BoundsHashTable};
use crate::error::{AngioError, Result};
use crate::mesh::TriMesh;

/// Decimal places of the hit fractions merged by the inside test.
const HIT_DECIMALS: i32 = 9;

#[derive(Debug, Clone)]
struct Facet {
    corners: [Point3<f64>; 3],
}

impl Bounded for Facet {
    fn bounds(&self) -> Aabb {
        triangle::bounds(&self.corners)
    }
}

/// A closed triangle surface supporting inside tests and distance queries.
///
/// Inside tests count crossings, so the winding of the triangles is
/// irrelevant.
#[derive(Debug, Clone)]
pub struct BoundarySurface {
    facets: BoundsHashTable<Facet>,
    bounds: Aabb,
}

impl BoundarySurface {
    /// Build from corner triples. Degenerate triangles are dropped.
    pub fn new(triangles: Vec<[Point3<f64>; 3]>, cell_size: f64) -> Result<Self> {
        let facets: Vec<Facet> = triangles
            .into_iter()
            .filter(|corners| triangle::unit_normal(corners).is_some())
            .map(|corners| Facet { corners })
            .collect();
        let bounds = Aabb::from_points(facets.iter().flat_map(|f| f.corners))
            .ok_or(AngioError::EmptyMesh)?;
        Ok(Self {
            facets: BoundsHashTable::new(facets, cell_size)?,
            bounds,
        })
    }

    /// Build from the triangles of a mesh.
    pub fn from_mesh(mesh: &TriMesh, cell_size: f64) -> Result<Self> {
        Self::new(mesh.triangle_soup(), cell_size)
    }

    /// Bounds of the whole surface.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Number of triangles.
    pub fn len(&self) -> usize {
        self.facets.len()
    }

    /// Whether the surface has no triangles.
    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// Visit the corners of every triangle intersecting `query`.
    pub fn query<F: FnMut(&[Point3<f64>; 3])>(&self, query: &Aabb, mut f: F) {
        self.facets.query(query, |facet| f(&facet.corners));
    }

    /// Smallest squared distance from `p` to triangles intersecting `query`.
    ///
    /// Infinite if no triangle is in range.
    pub fn distance_squared(&self, p: &Point3<f64>, query: &Aabb) -> f64 {
        let mut best = f64::INFINITY;
        self.facets.query(query, |facet| {
            best = best.min(triangle::distance_squared(p, &facet.corners));
        });
        best
    }

    /// Whether the segment `p + t * direction`, `t` in `[0, 1]`, crosses the
    /// surface an odd number of times.
    ///
    /// Crossings at the same rounded fraction count once, so a segment
    /// through a shared edge or vertex is not counted twice.
    pub fn is_point_inside_along(&self, p: &Point3<f64>, direction: &Vector3<f64>) -> bool {
        let ray = Aabb::from_point(*p).append(p + direction);
        let scale = 10f64.powi(HIT_DECIMALS);
        let mut hits = HashSet::new();
        self.facets.query(&ray, |facet| {
            if let Some(t) = triangle::segment_hit(p, direction, &facet.corners) {
                hits.insert((t * scale).round() as i64);
            }
        });
        hits.len() % 2 == 1
    }

    /// Inside test voting over several ray directions.
    ///
    /// `p` is inside when at least `min_hits` rays cross the surface an odd
    /// number of times. Directions should be long enough to leave the surface
    /// bounds.
    pub fn is_point_inside(&self, p: &Point3<f64>, directions: &[Vector3<f64>], min_hits: usize) -> bool {
        directions
            .iter()
            .filter(|d| self.is_point_inside_along(p, d))
            .count()
            >= min_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::extract::extract_function;
    use crate::mesh::tests::create_octahedron;

    fn axis_directions(length: f64) -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(length, 0.0, 0.0),
            Vector3::new(-length, 0.0, 0.0),
            Vector3::new(0.0, length, 0.0),
            Vector3::new(0.0, -length, 0.0),
            Vector3::new(0.0, 0.0, length),
            Vector3::new(0.0, 0.0, -length),
        ]
    }

    #[test]
    fn test_inside_octahedron() {
        let surface = BoundarySurface::from_mesh(&create_octahedron(), 0.5).unwrap();
        let dirs: Vec<Vector3<f64>> = axis_directions(4.0)
            .into_iter()
            .map(|d| d + Vector3::new(0.013, 0.021, 0.034))
            .collect();
        assert!(surface.is_point_inside(&Point3::new(0.1, 0.1, 0.1), &dirs, 5));
        assert!(!surface.is_point_inside(&Point3::new(1.0, 1.0, 1.0), &dirs, 5));
    }

    #[test]
    fn test_inside_ignores_winding() {
        let mut mesh = create_octahedron();
        mesh.reverse_normals();
        let surface = BoundarySurface::from_mesh(&mesh, 0.5).unwrap();
        let dirs: Vec<Vector3<f64>> = axis_directions(4.0)
            .into_iter()
            .map(|d| d + Vector3::new(0.013, 0.021, 0.034))
            .collect();
        assert!(surface.is_point_inside(&Point3::new(0.1, 0.1, 0.1), &dirs, 6));
        assert!(!surface.is_point_inside(&Point3::new(1.0, 1.0, 1.0), &dirs, 1));
    }

    #[test]
    fn test_inside_through_vertices_and_edges() {
        let surface = BoundarySurface::from_mesh(&create_octahedron(), 0.5).unwrap();
        let centre = Point3::origin();
        // Each axis ray leaves through a vertex shared by four triangles.
        for d in axis_directions(4.0) {
            assert!(surface.is_point_inside_along(&centre, &d));
        }
        // This one leaves through the edge between (1, 0, 0) and (0, 1, 0).
        assert!(surface.is_point_inside_along(&centre, &Vector3::new(4.0, 4.0, 0.0)));
        // Enters and leaves through opposite vertices.
        let outside = Point3::new(-2.0, 0.0, 0.0);
        assert!(!surface.is_point_inside_along(&outside, &Vector3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn test_inside_torus() {
        let torus = |p: &Point3<f64>| {
            let ring = (p.x * p.x + p.y * p.y).sqrt() - 3.0;
            (ring * ring + p.z * p.z).sqrt() - 1.0
        };
        let bounds = Aabb::new(Point3::new(-5.0, -5.0, -3.0), Point3::new(5.0, 5.0, 3.0));
        let mesh = extract_function(|p| torus(p), &bounds, 0.25).unwrap();
        let surface = BoundarySurface::from_mesh(&mesh, 1.0).unwrap();
        let dirs: Vec<Vector3<f64>> = axis_directions(12.0)
            .into_iter()
            .map(|d| d + Vector3::new(0.013, 0.021, 0.034))
            .collect();

        // Inside the tube.
        assert!(surface.is_point_inside(&Point3::new(3.0, 0.0, 0.0), &dirs, 6));
        assert!(surface.is_point_inside(&Point3::new(0.0, -3.2, 0.1), &dirs, 6));
        // In the hole, where rays along x and y cross the tube twice.
        assert!(!surface.is_point_inside(&Point3::new(0.0, 0.0, 0.0), &dirs, 1));
        assert!(surface.is_point_inside_along(&Point3::new(0.0, 0.0, 0.0), &Vector3::new(3.0, 0.01, 0.02)));
        // Beyond the rim.
        assert!(!surface.is_point_inside(&Point3::new(6.0, 0.5, 0.0), &dirs, 1));
    }

    #[test]
    fn test_distance_squared() {
        let surface = BoundarySurface::from_mesh(&create_octahedron(), 0.5).unwrap();
        let p = Point3::new(0.0, 0.0, 0.0);
        // Distance from the centre to each face plane is 1/sqrt(3).
        let d2 = surface.distance_squared(&p, &Aabb::from_point(p).extend(2.0));
        assert!((d2 - 1.0 / 3.0).abs() < 1e-12);
        let far = Point3::new(10.0, 10.0, 10.0);
        assert!(surface.distance_squared(&far, &Aabb::from_point(far).extend(1.0)).is_infinite());
    }

    #[test]
    fn test_empty_surface_rejected() {
        assert!(matches!(
            BoundarySurface::new(Vec::new(), 1.0),
            Err(AngioError::EmptyMesh)
        ));
    }
}
