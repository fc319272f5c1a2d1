//! Signed surface sampling from vessel segments and an optional boundary.
//!
//! Without a boundary the field is the distance to the nearest capsule surface,
//! negative inside a vessel. With a boundary the field starts as the signed
//! distance to the boundary (negative inside the solid) and vessels are carved
//! out of it, so the zero set is the wall of a solid minus its lumens.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use super::extract::{Lattice, LatticeIndex};
use crate::geometry::{Aabb, BoundarySurface, BoundsHashTable, Segment};

/// Ray-cast parameters for the boundary inside test.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceTest {
    /// Ray directions, long enough to leave the boundary.
    pub directions: Vec<Vector3<f64>>,
    /// Rays that must cross outwards for a point to count as inside.
    pub min_hits: usize,
}

impl SurfaceTest {
    /// The six axis directions scaled to `length`, tolerating `max_miss` misses.
    pub fn axis_aligned(length: f64, max_miss: usize) -> Self {
        let directions = vec![
            Vector3::new(length, 0.0, 0.0),
            Vector3::new(-length, 0.0, 0.0),
            Vector3::new(0.0, length, 0.0),
            Vector3::new(0.0, -length, 0.0),
            Vector3::new(0.0, 0.0, length),
            Vector3::new(0.0, 0.0, -length),
        ];
        Self::new(directions, max_miss)
    }

    /// Test along `directions`, tolerating `max_miss` misses.
    pub fn new(directions: Vec<Vector3<f64>>, max_miss: usize) -> Self {
        let min_hits = directions.len().saturating_sub(max_miss);
        Self {
            directions,
            min_hits,
        }
    }
}

/// Evaluates the signed field at points.
#[derive(Debug, Clone, Copy)]
pub struct Sampler<'a> {
    segments: &'a BoundsHashTable<Segment>,
    boundary: Option<(&'a BoundarySurface, &'a SurfaceTest)>,
    reach: f64,
}

impl<'a> Sampler<'a> {
    /// Sample from `segments`, considering only those within `reach` of a point.
    pub fn new(segments: &'a BoundsHashTable<Segment>, reach: f64) -> Self {
        Self {
            segments,
            boundary: None,
            reach,
        }
    }

    /// Carve the segments out of a solid bounded by `boundary`.
    pub fn with_boundary(mut self, boundary: &'a BoundarySurface, test: &'a SurfaceTest) -> Self {
        self.boundary = Some((boundary, test));
        self
    }

    /// Field value at `p`.
    ///
    /// Far from every feature the value is infinite, with the sign of the
    /// side `p` lies on.
    pub fn sample(&self, p: &Point3<f64>) -> f64 {
        let query = Aabb::from_point(*p).extend(self.reach);
        match self.boundary {
            None => {
                let mut d = f64::INFINITY;
                self.segments.query(&query, |s| d = d.min(s.distance_to_surface(p)));
                d
            }
            Some((boundary, test)) => {
                let sign = if boundary.is_point_inside(p, &test.directions, test.min_hits) {
                    -1.0
                } else {
                    1.0
                };
                let mut d = sign * boundary.distance_squared(p, &query).sqrt();
                self.segments.query(&query, |s| d = d.max(-s.distance_to_surface(p)));
                d
            }
        }
    }

    /// Sample every lattice index in parallel.
    pub fn sample_lattice(&self, lattice: &Lattice, points: &[LatticeIndex]) -> HashMap<LatticeIndex, f64> {
        points
            .par_iter()
            .map(|&q| (q, self.sample(&lattice.to_space(q))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::create_octahedron;

    fn table(segments: Vec<Segment>) -> BoundsHashTable<Segment> {
        BoundsHashTable::new(segments, 2.0).unwrap()
    }

    #[test]
    fn test_min_over_segments() {
        let segments = table(vec![
            Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0), 1.0),
            Segment::new(Point3::new(0.0, 3.0, 0.0), Point3::new(4.0, 3.0, 0.0), 0.5),
        ]);
        let sampler = Sampler::new(&segments, 4.0);
        assert!((sampler.sample(&Point3::new(2.0, 0.0, 0.0)) + 1.0).abs() < 1e-12);
        assert!((sampler.sample(&Point3::new(2.0, 2.0, 0.0)) - 0.5).abs() < 1e-12);
        assert_eq!(sampler.sample(&Point3::new(50.0, 0.0, 0.0)), f64::INFINITY);
    }

    #[test]
    fn test_carves_out_of_boundary() {
        let octahedron = create_octahedron();
        let boundary = BoundarySurface::from_mesh(&octahedron, 0.5).unwrap();
        let test = SurfaceTest::axis_aligned(4.0, 1);
        assert_eq!(test.min_hits, 5);

        let segments = table(vec![Segment::new(
            Point3::new(0.0, 0.0, -0.2),
            Point3::new(0.0, 0.0, 0.2),
            0.1,
        )]);
        let sampler = Sampler::new(&segments, 2.0).with_boundary(&boundary, &test);

        // Inside the solid, away from the vessel.
        assert!(sampler.sample(&Point3::new(0.3, 0.1, 0.05)) < 0.0);
        // Inside the vessel lumen.
        assert!(sampler.sample(&Point3::new(0.0, 0.0, 0.0)) > 0.0);
        // Outside the solid.
        assert!(sampler.sample(&Point3::new(1.5, 0.0, 0.0)) > 0.0);
    }

    #[test]
    fn test_sample_lattice() {
        let segments = table(vec![Segment::new(
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(1.0, 1.0, 1.0),
            0.5,
        )]);
        let sampler = Sampler::new(&segments, 3.0);
        let lattice = Lattice::new(1.0).unwrap();
        let points = vec![[0, 0, 0], [1, 1, 0], [0, 0, 2]];
        let samples = sampler.sample_lattice(&lattice, &points);
        assert_eq!(samples.len(), 3);
        assert!((samples[&[0, 0, 2]] + 0.5).abs() < 1e-12);
    }
}
