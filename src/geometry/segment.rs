//! Radius-bearing line segments.

use nalgebra::Point3;

use super::{Aabb, Bounded};

/// A vessel centerline segment with a constant radius.
///
/// The surface of a segment is the capsule of points at `radius` from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Start of the centerline.
    pub start: Point3<f64>,
    /// End of the centerline.
    pub end: Point3<f64>,
    /// Capsule radius.
    pub radius: f64,
}

impl Segment {
    /// Create a segment.
    pub fn new(start: Point3<f64>, end: Point3<f64>, radius: f64) -> Self {
        Self { start, end, radius }
    }

    /// Closest point on the centerline to `p`.
    pub fn closest_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let d = self.end - self.start;
        let len2 = d.norm_squared();
        if len2 == 0.0 {
            return self.start;
        }
        let t = ((p - self.start).dot(&d) / len2).clamp(0.0, 1.0);
        self.start + d * t
    }

    /// Signed distance from `p` to the capsule surface (negative inside).
    pub fn distance_to_surface(&self, p: &Point3<f64>) -> f64 {
        (p - self.closest_point(p)).norm() - self.radius
    }

    /// Centerline length.
    pub fn length(&self) -> f64 {
        (self.end - self.start).norm()
    }
}

impl Bounded for Segment {
    fn bounds(&self) -> Aabb {
        Aabb::new(self.start, self.end).extend(self.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_surface() {
        let s = Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 2.0), 0.5);
        assert!((s.distance_to_surface(&Point3::new(1.0, 0.0, 1.0)) - 0.5).abs() < 1e-12);
        assert!((s.distance_to_surface(&Point3::new(0.0, 0.0, 1.0)) + 0.5).abs() < 1e-12);
        // Beyond the end cap
        assert!((s.distance_to_surface(&Point3::new(0.0, 0.0, 4.0)) - 1.5).abs() < 1e-12);
        assert!((s.length() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_length_is_sphere() {
        let s = Segment::new(Point3::new(1.0, 1.0, 1.0), Point3::new(1.0, 1.0, 1.0), 2.0);
        assert!((s.distance_to_surface(&Point3::new(4.0, 1.0, 1.0)) - 1.0).abs() < 1e-12);
        let b = s.bounds();
        assert_eq!(b.lower, Point3::new(-1.0, -1.0, -1.0));
    }
}
