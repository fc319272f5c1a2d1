//! Point and ray queries against a single triangle.

use nalgebra::{Point3, Vector3};

use super::Aabb;

/// Closest point on triangle `(a, b, c)` to `p`.
///
/// Classifies `p` against the Voronoi regions of the triangle's vertices,
/// edges and face (Ericson, *Real-Time Collision Detection*, 5.1.5).
pub fn closest_point(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Point3<f64> {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return *a;
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return *b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return *c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Squared distance from `p` to the triangle.
pub fn distance_squared(p: &Point3<f64>, tri: &[Point3<f64>; 3]) -> f64 {
    (closest_point(p, &tri[0], &tri[1], &tri[2]) - p).norm_squared()
}

/// Non-normalized normal `(b - a) x (c - a)`.
#[inline]
pub fn area_normal(tri: &[Point3<f64>; 3]) -> Vector3<f64> {
    (tri[1] - tri[0]).cross(&(tri[2] - tri[0]))
}

/// Unit normal, or `None` for a degenerate triangle.
pub fn unit_normal(tri: &[Point3<f64>; 3]) -> Option<Vector3<f64>> {
    area_normal(tri).try_normalize(0.0)
}

/// Bounds of the three corners.
pub fn bounds(tri: &[Point3<f64>; 3]) -> Aabb {
    Aabb::from_point(tri[0]).append(tri[1]).append(tri[2])
}

/// Möller–Trumbore test of the segment `origin + t * direction`, `t` in `[0, 1]`.
///
/// Returns the hit fraction `t`.
pub fn segment_hit(origin: &Point3<f64>, direction: &Vector3<f64>, tri: &[Point3<f64>; 3]) -> Option<f64> {
    let epsilon = 1e-12;

    let edge1 = tri[1] - tri[0];
    let edge2 = tri[2] - tri[0];
    let h = direction.cross(&edge2);
    let a = edge1.dot(&h);
    if a.abs() < epsilon {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - tri[0];
    let u = f * s.dot(&h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = f * direction.dot(&q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(&q);
    (0.0..=1.0).contains(&t).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> [Point3<f64>; 3] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_closest_point_regions() {
        let tri = unit_triangle();
        // Face region
        assert!((distance_squared(&Point3::new(0.25, 0.25, 2.0), &tri) - 4.0).abs() < 1e-12);
        // Vertex region
        assert!((distance_squared(&Point3::new(-1.0, -1.0, 0.0), &tri) - 2.0).abs() < 1e-12);
        // Edge region of the hypotenuse
        let d = distance_squared(&Point3::new(1.0, 1.0, 0.0), &tri);
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_segment_hit() {
        let tri = unit_triangle();
        let origin = Point3::new(0.2, 0.2, -1.0);
        let hit = segment_hit(&origin, &Vector3::new(0.0, 0.0, 4.0), &tri).unwrap();
        assert!((hit - 0.25).abs() < 1e-12);
        // Too short to reach the plane
        assert!(segment_hit(&origin, &Vector3::new(0.0, 0.0, 0.5), &tri).is_none());
        // Misses laterally
        assert!(segment_hit(&Point3::new(2.0, 2.0, -1.0), &Vector3::new(0.0, 0.0, 4.0), &tri).is_none());
    }

    #[test]
    fn test_normal() {
        let tri = unit_triangle();
        assert_eq!(unit_normal(&tri), Some(Vector3::new(0.0, 0.0, 1.0)));
        let flat = [tri[0], tri[1], Point3::new(2.0, 0.0, 0.0)];
        assert!(unit_normal(&flat).is_none());
    }
}
