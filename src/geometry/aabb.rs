//! Axis-aligned bounding boxes.

use nalgebra::{Point3, Vector3};

/// An axis-aligned box given by its lower and upper corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Component-wise minimum.
    pub lower: Point3<f64>,
    /// Component-wise maximum.
    pub upper: Point3<f64>,
}

impl Aabb {
    /// Box spanning two corners, in any order.
    pub fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            lower: a.inf(&b),
            upper: a.sup(&b),
        }
    }

    /// Degenerate box containing a single point.
    pub fn from_point(p: Point3<f64>) -> Self {
        Self { lower: p, upper: p }
    }

    /// Tightest box around the points, or `None` if there are none.
    pub fn from_points<I: IntoIterator<Item = Point3<f64>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::from_point(first), Self::append))
    }

    /// Grow to include `p`.
    pub fn append(self, p: Point3<f64>) -> Self {
        Self {
            lower: self.lower.inf(&p),
            upper: self.upper.sup(&p),
        }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            lower: self.lower.inf(&other.lower),
            upper: self.upper.sup(&other.upper),
        }
    }

    /// Grow every face outwards by `margin`.
    pub fn extend(self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            lower: self.lower - m,
            upper: self.upper + m,
        }
    }

    /// Whether the boxes overlap (touching counts).
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.lower.x <= other.upper.x
            && self.upper.x >= other.lower.x
            && self.lower.y <= other.upper.y
            && self.upper.y >= other.lower.y
            && self.lower.z <= other.upper.z
            && self.upper.z >= other.lower.z
    }

    /// Whether `p` lies inside or on the box.
    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| self.lower[i] <= p[i] && p[i] <= self.upper[i])
    }

    /// Edge lengths along each axis.
    pub fn range(&self) -> Vector3<f64> {
        self.upper - self.lower
    }

    /// Longest edge length.
    pub fn max_range(&self) -> f64 {
        self.range().max()
    }
}
