//! Marching tetrahedra on a body-centred cubic lattice.
//!
//! The zero level set of a scalar field is approximated by classifying the
//! tetrahedra of a BCC lattice by the signs of their corner samples
//! (`f <= 0` is inside) and cutting each mixed tetrahedron with one triangle
//! or a quad split into two triangles.
//!
//! # Lattice
//!
//! Lattice index `(a, b, c)` maps to space as
//! `(a L + c L / 2, b L + c L / 2, c L / 2)` for stride `L`, so even `c`
//! gives cube corners and odd `c` cube centres. Each construction point owns
//! the six tetrahedra of the unit parallelepiped above it in index space, and
//! every lattice cube `(i, j, k)` contributes two construction points: its
//! corner and its centre.
//!
//! # Watertightness
//!
//! A cut point depends only on the unordered lattice edge it lies on: the
//! endpoint with the greater lattice index is always the interpolation origin
//! and coordinates are rounded, so adjacent tetrahedra (and adjacent chunks)
//! produce bit-identical vertices.
//!
//! # Example
//!
//! ```
//! use angiomesh::algo::extract::extract_function;
//! use angiomesh::geometry::Aabb;
//! use nalgebra::Point3;
//!
//! let centre = Point3::new(5.0, 5.0, 5.0);
//! let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
//! let mesh = extract_function(|p| (p - centre).norm() - 4.0, &bounds, 1.0).unwrap();
//! assert!(mesh.is_closed());
//! ```

use std::collections::HashMap;

use nalgebra::Point3;

use crate::error::{AngioError, Result};
use crate::geometry::Aabb;
use crate::mesh::TriMesh;

/// A lattice index.
pub type LatticeIndex = [i64; 3];

/// Offsets from a construction point to the other seven corners of its
/// parallelepiped: `v001, v010, v100, v011, v110, v101, v111`.
const CONSTRUCTION_PATTERN: [LatticeIndex; 7] = [
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 1, 0],
    [0, 1, 1],
    [1, 0, 1],
    [1, 1, 1],
];

/// The six tetrahedra of a construction parallelepiped, as indices into
/// `[v000, v001, v010, v100, v011, v110, v101, v111]`.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [7, 5, 6, 4],
    [3, 4, 1, 2],
    [3, 4, 1, 6],
    [3, 4, 5, 2],
    [3, 4, 5, 6],
];

/// What to do when a generated triangle cannot be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonManifoldPolicy {
    /// Fail the whole operation.
    #[default]
    Error,
    /// Log the triangle and leave it out.
    Skip,
}

/// Clamp range for the interpolation parameter along a cut edge.
///
/// Keeps cut points away from lattice vertices so that no triangle degenerates
/// to a sliver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexFraction {
    lower: f64,
    upper: f64,
}

impl VertexFraction {
    /// Symmetric range around one half. `v` and `1 - v` give the same range.
    pub fn new(v: f64) -> Result<Self> {
        if v > 0.0 && v < 0.5 {
            Ok(Self {
                lower: v,
                upper: 1.0 - v,
            })
        } else if v > 0.5 && v < 1.0 {
            Ok(Self {
                lower: 1.0 - v,
                upper: v,
            })
        } else {
            Err(AngioError::invalid_param(
                "vertex_fraction",
                v,
                "must lie in (0, 0.5) or (0.5, 1)",
            ))
        }
    }

    /// Smallest allowed parameter.
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Largest allowed parameter.
    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Interpolation parameter of the zero crossing from `f0` towards `f1`.
    fn fraction(&self, f0: f64, f1: f64) -> f64 {
        let e = f0 / (f0 - f1);
        if e.is_nan() {
            // Infinite samples: the crossing hugs the finite end.
            return match (f0.is_finite(), f1.is_finite()) {
                (false, true) => self.upper,
                (true, false) => self.lower,
                _ => 0.5,
            };
        }
        e.clamp(self.lower, self.upper)
    }
}

impl Default for VertexFraction {
    fn default() -> Self {
        Self {
            lower: 0.25,
            upper: 0.75,
        }
    }
}

/// Options for marching tetrahedra extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    /// Lattice spacing.
    pub stride: f64,

    /// Clamp range for cut points along lattice edges.
    pub vertex_fraction: VertexFraction,

    /// Decimal places cut point coordinates are rounded to.
    /// `None` disables rounding.
    pub round_decimals: Option<i32>,

    /// Handling of triangles that would break manifoldness.
    pub non_manifold: NonManifoldPolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            stride: 1.0,
            vertex_fraction: VertexFraction::default(),
            round_decimals: Some(10),
            non_manifold: NonManifoldPolicy::Error,
        }
    }
}

impl ExtractOptions {
    /// Set the lattice spacing.
    pub fn with_stride(mut self, stride: f64) -> Self {
        self.stride = stride;
        self
    }

    /// Set the cut point clamp range.
    pub fn with_vertex_fraction(mut self, fraction: VertexFraction) -> Self {
        self.vertex_fraction = fraction;
        self
    }

    /// Set (or disable) coordinate rounding.
    pub fn with_round_decimals(mut self, decimals: Option<i32>) -> Self {
        self.round_decimals = decimals;
        self
    }

    /// Set the non-manifold handling policy.
    pub fn with_non_manifold(mut self, policy: NonManifoldPolicy) -> Self {
        self.non_manifold = policy;
        self
    }
}

/// Half-open range `[lower, upper)` of lattice cube indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    /// First cube index on each axis.
    pub lower: [i64; 3],
    /// One past the last cube index on each axis.
    pub upper: [i64; 3],
}

impl IndexRange {
    /// Create a range.
    pub fn new(lower: [i64; 3], upper: [i64; 3]) -> Self {
        Self { lower, upper }
    }

    /// Cubes from `floor(lower / stride)` through `ceil(upper / stride)`.
    pub fn covering(bounds: &Aabb, stride: f64) -> Self {
        let lo = |x: f64| (x / stride).floor() as i64;
        let hi = |x: f64| (x / stride).ceil() as i64 + 1;
        Self {
            lower: [lo(bounds.lower.x), lo(bounds.lower.y), lo(bounds.lower.z)],
            upper: [hi(bounds.upper.x), hi(bounds.upper.y), hi(bounds.upper.z)],
        }
    }

    /// Number of cubes.
    pub fn len(&self) -> usize {
        (0..3)
            .map(|i| (self.upper[i] - self.lower[i]).max(0) as usize)
            .product()
    }

    /// Whether the range holds no cubes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over cube indices.
    pub fn cubes(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        let [x0, y0, z0] = self.lower;
        let [x1, y1, z1] = self.upper;
        (x0..x1).flat_map(move |i| (y0..y1).flat_map(move |j| (z0..z1).map(move |k| [i, j, k])))
    }
}

/// A body-centred cubic lattice of a given stride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    stride: f64,
}

impl Lattice {
    /// Create a lattice. The stride must be positive and finite.
    pub fn new(stride: f64) -> Result<Self> {
        if !(stride.is_finite() && stride > 0.0) {
            return Err(AngioError::invalid_param(
                "stride",
                stride,
                "must be positive and finite",
            ));
        }
        Ok(Self { stride })
    }

    /// Lattice spacing.
    pub fn stride(&self) -> f64 {
        self.stride
    }

    /// Position of a lattice index.
    pub fn to_space(&self, q: LatticeIndex) -> Point3<f64> {
        let l = self.stride;
        let half = q[2] as f64 * l * 0.5;
        Point3::new(q[0] as f64 * l + half, q[1] as f64 * l + half, half)
    }

    /// Corner and centre construction points of cube `(i, j, k)`.
    pub fn construction_points(cube: [i64; 3]) -> [LatticeIndex; 2] {
        let [i, j, k] = cube;
        let corner = [i - k, j - k, 2 * k];
        [corner, [corner[0], corner[1], corner[2] + 1]]
    }

    /// The eight corners of the parallelepiped owned by a construction point.
    pub fn parallelepiped(p: LatticeIndex) -> [LatticeIndex; 8] {
        let mut corners = [p; 8];
        for (corner, offset) in corners[1..].iter_mut().zip(CONSTRUCTION_PATTERN) {
            *corner = [p[0] + offset[0], p[1] + offset[1], p[2] + offset[2]];
        }
        corners
    }

    /// Every lattice index sampled when extracting `range`, without duplicates.
    pub fn sample_points(range: &IndexRange) -> Vec<LatticeIndex> {
        let mut points: Vec<LatticeIndex> = range
            .cubes()
            .flat_map(Self::construction_points)
            .flat_map(Self::parallelepiped)
            .collect();
        points.sort_unstable();
        points.dedup();
        points
    }
}

/// Marching tetrahedra extractor.
#[derive(Debug, Clone)]
pub struct MarchingTetrahedra {
    lattice: Lattice,
    options: ExtractOptions,
}

impl MarchingTetrahedra {
    /// Create an extractor, validating the stride.
    pub fn new(options: ExtractOptions) -> Result<Self> {
        Ok(Self {
            lattice: Lattice::new(options.stride)?,
            options,
        })
    }

    /// The lattice samples are taken on.
    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Extraction options.
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Extract the zero level set of `field` over `range`.
    ///
    /// Samples are evaluated lazily and cached per lattice index.
    pub fn extract<F>(&self, range: &IndexRange, field: F) -> Result<TriMesh>
    where
        F: Fn(&Point3<f64>) -> f64,
    {
        let mut cache: HashMap<LatticeIndex, f64> = HashMap::new();
        let mut sample = |q: LatticeIndex| -> Result<f64> {
            Ok(*cache
                .entry(q)
                .or_insert_with(|| field(&self.lattice.to_space(q))))
        };
        self.extract_with(range, &mut sample)
    }

    /// Extract from samples computed ahead of time.
    ///
    /// Fails with [`AngioError::InvalidState`] if a required sample is missing;
    /// [`Lattice::sample_points`] lists the ones needed.
    pub fn extract_sampled(
        &self,
        range: &IndexRange,
        samples: &HashMap<LatticeIndex, f64>,
    ) -> Result<TriMesh> {
        let mut sample = |q: LatticeIndex| -> Result<f64> {
            samples
                .get(&q)
                .copied()
                .ok_or_else(|| AngioError::InvalidState(format!("missing sample at {:?}", q)))
        };
        self.extract_with(range, &mut sample)
    }

    fn extract_with<S>(&self, range: &IndexRange, sample: &mut S) -> Result<TriMesh>
    where
        S: FnMut(LatticeIndex) -> Result<f64>,
    {
        let mut triangles = Vec::new();
        for cube in range.cubes() {
            for p in Lattice::construction_points(cube) {
                let corners = Lattice::parallelepiped(p);
                let mut values = [0.0; 8];
                for (value, &q) in values.iter_mut().zip(&corners) {
                    *value = sample(q)?;
                }
                for tet in TETRAHEDRA {
                    self.tetrahedron(
                        tet.map(|i| corners[i]),
                        tet.map(|i| values[i]),
                        &mut triangles,
                    );
                }
            }
        }

        let mut mesh = TriMesh::with_capacity(triangles.len() / 2, triangles.len());
        for [a, b, c] in triangles {
            match mesh.add_triangle(a, b, c) {
                Ok(_) => {}
                Err(e) if self.options.non_manifold == NonManifoldPolicy::Skip => {
                    log::warn!("skipping extracted triangle: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(mesh)
    }

    fn tetrahedron(&self, v: [LatticeIndex; 4], f: [f64; 4], out: &mut Vec<[Point3<f64>; 3]>) {
        let inside = f.map(|x| x <= 0.0);
        let count = inside.iter().filter(|&&b| b).count();
        match count {
            0 | 4 => {}
            1 | 3 => {
                // The corner on the minority side goes first.
                let Some(odd) = (0..4).find(|&i| inside[i] == (count == 1)) else {
                    return;
                };
                let mut order = [odd, 0, 0, 0];
                let mut n = 1;
                for i in (0..4).filter(|&i| i != odd) {
                    order[n] = i;
                    n += 1;
                }
                self.generate_one(order.map(|i| v[i]), order.map(|i| f[i]), out);
            }
            _ => {
                // Pair corner 0 with the other corner on its side.
                let Some(partner) = (1..4).find(|&i| inside[i] == inside[0]) else {
                    return;
                };
                let mut order = [0, partner, 0, 0];
                let mut n = 2;
                for i in (1..4).filter(|&i| i != partner) {
                    order[n] = i;
                    n += 1;
                }
                self.generate_two(order.map(|i| v[i]), order.map(|i| f[i]), out);
            }
        }
    }

    /// One corner (`v[0]`) separated from the other three.
    fn generate_one(&self, v: [LatticeIndex; 4], f: [f64; 4], out: &mut Vec<[Point3<f64>; 3]>) {
        let p1 = self.cut_point(v[0], v[1], f[0], f[1]);
        let p2 = self.cut_point(v[0], v[2], f[0], f[2]);
        let p3 = self.cut_point(v[0], v[3], f[0], f[3]);
        let n = (p2 - p1).cross(&(p3 - p1));
        if self.faces_outward(n.dot(&(p1 - self.lattice.to_space(v[0]))), f[0]) {
            out.push([p1, p2, p3]);
        } else {
            out.push([p1, p3, p2]);
        }
    }

    /// Corners `v[0], v[1]` separated from `v[2], v[3]`.
    fn generate_two(&self, v: [LatticeIndex; 4], f: [f64; 4], out: &mut Vec<[Point3<f64>; 3]>) {
        let p02 = self.cut_point(v[0], v[2], f[0], f[2]);
        let p03 = self.cut_point(v[0], v[3], f[0], f[3]);
        let p12 = self.cut_point(v[1], v[2], f[1], f[2]);
        let p13 = self.cut_point(v[1], v[3], f[1], f[3]);
        let n = (p12 - p02).cross(&(p03 - p02));
        if self.faces_outward(n.dot(&(p02 - self.lattice.to_space(v[0]))), f[0]) {
            out.push([p02, p12, p03]);
            out.push([p03, p12, p13]);
        } else {
            out.push([p02, p03, p12]);
            out.push([p03, p13, p12]);
        }
    }

    /// Whether a normal whose dot product with `(cut point - v0)` is `dot`
    /// points away from the inside, given the sample `f0` at `v0`.
    #[inline]
    fn faces_outward(&self, dot: f64, f0: f64) -> bool {
        if f0 <= 0.0 {
            dot > 0.0
        } else {
            dot < 0.0
        }
    }

    /// Zero crossing on the lattice edge `q0 - q1`, independent of the
    /// order the endpoints are given in.
    fn cut_point(&self, q0: LatticeIndex, q1: LatticeIndex, f0: f64, f1: f64) -> Point3<f64> {
        let (origin, target, e) = if q0 > q1 {
            (q0, q1, self.options.vertex_fraction.fraction(f0, f1))
        } else {
            (q1, q0, self.options.vertex_fraction.fraction(f1, f0))
        };
        let a = self.lattice.to_space(origin);
        let b = self.lattice.to_space(target);
        let p = Point3::from(b.coords * e + a.coords * (1.0 - e));
        match self.options.round_decimals {
            Some(decimals) => p.map(|x| round_to(x, decimals)),
            None => p,
        }
    }
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    let r = (x * scale).round() / scale;
    if r.is_finite() {
        r
    } else {
        x
    }
}

/// Extract the zero level set of `field` around `bounds`.
///
/// The lattice range covers `bounds` padded by two strides so that a surface
/// inside `bounds` comes out closed.
pub fn extract_function<F>(field: F, bounds: &Aabb, stride: f64) -> Result<TriMesh>
where
    F: Fn(&Point3<f64>) -> f64,
{
    let extractor = MarchingTetrahedra::new(ExtractOptions::default().with_stride(stride))?;
    let range = IndexRange::covering(&bounds.extend(2.0 * stride), stride);
    extractor.extract(&range, field)
}
