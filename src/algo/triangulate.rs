//! Chunked, concurrent triangulation of vessel networks.
//!
//! The lattice index space around the features is cut into cubic chunks of
//! `strides_per_chunk` steps. Each chunk is sampled, extracted and decimated on
//! its own, then merged into a shared aggregate [`Decimation`] under a lock.
//! A final decimation pass over the aggregate simplifies across the chunk
//! seams, which chunk-local passes cannot touch.
//!
//! # Example
//!
//! ```
//! use angiomesh::algo::triangulate::{Triangulator, TriangulatorOptions};
//! use angiomesh::algo::{CancellationToken, Progress};
//! use angiomesh::geometry::Segment;
//! use nalgebra::Point3;
//!
//! let vessel = Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(4.0, 0.0, 0.0), 1.0);
//! let triangulator = Triangulator::new(TriangulatorOptions::default().with_stride(0.5)).unwrap();
//! let mesh = triangulator
//!     .triangulate(&[vessel], None, &Progress::none(), &CancellationToken::new())
//!     .unwrap();
//! assert!(mesh.is_closed());
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use nalgebra::Vector3;
use rayon::prelude::*;

use super::decimate::{Decimation, DecimationOptions};
use super::extract::{ExtractOptions, IndexRange, Lattice, MarchingTetrahedra};
use super::progress::{Progress, ProgressEvent};
use super::sample::{Sampler, SurfaceTest};
use super::CancellationToken;
use crate::error::{AngioError, Result};
use crate::geometry::{Aabb, BoundarySurface, Bounded, BoundsHashTable, Segment};
use crate::mesh::TriMesh;

/// Adjusts decimation options for one stage of triangulation.
pub type ConfigureDecimation = Arc<dyn Fn(DecimationOptions) -> DecimationOptions + Send + Sync>;

/// Options for [`Triangulator`].
#[derive(Clone)]
pub struct TriangulatorOptions {
    /// Extraction options, including the lattice stride.
    pub extract: ExtractOptions,

    /// Lattice steps along each side of a chunk.
    pub strides_per_chunk: usize,

    /// Chunks processed at once.
    pub max_concurrent_chunks: usize,

    /// Cell size of the segment lookup, in strides.
    pub preload_stride_factor: f64,

    /// Distance, in strides, within which features affect a sample.
    pub point_bounds_extension_factor: f64,

    /// Length of inside-test rays relative to the boundary's largest extent.
    pub surface_test_range_factor: f64,

    /// Rays allowed to miss in the boundary inside test.
    pub surface_test_max_miss: usize,

    /// Unit directions of the boundary inside-test rays.
    pub surface_test_directions: Vec<Vector3<f64>>,

    /// Whether to decimate at all.
    pub decimate: bool,

    /// Base decimation options.
    pub decimation: DecimationOptions,

    /// Derives the per-chunk options from the base options.
    pub chunk_decimation: ConfigureDecimation,

    /// Derives the final-pass options from the base options.
    pub final_decimation: ConfigureDecimation,

    /// Forward chunk decimation events as [`ProgressEvent::ChunkDecimating`].
    pub report_chunk_decimation: bool,

    /// Forward final pass decimation events.
    pub report_final_decimation: bool,
}

impl Default for TriangulatorOptions {
    fn default() -> Self {
        Self {
            extract: ExtractOptions::default(),
            strides_per_chunk: 20,
            max_concurrent_chunks: 8,
            preload_stride_factor: 4.0,
            point_bounds_extension_factor: 4.0,
            surface_test_range_factor: 2.0,
            surface_test_max_miss: 1,
            surface_test_directions: vec![
                Vector3::x(),
                -Vector3::x(),
                Vector3::y(),
                -Vector3::y(),
                Vector3::z(),
                -Vector3::z(),
            ],
            decimate: true,
            decimation: DecimationOptions::default(),
            chunk_decimation: Arc::new(|options: DecimationOptions| options),
            final_decimation: Arc::new(|options: DecimationOptions| options),
            report_chunk_decimation: false,
            report_final_decimation: false,
        }
    }
}

impl TriangulatorOptions {
    /// Set the lattice stride.
    pub fn with_stride(mut self, stride: f64) -> Self {
        self.extract.stride = stride;
        self
    }

    /// Set the stride to `fraction` of the smallest positive radius among
    /// `segments`.
    pub fn with_stride_from_feature_radii(
        self,
        segments: &[Segment],
        fraction: f64,
    ) -> Result<Self> {
        if !(fraction > 0.0 && fraction.is_finite()) {
            return Err(AngioError::invalid_param(
                "fraction",
                fraction,
                "must be positive and finite",
            ));
        }
        let smallest = segments
            .iter()
            .map(|s| s.radius)
            .filter(|&r| r > 0.0)
            .min_by(f64::total_cmp)
            .ok_or_else(|| {
                AngioError::invalid_param(
                    "segments",
                    segments.len(),
                    "no segment has a positive radius",
                )
            })?;
        Ok(self.with_stride(smallest * fraction))
    }

    /// Set the extraction options.
    pub fn with_extract(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    /// Set the chunk size in lattice steps.
    pub fn with_strides_per_chunk(mut self, value: usize) -> Self {
        self.strides_per_chunk = value;
        self
    }

    /// Set the number of chunks processed at once.
    pub fn with_max_concurrent_chunks(mut self, value: usize) -> Self {
        self.max_concurrent_chunks = value;
        self
    }

    /// Set the boundary inside-test ray directions.
    pub fn with_surface_test_directions(mut self, directions: Vec<Vector3<f64>>) -> Self {
        self.surface_test_directions = directions;
        self
    }

    /// Set how many inside-test rays may miss.
    pub fn with_surface_test_max_miss(mut self, value: usize) -> Self {
        self.surface_test_max_miss = value;
        self
    }

    /// Enable or disable decimation.
    pub fn with_decimate(mut self, value: bool) -> Self {
        self.decimate = value;
        self
    }

    /// Set the base decimation options.
    pub fn with_decimation(mut self, options: DecimationOptions) -> Self {
        self.decimation = options;
        self
    }

    /// Derive per-chunk decimation options.
    pub fn with_chunk_decimation<F>(mut self, f: F) -> Self
    where
        F: Fn(DecimationOptions) -> DecimationOptions + Send + Sync + 'static,
    {
        self.chunk_decimation = Arc::new(f);
        self
    }

    /// Derive final-pass decimation options.
    pub fn with_final_decimation<F>(mut self, f: F) -> Self
    where
        F: Fn(DecimationOptions) -> DecimationOptions + Send + Sync + 'static,
    {
        self.final_decimation = Arc::new(f);
        self
    }

    /// Set which decimation passes forward their events.
    pub fn with_decimation_reports(mut self, chunk: bool, last: bool) -> Self {
        self.report_chunk_decimation = chunk;
        self.report_final_decimation = last;
        self
    }
}

impl std::fmt::Debug for TriangulatorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriangulatorOptions")
            .field("extract", &self.extract)
            .field("strides_per_chunk", &self.strides_per_chunk)
            .field("max_concurrent_chunks", &self.max_concurrent_chunks)
            .field("preload_stride_factor", &self.preload_stride_factor)
            .field("point_bounds_extension_factor", &self.point_bounds_extension_factor)
            .field("surface_test_range_factor", &self.surface_test_range_factor)
            .field("surface_test_max_miss", &self.surface_test_max_miss)
            .field("decimate", &self.decimate)
            .field("decimation", &self.decimation)
            .finish_non_exhaustive()
    }
}

/// Everything a chunk worker reads.
struct Shared<'a> {
    extractor: MarchingTetrahedra,
    segments: BoundsHashTable<Segment>,
    boundary: Option<(&'a BoundarySurface, SurfaceTest)>,
    chunk_options: DecimationOptions,
    aggregate: Mutex<Decimation>,
    progress: &'a Progress,
    cancel: &'a CancellationToken,
}

/// Builds decimated surface meshes of vessel networks.
#[derive(Debug, Clone)]
pub struct Triangulator {
    options: TriangulatorOptions,
}

impl Triangulator {
    /// Create a triangulator, validating its options.
    pub fn new(options: TriangulatorOptions) -> Result<Self> {
        Lattice::new(options.extract.stride)?;
        if options.strides_per_chunk == 0 {
            return Err(AngioError::invalid_param(
                "strides_per_chunk",
                options.strides_per_chunk,
                "must be at least 1",
            ));
        }
        if options.max_concurrent_chunks == 0 {
            return Err(AngioError::invalid_param(
                "max_concurrent_chunks",
                options.max_concurrent_chunks,
                "must be at least 1",
            ));
        }
        for (name, value) in [
            ("preload_stride_factor", options.preload_stride_factor),
            ("point_bounds_extension_factor", options.point_bounds_extension_factor),
            ("surface_test_range_factor", options.surface_test_range_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AngioError::invalid_param(name, value, "must be positive and finite"));
            }
        }
        Ok(Self { options })
    }

    /// Triangulation options.
    pub fn options(&self) -> &TriangulatorOptions {
        &self.options
    }

    /// Triangulate the surface of `segments`, carved out of the solid inside
    /// `boundary` if one is given.
    ///
    /// An empty input yields an empty mesh.
    pub fn triangulate(
        &self,
        segments: &[Segment],
        boundary: Option<&BoundarySurface>,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<TriMesh> {
        let start = Instant::now();
        let options = &self.options;
        let stride = options.extract.stride;

        let feature_bounds = segments
            .iter()
            .map(Bounded::bounds)
            .chain(boundary.map(BoundarySurface::bounds))
            .reduce(|a, b| a.union(&b));
        let Some(bounds) = feature_bounds else {
            return Ok(TriMesh::new());
        };
        let chunks = chunk_ranges(&bounds.extend(2.0 * stride), stride, options.strides_per_chunk);
        progress.report(ProgressEvent::MeshChunks { total: chunks.len() });
        log::debug!("triangulating {} segments in {} chunks", segments.len(), chunks.len());

        let boundary = boundary.map(|surface| {
            let length = surface.bounds().max_range() * options.surface_test_range_factor;
            let directions = options
                .surface_test_directions
                .iter()
                .map(|d| d * length)
                .collect();
            (surface, SurfaceTest::new(directions, options.surface_test_max_miss))
        });
        let shared = Shared {
            extractor: MarchingTetrahedra::new(options.extract.clone())?,
            segments: BoundsHashTable::new(segments.to_vec(), stride * options.preload_stride_factor)?,
            boundary,
            chunk_options: (options.chunk_decimation)(options.decimation.clone()),
            aggregate: Mutex::new(Decimation::empty((options.final_decimation)(options.decimation.clone()))),
            progress,
            cancel,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_concurrent_chunks)
            .build()
            .map_err(|e| AngioError::InvalidState(format!("cannot start thread pool: {}", e)))?;
        pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .try_for_each(|(id, range)| self.process_chunk(id, range, &shared))
        })?;
        cancel.check()?;

        let mut aggregate = shared
            .aggregate
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        progress.report(ProgressEvent::MeshCreated {
            elapsed: start.elapsed(),
            triangles: aggregate.mesh().num_triangles(),
        });
        log::info!(
            "merged {} chunks into {} triangles in {:?}",
            chunks.len(),
            aggregate.mesh().num_triangles(),
            start.elapsed()
        );

        if options.decimate {
            let begin = Instant::now();
            let final_progress = if options.report_final_decimation {
                progress.clone()
            } else {
                Progress::none()
            };
            aggregate.decimate(&final_progress, cancel)?;
            progress.report(ProgressEvent::MeshDecimated {
                elapsed: begin.elapsed(),
                triangles: aggregate.mesh().num_triangles(),
            });
            log::info!(
                "final decimation left {} triangles in {:?}",
                aggregate.mesh().num_triangles(),
                begin.elapsed()
            );
            cancel.check()?;
        }
        Ok(aggregate.into_mesh())
    }

    fn process_chunk(&self, id: usize, range: &IndexRange, shared: &Shared<'_>) -> Result<()> {
        let options = &self.options;
        let progress = shared.progress;
        let cancel = shared.cancel;
        cancel.check()?;

        let begin = Instant::now();
        let lattice = shared.extractor.lattice();
        let points = Lattice::sample_points(range);
        let reach = lattice.stride() * options.point_bounds_extension_factor;
        let Some(point_bounds) = Aabb::from_points(points.iter().map(|&q| lattice.to_space(q))) else {
            return Ok(());
        };
        let point_bounds = point_bounds.extend(reach);

        let mut nearby = Vec::new();
        shared.segments.query(&point_bounds, |s| nearby.push(*s));
        let mut boundary_triangles = 0;
        if let Some((surface, _)) = &shared.boundary {
            surface.query(&point_bounds, |_| boundary_triangles += 1);
        }
        progress.report(ProgressEvent::ChunkPrepared {
            id,
            elapsed: begin.elapsed(),
            samples: points.len(),
            lattice_points: 2 * range.len(),
            segments: nearby.len(),
            triangles: boundary_triangles,
        });
        let nearby = BoundsHashTable::new(nearby, lattice.stride() * options.preload_stride_factor)?;

        let begin = Instant::now();
        let mut sampler = Sampler::new(&nearby, reach);
        if let Some((surface, test)) = &shared.boundary {
            sampler = sampler.with_boundary(surface, test);
        }
        let samples = sampler.sample_lattice(lattice, &points);
        progress.report(ProgressEvent::ChunkSampled {
            id,
            elapsed: begin.elapsed(),
        });
        cancel.check()?;

        let begin = Instant::now();
        let mesh = shared.extractor.extract_sampled(range, &samples)?;
        progress.report(ProgressEvent::ChunkExtracted {
            id,
            elapsed: begin.elapsed(),
            triangles: mesh.num_triangles(),
        });
        log::debug!("chunk {} extracted {} triangles", id, mesh.num_triangles());
        cancel.check()?;

        let mut session = Decimation::new(mesh, shared.chunk_options.clone());
        if options.decimate {
            let begin = Instant::now();
            let chunk_progress = if options.report_chunk_decimation {
                progress.for_chunk(id)
            } else {
                Progress::none()
            };
            session.decimate(&chunk_progress, cancel)?;
            progress.report(ProgressEvent::ChunkDecimated {
                id,
                elapsed: begin.elapsed(),
                triangles: session.mesh().num_triangles(),
            });
        }

        let begin = Instant::now();
        shared
            .aggregate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(session)?;
        progress.report(ProgressEvent::ChunkMerged {
            id,
            elapsed: begin.elapsed(),
        });
        log::debug!("chunk {} merged in {:?}", id, begin.elapsed());
        Ok(())
    }
}

/// Cut the lattice cubes covering `bounds` into chunks of at most
/// `strides_per_chunk` cubes per side.
pub fn chunk_ranges(bounds: &Aabb, stride: f64, strides_per_chunk: usize) -> Vec<IndexRange> {
    let total = IndexRange::covering(bounds, stride);
    let step = strides_per_chunk.max(1) as i64;
    let axis = |i: usize| -> Vec<(i64, i64)> {
        (total.lower[i]..total.upper[i])
            .step_by(step as usize)
            .map(|lo| (lo, (lo + step).min(total.upper[i])))
            .collect()
    };
    let (xs, ys, zs) = (axis(0), axis(1), axis(2));

    let mut chunks = Vec::with_capacity(xs.len() * ys.len() * zs.len());
    for &(x0, x1) in &xs {
        for &(y0, y1) in &ys {
            for &(z0, z1) in &zs {
                chunks.push(IndexRange::new([x0, y0, z0], [x1, y1, z1]));
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use std::f64::consts::PI;

    fn ball(radius: f64) -> Segment {
        let centre = Point3::new(5.0, 5.0, 5.0);
        Segment::new(centre, centre, radius)
    }

    fn run(options: TriangulatorOptions, segments: &[Segment]) -> TriMesh {
        let _ = env_logger::builder().is_test(true).try_init();
        Triangulator::new(options)
            .unwrap()
            .triangulate(segments, None, &Progress::none(), &CancellationToken::new())
            .unwrap()
    }

    fn cube_triangles(lo: f64, hi: f64) -> Vec<[Point3<f64>; 3]> {
        let c = |i: usize, j: usize, k: usize| {
            let pick = |b: usize| if b == 0 { lo } else { hi };
            Point3::new(pick(i), pick(j), pick(k))
        };
        let quads = [
            [c(0, 0, 0), c(0, 0, 1), c(0, 1, 1), c(0, 1, 0)],
            [c(1, 0, 0), c(1, 1, 0), c(1, 1, 1), c(1, 0, 1)],
            [c(0, 0, 0), c(1, 0, 0), c(1, 0, 1), c(0, 0, 1)],
            [c(0, 1, 0), c(0, 1, 1), c(1, 1, 1), c(1, 1, 0)],
            [c(0, 0, 0), c(0, 1, 0), c(1, 1, 0), c(1, 0, 0)],
            [c(0, 0, 1), c(1, 0, 1), c(1, 1, 1), c(0, 1, 1)],
        ];
        quads
            .iter()
            .flat_map(|[a, b, c, d]| [[*a, *b, *c], [*a, *c, *d]])
            .collect()
    }

    #[test]
    fn test_chunk_ranges_cover_once() {
        let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(9.5, 3.0, 1.0));
        let total = IndexRange::covering(&bounds, 1.0);
        let chunks = chunk_ranges(&bounds, 1.0, 4);
        // x covers 0..11 in three chunks; y (0..4) and z (0..2) fit in one.
        assert_eq!(total.lower, [0, 0, 0]);
        assert_eq!(total.upper, [11, 4, 2]);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(IndexRange::len).sum::<usize>(), total.len());
        for chunk in &chunks {
            for i in 0..3 {
                assert!(chunk.upper[i] - chunk.lower[i] <= 4);
            }
        }

        let holds = |c: &IndexRange, p: [i64; 3]| (0..3).all(|i| c.lower[i] <= p[i] && p[i] < c.upper[i]);
        for a in total.lower[0]..total.upper[0] {
            for b in total.lower[1]..total.upper[1] {
                for c in total.lower[2]..total.upper[2] {
                    let owners = chunks.iter().filter(|chunk| holds(chunk, [a, b, c])).count();
                    assert_eq!(owners, 1, "cube {:?}", [a, b, c]);
                }
            }
        }
    }

    #[test]
    fn test_stride_from_feature_radii() {
        let segments = [
            Segment::new(Point3::origin(), Point3::new(1.0, 0.0, 0.0), 0.8),
            Segment::new(Point3::origin(), Point3::new(0.0, 1.0, 0.0), 0.0),
            Segment::new(Point3::origin(), Point3::new(0.0, 0.0, 1.0), 0.4),
        ];
        let options = TriangulatorOptions::default()
            .with_stride_from_feature_radii(&segments, 0.25)
            .unwrap();
        assert_eq!(options.extract.stride, 0.1);

        assert!(TriangulatorOptions::default()
            .with_stride_from_feature_radii(&segments[1..2], 0.25)
            .is_err());
        assert!(TriangulatorOptions::default()
            .with_stride_from_feature_radii(&segments, 0.0)
            .is_err());
    }

    #[test]
    fn test_invalid_options() {
        assert!(Triangulator::new(TriangulatorOptions::default().with_stride(0.0)).is_err());
        assert!(Triangulator::new(TriangulatorOptions::default().with_strides_per_chunk(0)).is_err());
        assert!(Triangulator::new(TriangulatorOptions::default().with_max_concurrent_chunks(0)).is_err());
    }

    #[test]
    fn test_empty_input() {
        let mesh = run(TriangulatorOptions::default(), &[]);
        assert!(mesh.is_empty());
    }

    #[test]
    fn test_sphere_area() {
        let analytic = 4.0 * PI * 16.0;

        let raw = run(TriangulatorOptions::default().with_decimate(false), &[ball(4.0)]);
        assert!(raw.is_closed());
        assert!(raw.is_one_sided());
        assert!(((raw.surface_area() - analytic) / analytic).abs() < 0.05);

        let options = TriangulatorOptions::default()
            .with_decimation(DecimationOptions::default().with_max_error_squared(0.01));
        let decimated = run(options, &[ball(4.0)]);
        assert!(decimated.is_closed());
        assert!(decimated.is_one_sided());
        assert!(decimated.num_triangles() < raw.num_triangles());
        assert!(((decimated.surface_area() - analytic) / analytic).abs() < 0.1);
    }

    #[test]
    fn test_chunks_stitch() {
        let single = run(TriangulatorOptions::default().with_decimate(false), &[ball(4.0)]);
        let chunked = run(
            TriangulatorOptions::default()
                .with_decimate(false)
                .with_strides_per_chunk(4)
                .with_max_concurrent_chunks(4),
            &[ball(4.0)],
        );
        assert!(chunked.is_closed());
        assert_eq!(chunked.num_triangles(), single.num_triangles());
        assert_eq!(chunked.num_vertices(), single.num_vertices());
    }

    #[test]
    fn test_chunked_decimation_stays_closed() {
        let options = TriangulatorOptions::default()
            .with_strides_per_chunk(5)
            .with_max_concurrent_chunks(3)
            .with_decimation(DecimationOptions::default().with_max_error_squared(0.01));
        let mesh = run(options, &[ball(4.0)]);
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.genus(), 0);
    }

    #[test]
    fn test_capsule() {
        let capsule = Segment::new(Point3::new(2.0, 5.0, 5.0), Point3::new(8.0, 5.0, 5.0), 1.5);
        let mesh = run(
            TriangulatorOptions::default()
                .with_stride(0.5)
                .with_decimation(DecimationOptions::default().with_max_error_squared(0.005)),
            &[capsule],
        );
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.genus(), 0);

        let r: f64 = 1.5;
        let analytic = 4.0 * PI * r * r + 2.0 * PI * r * 6.0;
        assert!(((mesh.surface_area() - analytic) / analytic).abs() < 0.1);
    }

    #[test]
    fn test_boundary_with_vessel_through_it() {
        let boundary = BoundarySurface::new(cube_triangles(0.3, 4.3), 1.0).unwrap();
        let vessel = Segment::new(Point3::new(2.3, 2.3, -1.0), Point3::new(2.3, 2.3, 5.6), 0.8);
        let directions = vec![
            Vector3::new(1.0, 0.11, 0.07),
            Vector3::new(-1.0, 0.05, -0.13),
            Vector3::new(0.09, 1.0, -0.04),
            Vector3::new(-0.06, -1.0, 0.1),
            Vector3::new(0.12, -0.08, 1.0),
            Vector3::new(-0.03, 0.14, -1.0),
        ];
        let options = TriangulatorOptions::default()
            .with_stride(0.5)
            .with_decimate(false)
            .with_surface_test_directions(directions);
        let mesh = Triangulator::new(options)
            .unwrap()
            .triangulate(&[vessel], Some(&boundary), &Progress::none(), &CancellationToken::new())
            .unwrap();
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.genus(), 1);
    }

    #[test]
    fn test_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress = Progress::new(move |event| sink.lock().unwrap().push(event));
        let options = TriangulatorOptions::default()
            .with_strides_per_chunk(8)
            .with_decimation(DecimationOptions::default().with_max_error_squared(0.01))
            .with_decimation_reports(true, false);
        Triangulator::new(options)
            .unwrap()
            .triangulate(&[ball(3.0)], None, &progress, &CancellationToken::new())
            .unwrap();

        let events = events.lock().unwrap();
        let ProgressEvent::MeshChunks { total } = events[0] else {
            panic!("first event was {:?}", events[0]);
        };
        assert!(total > 1);
        let count = |f: fn(&ProgressEvent) -> bool| events.iter().filter(|e| f(e)).count();
        assert_eq!(count(|e| matches!(e, ProgressEvent::ChunkPrepared { .. })), total);
        assert_eq!(count(|e| matches!(e, ProgressEvent::ChunkMerged { .. })), total);
        assert_eq!(count(|e| matches!(e, ProgressEvent::ChunkDecimated { .. })), total);
        assert!(count(|e| matches!(e, ProgressEvent::ChunkDecimating { .. })) >= total);
        assert_eq!(count(|e| matches!(e, ProgressEvent::DecimationBegin { .. })), 0);
        assert_eq!(count(|e| matches!(e, ProgressEvent::MeshCreated { .. })), 1);
        assert!(matches!(events.last(), Some(ProgressEvent::MeshDecimated { .. })));
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Triangulator::new(TriangulatorOptions::default())
            .unwrap()
            .triangulate(&[ball(2.0)], None, &Progress::none(), &cancel);
        assert!(result.is_err_and(|e| e.is_cancelled()));
    }
}
