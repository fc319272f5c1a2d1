//! The decimation session: mesh, point caches and candidate bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

use super::DecimationOptions;
use crate::algo::extract::NonManifoldPolicy;
use crate::algo::progress::{ErrorSummary, Progress, ProgressEvent};
use crate::algo::CancellationToken;
use crate::error::{AngioError, Result};
use crate::geometry::triangle;
use crate::mesh::{TriMesh, TriangleId, VertexId};

/// Directed `(kept, lost)` vertex pair.
type Pair = (VertexId, VertexId);

/// Original sample points that project onto one triangle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginalPoints {
    /// The points.
    pub points: Vec<Point3<f64>>,
    /// Largest squared distance from a point to the triangle.
    pub error: f64,
}

impl OriginalPoints {
    fn push(&mut self, p: Point3<f64>, distance_squared: f64) {
        self.points.push(p);
        self.error = self.error.max(distance_squared);
    }
}

/// Retriangulation of the ring around a lost vertex.
#[derive(Debug, Clone)]
struct Remesh {
    /// Ring of the lost vertex starting at the kept vertex.
    fan: Vec<VertexId>,
    /// `(fan[0], fan[i], fan[i + 1])` for each inner `i`.
    triangles: Vec<[VertexId; 3]>,
    /// Points reassigned to each new triangle.
    points: Vec<OriginalPoints>,
    old_error: f64,
    new_error: f64,
    old_shape: f64,
    new_shape: f64,
}

#[derive(Debug, Clone)]
struct Collapse {
    remesh: Remesh,
    /// Infinite when the remesh is valid but fails the cost checks.
    cost: f64,
}

enum Update {
    Store(Pair, Collapse),
    Recost(Pair, f64),
    Discard(Pair),
}

/// Incremental edge-collapse decimation of one mesh.
///
/// Sessions can be merged, which is how chunked triangulation assembles and
/// then re-decimates its output.
#[derive(Debug, Clone)]
pub struct Decimation {
    mesh: TriMesh,
    options: DecimationOptions,
    points: HashMap<TriangleId, OriginalPoints>,
    collapses: HashMap<Pair, Collapse>,
    remeshing: HashSet<Pair>,
    recosting: HashSet<Pair>,
    boundary: HashSet<VertexId>,
    boundary_valid: bool,
}

impl Decimation {
    /// Start a session with empty point caches and every directed edge
    /// scheduled for evaluation.
    pub fn new(mesh: TriMesh, options: DecimationOptions) -> Self {
        let mut session = Self {
            mesh,
            options,
            points: HashMap::new(),
            collapses: HashMap::new(),
            remeshing: HashSet::new(),
            recosting: HashSet::new(),
            boundary: HashSet::new(),
            boundary_valid: false,
        };
        session.clear_errors();
        session.remesh_all();
        session
    }

    /// A session over an empty mesh, to merge others into.
    pub fn empty(options: DecimationOptions) -> Self {
        Self::new(TriMesh::new(), options)
    }

    // ==================== Accessors ====================

    /// The current mesh.
    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    /// Consume the session, returning its mesh.
    pub fn into_mesh(self) -> TriMesh {
        self.mesh
    }

    /// Decimation options.
    pub fn options(&self) -> &DecimationOptions {
        &self.options
    }

    /// Replace the options used by subsequent calls.
    pub fn set_options(&mut self, options: DecimationOptions) {
        if options.extend_boundary != self.options.extend_boundary {
            self.boundary_valid = false;
        }
        self.options = options;
    }

    /// Number of cached candidates, including rejected placeholders.
    pub fn collapse_count(&self) -> usize {
        self.collapses.len()
    }

    /// Number of pairs awaiting a full re-evaluation.
    pub fn remeshing_len(&self) -> usize {
        self.remeshing.len()
    }

    /// Number of pairs awaiting a cost re-evaluation.
    pub fn recosting_len(&self) -> usize {
        self.recosting.len()
    }

    /// Points tracked by a triangle.
    pub fn triangle_points(&self, t: TriangleId) -> Option<&OriginalPoints> {
        self.points.get(&t)
    }

    /// Summary of per-triangle errors.
    pub fn error_summary(&self) -> ErrorSummary {
        ErrorSummary::from_errors(self.points.values().map(|p| p.error))
    }

    // ==================== Bookkeeping ====================

    /// Forget all tracked points.
    pub fn clear_errors(&mut self) {
        self.points = self
            .mesh
            .triangles()
            .map(|(t, _)| (t, OriginalPoints::default()))
            .collect();
    }

    /// Schedule both directions of every edge for evaluation.
    pub fn remesh_all(&mut self) {
        for (_, edge) in self.mesh.edges() {
            let [a, b] = edge.vertices();
            self.remeshing.insert((a, b));
            self.remeshing.insert((b, a));
        }
    }

    fn update_boundary(&mut self) {
        if self.boundary_valid {
            return;
        }
        let mut boundary = HashSet::new();
        for v in self.mesh.vertex_ids() {
            if !self.mesh.is_interior(v) {
                boundary.insert(v);
                if self.options.extend_boundary {
                    boundary.extend(self.mesh.unordered_fan(v));
                }
            }
        }
        self.boundary = boundary;
        self.boundary_valid = true;
    }

    fn queue_vertex(&mut self, v: VertexId) {
        for u in self.mesh.unordered_fan(v) {
            self.remeshing.insert((u, v));
            self.remeshing.insert((v, u));
        }
    }

    // ==================== Decimation ====================

    /// Collapse edges until no candidate remains.
    ///
    /// Cancellation is checked between phases, so a cancelled session holds a
    /// valid mesh and can be resumed.
    pub fn decimate(&mut self, progress: &Progress, cancel: &CancellationToken) -> Result<()> {
        if self.options.edges_per_chunk == 0 {
            return Err(AngioError::invalid_param(
                "edges_per_chunk",
                self.options.edges_per_chunk,
                "must be at least 1",
            ));
        }
        if self.options.max_concurrent_chunks == 0 {
            return Err(AngioError::invalid_param(
                "max_concurrent_chunks",
                self.options.max_concurrent_chunks,
                "must be at least 1",
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_concurrent_chunks)
            .build()
            .map_err(|e| AngioError::InvalidState(format!("cannot start thread pool: {}", e)))?;

        self.update_boundary();
        progress.report(ProgressEvent::DecimationBegin {
            boundary_vertices: self.boundary.len(),
            vertices: self.mesh.num_vertices(),
        });

        let mut iteration = 0usize;
        while !self.remeshing.is_empty() || !self.recosting.is_empty() {
            cancel.check()?;
            self.update_boundary();

            let (remeshing, recosting) = (self.remeshing.len(), self.recosting.len());
            let updates = pool.install(|| self.evaluate());
            cancel.check()?;
            self.apply_updates(updates);
            self.remeshing.clear();
            self.recosting.clear();

            let order = self.sorted_candidates();
            progress.report(ProgressEvent::DecimationStep {
                triangles: self.mesh.num_triangles(),
                edges: self.mesh.num_edges(),
                remeshing,
                recosting,
                valid: order.len(),
                errors: self.options.report_errors.then(|| self.error_summary()),
            });

            let mut applied = 0usize;
            for pair in order {
                if self.check_valid(pair) {
                    self.execute(pair)?;
                    applied += 1;
                }
            }
            log::debug!(
                "decimation iteration {}: {} remeshed, {} recosted, {} collapsed, {} triangles",
                iteration,
                remeshing,
                recosting,
                applied,
                self.mesh.num_triangles()
            );

            if self.options.drop_errors {
                self.clear_errors();
            }
            iteration += 1;
        }
        Ok(())
    }

    /// Re-evaluate all stale candidates in parallel.
    fn evaluate(&self) -> Vec<Update> {
        let remesh: Vec<Pair> = self.remeshing.iter().copied().collect();
        let recost: Vec<Pair> = self
            .recosting
            .iter()
            .filter(|p| !self.remeshing.contains(p) && self.collapses.contains_key(p))
            .copied()
            .collect();

        let updates = Mutex::new(Vec::with_capacity(remesh.len() + recost.len()));
        let chunk = self.options.edges_per_chunk;
        remesh.par_chunks(chunk).for_each(|pairs| {
            let local: Vec<Update> = pairs
                .iter()
                .map(|&pair| match self.try_remesh(pair) {
                    Some(remesh) => {
                        let cost = self.try_collapse(pair.1, &remesh);
                        Update::Store(pair, Collapse { remesh, cost })
                    }
                    None => Update::Discard(pair),
                })
                .collect();
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(local);
        });
        recost.par_chunks(chunk).for_each(|pairs| {
            let local: Vec<Update> = pairs
                .iter()
                .filter_map(|&pair| {
                    self.collapses
                        .get(&pair)
                        .map(|c| Update::Recost(pair, self.try_collapse(pair.1, &c.remesh)))
                })
                .collect();
            updates
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(local);
        });
        updates.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_updates(&mut self, updates: Vec<Update>) {
        for update in updates {
            match update {
                Update::Store(pair, collapse) => {
                    self.collapses.insert(pair, collapse);
                }
                Update::Recost(pair, cost) => {
                    if let Some(c) = self.collapses.get_mut(&pair) {
                        c.cost = cost;
                    }
                }
                Update::Discard(pair) => {
                    self.collapses.remove(&pair);
                }
            }
        }
    }

    /// Finite-cost candidates, cheapest first.
    fn sorted_candidates(&self) -> Vec<Pair> {
        let mut valid: Vec<(f64, Pair)> = self
            .collapses
            .iter()
            .filter(|(_, c)| c.cost.is_finite())
            .map(|(&pair, c)| (c.cost, pair))
            .collect();
        valid.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        valid.into_iter().map(|(_, pair)| pair).collect()
    }

    /// Build the remesh for collapsing `lost` into `kept`, or `None` if the
    /// collapse is structurally or geometrically invalid.
    fn try_remesh(&self, (kept, lost): Pair) -> Option<Remesh> {
        if self.boundary.contains(&lost) {
            return None;
        }
        let edge = self.mesh.edge_between(kept, lost)?;
        if !self.mesh.can_collapse(edge) {
            return None;
        }
        let fan = self.mesh.fan_from(lost, kept)?;
        if fan.len() < 3 {
            return None;
        }

        let mut triangles = Vec::with_capacity(fan.len() - 2);
        let mut corners = Vec::with_capacity(fan.len() - 2);
        for i in 1..fan.len() - 1 {
            let tri = [fan[0], fan[i], fan[i + 1]];
            let c = tri.map(|v| self.mesh.position(v));
            if triangle::area_normal(&c).norm_squared() <= self.options.normal_tolerance_squared {
                return None;
            }
            triangles.push(tri);
            corners.push(c);
        }

        let mut points = vec![OriginalPoints::default(); triangles.len()];
        let mut assign = |p: Point3<f64>| {
            let (best, d) = nearest_triangle(&corners, &p);
            points[best].push(p, d);
        };
        assign(self.mesh.position(lost));

        let mut old_error = 0.0f64;
        let mut old_shape = 0.0;
        for &t in self.mesh.vertex_triangles(lost) {
            if let Some(cache) = self.points.get(&t) {
                old_error = old_error.max(cache.error);
                cache.points.iter().for_each(|&p| assign(p));
            }
            if let (Some(shape), Some(c)) = (&self.options.shape_cost, self.mesh.triangle_positions(t)) {
                old_shape += shape(&c);
            }
        }

        let new_error = points.iter().map(|p| p.error).fold(0.0, f64::max);
        if new_error >= self.options.max_error_squared {
            return None;
        }

        let mut new_shape = 0.0;
        if let Some(shape) = &self.options.shape_cost {
            for c in &corners {
                let s = shape(c);
                if s > self.options.max_shape_cost {
                    return None;
                }
                new_shape += s;
            }
        }

        Some(Remesh {
            fan,
            triangles,
            points,
            old_error,
            new_error,
            old_shape,
            new_shape,
        })
    }

    /// Cost of applying `remesh`, infinite if it folds the surface.
    fn try_collapse(&self, lost: VertexId, remesh: &Remesh) -> f64 {
        let normals: Option<Vec<Vector3<f64>>> = remesh
            .triangles
            .iter()
            .map(|tri| triangle::unit_normal(&tri.map(|v| self.mesh.position(v))))
            .collect();
        let Some(normals) = normals else {
            return f64::INFINITY;
        };

        let mut cosines: Vec<f64> = normals.windows(2).map(|w| w[0].dot(&w[1])).collect();
        let last = remesh.triangles.len() - 1;
        for (j, tri) in remesh.triangles.iter().enumerate() {
            let mut ring = vec![(tri[1], tri[2])];
            if j == 0 {
                ring.push((tri[0], tri[1]));
            }
            if j == last {
                ring.push((tri[2], tri[0]));
            }
            for (a, b) in ring {
                let across = self
                    .mesh
                    .edge_between(a, b)
                    .and_then(|e| self.mesh.triangle_across(e, lost))
                    .and_then(|t| self.mesh.triangle(t));
                if let Some(across) = across {
                    cosines.push(normals[j].dot(&across.normal()));
                }
            }
        }
        if cosines.iter().any(|&c| c < self.options.min_dihedral_cosine) {
            return f64::INFINITY;
        }

        let (old_dihedral, new_dihedral) = match &self.options.dihedral_cost {
            Some(cost) => {
                let new: f64 = cosines.iter().map(|&c| cost(c)).sum();
                let fan = &remesh.fan;
                let mut old = 0.0;
                for (i, &v) in fan.iter().enumerate() {
                    let next = fan[(i + 1) % fan.len()];
                    for (a, b) in [(v, next), (lost, v)] {
                        if let Some(c) = self.mesh.edge_between(a, b).and_then(|e| self.mesh.dihedral_cosine(e)) {
                            old += cost(c);
                        }
                    }
                }
                (old, new)
            }
            None => (0.0, 0.0),
        };

        let cost = (self.options.combine_error)(remesh.old_error, remesh.new_error)
            + (self.options.combine_dihedral)(old_dihedral, new_dihedral)
            + (self.options.combine_shape)(remesh.old_shape, remesh.new_shape);
        if cost.is_nan() {
            f64::INFINITY
        } else {
            cost
        }
    }

    /// Whether a cached candidate is still safe to apply in this batch.
    fn check_valid(&self, pair: Pair) -> bool {
        if self.remeshing.contains(&pair) || self.recosting.contains(&pair) {
            return false;
        }
        let Some(collapse) = self.collapses.get(&pair) else {
            return false;
        };
        let (kept, lost) = pair;
        collapse.cost.is_finite()
            && self
                .mesh
                .edge_between(kept, lost)
                .is_some_and(|e| self.mesh.can_collapse(e))
            && self.mesh.valence(lost) == collapse.remesh.fan.len()
    }

    fn execute(&mut self, pair: Pair) -> Result<()> {
        let Some(collapse) = self.collapses.remove(&pair) else {
            return Ok(());
        };
        let lost = pair.1;
        self.check_remesh(lost, &collapse.remesh.triangles)?;
        for v in self.mesh.unordered_fan(lost) {
            self.collapses.remove(&(v, lost));
            self.collapses.remove(&(lost, v));
        }
        for t in self.mesh.vertex_triangles(lost).to_vec() {
            self.mesh.remove_triangle(t);
            self.points.remove(&t);
        }

        let Remesh {
            fan,
            triangles,
            points,
            ..
        } = collapse.remesh;
        for (tri, pts) in triangles.into_iter().zip(points) {
            let [a, b, c] = tri.map(|v| self.mesh.position(v));
            let t = self.mesh.add_triangle(a, b, c)?;
            self.points.insert(t, pts);
        }
        self.mark_invalidated(&fan);
        Ok(())
    }

    /// Fails, leaving the mesh untouched, if `triangles` could not all be added
    /// once the triangles around `lost` are gone.
    fn check_remesh(&self, lost: VertexId, triangles: &[[VertexId; 3]]) -> Result<()> {
        let mut added: HashMap<(VertexId, VertexId), usize> = HashMap::new();
        for tri in triangles {
            let [a, b, c] = *tri;
            if tri.contains(&lost) || a == b || b == c || a == c {
                return Err(AngioError::DegenerateTriangle {
                    details: format!("remesh triangle {:?} repeats a corner", tri),
                });
            }
            let [pa, pb, pc] = tri.map(|v| self.mesh.position(v));
            let norm = (pb - pa).cross(&(pc - pa)).norm();
            if norm == 0.0 || !norm.is_finite() {
                return Err(AngioError::DegenerateTriangle {
                    details: format!("collinear corners {:?}, {:?}, {:?}", pa, pb, pc),
                });
            }
            for (u, v) in [(a, b), (b, c), (c, a)] {
                *added.entry((u.min(v), u.max(v))).or_default() += 1;
            }
        }

        for (&(u, v), &count) in &added {
            let remaining = self
                .mesh
                .edge_between(u, v)
                .and_then(|e| self.mesh.edge(e))
                .map_or(0, |e| {
                    let survives = |t: &&TriangleId| {
                        self.mesh.triangle(**t).is_some_and(|tri| !tri.contains(lost))
                    };
                    e.triangles().iter().filter(survives).count()
                });
            if remaining + count > 2 {
                return Err(AngioError::NonManifoldEdge {
                    v0: u.index(),
                    v1: v.index(),
                });
            }
        }
        Ok(())
    }

    /// Schedule every candidate whose inputs a collapse with this ring changed.
    fn mark_invalidated(&mut self, fan: &[VertexId]) {
        let in_fan: HashSet<VertexId> = fan.iter().copied().collect();
        for &fv in fan {
            for other in self.mesh.unordered_fan(fv) {
                self.remeshing.insert((other, fv));
                let borders_fan = self
                    .mesh
                    .edge_between(fv, other)
                    .and_then(|e| self.mesh.edge(e))
                    .is_some_and(|e| {
                        e.triangles().iter().any(|&t| {
                            self.mesh
                                .triangle(t)
                                .and_then(|tri| tri.opposite(fv, other))
                                .is_some_and(|o| in_fan.contains(&o))
                        })
                    });
                if borders_fan {
                    for x in self.mesh.unordered_fan(other) {
                        self.recosting.insert((x, other));
                    }
                }
            }
        }
    }

    // ==================== Merging ====================

    /// Absorb another session, translating its state by vertex position.
    ///
    /// Vertices that were on the boundary of `other` and are interior after
    /// the merge are scheduled together with their neighbours, so seams get
    /// decimated by the next run.
    pub fn merge(&mut self, other: Decimation) -> Result<()> {
        if other.mesh.is_empty()
            && other.collapses.is_empty()
            && other.remeshing.is_empty()
            && other.recosting.is_empty()
        {
            return Ok(());
        }

        let seams: Vec<Point3<f64>> = other
            .mesh
            .vertex_ids()
            .filter(|&v| !other.mesh.is_interior(v))
            .map(|v| other.mesh.position(v))
            .collect();

        for (t, tri) in other.mesh.triangles() {
            let [a, b, c] = tri.vertices().map(|v| other.mesh.position(v));
            match self.mesh.add_triangle(a, b, c) {
                Ok(id) => {
                    let points = other.points.get(&t).cloned().unwrap_or_default();
                    self.points.insert(id, points);
                }
                Err(e) if self.options.non_manifold == NonManifoldPolicy::Skip => {
                    log::warn!("skipping merged triangle {:?}: {}", t, e);
                }
                Err(e) => return Err(e),
            }
        }

        let translate = |v: VertexId| self.mesh.find_vertex(&other.mesh.position(v));
        let translate_pair = |(a, b): Pair| Some((translate(a)?, translate(b)?));

        let mut collapses = Vec::with_capacity(other.collapses.len());
        for (pair, collapse) in &other.collapses {
            let translated = translate_pair(*pair).and_then(|p| {
                let fan: Option<Vec<VertexId>> = collapse.remesh.fan.iter().map(|&v| translate(v)).collect();
                let triangles: Option<Vec<[VertexId; 3]>> = collapse
                    .remesh
                    .triangles
                    .iter()
                    .map(|tri| Some([translate(tri[0])?, translate(tri[1])?, translate(tri[2])?]))
                    .collect();
                let remesh = Remesh {
                    fan: fan?,
                    triangles: triangles?,
                    ..collapse.remesh.clone()
                };
                Some((
                    p,
                    Collapse {
                        remesh,
                        cost: collapse.cost,
                    },
                ))
            });
            collapses.extend(translated);
        }
        let remeshing: Vec<Pair> = other.remeshing.iter().filter_map(|&p| translate_pair(p)).collect();
        let recosting: Vec<Pair> = other.recosting.iter().filter_map(|&p| translate_pair(p)).collect();

        self.collapses.extend(collapses);
        self.remeshing.extend(remeshing);
        self.recosting.extend(recosting);

        for p in seams {
            if let Some(v) = self.mesh.find_vertex(&p) {
                if self.mesh.is_interior(v) {
                    self.queue_vertex(v);
                    for u in self.mesh.unordered_fan(v) {
                        self.queue_vertex(u);
                    }
                }
            }
        }
        self.boundary_valid = false;
        Ok(())
    }
}

/// Index of the triangle nearest to `p` and the squared distance to it.
fn nearest_triangle(corners: &[[Point3<f64>; 3]], p: &Point3<f64>) -> (usize, f64) {
    corners
        .iter()
        .enumerate()
        .map(|(i, c)| (i, triangle::distance_squared(p, c)))
        .fold((0, f64::INFINITY), |best, x| if x.1 < best.1 { x } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::extract::extract_function;
    use crate::geometry::Aabb;
    use crate::mesh::tests::{create_grid_mesh, create_octahedron};

    fn flat_options() -> DecimationOptions {
        DecimationOptions::default()
            .with_max_error_squared(1e-6)
            .with_extend_boundary(false)
    }

    /// Evaluate and apply a single collapse, bypassing the batch loop.
    fn collapse_once(session: &mut Decimation, kept: VertexId, lost: VertexId) -> bool {
        session.update_boundary();
        let Some(remesh) = session.try_remesh((kept, lost)) else {
            return false;
        };
        let cost = session.try_collapse(lost, &remesh);
        session.collapses.insert((kept, lost), Collapse { remesh, cost });
        session.remeshing.clear();
        session.recosting.clear();
        session.check_valid((kept, lost)) && session.execute((kept, lost)).is_ok()
    }

    fn vertex_at(mesh: &TriMesh, x: f64, y: f64, z: f64) -> VertexId {
        mesh.find_vertex(&Point3::new(x, y, z)).unwrap()
    }

    fn sphere_mesh() -> TriMesh {
        let centre = Point3::new(5.0, 5.0, 5.0);
        let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
        extract_function(|p| (p - centre).norm() - 4.0, &bounds, 1.0).unwrap()
    }

    #[test]
    fn test_new_schedules_every_direction() {
        let mesh = create_octahedron();
        let edges = mesh.num_edges();
        let session = Decimation::new(mesh, DecimationOptions::default());
        assert_eq!(session.remeshing_len(), 2 * edges);
        assert_eq!(session.recosting_len(), 0);
        assert_eq!(session.error_summary().count, 8);
        assert_eq!(session.error_summary().max, 0.0);
    }

    #[test]
    fn test_collapse_interior_grid_vertex() {
        let mut session = Decimation::new(create_grid_mesh(4), flat_options());
        let (triangles, vertices) = (session.mesh().num_triangles(), session.mesh().num_vertices());
        let kept = vertex_at(session.mesh(), 3.0, 2.0, 0.0);
        let lost = vertex_at(session.mesh(), 2.0, 2.0, 0.0);

        assert!(collapse_once(&mut session, kept, lost));
        let mesh = session.mesh();
        assert_eq!(mesh.num_triangles(), triangles - 2);
        assert_eq!(mesh.num_vertices(), vertices - 1);
        assert!(mesh.verify_edge_counts());
        assert!(mesh.is_one_sided());
        assert!(mesh.find_vertex(&Point3::new(2.0, 2.0, 0.0)).is_none());

        // The lost vertex is tracked by exactly one new triangle.
        let tracked: usize = mesh
            .triangles()
            .filter_map(|(t, _)| session.triangle_points(t))
            .map(|p| p.points.len())
            .sum();
        assert_eq!(tracked, 1);
        assert!(session.remeshing_len() > 0);
    }

    #[test]
    fn test_collapse_octahedron_vertex() {
        let options = DecimationOptions::default()
            .with_max_error_squared(2.0)
            .with_min_dihedral_cosine(-1.0);
        let mut session = Decimation::new(create_octahedron(), options);
        let kept = vertex_at(session.mesh(), 1.0, 0.0, 0.0);
        let lost = vertex_at(session.mesh(), 0.0, 0.0, 1.0);

        assert!(collapse_once(&mut session, kept, lost));
        let mesh = session.mesh();
        assert_eq!(mesh.num_triangles(), 6);
        assert_eq!(mesh.num_vertices(), 5);
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert!((session.error_summary().max - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_octahedron_fold_rejected_by_default() {
        let options = DecimationOptions::default().with_max_error_squared(2.0);
        let mut session = Decimation::new(create_octahedron(), options);
        let kept = vertex_at(session.mesh(), 1.0, 0.0, 0.0);
        let lost = vertex_at(session.mesh(), 0.0, 0.0, 1.0);
        assert!(!collapse_once(&mut session, kept, lost));
        assert_eq!(session.mesh().num_triangles(), 8);
    }

    #[test]
    fn test_invalid_remesh_leaves_mesh_intact() {
        let mut session = Decimation::new(create_octahedron(), DecimationOptions::default());
        let kept = vertex_at(session.mesh(), 1.0, 0.0, 0.0);
        let lost = vertex_at(session.mesh(), 0.0, 0.0, 1.0);
        let py = vertex_at(session.mesh(), 0.0, 1.0, 0.0);
        let nx = vertex_at(session.mesh(), -1.0, 0.0, 0.0);
        let ny = vertex_at(session.mesh(), 0.0, -1.0, 0.0);

        let bad = [
            // Overfills the edge shared with the lower half.
            vec![[kept, py, nx]; 3],
            vec![[kept, py, lost], [kept, nx, ny]],
        ];
        for triangles in bad {
            let remesh = Remesh {
                fan: vec![kept, py, nx, ny],
                points: vec![OriginalPoints::default(); triangles.len()],
                triangles,
                old_error: 0.0,
                new_error: 0.0,
                old_shape: 0.0,
                new_shape: 0.0,
            };
            session
                .collapses
                .insert((kept, lost), Collapse { remesh, cost: 0.0 });
            assert!(session.execute((kept, lost)).is_err());

            let mesh = session.mesh();
            assert_eq!(mesh.num_triangles(), 8);
            assert!(mesh.is_closed());
            assert!(mesh.is_one_sided());
            assert_eq!(session.points.len(), 8);
        }
    }

    #[test]
    fn test_error_bound_rejects() {
        let options = DecimationOptions::default()
            .with_max_error_squared(0.5)
            .with_min_dihedral_cosine(-1.0);
        let mut session = Decimation::new(create_octahedron(), options);
        let kept = vertex_at(session.mesh(), 1.0, 0.0, 0.0);
        let lost = vertex_at(session.mesh(), 0.0, 0.0, 1.0);
        assert!(!collapse_once(&mut session, kept, lost));
    }

    #[test]
    fn test_boundary_vertices_are_protected() {
        let mut session = Decimation::new(create_grid_mesh(4), flat_options().with_extend_boundary(true));
        let kept = vertex_at(session.mesh(), 2.0, 2.0, 0.0);
        let lost = vertex_at(session.mesh(), 1.0, 1.0, 0.0);
        assert!(!collapse_once(&mut session, kept, lost));

        let kept = vertex_at(session.mesh(), 0.0, 0.0, 0.0);
        let lost = vertex_at(session.mesh(), 1.0, 0.0, 0.0);
        assert!(!collapse_once(&mut session, kept, lost));

        // (2, 2) is not next to the boundary of a 4x4 grid.
        let kept = vertex_at(session.mesh(), 3.0, 2.0, 0.0);
        let lost = vertex_at(session.mesh(), 2.0, 2.0, 0.0);
        assert!(collapse_once(&mut session, kept, lost));
    }

    #[test]
    fn test_default_options_are_a_no_op() {
        let mesh = create_grid_mesh(4);
        let triangles = mesh.num_triangles();
        let mut session = Decimation::new(mesh, DecimationOptions::default());
        session.decimate(&Progress::none(), &CancellationToken::new()).unwrap();
        assert_eq!(session.mesh().num_triangles(), triangles);
        assert_eq!(session.remeshing_len(), 0);
        assert_eq!(session.recosting_len(), 0);
    }

    #[test]
    fn test_flat_grid_keeps_area_and_boundary() {
        let mesh = create_grid_mesh(6);
        let boundary: Vec<Point3<f64>> = mesh
            .vertex_ids()
            .filter(|&v| !mesh.is_interior(v))
            .map(|v| mesh.position(v))
            .collect();
        let mut session = Decimation::new(mesh, flat_options().with_max_concurrent_chunks(2).with_edges_per_chunk(8));
        session.decimate(&Progress::none(), &CancellationToken::new()).unwrap();

        let mesh = session.mesh();
        assert!(mesh.num_triangles() < 72);
        assert!(mesh.verify_edge_counts());
        assert!(mesh.is_one_sided());
        assert!((mesh.surface_area() - 36.0).abs() < 1e-9);
        for p in boundary {
            assert!(mesh.find_vertex(&p).is_some());
        }
        assert!(session.error_summary().max < 1e-6);
    }

    #[test]
    fn test_sphere_decimation_respects_error_bound() {
        let original = sphere_mesh();
        let options = DecimationOptions::default()
            .with_max_error_squared(0.01)
            .with_max_concurrent_chunks(4);
        let mut session = Decimation::new(original.clone(), options);

        let steps = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = steps.clone();
        let progress = Progress::new(move |event| {
            if matches!(event, ProgressEvent::DecimationStep { .. }) {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });
        session.decimate(&progress, &CancellationToken::new()).unwrap();
        assert!(steps.load(std::sync::atomic::Ordering::SeqCst) > 0);

        let mesh = session.mesh();
        assert!(mesh.num_triangles() < original.num_triangles());
        assert!(mesh.is_closed());
        assert!(mesh.is_one_sided());
        assert_eq!(mesh.euler_characteristic(), 2);

        let analytic = 4.0 * std::f64::consts::PI * 16.0;
        assert!(((mesh.surface_area() - analytic) / analytic).abs() < 0.1);

        let soup = mesh.triangle_soup();
        for v in original.vertex_ids() {
            let p = original.position(v);
            let d = soup
                .iter()
                .map(|tri| triangle::distance_squared(&p, tri))
                .fold(f64::INFINITY, f64::min);
            assert!(d < 0.01 + 1e-9, "vertex {:?} is {} away", p, d);
        }
    }

    #[test]
    fn test_cancel_before_start() {
        let mut session = Decimation::new(create_grid_mesh(4), flat_options());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = session.decimate(&Progress::none(), &cancel);
        assert_eq!(result, Err(AngioError::Cancelled));
        assert_eq!(session.mesh().num_triangles(), 32);
        assert!(session.mesh().verify_edge_counts());
    }

    #[test]
    fn test_cancel_mid_run_leaves_valid_mesh() {
        let mut session = Decimation::new(sphere_mesh(), DecimationOptions::default().with_max_error_squared(0.01));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let progress = Progress::new(move |event| {
            if matches!(event, ProgressEvent::DecimationStep { .. }) {
                trigger.cancel();
            }
        });
        let result = session.decimate(&progress, &cancel);
        assert!(result.is_err_and(|e| e.is_cancelled()));
        assert!(session.mesh().is_closed());
        assert!(session.mesh().is_one_sided());
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let mut session = Decimation::new(create_octahedron(), DecimationOptions::default());
        let before = (
            session.mesh().num_triangles(),
            session.mesh().num_vertices(),
            session.collapse_count(),
            session.remeshing_len(),
            session.recosting_len(),
        );
        session.merge(Decimation::empty(DecimationOptions::default())).unwrap();
        let after = (
            session.mesh().num_triangles(),
            session.mesh().num_vertices(),
            session.collapse_count(),
            session.remeshing_len(),
            session.recosting_len(),
        );
        assert_eq!(before, after);
    }

    fn grid_strip(x0: usize, x1: usize, n: usize) -> TriMesh {
        let p = |i: usize, j: usize| Point3::new(i as f64, j as f64, 0.0);
        let mut mesh = TriMesh::new();
        for j in 0..n {
            for i in x0..x1 {
                mesh.add_triangle(p(i, j), p(i + 1, j), p(i + 1, j + 1)).unwrap();
                mesh.add_triangle(p(i, j), p(i + 1, j + 1), p(i, j + 1)).unwrap();
            }
        }
        mesh
    }

    #[test]
    fn test_merge_requeues_seam() {
        let options = flat_options();
        let mut aggregate = Decimation::empty(options.clone());
        for (x0, x1) in [(0, 4), (4, 8)] {
            let mut part = Decimation::new(grid_strip(x0, x1, 8), options.clone());
            part.decimate(&Progress::none(), &CancellationToken::new()).unwrap();
            assert_eq!(part.remeshing_len(), 0);
            aggregate.merge(part).unwrap();
        }
        assert!(aggregate.remeshing_len() > 0);
        assert!(aggregate.mesh().verify_edge_counts());

        let before = aggregate.mesh().num_triangles();
        aggregate.decimate(&Progress::none(), &CancellationToken::new()).unwrap();
        let mesh = aggregate.mesh();
        assert!(mesh.num_triangles() < before);
        assert!((mesh.surface_area() - 64.0).abs() < 1e-9);
        let seam = (1..8)
            .filter(|&j| mesh.find_vertex(&Point3::new(4.0, j as f64, 0.0)).is_some())
            .count();
        assert!(seam < 7);
    }

    #[test]
    fn test_merge_overlap_policy() {
        let mut aggregate = Decimation::new(create_octahedron(), DecimationOptions::default());
        let other = Decimation::new(create_octahedron(), DecimationOptions::default());
        // Re-adding the same triangles would give edges a third triangle.
        assert!(aggregate.clone().merge(other.clone()).is_err());

        aggregate.set_options(DecimationOptions::default().with_non_manifold(NonManifoldPolicy::Skip));
        aggregate.merge(other).unwrap();
        assert_eq!(aggregate.mesh().num_triangles(), 8);
    }
}
