//! Splitting a surface into smaller meshes.
//!
//! Every triangle of the input lands in exactly one piece, so the pieces
//! together hold the whole surface. Pieces are open along the cuts and are
//! meant for export or per-piece processing, not for re-stitching.

use std::collections::VecDeque;

use nalgebra::Point3;

use crate::error::Result;
use crate::mesh::TriMesh;

/// Cut `mesh` by `splits[a]` evenly spaced planes along each axis `a`.
///
/// Returns `(splits[0] + 1) * (splits[1] + 1) * (splits[2] + 1)` pieces, x
/// outermost and z innermost, some possibly empty. A triangle belongs to the
/// cell past every plane its corners all lie strictly above.
pub fn axial_planes(mesh: &TriMesh, splits: [usize; 3]) -> Result<Vec<TriMesh>> {
    let count: usize = splits.iter().map(|n| n + 1).product();
    let mut pieces: Vec<TriMesh> = (0..count).map(|_| TriMesh::new()).collect();
    let Some(bounds) = mesh.bounding_box() else {
        return Ok(pieces);
    };

    let planes: [Vec<f64>; 3] = std::array::from_fn(|axis| {
        let n = splits[axis];
        let step = bounds.range()[axis] / (n + 1) as f64;
        (1..=n).map(|m| bounds.lower[axis] + m as f64 * step).collect()
    });
    let cell = |corners: &[Point3<f64>; 3], axis: usize| {
        let lowest = corners.iter().map(|p| p[axis]).fold(f64::INFINITY, f64::min);
        planes[axis].iter().filter(|&&plane| lowest > plane).count()
    };

    for corners in mesh.triangle_soup() {
        let [i, j, k] = [0, 1, 2].map(|axis| cell(&corners, axis));
        let index = (i * (splits[1] + 1) + j) * (splits[2] + 1) + k;
        let [a, b, c] = corners;
        pieces[index].add_triangle(a, b, c)?;
    }
    log::debug!(
        "split {} triangles into {} axial pieces",
        mesh.num_triangles(),
        count
    );
    Ok(pieces)
}

/// Split `mesh` into octants about the centre of its bounds.
///
/// Pieces are indexed `4i + 2j + k`, where each of `i, j, k` is 1 on the
/// upper side of that axis. A triangle straddling a midplane goes to the side
/// holding more of its extent.
pub fn octree(mesh: &TriMesh) -> Result<[TriMesh; 8]> {
    let mut pieces: [TriMesh; 8] = std::array::from_fn(|_| TriMesh::new());
    let Some(bounds) = mesh.bounding_box() else {
        return Ok(pieces);
    };
    let centre = nalgebra::center(&bounds.lower, &bounds.upper);

    for corners in mesh.triangle_soup() {
        let side = |axis: usize| {
            let lo = corners.iter().map(|p| p[axis]).fold(f64::INFINITY, f64::min);
            let hi = corners.iter().map(|p| p[axis]).fold(f64::NEG_INFINITY, f64::max);
            let s = centre[axis];
            if hi <= s {
                0
            } else if lo >= s {
                1
            } else {
                usize::from(s - lo < hi - s)
            }
        };
        let index = 4 * side(0) + 2 * side(1) + side(2);
        let [a, b, c] = corners;
        pieces[index].add_triangle(a, b, c)?;
    }
    Ok(pieces)
}

/// Repeatedly split `mesh` into octants until every piece has at most
/// `max_triangles` triangles.
///
/// A piece that will not split further, because all of its triangles fall
/// into one octant, is returned as it is. Empty octants are dropped.
pub fn octree_recursive(mesh: TriMesh, max_triangles: usize) -> Result<Vec<TriMesh>> {
    let mut done = Vec::new();
    let mut queue = VecDeque::from([mesh]);
    while let Some(piece) = queue.pop_front() {
        if piece.num_triangles() <= max_triangles {
            done.push(piece);
            continue;
        }
        let mut octants: Vec<TriMesh> = octree(&piece)?
            .into_iter()
            .filter(|m| !m.is_empty())
            .collect();
        if octants.len() == 1 {
            done.append(&mut octants);
        } else {
            queue.extend(octants);
        }
    }
    log::debug!("octree split into {} pieces", done.len());
    Ok(done)
}
