//! Uniform hash grid over bounded items.

use std::collections::HashMap;

use nalgebra::Point3;

use super::{triangle, Aabb};
use crate::error::{AngioError, Result};

/// Items that occupy an axis-aligned region.
pub trait Bounded {
    /// Bounds of the item.
    fn bounds(&self) -> Aabb;
}

impl Bounded for [Point3<f64>; 3] {
    fn bounds(&self) -> Aabb {
        triangle::bounds(self)
    }
}

/// A spatial hash of items binned by the grid cells their bounds overlap.
///
/// Queries visit each intersecting item exactly once.
#[derive(Debug, Clone)]
pub struct BoundsHashTable<T> {
    items: Vec<T>,
    bounds: Vec<Aabb>,
    cell_size: f64,
    cells: HashMap<[i64; 3], Vec<usize>>,
}

impl<T: Bounded> BoundsHashTable<T> {
    /// Bin `items` into cubic cells of side `cell_size`.
    pub fn new(items: Vec<T>, cell_size: f64) -> Result<Self> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(AngioError::invalid_param(
                "cell_size",
                cell_size,
                "must be positive and finite",
            ));
        }
        let bounds: Vec<Aabb> = items.iter().map(Bounded::bounds).collect();
        let mut cells: HashMap<[i64; 3], Vec<usize>> = HashMap::new();
        for (i, b) in bounds.iter().enumerate() {
            let (lo, hi) = (cell_of(&b.lower, cell_size), cell_of(&b.upper, cell_size));
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        cells.entry([x, y, z]).or_default().push(i);
                    }
                }
            }
        }
        Ok(Self {
            items,
            bounds,
            cell_size,
            cells,
        })
    }
}

impl<T> BoundsHashTable<T> {
    /// Visit every item whose bounds intersect `query`.
    pub fn query<F: FnMut(&T)>(&self, query: &Aabb, mut f: F) {
        let (lo, hi) = (cell_of(&query.lower, self.cell_size), cell_of(&query.upper, self.cell_size));
        let span = (0..3).fold(1i128, |acc, i| acc * (hi[i] - lo[i] + 1) as i128);

        let mut hits: Vec<usize> = Vec::new();
        if span > self.cells.len() as i128 {
            for (cell, items) in &self.cells {
                if (0..3).all(|i| lo[i] <= cell[i] && cell[i] <= hi[i]) {
                    hits.extend_from_slice(items);
                }
            }
        } else {
            for x in lo[0]..=hi[0] {
                for y in lo[1]..=hi[1] {
                    for z in lo[2]..=hi[2] {
                        if let Some(items) = self.cells.get(&[x, y, z]) {
                            hits.extend_from_slice(items);
                        }
                    }
                }
            }
        }
        hits.sort_unstable();
        hits.dedup();
        for i in hits {
            if self.bounds[i].intersects(query) {
                f(&self.items[i]);
            }
        }
    }

    /// All stored items.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no items are stored.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn cell_of(p: &Point3<f64>, cell_size: f64) -> [i64; 3] {
    [
        (p.x / cell_size).floor() as i64,
        (p.y / cell_size).floor() as i64,
        (p.z / cell_size).floor() as i64,
    ]
}
