//! Geometric primitives used by sampling and extraction.
//!
//! - [`Aabb`]: axis-aligned bounds
//! - [`triangle`]: closest-point and ray queries against single triangles
//! - [`Segment`]: a radius-bearing vessel centerline segment
//! - [`BoundsHashTable`]: uniform grid over bounded items for range queries
//! - [`BoundarySurface`]: a closed triangulated surface with an inside test

mod aabb;
mod boundary;
mod grid;
mod segment;
pub mod triangle;

pub use aabb::Aabb;
pub use boundary::BoundarySurface;
pub use grid::{Bounded, BoundsHashTable};
pub use segment::Segment;
