//! Progress reporting for long-running algorithms.
//!
//! Triangulation and decimation report discrete, typed milestones to an
//! optional sink. Reporting is purely observational: a sink cannot influence
//! the computation and events are delivered synchronously from whichever
//! worker thread produced them.
//!
//! # Example
//!
//! ```
//! use angiomesh::algo::progress::{Progress, ProgressEvent};
//!
//! let progress = Progress::new(|event| {
//!     if let ProgressEvent::MeshCreated { triangles, .. } = event {
//!         println!("extracted {} triangles", triangles);
//!     }
//! });
//! progress.report(ProgressEvent::MeshChunks { total: 8 });
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Summary of per-triangle reprojection errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorSummary {
    /// Number of triangles summarized.
    pub count: usize,
    /// Largest squared error.
    pub max: f64,
    /// Mean squared error.
    pub mean: f64,
}

impl ErrorSummary {
    /// Summarize a set of squared errors.
    pub fn from_errors<I: IntoIterator<Item = f64>>(errors: I) -> Self {
        let (count, max, sum) = errors
            .into_iter()
            .fold((0usize, 0.0f64, 0.0f64), |(n, max, sum), e| (n + 1, max.max(e), sum + e));
        Self {
            count,
            max,
            mean: if count > 0 { sum / count as f64 } else { 0.0 },
        }
    }
}

/// A milestone reached by triangulation or decimation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The chunk decomposition has been computed.
    MeshChunks {
        /// Number of chunks that will be processed.
        total: usize,
    },
    /// Features near a chunk have been gathered.
    ChunkPrepared {
        /// Chunk id.
        id: usize,
        /// Time spent gathering.
        elapsed: Duration,
        /// Number of lattice points to sample.
        samples: usize,
        /// Number of lattice construction points in the chunk.
        lattice_points: usize,
        /// Number of segments in range.
        segments: usize,
        /// Number of boundary triangles in range.
        triangles: usize,
    },
    /// The scalar field has been sampled for a chunk.
    ChunkSampled {
        /// Chunk id.
        id: usize,
        /// Time spent sampling.
        elapsed: Duration,
    },
    /// Marching tetrahedra finished for a chunk.
    ChunkExtracted {
        /// Chunk id.
        id: usize,
        /// Time spent extracting.
        elapsed: Duration,
        /// Triangles produced.
        triangles: usize,
    },
    /// An event from a chunk's local decimation.
    ChunkDecimating {
        /// Chunk id.
        id: usize,
        /// The decimation event.
        event: Box<ProgressEvent>,
    },
    /// Local decimation finished for a chunk.
    ChunkDecimated {
        /// Chunk id.
        id: usize,
        /// Time spent decimating.
        elapsed: Duration,
        /// Triangles remaining.
        triangles: usize,
    },
    /// A chunk has been merged into the aggregate.
    ChunkMerged {
        /// Chunk id.
        id: usize,
        /// Time spent merging (including waiting for the lock).
        elapsed: Duration,
    },
    /// All chunks have been merged.
    MeshCreated {
        /// Total time since triangulation started.
        elapsed: Duration,
        /// Triangles in the merged mesh.
        triangles: usize,
    },
    /// The final decimation pass finished.
    MeshDecimated {
        /// Time spent in the final pass.
        elapsed: Duration,
        /// Triangles in the final mesh.
        triangles: usize,
    },
    /// A decimation run is starting.
    DecimationBegin {
        /// Vertices protected from being lost.
        boundary_vertices: usize,
        /// Total vertices.
        vertices: usize,
    },
    /// Candidates for one decimation iteration have been evaluated.
    DecimationStep {
        /// Triangles before applying collapses.
        triangles: usize,
        /// Edges before applying collapses.
        edges: usize,
        /// Pairs evaluated with a full remesh.
        remeshing: usize,
        /// Pairs evaluated for cost only.
        recosting: usize,
        /// Valid candidates found.
        valid: usize,
        /// Error summary, if requested.
        errors: Option<ErrorSummary>,
    },
}

/// A cloneable sink for [`ProgressEvent`]s.
#[derive(Clone, Default)]
pub struct Progress {
    callback: Option<Arc<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Create a no-op progress reporter that discards all updates.
    pub fn none() -> Self {
        Self { callback: None }
    }

    /// Whether events are delivered anywhere.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    /// Report an event.
    #[inline]
    pub fn report(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    /// A reporter that wraps every event as [`ProgressEvent::ChunkDecimating`].
    pub fn for_chunk(&self, id: usize) -> Self {
        match &self.callback {
            Some(callback) => {
                let callback = Arc::clone(callback);
                Self::new(move |event| {
                    callback(ProgressEvent::ChunkDecimating {
                        id,
                        event: Box::new(event),
                    })
                })
            }
            None => Self::none(),
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
