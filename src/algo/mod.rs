//! Surface generation algorithms.
//!
//! - **Extraction**: marching tetrahedra over a body-centred-cubic lattice
//! - **Sampling**: signed distance to vessel segments, optionally carved out of a boundary
//! - **Decimation**: error-bounded edge collapse with dihedral and shape costs
//! - **Triangulation**: chunked, concurrent sampling, extraction and decimation
//! - **Decomposition**: cutting a finished surface into pieces
//!
//! Long-running operations take a [`Progress`] sink and a
//! [`CancellationToken`].

pub mod cancel;
pub mod decimate;
pub mod decompose;
pub mod extract;
pub mod progress;
pub mod sample;
pub mod triangulate;

pub use cancel::CancellationToken;
pub use progress::{ErrorSummary, Progress, ProgressEvent};
