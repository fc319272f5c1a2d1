//! Error types for angiomesh.
//!
//! This module defines all error types used throughout the library.
//! Geometric rejections during decimation (degenerate remeshes, tolerance
//! violations) are not errors; they only filter the candidate pool.

use thiserror::Error;

/// Result type alias using [`AngioError`].
pub type Result<T> = std::result::Result<T, AngioError>;

/// Errors that can occur during mesh extraction, decimation and tree
/// gradient evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AngioError {
    /// The mesh has no triangles.
    #[error("mesh has no triangles")]
    EmptyMesh,

    /// A triangle references an invalid vertex index.
    #[error("triangle {face} references invalid vertex index {vertex}")]
    InvalidVertexIndex {
        /// The triangle index.
        face: usize,
        /// The invalid vertex index.
        vertex: usize,
    },

    /// A triangle has coincident corners.
    #[error("degenerate triangle: {details}")]
    DegenerateTriangle {
        /// Description of the degenerate triangle.
        details: String,
    },

    /// An edge would gain more than two incident triangles.
    #[error("edge ({v0}, {v1}) has more than two incident triangles")]
    NonManifoldEdge {
        /// First vertex of the edge.
        v0: usize,
        /// Second vertex of the edge.
        v1: usize,
    },

    /// The mesh has non-manifold topology.
    #[error("mesh has non-manifold topology: {details}")]
    NonManifold {
        /// Description of the non-manifold condition.
        details: String,
    },

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The invalid value (as string).
        value: String,
        /// Reason the value is invalid.
        reason: &'static str,
    },

    /// The tree root is neither a fixed-radius nor a fixed-pressure source.
    #[error("node {node} is not a recognized source")]
    UnrecognizedSource {
        /// Index of the offending root node.
        node: usize,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl AngioError {
    /// Create an invalid parameter error.
    pub fn invalid_param<T: std::fmt::Display>(
        name: &'static str,
        value: T,
        reason: &'static str,
    ) -> Self {
        AngioError::InvalidParameter {
            name,
            value: value.to_string(),
            reason,
        }
    }

    /// Whether this is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AngioError::Cancelled)
    }
}
