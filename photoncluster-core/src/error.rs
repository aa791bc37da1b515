//! Error types for photoncluster-core.

use thiserror::Error;

use crate::Point2D;

/// Result type alias for photoncluster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for photoncluster operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-finite point coordinate.
    #[error("invalid point coordinate: ({x}, {y})")]
    InvalidCoordinate { x: f64, y: f64 },

    /// Configuration rejected at construction.
    #[error("invalid configuration: {name} {message}")]
    InvalidConfig {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Not enough samples for the requested operation.
    #[error("insufficient points: {required} required, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },

    /// A distance evaluated to NaN or infinity.
    #[error("non-finite distance between {p1} and {p2}")]
    NonFiniteDistance { p1: Point2D, p2: Point2D },

    /// A classification worker failed; the run was aborted.
    #[error("worker failed on point {point}: {message}")]
    Worker { point: Point2D, message: String },

    /// A worker thread panicked; the run was aborted.
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),

    /// A cancelled run was asked for a completed result.
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for [`Error::InvalidConfig`].
    pub fn invalid_config(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            name,
            message: message.into(),
        }
    }
}
