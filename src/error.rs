//! Error types for the cityrays crate.
//!
//! This module provides a unified error type for scene construction and
//! path computation.

use thiserror::Error;

/// Error type for cityrays operations.
#[derive(Debug, Error)]
pub enum CityraysError {
    /// A polygon, wall or source geometry is malformed and was skipped.
    #[error("invalid geometry: {message}")]
    InvalidGeometry {
        /// Description of the defect (degenerate ring, unsupported type, ...).
        message: String,
    },

    /// A receiver or source lies outside the scene envelope.
    #[error("position ({x:.3}, {y:.3}) outside scene envelope")]
    OutOfRange {
        /// X ordinate of the offending position.
        x: f64,
        /// Y ordinate of the offending position.
        y: f64,
    },

    /// The side-hull construction exceeded the perimeter bound and was
    /// abandoned.
    #[error("side hull did not converge: perimeter ratio {ratio:.2} > {limit:.2}")]
    NonConvergence {
        /// Observed hull-perimeter / direct-distance ratio.
        ratio: f64,
        /// Configured abort threshold.
        limit: f64,
    },

    /// Cooperative cancellation was observed; partial results may have
    /// been emitted.
    #[error("computation cancelled")]
    Cancelled,

    /// The path sink reported a failure; the run is aborted.
    #[error("sink error: {message}")]
    Sink {
        /// Error message propagated from the sink.
        message: String,
    },
}

/// Result type alias for cityrays operations.
pub type Result<T> = std::result::Result<T, CityraysError>;

impl CityraysError {
    /// Returns true if this error is recovered locally (element skipped,
    /// path kind abandoned) rather than aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CityraysError::InvalidGeometry { .. }
                | CityraysError::OutOfRange { .. }
                | CityraysError::NonConvergence { .. }
        )
    }

    /// Returns true if this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CityraysError::Cancelled | CityraysError::Sink { .. })
    }
}
