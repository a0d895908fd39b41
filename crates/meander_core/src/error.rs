//! Fatal error taxonomy of the continuation engine.
//!
//! Recoverable corrector non-convergence is not an error: the stepper shrinks
//! the step size and retries, and only fails once the step-size floor is hit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContinuationError {
    /// The corrector kept diverging and the step size cannot shrink further.
    #[error("Newton cannot achieve convergence: step size {ds:e} is already at the minimum")]
    StepSizeExhausted { ds: f64 },

    /// An accepted step moved the parameter by less than the arclength
    /// parameterization can resolve, so the tangent is nearly parallel to
    /// the state space.
    #[error("arclength parameterization broke down: |dmu| = {dmu:e} after an accepted step")]
    DegenerateTangent { dmu: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
