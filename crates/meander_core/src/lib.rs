//! Traces branches of steady states of large discretized models through
//! parameter space with pseudo-arclength continuation.
//!
//! Key components:
//! - **Interface**: [`ModelInterface`] connects the engine to a model's
//!   residual, Jacobian, linear solvers and eigenvalue computations.
//! - **Newton**: plain Newton iteration at a fixed parameter value.
//! - **Continuation**: the predictor-corrector driver with adaptive step
//!   size, exact landing on the target parameter value, bifurcation
//!   detection and branch switching.

pub mod config;
pub mod continuation;
pub mod error;
pub mod interface;
pub mod newton;

pub use config::{BranchSwitchingMethod, ContinuationConfig, ResidualCheck};
pub use continuation::{Continuation, ContinuationResult, RunOutcome};
pub use error::ContinuationError;
pub use interface::{EigenSnapshot, ModelInterface, ParameterContext};
