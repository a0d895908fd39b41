//! Continuation engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::ContinuationError;

/// Which norm decides Newton convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualCheck {
    /// Check the residual norm ‖F(x)‖ against the tolerance.
    Residual,
    /// Check the update norm ‖dx‖ against the tolerance.
    Update,
}

/// Strategy used to switch onto a secondary branch at a bifurcation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchSwitchingMethod {
    /// Tangent-space projection using the crossing eigenvector.
    Tangent,
    /// Auxiliary continuation over an asymmetry-breaking parameter.
    Asymmetry,
}

/// Options consulted by every component of the engine. Immutable for the
/// duration of a run; validated once when the engine is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuationConfig {
    pub residual_check: ResidualCheck,
    pub verbose: bool,
    pub maximum_newton_iterations: usize,
    /// Tolerance for fixed-parameter Newton solves.
    pub newton_tolerance: f64,
    /// Tolerance for the arclength corrector, which operates on points that
    /// only need to be good enough to continue from.
    pub corrector_tolerance: f64,
    pub minimum_step_size: f64,
    pub maximum_step_size: f64,
    /// Corrector iteration count the step-size controller aims for.
    pub optimal_newton_iterations: usize,
    /// Solve the augmented (n+1)x(n+1) system in one call instead of
    /// eliminating it with two solves against the Jacobian.
    pub bordered_solver: bool,
    /// Tolerance for landing on the target parameter value and for locating
    /// eigenvalue crossings.
    pub destination_tolerance: f64,
    /// Finite-difference step for the parameter derivative of F.
    pub delta: f64,
    pub maximum_continuation_steps: usize,
    pub detect_bifurcation_points: bool,
    pub enable_branch_switching: bool,
    pub branch_switching_method: BranchSwitchingMethod,
    /// Name of the symmetry-breaking model parameter used by
    /// [`BranchSwitchingMethod::Asymmetry`].
    pub asymmetry_parameter: String,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            residual_check: ResidualCheck::Residual,
            verbose: false,
            maximum_newton_iterations: 10,
            newton_tolerance: 1e-10,
            corrector_tolerance: 1e-4,
            minimum_step_size: 0.01,
            maximum_step_size: 2000.0,
            optimal_newton_iterations: 3,
            bordered_solver: false,
            destination_tolerance: 1e-4,
            delta: 1.0,
            maximum_continuation_steps: 1000,
            detect_bifurcation_points: false,
            enable_branch_switching: false,
            branch_switching_method: BranchSwitchingMethod::Tangent,
            asymmetry_parameter: "Asymmetry Parameter".to_string(),
        }
    }
}

impl ContinuationConfig {
    pub fn validate(&self) -> Result<(), ContinuationError> {
        if self.maximum_newton_iterations == 0 {
            return Err(invalid("maximum_newton_iterations must be at least 1"));
        }
        if self.optimal_newton_iterations == 0 {
            return Err(invalid("optimal_newton_iterations must be at least 1"));
        }
        if self.maximum_continuation_steps == 0 {
            return Err(invalid("maximum_continuation_steps must be at least 1"));
        }
        if !(self.newton_tolerance > 0.0) {
            return Err(invalid("newton_tolerance must be positive"));
        }
        if !(self.corrector_tolerance > 0.0) {
            return Err(invalid("corrector_tolerance must be positive"));
        }
        if !(self.destination_tolerance > 0.0) {
            return Err(invalid("destination_tolerance must be positive"));
        }
        if !(self.minimum_step_size > 0.0) {
            return Err(invalid("minimum_step_size must be positive"));
        }
        if !(self.maximum_step_size >= self.minimum_step_size) {
            return Err(invalid(
                "maximum_step_size must be at least minimum_step_size",
            ));
        }
        if self.delta == 0.0 || !self.delta.is_finite() {
            return Err(invalid("delta must be finite and non-zero"));
        }
        if self.enable_branch_switching
            && self.branch_switching_method == BranchSwitchingMethod::Asymmetry
            && self.asymmetry_parameter.is_empty()
        {
            return Err(invalid(
                "asymmetry branch switching requires an asymmetry parameter name",
            ));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ContinuationError {
    ContinuationError::InvalidConfig(message.to_string())
}
