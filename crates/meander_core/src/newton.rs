//! Plain Newton iteration at a fixed parameter value.

use anyhow::Result;
use log::debug;
use nalgebra::DVector;

use crate::config::{ContinuationConfig, ResidualCheck};
use crate::interface::ModelInterface;

/// Outcome of a Newton solve. Non-convergence within the iteration budget is
/// not an error; callers inspect the residual themselves when they care.
#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub x: DVector<f64>,
    pub iterations: usize,
}

/// Newton's method for F(x) = 0 at whatever parameter value the model
/// currently holds. Runs until the configured norm drops below
/// `newton_tolerance` or the iteration budget runs out.
pub fn newton<I: ModelInterface>(
    interface: &mut I,
    config: &ContinuationConfig,
    x0: DVector<f64>,
) -> Result<NewtonResult> {
    let mut x = x0;
    let mut iterations = 0;

    for k in 0..config.maximum_newton_iterations {
        iterations = k;

        let fval = interface.rhs(&x)?;

        let fnorm = if config.residual_check == ResidualCheck::Residual || config.verbose {
            fval.norm()
        } else {
            0.0
        };
        if config.residual_check == ResidualCheck::Residual && fnorm < config.newton_tolerance {
            debug!("Newton converged in {k} iterations with ||F|| = {fnorm:e}");
            break;
        }

        let jac = interface.jacobian(&x)?;
        let dx = interface.solve(&jac, &(-&fval))?;

        x += &dx;

        let dxnorm = if config.residual_check == ResidualCheck::Update || config.verbose {
            dx.norm()
        } else {
            0.0
        };
        if config.verbose {
            debug!("Newton status: ||F|| = {fnorm:e}, ||dx|| = {dxnorm:e}");
        }
        if config.residual_check == ResidualCheck::Update && dxnorm < config.newton_tolerance {
            debug!("Newton converged in {k} iterations with ||dx|| = {dxnorm:e}");
            break;
        }
    }

    Ok(NewtonResult { x, iterations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::AlgebraicModel;
    use nalgebra::dvector;

    fn quadratic() -> AlgebraicModel {
        AlgebraicModel::new(&[], |x, _| dvector![x[0] * x[0] - 2.0])
    }

    #[test]
    fn converges_on_a_scalar_quadratic() {
        let mut model = quadratic();
        let config = ContinuationConfig::default();
        let result = newton(&mut model, &config, dvector![1.0]).unwrap();

        assert!((result.x[0] - 2.0_f64.sqrt()).abs() < 1e-8);
        assert!(result.iterations <= 5);
    }

    #[test]
    fn update_norm_check_also_converges() {
        let mut model = quadratic();
        let config = ContinuationConfig {
            residual_check: ResidualCheck::Update,
            newton_tolerance: 1e-12,
            ..ContinuationConfig::default()
        };
        let result = newton(&mut model, &config, dvector![1.0]).unwrap();

        assert!((result.x[0] - 2.0_f64.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn exhausts_the_budget_without_a_root() {
        // x^2 + 1 has no real root; the iteration wanders forever.
        let mut model = AlgebraicModel::new(&[], |x, _| dvector![x[0] * x[0] + 1.0]);
        let config = ContinuationConfig {
            maximum_newton_iterations: 8,
            ..ContinuationConfig::default()
        };
        let result = newton(&mut model, &config, dvector![0.7]).unwrap();

        assert_eq!(result.iterations, 7);
        assert!(result.x[0].is_finite());
    }
}
