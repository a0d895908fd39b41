//! Predictor-corrector stepping with adaptive step size.

use anyhow::Result;
use log::{debug, info};
use nalgebra::DVector;

use super::{Continuation, CorrectorOutcome, Tangent};
use crate::error::ContinuationError;
use crate::interface::{ModelInterface, ParameterContext};

/// Below this the arclength parameterization no longer resolves motion in the
/// parameter direction.
const DEGENERATE_TANGENT_TOLERANCE: f64 = 1e-12;

/// An accepted continuation step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub x: DVector<f64>,
    pub mu: f64,
    /// Secant tangent through the old and new point, scaled by 1 / ds.
    pub tangent: Tangent,
    /// Step size the corrector actually converged with.
    pub ds: f64,
    /// Corrector iterations, input to the step size control.
    pub newton_iterations: usize,
}

impl<'a, I: ModelInterface> Continuation<'a, I> {
    /// One Euler predictor plus corrector step from `(x, mu)` along
    /// `tangent`. On corrector divergence the step size shrinks and the step
    /// is retried from the same point; once the step size can no longer
    /// shrink this fails with [`ContinuationError::StepSizeExhausted`].
    pub(super) fn step(
        &mut self,
        ctx: ParameterContext<'_>,
        x: &DVector<f64>,
        tangent: &Tangent,
        mut ds: f64,
    ) -> Result<StepResult> {
        let mu0 = ctx.value();

        loop {
            // Predictor
            let mu_p = mu0 + ds * tangent.dmu;
            let x_p = x + &tangent.dx * ds;

            match self.newton_corrector(ctx, ds, x_p, x, mu_p)? {
                CorrectorOutcome::Converged {
                    x: x_new,
                    mu,
                    iterations,
                } => {
                    info!("{}: {}", ctx.name(), mu);

                    if let Some(hook) = self.postprocess.as_mut() {
                        hook(&mut *self.interface, &x_new, mu)?;
                    }

                    let dmu = mu - mu0;
                    let dx = &x_new - x;

                    if dmu.abs() < DEGENERATE_TANGENT_TOLERANCE {
                        return Err(ContinuationError::DegenerateTangent { dmu }.into());
                    }

                    // Secant tangent for the next prediction
                    let tangent = Tangent {
                        dx: dx / ds,
                        dmu: dmu / ds,
                    };

                    return Ok(StepResult {
                        x: x_new,
                        mu,
                        tangent,
                        ds,
                        newton_iterations: iterations,
                    });
                }
                CorrectorOutcome::Diverged => {
                    let prev_ds = ds;
                    ds = self.adjust_step_size(ds, self.config.maximum_newton_iterations);
                    if prev_ds == ds {
                        return Err(ContinuationError::StepSizeExhausted { ds }.into());
                    }
                }
            }
        }
    }

    /// Step size control, see Seydel p. 188. Grows the step when the
    /// corrector converged faster than the configured optimum, shrinks it
    /// when it was slower, within a factor of two either way and within the
    /// configured magnitude bounds. The sign of `ds` is preserved.
    pub(super) fn adjust_step_size(&self, ds: f64, newton_iterations: usize) -> f64 {
        let factor =
            self.config.optimal_newton_iterations as f64 / newton_iterations.max(1) as f64;
        let factor = factor.clamp(0.5, 2.0);

        let ds = ds * factor;
        let ds = ds
            .abs()
            .clamp(self.config.minimum_step_size, self.config.maximum_step_size)
            .copysign(ds);

        if self.config.verbose {
            debug!("New step size: ds = {ds:e}, factor = {factor:e}");
        }

        ds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContinuationConfig;
    use crate::interface::testing::AlgebraicModel;
    use nalgebra::{dvector, DMatrix};

    fn engine(model: &mut AlgebraicModel, config: ContinuationConfig) -> Continuation<'_, AlgebraicModel> {
        Continuation::new(model, config).unwrap()
    }

    #[test]
    fn step_size_control_respects_bounds_and_sign() {
        let mut model = AlgebraicModel::new(&[], |x, _| x.clone());
        let config = ContinuationConfig {
            minimum_step_size: 0.01,
            maximum_step_size: 1.0,
            optimal_newton_iterations: 3,
            ..ContinuationConfig::default()
        };
        let continuation = engine(&mut model, config);

        // Fast convergence doubles the step, slow convergence halves it.
        assert_eq!(continuation.adjust_step_size(0.1, 1), 0.2);
        assert_eq!(continuation.adjust_step_size(0.1, 10), 0.05);
        // Zero iterations counts as one.
        assert_eq!(continuation.adjust_step_size(0.1, 0), 0.2);
        // Sign is preserved, magnitude is clamped.
        assert_eq!(continuation.adjust_step_size(-0.1, 1), -0.2);
        assert_eq!(continuation.adjust_step_size(0.011, 10), 0.01);
        assert_eq!(continuation.adjust_step_size(0.9, 1), 1.0);
    }

    /// Residual grows on every evaluation, so every corrector attempt
    /// diverges no matter how small the step gets.
    struct DivergingModel {
        gamma: f64,
        rhs_calls: usize,
    }

    impl ModelInterface for DivergingModel {
        type Jacobian = DMatrix<f64>;

        fn rhs(&mut self, _x: &DVector<f64>) -> Result<DVector<f64>> {
            self.rhs_calls += 1;
            Ok(dvector![self.rhs_calls as f64])
        }

        fn jacobian(&mut self, _x: &DVector<f64>) -> Result<DMatrix<f64>> {
            Ok(DMatrix::identity(1, 1))
        }

        fn solve(&mut self, _jacobian: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
            Ok(rhs.clone())
        }

        fn set_parameter(&mut self, _name: &str, value: f64) -> Result<()> {
            self.gamma = value;
            Ok(())
        }

        fn get_parameter(&self, _name: &str) -> Result<f64> {
            Ok(self.gamma)
        }
    }

    #[test]
    fn fails_once_the_step_size_floor_is_reached() {
        let mut model = DivergingModel {
            gamma: 0.0,
            rhs_calls: 0,
        };
        let config = ContinuationConfig {
            minimum_step_size: 0.01,
            ..ContinuationConfig::default()
        };
        let mut continuation = Continuation::new(&mut model, config).unwrap();

        let ctx = ParameterContext::new("gamma", 0.0);
        let tangent = Tangent {
            dx: dvector![0.0],
            dmu: 1.0,
        };
        let err = continuation
            .step(ctx, &dvector![0.0], &tangent, 0.01)
            .unwrap_err();

        match err.downcast_ref::<ContinuationError>() {
            Some(ContinuationError::StepSizeExhausted { ds }) => assert_eq!(*ds, 0.01),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_a_step_that_does_not_move_the_parameter() {
        // Zero residual everywhere, so the corrector accepts the predictor
        // unchanged; a tangent without a parameter component then produces a
        // degenerate step.
        let mut model = AlgebraicModel::new(&[("gamma", 0.0)], |_, _| dvector![0.0, 0.0]);
        let mut continuation = engine(&mut model, ContinuationConfig::default());

        let ctx = ParameterContext::new("gamma", 0.0);
        let tangent = Tangent {
            dx: dvector![1.0, 0.0],
            dmu: 0.0,
        };
        let err = continuation
            .step(ctx, &dvector![0.0, 0.0], &tangent, 0.1)
            .unwrap_err();

        match err.downcast_ref::<ContinuationError>() {
            Some(ContinuationError::DegenerateTangent { dmu }) => assert_eq!(*dmu, 0.0),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
