//! Bordered Newton corrector for the arclength-constrained system.
//!
//! The corrector solves F(x, mu) = 0 together with the arclength constraint
//!
//! ```text
//! r = zeta * (x - x0).(x - x0) + (1 - zeta) * (mu - mu0)^2 - ds^2 = 0
//! ```
//!
//! either as one bordered (n+1) x (n+1) solve or, by default, by eliminating
//! the parameter update with two solves against the Jacobian.

use anyhow::Result;
use log::{debug, warn};
use nalgebra::DVector;

use super::Continuation;
use crate::config::ResidualCheck;
use crate::interface::{ModelInterface, ParameterContext};

/// What the corrector did with a predicted point.
#[derive(Debug, Clone)]
pub enum CorrectorOutcome {
    /// Converged back onto the branch at arclength distance `ds` from the
    /// base point.
    Converged {
        x: DVector<f64>,
        mu: f64,
        iterations: usize,
    },
    /// The iteration stalled or the norm grew. The caller retries with a
    /// smaller step; this is not an error.
    Diverged,
}

impl<'a, I: ModelInterface> Continuation<'a, I> {
    /// Runs the corrector from the predicted point `(x, mu)`. `base` holds
    /// the accepted point `(x0, mu0)` the arclength constraint is anchored
    /// to. On convergence the model parameter is left at the converged value.
    pub(super) fn newton_corrector(
        &mut self,
        base: ParameterContext<'_>,
        ds: f64,
        mut x: DVector<f64>,
        x0: &DVector<f64>,
        mut mu: f64,
    ) -> Result<CorrectorOutcome> {
        let residual_check = self.config.residual_check;
        let verbose = self.config.verbose;
        let maxit = self.config.maximum_newton_iterations;
        let tol = self.config.corrector_tolerance;

        let mu0 = base.value();
        let zeta = 1.0 / x.len() as f64;

        let mut iterations = 0;
        let mut prev_fnorm: Option<f64> = None;
        let mut prev_dxnorm: Option<f64> = None;

        for k in 0..maxit {
            base.at(mu).apply(&mut *self.interface)?;
            let fval = self.interface.rhs(&x)?;

            let fnorm = if residual_check == ResidualCheck::Residual || verbose {
                fval.norm()
            } else {
                0.0
            };
            if residual_check == ResidualCheck::Residual {
                if fnorm < tol {
                    debug!("Newton corrector converged in {k} iterations with ||F|| = {fnorm:e}");
                    break;
                }
                // A growing residual will not recover within the budget.
                if let Some(prev) = prev_fnorm {
                    if prev < fnorm {
                        iterations = maxit;
                        break;
                    }
                }
                prev_fnorm = Some(fnorm);
            }

            // Arclength constraint residual
            let diff = &x - x0;
            let r = zeta * diff.dot(&diff) + (1.0 - zeta) * (mu - mu0).powi(2) - ds * ds;

            let dflval = self.parameter_derivative(base.at(mu), &x, &fval)?;
            let jac = self.interface.jacobian(&x)?;

            let rhs = -fval;
            let (dx, dmu) = if self.config.bordered_solver {
                self.interface.solve_bordered(
                    &jac,
                    &rhs,
                    -r,
                    &dflval,
                    &(&diff * (2.0 * zeta)),
                    2.0 * (1.0 - zeta) * (mu - mu0),
                )?
            } else {
                // Eliminate the parameter update with two Jacobian solves.
                let z1 = self.interface.solve(&jac, &rhs)?;
                let z2 = self.interface.solve(&jac, &dflval)?;

                let dmu = (-r - 2.0 * zeta * diff.dot(&z1))
                    / (2.0 * (1.0 - zeta) * (mu - mu0) - 2.0 * zeta * diff.dot(&z2));
                let dx = &z1 - &z2 * dmu;
                (dx, dmu)
            };

            x += &dx;
            mu += dmu;

            iterations += 1;

            let dxnorm = if residual_check == ResidualCheck::Update || verbose {
                dx.norm()
            } else {
                0.0
            };
            if verbose {
                debug!("Newton corrector status: ||F|| = {fnorm:e}, ||dx|| = {dxnorm:e}");
            }
            if residual_check == ResidualCheck::Update {
                if dxnorm < tol {
                    debug!("Newton corrector converged in {k} iterations with ||dx|| = {dxnorm:e}");
                    break;
                }
                if let Some(prev) = prev_dxnorm {
                    if prev < dxnorm {
                        iterations = maxit;
                        break;
                    }
                }
                prev_dxnorm = Some(dxnorm);
            }
        }

        if iterations == maxit {
            warn!("Newton corrector did not converge, the step size will be adjusted");
            return Ok(CorrectorOutcome::Diverged);
        }

        base.at(mu).apply(&mut *self.interface)?;

        Ok(CorrectorOutcome::Converged { x, mu, iterations })
    }
}
