//! Locating eigenvalue crossings and moving onto bifurcating branches.

use anyhow::{bail, Result};
use log::info;
use nalgebra::DVector;
use num_complex::Complex;

use super::{Continuation, Tangent};
use crate::config::BranchSwitchingMethod;
use crate::interface::{EigenSnapshot, ModelInterface, ParameterContext};

/// Below this the projected parameter component of the switched tangent
/// carries no information.
const DEGENERATE_SWITCH_TOLERANCE: f64 = 1e-12;

/// Range and step size of the auxiliary continuation that pushes the state
/// off the symmetric branch before switching via the asymmetry method.
const ASYMMETRY_TARGET: f64 = 1000.0;
const ASYMMETRY_STEP_SIZE: f64 = 10.0;

/// Starting point for the driver after moving onto a bifurcating branch.
#[derive(Debug, Clone)]
pub(super) struct BranchSwitch {
    pub x: DVector<f64>,
    pub mu: f64,
    pub tangent: Tangent,
    pub ds: f64,
}

impl<'a, I: ModelInterface> Continuation<'a, I> {
    /// Converges onto the point where an eigenvalue crosses the imaginary
    /// axis with a secant iteration on its real part. `eigs` is the spectrum
    /// at `(x, mu)` and `deig` the change of the critical eigenvalue over the
    /// step that revealed the crossing.
    pub(super) fn detect_bifurcation(
        &mut self,
        ctx: ParameterContext<'_>,
        mut x: DVector<f64>,
        tangent: &Tangent,
        mut eigs: EigenSnapshot,
        mut deig: Complex<f64>,
        mut ds: f64,
        maxit: usize,
    ) -> Result<(DVector<f64>, f64, EigenSnapshot)> {
        let mut mu = ctx.value();
        let mut tangent = tangent.clone();

        for _ in 0..maxit {
            let i = match eigs.nearest_to_imaginary_axis() {
                Some(i) => i,
                None => bail!("empty spectrum while converging onto a bifurcation"),
            };
            if eigs.values[i].re.abs() < self.config.destination_tolerance {
                info!(
                    "Bifurcation found at {} = {} with eigenvalue {:e} + {:e}i",
                    ctx.name(),
                    mu,
                    eigs.values[i].re,
                    eigs.values[i].im
                );
                break;
            }

            // Secant method on the real part of the critical eigenvalue
            ds = ds / deig.re * -eigs.values[i].re;
            let result = self.step(ctx.at(mu), &x, &tangent, ds)?;
            x = result.x;
            mu = result.mu;
            tangent = result.tangent;
            ds = result.ds;

            let prev = eigs;
            eigs = self.interface.eigs(&x, true, true)?;
            let j = match eigs.nearest_to_imaginary_axis() {
                Some(j) => j,
                None => bail!("empty spectrum while converging onto a bifurcation"),
            };
            deig = eigs.values[j] - prev.values[j];
        }

        Ok((x, mu, eigs))
    }

    pub(super) fn switch_branches(
        &mut self,
        ctx: ParameterContext<'_>,
        x: DVector<f64>,
        tangent: &Tangent,
        eigs: &EigenSnapshot,
        ds: f64,
    ) -> Result<BranchSwitch> {
        match self.config.branch_switching_method {
            BranchSwitchingMethod::Asymmetry => self.switch_branches_asymmetry(ctx, x, ds),
            BranchSwitchingMethod::Tangent => {
                let v = eigs.leading_real_vector()?;
                self.switch_branches_tangent(ctx, x, tangent, &v, ds)
            }
        }
    }

    /// Projects the branch tangent out of the crossing eigenvector `v` to
    /// obtain a direction along the bifurcating branch.
    fn switch_branches_tangent(
        &mut self,
        ctx: ParameterContext<'_>,
        x: DVector<f64>,
        tangent: &Tangent,
        v: &DVector<f64>,
        ds: f64,
    ) -> Result<BranchSwitch> {
        let dmu0 = tangent.dmu;
        let mu = ctx.value();

        ctx.apply(&mut *self.interface)?;
        let fval = self.interface.rhs(&x)?;
        let jac = self.interface.jacobian(&x)?;
        let dflval = self.parameter_derivative(ctx, &x, &fval)?;

        let (dx, mut dmu) = if self.config.bordered_solver {
            self.interface.solve_bordered(
                &jac,
                &DVector::zeros(x.len()),
                0.0,
                &dflval,
                &tangent.dx,
                tangent.dmu,
            )?
        } else {
            let z = self.interface.solve(&jac, &dflval)?;
            let dmu = -tangent.dx.dot(v) / (tangent.dmu - tangent.dx.dot(&z));
            let dx = v - &z * dmu;
            (dx, dmu)
        };

        let mut ds = ds;
        if dmu.abs() < DEGENERATE_SWITCH_TOLERANCE {
            // The eigenvector itself is a usable direction; restart with a
            // careful step.
            dmu = dmu0;
            ds = self.config.minimum_step_size;
        }

        Ok(BranchSwitch {
            x,
            mu,
            tangent: Tangent { dx, dmu },
            ds,
        })
    }

    /// Moves onto the bifurcating branch by continuing in a symmetry-breaking
    /// parameter: push the asymmetry up, walk one unit in the continuation
    /// parameter, then bring the asymmetry back to zero. The state ends up on
    /// the asymmetric branch at the parameter value it moved to.
    fn switch_branches_asymmetry(
        &mut self,
        ctx: ParameterContext<'_>,
        x: DVector<f64>,
        ds: f64,
    ) -> Result<BranchSwitch> {
        let asymmetry = self.config.asymmetry_parameter.clone();
        let mu = ctx.value();

        let off_ctx = ParameterContext::new(&asymmetry, 0.0);
        let tangent = self.initial_tangent(&x, off_ctx)?;
        let off = self.run_inner(
            x,
            off_ctx,
            ASYMMETRY_TARGET,
            ASYMMETRY_STEP_SIZE,
            tangent,
            true,
        )?;

        let tangent = self.initial_tangent(&off.x, ctx)?;
        let moved = self.run_inner(off.x, ctx, mu + 1.0, ds, tangent, true)?;

        let back_ctx = ParameterContext::new(&asymmetry, off.mu);
        let tangent = self.initial_tangent(&moved.x, back_ctx)?;
        let restored = self.run_inner(moved.x, back_ctx, 0.0, -off.mu, tangent, true)?;

        let final_ctx = ctx.at(moved.mu);
        let tangent = self.initial_tangent(&restored.x, final_ctx)?;

        Ok(BranchSwitch {
            x: restored.x,
            mu: moved.mu,
            tangent,
            ds,
        })
    }
}
