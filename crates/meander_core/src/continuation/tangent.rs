//! Branch tangents in the scaled arclength metric.

use anyhow::Result;
use nalgebra::DVector;

use super::Continuation;
use crate::interface::{ModelInterface, ParameterContext};

/// Direction of the branch in combined (x, mu) space. Normalized such that
/// `zeta * dx.dx + dmu^2 = 1` with `zeta = 1 / n`, which keeps the state and
/// parameter contributions comparable regardless of the problem size.
#[derive(Debug, Clone, PartialEq)]
pub struct Tangent {
    pub dx: DVector<f64>,
    pub dmu: f64,
}

impl Tangent {
    /// Norm of the tangent in the scaled arclength metric.
    pub fn arclength_norm(&self, zeta: f64) -> f64 {
        (zeta * self.dx.dot(&self.dx) + self.dmu * self.dmu).sqrt()
    }
}

impl<'a, I: ModelInterface> Continuation<'a, I> {
    /// Tangent at a point where no previous step exists, from the implicit
    /// function theorem: dx = -J^{-1} F_mu, scaled to unit arclength norm
    /// with the parameter component taken positive.
    pub(super) fn initial_tangent(
        &mut self,
        x: &DVector<f64>,
        ctx: ParameterContext<'_>,
    ) -> Result<Tangent> {
        ctx.apply(&mut *self.interface)?;
        let fval = self.interface.rhs(x)?;
        let dflval = self.parameter_derivative(ctx, x, &fval)?;

        let jac = self.interface.jacobian(x)?;
        let dx = self.interface.solve(&jac, &(-dflval))?;

        let zeta = 1.0 / x.len() as f64;
        let mut tangent = Tangent { dx, dmu: 1.0 };
        let nrm = tangent.arclength_norm(zeta);
        tangent.dx /= nrm;
        tangent.dmu /= nrm;

        Ok(tangent)
    }
}
