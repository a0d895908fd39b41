//! Contract between the continuation engine and the external model.
//!
//! The engine never assembles equations or inverts matrices itself; it asks
//! the model for residuals, Jacobian handles, linear solves and spectra, and
//! keeps the model's "current parameter value" synchronized through explicit
//! [`ParameterContext`] values applied before every evaluation.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

/// A named continuation parameter together with the value it should take for
/// the next residual or Jacobian evaluation.
///
/// The model carries the current parameter value as internal state; the
/// engine threads one of these through every call instead of relying on that
/// state implicitly.
#[derive(Debug, Clone, Copy)]
pub struct ParameterContext<'a> {
    name: &'a str,
    value: f64,
}

impl<'a> ParameterContext<'a> {
    pub fn new(name: &'a str, value: f64) -> Self {
        Self { name, value }
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// The same parameter at a different value.
    pub fn at(&self, value: f64) -> Self {
        Self {
            name: self.name,
            value,
        }
    }

    /// Synchronizes the model with this context.
    pub fn apply<I: ModelInterface + ?Sized>(&self, interface: &mut I) -> Result<()> {
        interface.set_parameter(self.name, self.value)
    }
}

/// Spectrum of the model linearization at a given state. Transient: only used
/// within one bifurcation-detection sequence.
#[derive(Debug, Clone)]
pub struct EigenSnapshot {
    pub values: Vec<Complex<f64>>,
    /// Column eigenvectors, present when requested from [`ModelInterface::eigs`].
    pub vectors: Option<DMatrix<Complex<f64>>>,
}

impl EigenSnapshot {
    /// Index of the eigenvalue nearest the imaginary axis.
    pub fn nearest_to_imaginary_axis(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, eig) in self.values.iter().enumerate() {
            let re = eig.re.abs();
            match best {
                Some((_, smallest)) if smallest <= re => {}
                _ => best = Some((i, re)),
            }
        }
        best.map(|(i, _)| i)
    }

    /// Number of eigenvalues with real part above `-tolerance`. The tolerance
    /// band keeps a crossing that was just converged onto from being counted
    /// twice.
    pub fn count_nonnegative(&self, tolerance: f64) -> usize {
        self.values.iter().filter(|eig| eig.re > -tolerance).count()
    }

    /// Real part of the leading eigenvector, used as the branch-switching
    /// direction.
    pub fn leading_real_vector(&self) -> Result<DVector<f64>> {
        let vectors = match &self.vectors {
            Some(vectors) if vectors.ncols() > 0 => vectors,
            _ => bail!("eigenvector data missing from snapshot"),
        };
        Ok(vectors.column(0).map(|entry| entry.re))
    }
}

/// Operations the engine requires from the discretized model.
///
/// The Jacobian is an opaque handle: the engine only ever passes it back to
/// the model's own linear solvers.
pub trait ModelInterface {
    type Jacobian;

    /// Residual F(x) at the currently set parameter value.
    fn rhs(&mut self, x: &DVector<f64>) -> Result<DVector<f64>>;

    /// Linearization of F at `x`, current parameter.
    fn jacobian(&mut self, x: &DVector<f64>) -> Result<Self::Jacobian>;

    /// Solves `jacobian * dx = rhs`.
    fn solve(&mut self, jacobian: &Self::Jacobian, rhs: &DVector<f64>) -> Result<DVector<f64>>;

    /// Solves the augmented bordered system
    ///
    /// ```text
    /// | jacobian      border_column | | dx  |   | rhs        |
    /// | border_row^T  border_scalar | | dmu | = | rhs_scalar |
    /// ```
    ///
    /// in one call. Only required when the `bordered_solver` option is on.
    fn solve_bordered(
        &mut self,
        jacobian: &Self::Jacobian,
        rhs: &DVector<f64>,
        rhs_scalar: f64,
        border_column: &DVector<f64>,
        border_row: &DVector<f64>,
        border_scalar: f64,
    ) -> Result<(DVector<f64>, f64)> {
        let _ = (
            jacobian,
            rhs,
            rhs_scalar,
            border_column,
            border_row,
            border_scalar,
        );
        bail!("model does not provide a bordered solver");
    }

    /// Sets the current value of a named model parameter, affecting
    /// subsequent `rhs` and `jacobian` calls.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    /// Reads the current value of a named model parameter.
    fn get_parameter(&self, name: &str) -> Result<f64>;

    /// Spectrum of the linearization at `x`. Recycling is a performance hint
    /// only. Only required when bifurcation detection or branch switching is
    /// enabled.
    fn eigs(
        &mut self,
        x: &DVector<f64>,
        return_eigenvectors: bool,
        enable_recycling: bool,
    ) -> Result<EigenSnapshot> {
        let _ = (x, return_eigenvectors, enable_recycling);
        bail!("model does not provide eigenvalue computation");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;
    use std::collections::BTreeMap;

    pub(crate) type Params = BTreeMap<String, f64>;
    type Residual = Box<dyn Fn(&DVector<f64>, &Params) -> DVector<f64>>;

    /// Dense in-memory model: residual from a closure over named parameters,
    /// finite-difference Jacobian, LU linear solves, eigenvalues straight
    /// from the Jacobian.
    pub(crate) struct AlgebraicModel {
        residual: Residual,
        params: Params,
        pub rhs_calls: usize,
    }

    impl AlgebraicModel {
        pub fn new(
            params: &[(&str, f64)],
            residual: impl Fn(&DVector<f64>, &Params) -> DVector<f64> + 'static,
        ) -> Self {
            Self {
                residual: Box::new(residual),
                params: params
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect(),
                rhs_calls: 0,
            }
        }

        fn eval(&self, x: &DVector<f64>) -> DVector<f64> {
            (self.residual)(x, &self.params)
        }
    }

    impl ModelInterface for AlgebraicModel {
        type Jacobian = DMatrix<f64>;

        fn rhs(&mut self, x: &DVector<f64>) -> Result<DVector<f64>> {
            self.rhs_calls += 1;
            Ok(self.eval(x))
        }

        fn jacobian(&mut self, x: &DVector<f64>) -> Result<DMatrix<f64>> {
            let n = x.len();
            let mut jac = DMatrix::zeros(n, n);
            for col in 0..n {
                let eps = 1e-7 * (1.0 + x[col].abs());
                let mut forward = x.clone();
                forward[col] += eps;
                let mut backward = x.clone();
                backward[col] -= eps;
                let column = (self.eval(&forward) - self.eval(&backward)) / (2.0 * eps);
                jac.set_column(col, &column);
            }
            Ok(jac)
        }

        fn solve(&mut self, jacobian: &DMatrix<f64>, rhs: &DVector<f64>) -> Result<DVector<f64>> {
            jacobian
                .clone()
                .lu()
                .solve(rhs)
                .ok_or_else(|| anyhow!("singular Jacobian"))
        }

        fn solve_bordered(
            &mut self,
            jacobian: &DMatrix<f64>,
            rhs: &DVector<f64>,
            rhs_scalar: f64,
            border_column: &DVector<f64>,
            border_row: &DVector<f64>,
            border_scalar: f64,
        ) -> Result<(DVector<f64>, f64)> {
            let n = rhs.len();
            let mut augmented = DMatrix::zeros(n + 1, n + 1);
            augmented.view_mut((0, 0), (n, n)).copy_from(jacobian);
            for i in 0..n {
                augmented[(i, n)] = border_column[i];
                augmented[(n, i)] = border_row[i];
            }
            augmented[(n, n)] = border_scalar;

            let mut full_rhs = DVector::zeros(n + 1);
            for i in 0..n {
                full_rhs[i] = rhs[i];
            }
            full_rhs[n] = rhs_scalar;

            let solution = augmented
                .lu()
                .solve(&full_rhs)
                .ok_or_else(|| anyhow!("singular bordered system"))?;
            Ok((solution.rows(0, n).into_owned(), solution[n]))
        }

        fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
            match self.params.get_mut(name) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => bail!("unknown parameter {name}"),
            }
        }

        fn get_parameter(&self, name: &str) -> Result<f64> {
            self.params
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("unknown parameter {name}"))
        }

        fn eigs(
            &mut self,
            x: &DVector<f64>,
            return_eigenvectors: bool,
            _enable_recycling: bool,
        ) -> Result<EigenSnapshot> {
            let jacobian = self.jacobian(x)?;
            let values: Vec<Complex<f64>> =
                jacobian.complex_eigenvalues().iter().cloned().collect();
            // Identity columns stand in for eigenvectors; the test systems
            // that request them have diagonal Jacobians.
            let vectors = return_eigenvectors
                .then(|| DMatrix::identity(x.len(), x.len()).map(|v| Complex::new(v, 0.0)));
            Ok(EigenSnapshot { values, vectors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn snapshot(values: Vec<Complex<f64>>) -> EigenSnapshot {
        EigenSnapshot {
            values,
            vectors: None,
        }
    }

    #[test]
    fn nearest_to_imaginary_axis_picks_smallest_real_magnitude() {
        let eigs = snapshot(vec![
            Complex::new(-1.0, 0.0),
            Complex::new(0.02, 3.0),
            Complex::new(0.5, 0.0),
        ]);
        assert_eq!(eigs.nearest_to_imaginary_axis(), Some(1));

        let empty = snapshot(Vec::new());
        assert_eq!(empty.nearest_to_imaginary_axis(), None);
    }

    #[test]
    fn count_nonnegative_includes_the_tolerance_band() {
        let eigs = snapshot(vec![
            Complex::new(-1.0, 0.0),
            Complex::new(-1e-5, 0.0),
            Complex::new(0.5, 1.0),
        ]);
        assert_eq!(eigs.count_nonnegative(1e-4), 2);
        assert_eq!(eigs.count_nonnegative(1e-6), 1);
    }

    #[test]
    fn leading_real_vector_requires_eigenvectors() {
        let mut eigs = snapshot(vec![Complex::new(0.0, 0.0)]);
        assert!(eigs.leading_real_vector().is_err());

        eigs.vectors = Some(DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex::new(1.0, 2.0),
                Complex::new(0.0, 0.0),
                Complex::new(-3.0, 1.0),
                Complex::new(0.0, 0.0),
            ],
        ));
        let v = eigs.leading_real_vector().expect("vectors are present");
        assert_eq!(v, dvector![1.0, -3.0]);
    }

    #[test]
    fn parameter_context_applies_values_explicitly() {
        let mut model = testing::AlgebraicModel::new(&[("Reynolds", 1.0)], |x, _| x.clone());
        let ctx = ParameterContext::new("Reynolds", 1.0);
        ctx.at(2.5).apply(&mut model).expect("parameter exists");
        assert_eq!(model.get_parameter("Reynolds").unwrap(), 2.5);
        assert_eq!(ctx.value(), 1.0);
    }
}
