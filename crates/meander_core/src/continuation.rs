pub mod bifurcation;
pub mod corrector;
pub mod step;
pub mod tangent;

pub use corrector::CorrectorOutcome;
pub use step::StepResult;
pub use tangent::Tangent;

use anyhow::{bail, Result};
use log::info;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::config::ContinuationConfig;
use crate::error::ContinuationError;
use crate::interface::{EigenSnapshot, ModelInterface, ParameterContext};
use crate::newton::NewtonResult;

/// Called after every accepted continuation step with the interface, the new
/// state and the new parameter value.
pub type PostprocessHook<'a, I> =
    Box<dyn FnMut(&mut I, &DVector<f64>, f64) -> Result<()> + 'a>;

/// How a continuation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The branch was traced up to the target parameter value.
    ReachedTarget,
    /// An eigenvalue crossed the imaginary axis and the run converged onto
    /// the crossing instead of the target.
    BifurcationPoint,
    /// The step budget ran out before anything else happened.
    StepBudgetExhausted,
}

/// Final point of a continuation run, together with the last secant so a
/// follow-up run can resume without recomputing a tangent.
#[derive(Debug, Clone)]
pub struct ContinuationResult {
    pub x: DVector<f64>,
    pub mu: f64,
    /// State increment of the last accepted step.
    pub step_dx: DVector<f64>,
    /// Parameter increment of the last accepted step.
    pub step_dmu: f64,
    pub outcome: RunOutcome,
}

/// Pseudo-arclength continuation of a branch of steady states of the model
/// behind a [`ModelInterface`].
///
/// The branch is parameterized by arclength in the scaled (x, mu) metric, so
/// the tracer walks through folds where mu itself turns around. Every step is
/// an Euler predictor along the tangent followed by a bordered Newton
/// corrector; the step size adapts to how hard the corrector had to work.
pub struct Continuation<'a, I: ModelInterface> {
    interface: &'a mut I,
    config: ContinuationConfig,
    postprocess: Option<PostprocessHook<'a, I>>,
}

impl<'a, I: ModelInterface> Continuation<'a, I> {
    pub fn new(interface: &'a mut I, config: ContinuationConfig) -> Result<Self, ContinuationError> {
        config.validate()?;
        Ok(Self {
            interface,
            config,
            postprocess: None,
        })
    }

    pub fn with_postprocess(mut self, hook: PostprocessHook<'a, I>) -> Self {
        self.postprocess = Some(hook);
        self
    }

    /// Plain Newton solve at the model's current parameter value.
    pub fn newton(&mut self, x0: DVector<f64>) -> Result<NewtonResult> {
        crate::newton::newton(&mut *self.interface, &self.config, x0)
    }

    /// Traces the branch through `parameter_name` from `start` towards
    /// `target` with initial arclength step size `ds`, starting from the
    /// steady state `x0` at `start`.
    pub fn run(
        &mut self,
        x0: DVector<f64>,
        parameter_name: &str,
        start: f64,
        target: f64,
        ds: f64,
    ) -> Result<ContinuationResult> {
        guard_inputs(&x0, ds)?;

        let ctx = ParameterContext::new(parameter_name, start);
        let tangent = self.initial_tangent(&x0, ctx)?;
        self.run_inner(x0, ctx, target, ds, tangent, false)
    }

    /// Like [`Continuation::run`], but resumes with the step returned by a
    /// previous run instead of computing an initial tangent.
    pub fn run_with_step(
        &mut self,
        x0: DVector<f64>,
        parameter_name: &str,
        start: f64,
        target: f64,
        ds: f64,
        step_dx: DVector<f64>,
        step_dmu: f64,
    ) -> Result<ContinuationResult> {
        guard_inputs(&x0, ds)?;

        let ctx = ParameterContext::new(parameter_name, start);
        let tangent = Tangent {
            dx: step_dx / ds,
            dmu: step_dmu / ds,
        };
        self.run_inner(x0, ctx, target, ds, tangent, false)
    }

    fn run_inner(
        &mut self,
        mut x: DVector<f64>,
        ctx: ParameterContext<'_>,
        target: f64,
        mut ds: f64,
        mut tangent: Tangent,
        mut switched_branches: bool,
    ) -> Result<ContinuationResult> {
        let mut mu = ctx.value();

        let detect = self.config.detect_bifurcation_points;
        let switching = self.config.enable_branch_switching;

        let mut eigs: Option<EigenSnapshot> = None;
        let mut enable_recycling = false;

        let maxit = self.config.maximum_continuation_steps;
        for j in 0..maxit {
            let mu0 = mu;

            if detect || (switching && !switched_branches) {
                let current = self.interface.eigs(&x, true, enable_recycling)?;
                enable_recycling = true;

                let mut crossing = None;
                if let Some(prev) = &eigs {
                    let tol = self.config.destination_tolerance;
                    if current.count_nonnegative(tol) != prev.count_nonnegative(tol) {
                        if let Some(i) = current.nearest_to_imaginary_axis() {
                            crossing = Some((current.clone(), current.values[i] - prev.values[i]));
                        }
                    }
                }
                eigs = Some(current);

                if let Some((snapshot, deig)) = crossing {
                    let (x_b, mu_b, snapshot) =
                        self.detect_bifurcation(ctx.at(mu), x, &tangent, snapshot, deig, ds, maxit - j)?;
                    x = x_b;
                    mu = mu_b;

                    if switching && !switched_branches {
                        switched_branches = true;
                        let switched =
                            self.switch_branches(ctx.at(mu), x, &tangent, &snapshot, ds)?;
                        x = switched.x;
                        mu = switched.mu;
                        tangent = switched.tangent;
                        ds = switched.ds;
                        continue;
                    }

                    return Ok(ContinuationResult {
                        step_dx: &tangent.dx * ds,
                        step_dmu: tangent.dmu * ds,
                        x,
                        mu,
                        outcome: RunOutcome::BifurcationPoint,
                    });
                }
            }

            let result = self.step(ctx.at(mu), &x, &tangent, ds)?;
            x = result.x;
            mu = result.mu;
            tangent = result.tangent;
            ds = result.ds;

            if (mu >= target && mu0 < target) || (mu <= target && mu0 > target) {
                // Converge onto the end point
                let (x, mu, landed) =
                    self.converge(ctx, x, mu, &tangent, target, ds, maxit - j)?;
                let outcome = if landed {
                    RunOutcome::ReachedTarget
                } else {
                    RunOutcome::StepBudgetExhausted
                };

                return Ok(ContinuationResult {
                    step_dx: &tangent.dx * ds,
                    step_dmu: tangent.dmu * ds,
                    x,
                    mu,
                    outcome,
                });
            }

            ds = self.adjust_step_size(ds, result.newton_iterations);
        }

        Ok(ContinuationResult {
            step_dx: &tangent.dx * ds,
            step_dmu: tangent.dmu * ds,
            x,
            mu,
            outcome: RunOutcome::StepBudgetExhausted,
        })
    }

    /// Secant iteration that lands exactly on the target parameter value once
    /// it gets within the destination tolerance. The returned flag tells
    /// whether the landing was actually achieved within the iteration budget.
    fn converge(
        &mut self,
        ctx: ParameterContext<'_>,
        mut x: DVector<f64>,
        mut mu: f64,
        tangent: &Tangent,
        target: f64,
        mut ds: f64,
        maxit: usize,
    ) -> Result<(DVector<f64>, f64, bool)> {
        let mut tangent = tangent.clone();
        let mut landed = false;

        for _ in 0..maxit {
            if (target - mu).abs() < self.config.destination_tolerance {
                ctx.at(target).apply(&mut *self.interface)?;
                mu = target;
                landed = true;
                info!("Convergence achieved onto target {} = {}", ctx.name(), mu);
                break;
            }

            // Secant method
            ds = (target - mu) / tangent.dmu;
            let result = self.step(ctx.at(mu), &x, &tangent, ds)?;
            x = result.x;
            mu = result.mu;
            tangent = result.tangent;
        }

        Ok((x, mu, landed))
    }

    /// Finite-difference derivative of F with respect to the continuation
    /// parameter, evaluated at `x` with `fval = F(x)` already known. Restores
    /// the parameter to the context value afterwards.
    pub(crate) fn parameter_derivative(
        &mut self,
        ctx: ParameterContext<'_>,
        x: &DVector<f64>,
        fval: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let delta = self.config.delta;

        ctx.at(ctx.value() + delta).apply(&mut *self.interface)?;
        let shifted = self.interface.rhs(x)?;
        ctx.apply(&mut *self.interface)?;

        Ok((shifted - fval) / delta)
    }
}

fn guard_inputs(x0: &DVector<f64>, ds: f64) -> Result<()> {
    if x0.is_empty() {
        bail!("cannot continue an empty state vector");
    }
    if ds == 0.0 {
        bail!("initial step size must be non-zero");
    }
    Ok(())
}
