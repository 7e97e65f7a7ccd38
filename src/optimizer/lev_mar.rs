//! The Levenberg-Marquardt calibration loop.

use ndarray::{Array1, Array2};

use crate::error::{Result, SimFitError};
use crate::evaluation::Measurement;
use crate::evaluator::Evaluate;
use crate::jacobian::{Differencing, JacobianEstimator};
use crate::linesearch::{LineSearch, LineSearchStep};
use crate::optimizer::diagnostics;
use crate::optimizer::{CalibrationOutcome, RunStatus};
use crate::record::ResultSink;
use crate::utils::linalg::{qr_reduced, solve_upper_triangular};

/// Number of extra damping escalations tried before giving up an iteration.
const ESCALATION_ATTEMPTS: usize = 3;

/// Levenberg-Marquardt optimizer.
///
/// Per iteration, three candidate directions are computed with dampings
/// `lambda/nu`, `lambda` and `lambda*nu`, each from the damped normal
/// equations `(JᵗJ + lambda·I)·delta = -Jᵗr` (optionally scaled by
/// `diag(JᵗJ)` for conditioning), and each is line-searched independently.
/// The lowest damping that still improves on the previous residual norm
/// wins and adjusts `lambda` accordingly; when none improves, `lambda` is
/// escalated a few more times before the run is declared non-convergent.
pub struct LevenbergMarquardt {
    line_search: Box<dyn LineSearch>,
    estimator: JacobianEstimator,
    max_iterations: usize,
    min_reduction: f64,
    initial_lambda: f64,
    nu: f64,
    scaling: bool,
    confidence: f64,
}

impl LevenbergMarquardt {
    /// Create an optimizer with the given line search and default settings.
    pub fn new(line_search: Box<dyn LineSearch>) -> Self {
        Self {
            line_search,
            estimator: JacobianEstimator::new(Differencing::Forward, 1e-3),
            max_iterations: 15,
            min_reduction: 1e-4,
            initial_lambda: 0.01,
            nu: 10.0,
            scaling: false,
            confidence: 0.95,
        }
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the finite-differencing perturbation size.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.estimator.epsilon = epsilon;
        self
    }

    /// Set the finite-differencing scheme.
    pub fn with_differencing(mut self, differencing: Differencing) -> Self {
        self.estimator.differencing = differencing;
        self
    }

    /// Set the relative residual reduction required for convergence.
    pub fn with_min_reduction(mut self, min_reduction: f64) -> Self {
        self.min_reduction = min_reduction;
        self
    }

    /// Set the initial damping factor.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }

    /// Set the factor by which the damping moves between candidates.
    pub fn with_nu(mut self, nu: f64) -> Self {
        self.nu = nu;
        self
    }

    /// Enable or disable column scaling of the normal equations.
    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    /// Set the confidence level used for the interval diagnostics.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Solve the damped normal equations for a candidate direction.
    fn calculate_delta(
        &self,
        jacobian: &Array2<f64>,
        residual: &Array1<f64>,
        lambda: f64,
    ) -> Result<Array1<f64>> {
        let normal = jacobian.t().dot(jacobian);
        let gradient = jacobian.t().dot(residual);
        let p = normal.nrows();

        let (mut damped, scaled_gradient, scale) = if self.scaling {
            let scale: Vec<f64> = (0..p).map(|i| normal[[i, i]].sqrt()).collect();
            if scale.iter().any(|&s| s == 0.0 || !s.is_finite()) {
                return Err(SimFitError::SingularMatrix(
                    "zero diagonal in JᵗJ prevents scaling".to_string(),
                ));
            }

            let mut scaled = Array2::zeros((p, p));
            for x in 0..p {
                for y in 0..p {
                    scaled[[x, y]] = normal[[x, y]] / (scale[x] * scale[y]);
                }
            }
            let scaled_gradient: Array1<f64> =
                (0..p).map(|x| gradient[x] / scale[x]).collect();

            (scaled, scaled_gradient, Some(scale))
        } else {
            (normal, gradient, None)
        };

        for i in 0..p {
            damped[[i, i]] += lambda;
        }

        let (q, r) = qr_reduced(&damped)?;
        let w = q.t().dot(&scaled_gradient);
        let mut delta = -solve_upper_triangular(&r, &w)?;

        if let Some(scale) = scale {
            for x in 0..p {
                delta[x] /= scale[x];
            }
        }

        Ok(delta)
    }

    /// Run the calibration from `initial_guess` (optimization space) toward
    /// the target measurement.
    pub fn run(
        &self,
        evaluator: &mut dyn Evaluate,
        initial_guess: Array1<f64>,
        target: &Measurement,
        sink: &mut dyn ResultSink,
    ) -> Result<CalibrationOutcome> {
        if initial_guess.len() != evaluator.parameter_count() {
            return Err(SimFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                evaluator.parameter_count(),
                initial_guess.len()
            )));
        }

        sink.add_run_metadata("optimizer", "levenberg-marquardt".into());
        sink.add_run_metadata("target_dimension", (target.dimension() as f64).into());
        sink.add_run_metadata("epsilon", self.estimator.epsilon.into());
        sink.add_run_metadata(
            "differencing",
            format!("{:?}", self.estimator.differencing).into(),
        );
        sink.add_run_metadata("lambda_init", self.initial_lambda.into());
        sink.add_run_metadata("nu", self.nu.into());
        sink.add_run_metadata("max_iterations", (self.max_iterations as f64).into());
        sink.add_run_metadata("min_reduction", self.min_reduction.into());

        sink.log("-- Starting Levenberg-Marquardt method. --");

        let target_data = target.flat();
        let mut guess = initial_guess;
        let mut lambda = self.initial_lambda;
        let mut first_norm: Option<f64> = None;
        let mut last_norm: Option<f64> = None;
        let mut committed = 0;

        for iteration in 0..self.max_iterations {
            let estimate =
                self.estimator
                    .estimate(&guess, target, evaluator, sink)?;

            let Some(estimate) = estimate else {
                sink.log("Error calculating Jacobian matrix, simulation run did not finish");
                sink.log(&evaluator.statistics());
                return Ok(CalibrationOutcome {
                    status: RunStatus::JacobianFailed,
                    parameters: guess,
                    residual_norm: last_norm,
                    iterations: committed,
                });
            };

            let measurement = estimate.baseline.resampled_to(target)?;
            let residual = &measurement - &target_data;
            let norm = 0.5 * residual.dot(&residual);
            let first = *first_norm.get_or_insert(norm);

            sink.add_metric("residuals", (&residual).into());
            sink.add_metric("residualnorm", norm.into());
            sink.add_metric("parameters", (&guess).into());
            sink.add_metric("jacobian", (&estimate.jacobian).into());
            sink.add_metric("measurement", (&measurement).into());
            sink.add_metric("lambda", lambda.into());

            // Unlike the Gauss-Newton step, the damped candidate solves below
            // tolerate a rank-deficient Jacobian, so a failed factorization
            // only costs the interval statistics of this iteration.
            match diagnostics::compute(&estimate.jacobian, &residual, Some(self.confidence)) {
                Ok(diagnostics) => {
                    sink.add_metric("variance", diagnostics.variance.into());
                    sink.add_metric("covariance", (&diagnostics.covariance).into());
                    sink.add_metric("correlation", (&diagnostics.correlation).into());
                    sink.add_metric("errors", (&diagnostics.std_errors).into());
                    if let Some(interval) = &diagnostics.confidence_interval {
                        sink.add_metric("confidenceinterval", interval.into());
                    }
                }
                Err(SimFitError::SingularMatrix(reason)) => {
                    sink.log(&format!(
                        "[{}]: skipping interval diagnostics, Jacobian is rank deficient ({})",
                        iteration, reason
                    ));
                }
                Err(other) => return Err(other),
            }
            if let Some(last) = last_norm {
                sink.add_metric("reduction", (norm / last).into());
            }

            sink.log(&format!(
                "[{}]: x = {:?}, residual norm S = {}, lambda = {}",
                iteration, guess, norm, lambda
            ));

            // The first iteration has no previous norm to improve on; any
            // candidate not worse than the current norm is usable.
            let reference = last_norm.unwrap_or(norm);

            let search = |direction: &Array1<f64>,
                              damping: f64,
                              evaluator: &mut dyn Evaluate,
                              sink: &mut dyn ResultSink|
             -> Result<Option<LineSearchStep>> {
                sink.log(&format!(
                    "[{}]\tstarting line search for lambda = {}",
                    iteration, damping
                ));
                self.line_search.search(
                    direction,
                    &guess,
                    target,
                    &estimate.jacobian,
                    &residual,
                    evaluator,
                    sink,
                )
            };

            let lower = self.calculate_delta(&estimate.jacobian, &residual, lambda / self.nu)?;
            let equal = self.calculate_delta(&estimate.jacobian, &residual, lambda)?;
            let higher = self.calculate_delta(&estimate.jacobian, &residual, lambda * self.nu)?;

            let step_lower = search(&lower, lambda / self.nu, evaluator, sink)?;
            let step_equal = search(&equal, lambda, evaluator, sink)?;
            let step_higher = search(&higher, lambda * self.nu, evaluator, sink)?;

            let improves =
                |step: &Option<LineSearchStep>| matches!(step, Some(s) if s.residual_norm <= reference);

            let accepted = if improves(&step_lower) {
                lambda /= self.nu;
                step_lower.expect("checked above")
            } else if improves(&step_equal) {
                step_equal.expect("checked above")
            } else if improves(&step_higher) {
                lambda *= self.nu;
                step_higher.expect("checked above")
            } else {
                // Escalate the damping a few more times before giving up.
                let mut found = None;
                for _ in 0..ESCALATION_ATTEMPTS {
                    lambda *= self.nu;
                    let direction =
                        self.calculate_delta(&estimate.jacobian, &residual, lambda)?;
                    if let Some(step) = search(&direction, lambda, evaluator, sink)? {
                        if step.residual_norm < reference {
                            found = Some(step);
                            break;
                        }
                    }
                }

                let Some(step) = found else {
                    sink.log("-- Levenberg-Marquardt method did not converge. --");
                    sink.commit_iteration();
                    committed += 1;
                    sink.log(&evaluator.statistics());
                    return Ok(CalibrationOutcome {
                        status: RunStatus::LineSearchFailed,
                        parameters: guess,
                        residual_norm: Some(norm),
                        iterations: committed,
                    });
                };
                step
            };

            sink.log(&format!(
                "[{}]\tbest lambda was {} with S = {}",
                iteration, lambda, accepted.residual_norm
            ));

            if accepted.residual_norm / first < self.min_reduction {
                sink.log("-- Levenberg-Marquardt method converged. --");
                sink.commit_iteration();
                committed += 1;
                sink.log(&evaluator.statistics());
                return Ok(CalibrationOutcome {
                    status: RunStatus::Converged,
                    parameters: accepted.guess,
                    residual_norm: Some(accepted.residual_norm),
                    iterations: committed,
                });
            }

            sink.commit_iteration();
            committed += 1;
            guess = accepted.guess;
            last_norm = Some(accepted.residual_norm);
        }

        sink.log("-- Levenberg-Marquardt method did not converge. --");
        sink.log(&evaluator.statistics());
        Ok(CalibrationOutcome {
            status: RunStatus::MaxIterationsReached,
            parameters: guess,
            residual_norm: last_norm,
            iterations: committed,
        })
    }
}
