//! The Gauss-Newton calibration loop.

use ndarray::Array1;

use crate::error::{Result, SimFitError};
use crate::evaluation::Measurement;
use crate::evaluator::Evaluate;
use crate::jacobian::{Differencing, JacobianEstimator};
use crate::linesearch::LineSearch;
use crate::optimizer::diagnostics;
use crate::optimizer::{CalibrationOutcome, RunStatus};
use crate::record::ResultSink;

/// Gauss-Newton optimizer.
///
/// Per iteration: estimate the Jacobian and baseline measurement in one
/// batch, compute the residual against the target, derive the step direction
/// from a QR factorization, record all diagnostics, test convergence, and
/// otherwise line-search along the step direction. Every iteration is
/// committed to the result sink before the convergence decision, so partial
/// runs retain their full history.
pub struct GaussNewton {
    line_search: Box<dyn LineSearch>,
    estimator: JacobianEstimator,
    max_iterations: usize,
    min_reduction: f64,
    /// Error-ratio convergence gate: (ceiling on the worst confidence
    /// interval half-width relative to the parameter magnitude, confidence
    /// level). `None` disables the gate.
    max_error_ratio: Option<(f64, f64)>,
}

impl GaussNewton {
    /// Create an optimizer with the given line search and default settings.
    pub fn new(line_search: Box<dyn LineSearch>) -> Self {
        Self {
            line_search,
            estimator: JacobianEstimator::new(Differencing::Forward, 1e-4),
            max_iterations: 15,
            min_reduction: 1e-4,
            max_error_ratio: Some((0.05, 0.95)),
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

    /// Enable or disable the error-ratio convergence gate.
    pub fn with_max_error_ratio(mut self, max_error_ratio: Option<(f64, f64)>) -> Self {
        self.max_error_ratio = max_error_ratio;
        self
    }

    fn confidence_level(&self) -> Option<f64> {
        self.max_error_ratio.map(|(_, level)| level)
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

        sink.add_run_metadata("optimizer", "gauss-newton".into());
        sink.add_run_metadata("target_dimension", (target.dimension() as f64).into());
        sink.add_run_metadata("epsilon", self.estimator.epsilon.into());
        sink.add_run_metadata(
            "differencing",
            format!("{:?}", self.estimator.differencing).into(),
        );
        sink.add_run_metadata("max_iterations", (self.max_iterations as f64).into());
        sink.add_run_metadata("min_reduction", self.min_reduction.into());

        sink.log("-- Starting Gauss-Newton method. --");

        let target_data = target.flat();
        let mut guess = initial_guess;
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

            let diagnostics =
                diagnostics::compute(&estimate.jacobian, &residual, self.confidence_level())?;

            sink.add_metric("residuals", (&residual).into());
            sink.add_metric("residualnorm", norm.into());
            sink.add_metric("parameters", (&guess).into());
            sink.add_metric("jacobian", (&estimate.jacobian).into());
            sink.add_metric("measurement", (&measurement).into());
            sink.add_metric("variance", diagnostics.variance.into());
            sink.add_metric("covariance", (&diagnostics.covariance).into());
            sink.add_metric("correlation", (&diagnostics.correlation).into());
            sink.add_metric("errors", (&diagnostics.std_errors).into());
            if let Some(interval) = &diagnostics.confidence_interval {
                sink.add_metric("confidenceinterval", interval.into());
            }
            if let Some(last) = last_norm {
                sink.add_metric("reduction", (norm / last).into());
            }

            sink.log(&format!(
                "[{}]: x = {:?}, residual norm S = {}",
                iteration, guess, norm
            ));
            sink.log(&format!(
                "step direction is {:?}",
                diagnostics.step_direction
            ));

            if self.is_converged(norm, first, &guess, diagnostics.confidence_interval.as_ref()) {
                sink.log("-- Gauss-Newton method converged. --");
                sink.commit_iteration();
                committed += 1;
                sink.log(&evaluator.statistics());
                return Ok(CalibrationOutcome {
                    status: RunStatus::Converged,
                    parameters: guess,
                    residual_norm: Some(norm),
                    iterations: committed,
                });
            }

            let step = self.line_search.search(
                &diagnostics.step_direction,
                &guess,
                target,
                &estimate.jacobian,
                &residual,
                evaluator,
                sink,
            )?;

            let Some(step) = step else {
                sink.log("-- Gauss-Newton method did not converge. --");
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

            sink.commit_iteration();
            committed += 1;
            guess = step.guess;
            last_norm = Some(norm);
        }

        sink.log("-- Gauss-Newton method did not converge. --");
        sink.log(&evaluator.statistics());
        Ok(CalibrationOutcome {
            status: RunStatus::MaxIterationsReached,
            parameters: guess,
            residual_norm: last_norm,
            iterations: committed,
        })
    }

    /// Convergence: sufficient relative reduction of the residual norm, and
    /// (when the error-ratio gate is enabled) the worst confidence interval
    /// half-width small relative to the parameter magnitude.
    fn is_converged(
        &self,
        norm: f64,
        first_norm: f64,
        guess: &Array1<f64>,
        confidence_interval: Option<&Array1<f64>>,
    ) -> bool {
        if norm / first_norm >= self.min_reduction {
            return false;
        }

        match self.max_error_ratio {
            None => true,
            Some((ceiling, _)) => match confidence_interval {
                Some(interval) => interval
                    .iter()
                    .zip(guess.iter())
                    .all(|(half_width, value)| half_width / value.abs() < ceiling),
                // Without an interval (square problem) the gate cannot pass.
                None => false,
            },
        }
    }
}
