//! Sequential backtracking line search.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::evaluation::{Evaluation, Measurement};
use crate::evaluator::Evaluate;
use crate::linesearch::{
    directional_slope, sufficient_decrease_bound, LineSearch, LineSearchStep,
};
use crate::record::ResultSink;

/// Single-candidate backtracking: start at `alpha = 1`, evaluate, and shrink
/// by `rho` until the sufficient-decrease test passes or the retry budget is
/// exhausted. One evaluation per round, so no parallelism is exploited.
#[derive(Debug, Clone)]
pub struct BacktrackingLineSearch {
    c: f64,
    rho: f64,
    max_iterations: usize,
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self {
            c: 1e-3,
            rho: 0.5,
            max_iterations: 15,
        }
    }
}

impl BacktrackingLineSearch {
    /// Create a search with the default shrink factor and budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the shrink factor.
    pub fn with_shrink_factor(mut self, rho: f64) -> Self {
        self.rho = rho;
        self
    }

    /// Override the retry budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl LineSearch for BacktrackingLineSearch {
    fn search(
        &self,
        direction: &Array1<f64>,
        guess: &Array1<f64>,
        target: &Measurement,
        jacobian: &Array2<f64>,
        residual: &Array1<f64>,
        evaluator: &mut dyn Evaluate,
        sink: &mut dyn ResultSink,
    ) -> Result<Option<LineSearchStep>> {
        let slope = directional_slope(jacobian, residual, direction);
        let target_data = target.flat();

        let mut alpha = 1.0_f64;

        for round in 0..self.max_iterations {
            let candidate = guess + &(direction * alpha);
            let evaluations = evaluator.evaluate(
                std::slice::from_ref(&candidate),
                true,
                "linesearch",
                sink,
            )?;

            let measurement = match &evaluations[0] {
                Evaluation::Success(measurement) => measurement,
                Evaluation::Error(failure) => {
                    sink.log(&format!(
                        "\t\t [{}]: alpha = {} errored: {}",
                        round, alpha, failure.reason
                    ));
                    return Ok(None);
                }
            };

            let trial_residual = measurement.resampled_to(target)? - &target_data;
            let norm = 0.5 * trial_residual.dot(&trial_residual);
            let bound = sufficient_decrease_bound(residual, slope, alpha, self.c);

            sink.log(&format!(
                "\t\t [{}]: alpha = {}, residual norm = {}, acceptance bound = {}",
                round, alpha, norm, bound
            ));

            if norm.is_finite() && norm <= bound {
                sink.add_metric("alpha", alpha.into());
                return Ok(Some(LineSearchStep {
                    guess: candidate,
                    residual_norm: norm,
                    alpha,
                }));
            }

            alpha *= self.rho;
        }

        Ok(None)
    }
}
