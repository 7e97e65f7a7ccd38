//! Parallel line search on geometrically spaced step lengths.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::evaluation::Measurement;
use crate::evaluator::Evaluate;
use crate::linesearch::{
    candidate_norms, directional_slope, minimum_norm, sufficient_decrease_bound, LineSearch,
    LineSearchStep,
};
use crate::record::{MetricValue, ResultSink};

/// Line search sampling `samples` base-2 geometrically spaced step lengths
/// across a power-of-two window of exponent span `size`, one batched
/// evaluator call per round.
///
/// The window initially ends at exponent `highest_power` (alpha = 1); every
/// round that fails to produce an acceptable step slides the window's upper
/// exponent down by the span, probing ever smaller step lengths. A minimum
/// sitting at the window's bottom edge is not accepted, since smaller alphas
/// may still improve.
#[derive(Debug, Clone)]
pub struct LogarithmicParallelLineSearch {
    c: f64,
    max_iterations: usize,
    size: i32,
    samples: usize,
    highest_power: i32,
}

impl Default for LogarithmicParallelLineSearch {
    fn default() -> Self {
        Self {
            c: 1e-3,
            max_iterations: 2,
            size: 5,
            samples: 10,
            highest_power: 0,
        }
    }
}

impl LogarithmicParallelLineSearch {
    /// Create a search with the given round budget, exponent span and
    /// samples per round.
    pub fn new(max_iterations: usize, size: i32, samples: usize) -> Self {
        Self {
            max_iterations,
            size,
            samples,
            ..Self::default()
        }
    }

    /// Override the acceptance constant.
    pub fn with_acceptance_constant(mut self, c: f64) -> Self {
        self.c = c;
        self
    }
}

impl LineSearch for LogarithmicParallelLineSearch {
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

        let mut highest_power = self.highest_power;
        let mut round = 0;
        let mut sampled: Vec<Vec<f64>> = Vec::new();

        sink.add_run_metadata("ls_maxiterations", (self.max_iterations as f64).into());
        sink.add_run_metadata("ls_size", (self.size as f64).into());
        sink.add_run_metadata("ls_parallel_evaluations", (self.samples as f64).into());

        loop {
            round += 1;

            let alphas = Array1::logspace(
                2.0,
                (highest_power - self.size) as f64,
                highest_power as f64,
                self.samples,
            );
            let points: Vec<Array1<f64>> = alphas
                .iter()
                .map(|&alpha| guess + &(direction * alpha))
                .collect();

            let evaluations = evaluator.evaluate(&points, true, "linesearch", sink)?;
            let norms = candidate_norms(&evaluations, target, &target_data)?;

            for (i, norm) in norms.iter().enumerate() {
                match norm {
                    Some(norm) => {
                        sink.log(&format!(
                            "\t\talpha_{} = {}, residual norm = {}",
                            i, alphas[i], norm
                        ));
                        sampled.push(vec![alphas[i], *norm]);
                    }
                    None => {
                        sink.log(&format!("\t\talpha_{} = {} did not finish", i, alphas[i]));
                        // No norm recorded for errored samples.
                        sampled.push(vec![alphas[i]]);
                    }
                }
            }

            let Some((min_index, min_norm)) = minimum_norm(&norms) else {
                sink.log("\tno run finished.");

                if round == self.max_iterations {
                    sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));
                    return Ok(None);
                }
                highest_power -= self.size;
                continue;
            };

            let min_alpha = alphas[min_index];
            let bound = sufficient_decrease_bound(residual, slope, min_alpha, self.c);
            sink.log(&format!(
                "\t [{}]: min_alpha = {}, residual norm = {}, acceptance bound = {}",
                round, min_alpha, min_norm, bound
            ));

            if min_norm < bound && min_index != 0 {
                sink.add_metric("alpha", min_alpha.into());
                sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));
                return Ok(Some(LineSearchStep {
                    guess: guess + &(direction * min_alpha),
                    residual_norm: min_norm,
                    alpha: min_alpha,
                }));
            }

            if round == self.max_iterations {
                sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));
                return Ok(None);
            }

            highest_power -= self.size;
        }
    }
}
