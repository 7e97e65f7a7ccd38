//! Parallel line search on equally spaced step lengths.

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::evaluation::Measurement;
use crate::evaluator::Evaluate;
use crate::linesearch::{
    candidate_norms, directional_slope, minimum_norm, sufficient_decrease_bound, LineSearch,
    LineSearchStep,
};
use crate::record::{MetricValue, ResultSink};

/// Line search sampling `samples` equally spaced step lengths per round over
/// a moving interval `[low, top]`, one batched evaluator call per round.
///
/// The interval starts at `[0, 1]`. When the best sample sits at the top of
/// the interval the next round extends past it; when it sits at the bottom
/// and the interval already starts at zero, the interval shrinks toward zero
/// by a factor of `samples`; otherwise the next interval centers tightly
/// around the best sample. After `max_iterations` rounds the best step seen
/// so far is returned if it passes the acceptance test.
#[derive(Debug, Clone)]
pub struct LinearParallelLineSearch {
    c: f64,
    max_iterations: usize,
    samples: usize,
}

impl Default for LinearParallelLineSearch {
    fn default() -> Self {
        Self {
            c: 1e-3,
            max_iterations: 3,
            samples: 10,
        }
    }
}

impl LinearParallelLineSearch {
    /// Create a search with the given round budget and samples per round.
    pub fn new(max_iterations: usize, samples: usize) -> Self {
        Self {
            max_iterations,
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

impl LineSearch for LinearParallelLineSearch {
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

        let mut low = 0.0_f64;
        let mut top = 1.0_f64;
        let mut round = 0;

        let mut best_norm = f64::INFINITY;
        let mut best_alpha = -1.0_f64;
        let mut sampled: Vec<Vec<f64>> = Vec::new();

        sink.add_run_metadata("ls_maxiterations", (self.max_iterations as f64).into());
        sink.add_run_metadata("ls_parallel_evaluations", (self.samples as f64).into());

        loop {
            round += 1;

            let alphas = Array1::linspace(low, top, self.samples);
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
                        sink.log(&format!("\t\talpha_{} = {} errored", i, alphas[i]));
                        // No norm recorded for errored samples.
                        sampled.push(vec![alphas[i]]);
                    }
                }
            }

            let Some((min_index, min_norm)) = minimum_norm(&norms) else {
                sink.log(&format!("\t [{}]: no run finished.", round));

                if round == self.max_iterations {
                    sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));
                    return Ok(None);
                }
                low = 0.0;
                top /= self.samples as f64;
                continue;
            };

            if min_norm < best_norm {
                best_norm = min_norm;
                best_alpha = alphas[min_index];
            }

            // Window update, and whether this round's shape forces another
            // round regardless of the acceptance test.
            let min_alpha = alphas[min_index];
            let mut continue_override = false;
            let (next_low, next_top);

            if min_index == self.samples - 1 {
                continue_override = true;
                next_low = top;
                next_top = top + (top - low);
            } else if min_index == 0 {
                if low == 0.0 {
                    continue_override = true;
                    next_low = 0.0;
                    next_top = top / self.samples as f64;
                } else {
                    next_low = (low - (top - low) / 2.0).max(0.0);
                    next_top = next_low + (top - low) / 2.0;
                }
            } else {
                next_low = min_alpha - (top - low) / 4.0;
                next_top = min_alpha + (top - low) / 4.0;
            }

            let bound = sufficient_decrease_bound(residual, slope, best_alpha, self.c);
            sink.log(&format!(
                "\t [{}]: min_alpha = {}, next interval = [{}, {}], residual norm = {}, acceptance bound = {}",
                round, best_alpha, next_low, next_top, best_norm, bound
            ));

            if best_norm < bound && !continue_override {
                sink.add_metric("alpha", best_alpha.into());
                sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));
                return Ok(Some(LineSearchStep {
                    guess: guess + &(direction * best_alpha),
                    residual_norm: best_norm,
                    alpha: best_alpha,
                }));
            }

            if round == self.max_iterations {
                sink.add_metric("lineSearchAlphas", MetricValue::Matrix(sampled));

                if best_norm < bound {
                    sink.add_metric("alpha", best_alpha.into());
                    return Ok(Some(LineSearchStep {
                        guess: guess + &(direction * best_alpha),
                        residual_norm: best_norm,
                        alpha: best_alpha,
                    }));
                }

                return Ok(None);
            }

            low = next_low;
            top = next_top;
        }
    }
}
