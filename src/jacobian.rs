//! Finite-difference Jacobian estimation over batched evaluations.
//!
//! All perturbed points plus the unperturbed baseline are submitted as one
//! single evaluator call; that batch is the sole parallelism entry point for
//! Jacobian construction. If any member of the batch errors, the whole
//! estimate is discarded and the caller must abort its current iteration —
//! a partial Jacobian is never returned.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::evaluation::{Evaluation, Measurement};
use crate::evaluator::Evaluate;
use crate::record::ResultSink;

/// Finite-differencing scheme.
///
/// The non-pure modes perturb each coordinate by a *relative* step
/// (`epsilon * value`), substituting the absolute step `epsilon` when the
/// coordinate is zero. The pure modes always use the absolute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Differencing {
    Forward,
    PureForward,
    Central,
    PureCentral,
}

impl Differencing {
    /// Size of the evaluation batch for `n` parameters, baseline included.
    pub fn batch_len(&self, n: usize) -> usize {
        match self {
            Differencing::Forward | Differencing::PureForward => 1 + n,
            Differencing::Central | Differencing::PureCentral => 1 + 2 * n,
        }
    }

    fn is_central(&self) -> bool {
        matches!(self, Differencing::Central | Differencing::PureCentral)
    }

    fn is_relative(&self) -> bool {
        matches!(self, Differencing::Forward | Differencing::Central)
    }
}

/// A successfully estimated Jacobian and the baseline measurement it was
/// computed from.
#[derive(Debug, Clone)]
pub struct JacobianEstimate {
    /// Rows: measurement dimension; columns: parameter count.
    pub jacobian: Array2<f64>,

    /// The unperturbed baseline evaluation.
    pub baseline: Measurement,
}

/// Estimates Jacobians by finite differences of batched evaluations.
#[derive(Debug, Clone, Copy)]
pub struct JacobianEstimator {
    pub differencing: Differencing,
    pub epsilon: f64,
}

impl Default for JacobianEstimator {
    fn default() -> Self {
        Self {
            differencing: Differencing::Forward,
            epsilon: 1e-4,
        }
    }
}

impl JacobianEstimator {
    /// Create an estimator with the given scheme and perturbation size.
    pub fn new(differencing: Differencing, epsilon: f64) -> Self {
        Self {
            differencing,
            epsilon,
        }
    }

    /// Assemble the batch of points to evaluate: the baseline first, then
    /// the perturbed points in coordinate order (plus before minus for the
    /// central modes).
    fn perturbed_points(&self, point: &Array1<f64>) -> Vec<Array1<f64>> {
        let n = point.len();
        let mut points = Vec::with_capacity(self.differencing.batch_len(n));
        points.push(point.clone());

        for i in 0..n {
            if self.differencing.is_central() {
                let mut plus = point.clone();
                let mut minus = point.clone();
                if self.differencing.is_relative() && point[i] != 0.0 {
                    plus[i] *= 1.0 + self.epsilon;
                    minus[i] *= 1.0 - self.epsilon;
                } else {
                    plus[i] += self.epsilon;
                    minus[i] -= self.epsilon;
                }
                points.push(plus);
                points.push(minus);
            } else {
                let mut changed = point.clone();
                if self.differencing.is_relative() && point[i] != 0.0 {
                    changed[i] *= 1.0 + self.epsilon;
                } else {
                    changed[i] += self.epsilon;
                }
                points.push(changed);
            }
        }

        points
    }

    /// Signed denominator of the difference quotient for coordinate `i`.
    fn step_denominator(&self, point: &Array1<f64>, i: usize) -> f64 {
        let scale = if self.differencing.is_relative() && point[i] != 0.0 {
            self.epsilon * point[i]
        } else {
            self.epsilon
        };

        if self.differencing.is_central() {
            2.0 * scale
        } else {
            scale
        }
    }

    /// Estimate the Jacobian at `point` (optimization space), resampling all
    /// evaluations onto the target's grid.
    ///
    /// Returns `Ok(None)` when any member of the batch is an error
    /// evaluation; the caller must treat this as a failed iteration.
    ///
    /// # Errors
    ///
    /// Hard errors (dimension mismatches, incompatible measurement formats)
    /// are returned as `Err` and make the calibration run uncomputable.
    pub fn estimate(
        &self,
        point: &Array1<f64>,
        target: &Measurement,
        evaluator: &mut dyn Evaluate,
        sink: &mut dyn ResultSink,
    ) -> Result<Option<JacobianEstimate>> {
        let points = self.perturbed_points(point);
        let evaluations = evaluator.evaluate(&points, true, "jacobi-matrix", sink)?;

        sink.log("Jacobian batch evaluated:");
        for evaluation in &evaluations {
            match evaluation {
                Evaluation::Success(m) => {
                    sink.log(&format!("\tid={}, runtime={:.3}s", m.id, m.runtime))
                }
                Evaluation::Error(f) => sink.log(&format!("\terrored: {}", f.reason)),
            }
        }

        if evaluations.iter().any(Evaluation::is_error) {
            return Ok(None);
        }

        // With no error members, every evaluation carries a measurement.
        let mut flats = Vec::with_capacity(evaluations.len());
        for evaluation in &evaluations {
            let measurement = evaluation
                .success()
                .expect("error members were ruled out above");
            flats.push(measurement.resampled_to(target)?);
        }

        let n = point.len();
        let rows = flats[0].len();
        let mut jacobian = Array2::zeros((rows, n));
        let baseline_flat = &flats[0];

        for i in 0..n {
            let denominator = self.step_denominator(point, i);
            let column: Array1<f64> = if self.differencing.is_central() {
                (&flats[2 * i + 1] - &flats[2 * i + 2]) / denominator
            } else {
                (&flats[i + 1] - baseline_flat) / denominator
            };
            jacobian.column_mut(i).assign(&column);
        }

        let baseline = evaluations[0]
            .success()
            .expect("baseline is a success")
            .clone();

        Ok(Some(JacobianEstimate { jacobian, baseline }))
    }
}
