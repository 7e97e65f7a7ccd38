//! Step-length selection along a descent direction.
//!
//! Every variant shares the same acceptance test, a sufficient-decrease
//! lower bound on the achieved residual norm, and dispatches its trial
//! points through the evaluator under the `"linesearch"` provenance tag.
//! Failure to find an acceptable step within the configured budget is an
//! ordinary outcome (`Ok(None)`), not an error.

mod backtracking;
mod linear;
mod logarithmic;

pub use backtracking::BacktrackingLineSearch;
pub use linear::LinearParallelLineSearch;
pub use logarithmic::LogarithmicParallelLineSearch;

use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::evaluation::{Evaluation, Measurement};
use crate::evaluator::Evaluate;
use crate::record::ResultSink;

/// An accepted step.
#[derive(Debug, Clone)]
pub struct LineSearchStep {
    /// The next guess, `guess + alpha * direction`.
    pub guess: Array1<f64>,

    /// Residual norm `0.5 * r·r` achieved at the next guess.
    pub residual_norm: f64,

    /// The accepted step length.
    pub alpha: f64,
}

/// Finds a step length with a sufficient-decrease guarantee using batched
/// trial evaluations.
pub trait LineSearch {
    /// Search along `direction` from `guess`.
    ///
    /// `jacobian` and `residual` belong to the current guess and define the
    /// acceptance bound. Returns `Ok(None)` when no acceptable step was
    /// found within the configured budget.
    fn search(
        &self,
        direction: &Array1<f64>,
        guess: &Array1<f64>,
        target: &Measurement,
        jacobian: &Array2<f64>,
        residual: &Array1<f64>,
        evaluator: &mut dyn Evaluate,
        sink: &mut dyn ResultSink,
    ) -> Result<Option<LineSearchStep>>;
}

/// Sufficient-decrease lower bound: a candidate step of length `alpha` is
/// acceptable when its residual norm does not exceed
/// `0.5*r·r + c*alpha*(Jᵗr)·d`.
pub(crate) fn sufficient_decrease_bound(
    residual: &Array1<f64>,
    slope: f64,
    alpha: f64,
    c: f64,
) -> f64 {
    0.5 * residual.dot(residual) + c * alpha * slope
}

/// Directional derivative `(Jᵗr)·d` of the residual norm at the current
/// guess.
pub(crate) fn directional_slope(
    jacobian: &Array2<f64>,
    residual: &Array1<f64>,
    direction: &Array1<f64>,
) -> f64 {
    jacobian.t().dot(residual).dot(direction)
}

/// Residual norms of a batch of trial evaluations against the target.
///
/// Errored evaluations and non-finite norms yield `None`; they are skipped
/// by the window logic, never treated as numeric data.
pub(crate) fn candidate_norms(
    evaluations: &[Evaluation],
    target: &Measurement,
    target_data: &Array1<f64>,
) -> Result<Vec<Option<f64>>> {
    let mut norms = Vec::with_capacity(evaluations.len());

    for evaluation in evaluations {
        match evaluation {
            Evaluation::Error(_) => norms.push(None),
            Evaluation::Success(measurement) => {
                let residual = measurement.resampled_to(target)? - target_data;
                let norm = 0.5 * residual.dot(&residual);
                norms.push(norm.is_finite().then_some(norm));
            }
        }
    }

    Ok(norms)
}

/// Index and value of the smallest usable norm, if any.
pub(crate) fn minimum_norm(norms: &[Option<f64>]) -> Option<(usize, f64)> {
    norms
        .iter()
        .enumerate()
        .filter_map(|(i, norm)| norm.map(|n| (i, n)))
        .fold(None, |best, (i, n)| match best {
            Some((_, bn)) if bn <= n => best,
            _ => Some((i, n)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_sufficient_decrease_bound() {
        let residual = array![3.0, 4.0];
        // 0.5 * 25 + 1e-3 * 0.5 * (-10) = 12.5 - 0.005
        let bound = sufficient_decrease_bound(&residual, -10.0, 0.5, 1e-3);
        assert_relative_eq!(bound, 12.495, epsilon = 1e-12);
    }

    #[test]
    fn test_directional_slope_is_negative_for_descent() {
        let jacobian = array![[1.0, 0.0], [0.0, 1.0]];
        let residual = array![1.0, 2.0];
        // Gauss-Newton direction for the identity Jacobian is -r.
        let slope = directional_slope(&jacobian, &residual, &array![-1.0, -2.0]);
        assert!(slope < 0.0);
    }

    #[test]
    fn test_minimum_norm_skips_missing_entries() {
        let norms = vec![None, Some(2.0), Some(1.0), None, Some(3.0)];
        assert_eq!(minimum_norm(&norms), Some((2, 1.0)));

        let empty: Vec<Option<f64>> = vec![None, None];
        assert_eq!(minimum_norm(&empty), None);
    }

    #[test]
    fn test_minimum_norm_prefers_earliest_on_ties() {
        let norms = vec![Some(1.0), Some(1.0)];
        assert_eq!(minimum_norm(&norms), Some((0, 1.0)));
    }
}
