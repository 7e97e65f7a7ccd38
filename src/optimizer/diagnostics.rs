//! Per-iteration step direction and statistical diagnostics.
//!
//! The Gauss-Newton direction and every statistic (variance, covariance,
//! correlation, standard errors, confidence intervals) are derived from one
//! QR factorization of the Jacobian, following Bates/Watts: the factor `R`
//! gives the triangular solve for the step and `(RᵗR)⁻¹` the curvature
//! approximation, so no explicit normal-equations inverse is ever formed.

use ndarray::{Array1, Array2};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::error::{Result, SimFitError};
use crate::utils::linalg::{inverse_upper_triangular, qr_reduced, solve_upper_triangular};

/// Step direction and statistics of one optimizer iteration.
#[derive(Debug, Clone)]
pub(crate) struct Diagnostics {
    /// Gauss-Newton step direction solving `R·delta = -Qᵗ·r`.
    pub step_direction: Array1<f64>,

    /// Degrees of freedom `n - p`.
    pub dof: usize,

    /// Residual mean square `S / dof` (infinite for square problems).
    pub variance: f64,

    /// `variance * (RᵗR)⁻¹`.
    pub covariance: Array2<f64>,

    /// Covariance normalized by the square roots of its diagonal.
    pub correlation: Array2<f64>,

    /// Per-parameter standard errors `sqrt(variance) * ‖R⁻¹ row‖`.
    pub std_errors: Array1<f64>,

    /// Student-t confidence interval half-widths, when a confidence level
    /// was requested and the degrees of freedom admit one.
    pub confidence_interval: Option<Array1<f64>>,
}

/// Compute the step direction and diagnostics from a Jacobian and residual.
pub(crate) fn compute(
    jacobian: &Array2<f64>,
    residual: &Array1<f64>,
    confidence: Option<f64>,
) -> Result<Diagnostics> {
    let (n, p) = jacobian.dim();
    if residual.len() != n {
        return Err(SimFitError::DimensionMismatch(format!(
            "Jacobian has {} rows but residual has {} entries",
            n,
            residual.len()
        )));
    }

    let (q, r) = qr_reduced(jacobian)?;

    let w = q.t().dot(residual);
    let step_direction = -solve_upper_triangular(&r, &w)?;

    let r_inverse = inverse_upper_triangular(&r)?;
    // (RᵗR)⁻¹ = R⁻¹ · R⁻ᵗ
    let curvature_inverse = r_inverse.dot(&r_inverse.t());

    let s = 0.5 * residual.dot(residual);
    let dof = n - p;
    let variance = if dof > 0 { s / dof as f64 } else { f64::INFINITY };

    let covariance = curvature_inverse.mapv(|v| v * variance);

    // Correlation via the normalized rows of R⁻¹ (Bates/Watts); the variance
    // factor cancels.
    let mut scaling = Array2::zeros((p, p));
    for i in 0..p {
        let diagonal = curvature_inverse[[i, i]];
        scaling[[i, i]] = if diagonal > 0.0 {
            1.0 / diagonal.sqrt()
        } else {
            0.0
        };
    }
    let l = scaling.dot(&r_inverse);
    let correlation = l.dot(&l.t());

    let sigma = variance.sqrt();
    let std_errors: Array1<f64> = (0..p)
        .map(|i| sigma * r_inverse.row(i).dot(&r_inverse.row(i)).sqrt())
        .collect();

    let confidence_interval = match confidence {
        Some(level) if dof > 0 => {
            let distribution = StudentsT::new(0.0, 1.0, dof as f64).map_err(|e| {
                SimFitError::InvalidState(format!("Student-t distribution: {}", e))
            })?;
            let quantile = distribution.inverse_cdf((1.0 + level) / 2.0);
            Some(std_errors.mapv(|e| quantile * e))
        }
        _ => None,
    };

    Ok(Diagnostics {
        step_direction,
        dof,
        variance,
        covariance,
        correlation,
        std_errors,
        confidence_interval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_step_direction_solves_the_linear_least_squares_problem() {
        // Fit residual r(x) = A·x - y at x = 0, so the Gauss-Newton step is
        // the least-squares solution of A·delta = y.
        let a = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 1.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let residual = -y.clone();

        let diagnostics = compute(&a, &residual, None).unwrap();

        assert_relative_eq!(diagnostics.step_direction[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(diagnostics.step_direction[1], 1.0, epsilon = 1e-10);
        assert_eq!(diagnostics.dof, 2);
    }

    #[test]
    fn test_covariance_matches_hand_computed_inverse() {
        let jacobian = array![[1.0, 0.0], [0.0, 2.0], [0.0, 0.0]];
        let residual = array![0.0, 0.0, 2.0];

        let diagnostics = compute(&jacobian, &residual, None).unwrap();

        // S = 2, dof = 1, variance = 2; (JᵗJ)⁻¹ = diag(1, 1/4).
        assert_relative_eq!(diagnostics.variance, 2.0, epsilon = 1e-12);
        assert_relative_eq!(diagnostics.covariance[[0, 0]], 2.0, epsilon = 1e-10);
        assert_relative_eq!(diagnostics.covariance[[1, 1]], 0.5, epsilon = 1e-10);
        assert_relative_eq!(diagnostics.covariance[[0, 1]], 0.0, epsilon = 1e-10);

        // Standard errors are the square roots of the covariance diagonal.
        assert_relative_eq!(
            diagnostics.std_errors[0],
            diagnostics.covariance[[0, 0]].sqrt(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_correlation_has_unit_diagonal() {
        let jacobian = array![[1.0, 0.5], [0.3, 2.0], [1.0, 1.0]];
        let residual = array![0.1, -0.2, 0.05];

        let diagnostics = compute(&jacobian, &residual, None).unwrap();

        assert_relative_eq!(diagnostics.correlation[[0, 0]], 1.0, epsilon = 1e-10);
        assert_relative_eq!(diagnostics.correlation[[1, 1]], 1.0, epsilon = 1e-10);
        assert_relative_eq!(
            diagnostics.correlation[[0, 1]],
            diagnostics.correlation[[1, 0]],
            epsilon = 1e-10
        );
        assert!(diagnostics.correlation[[0, 1]].abs() <= 1.0 + 1e-10);
    }

    #[test]
    fn test_confidence_interval_scales_with_the_t_quantile() {
        let jacobian = array![[1.0, 0.0], [0.0, 2.0], [0.0, 0.0], [1.0, 1.0]];
        let residual = array![0.5, -0.5, 1.0, 0.0];

        let diagnostics = compute(&jacobian, &residual, Some(0.95)).unwrap();
        let interval = diagnostics.confidence_interval.unwrap();

        // dof = 2; the 97.5% Student-t quantile at 2 dof is about 4.30.
        let ratio = interval[0] / diagnostics.std_errors[0];
        assert_relative_eq!(ratio, 4.3026, epsilon = 1e-3);
    }

    #[test]
    fn test_square_problem_has_no_confidence_interval() {
        let jacobian = array![[1.0, 0.0], [0.0, 1.0]];
        let residual = array![1.0, 1.0];

        let diagnostics = compute(&jacobian, &residual, Some(0.95)).unwrap();
        assert_eq!(diagnostics.dof, 0);
        assert!(diagnostics.variance.is_infinite());
        assert!(diagnostics.confidence_interval.is_none());
    }
}
