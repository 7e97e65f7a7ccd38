//! Dense linear algebra helpers for the step computations.
//!
//! QR factorization and triangular solves are written directly against
//! `ndarray`; the problem sizes here (a handful of parameters) make a
//! dedicated backend unnecessary.

use crate::error::{Result, SimFitError};
use ndarray::{Array1, Array2};

/// Reduced QR factorization `A = Q·R` by modified Gram-Schmidt.
///
/// `A` must have at least as many rows as columns. `Q` is `m×n` with
/// orthonormal columns, `R` is `n×n` upper triangular with positive
/// diagonal.
///
/// # Errors
///
/// Returns a singular-matrix error when a column is (numerically) linearly
/// dependent on the previous ones.
pub(crate) fn qr_reduced(a: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
    let (m, n) = a.dim();
    if m < n {
        return Err(SimFitError::DimensionMismatch(format!(
            "QR needs at least as many rows as columns, got {}x{}",
            m, n
        )));
    }

    let scale = a.iter().map(|v| v.abs()).fold(0.0, f64::max);
    let threshold = scale.max(1.0) * 1e-13;

    let mut q = Array2::zeros((m, n));
    let mut r = Array2::zeros((n, n));

    for j in 0..n {
        let mut v = a.column(j).to_owned();

        for k in 0..j {
            let projection = q.column(k).dot(&v);
            r[[k, j]] = projection;
            v = &v - &(&q.column(k) * projection);
        }

        let norm = v.dot(&v).sqrt();
        if !norm.is_finite() || norm < threshold {
            return Err(SimFitError::SingularMatrix(format!(
                "column {} is linearly dependent",
                j
            )));
        }

        r[[j, j]] = norm;
        q.column_mut(j).assign(&(&v / norm));
    }

    Ok((q, r))
}

/// Solve `R·x = b` for upper triangular `R` by back substitution.
pub(crate) fn solve_upper_triangular(r: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = r.nrows();
    if r.ncols() != n || b.len() != n {
        return Err(SimFitError::DimensionMismatch(format!(
            "triangular solve needs square system, got {}x{} and rhs {}",
            n,
            r.ncols(),
            b.len()
        )));
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= r[[i, j]] * x[j];
        }
        if r[[i, i]] == 0.0 {
            return Err(SimFitError::SingularMatrix(
                "zero diagonal in triangular solve".to_string(),
            ));
        }
        x[i] = sum / r[[i, i]];
    }

    Ok(x)
}

/// Invert an upper triangular matrix by back substitution per unit column.
pub(crate) fn inverse_upper_triangular(r: &Array2<f64>) -> Result<Array2<f64>> {
    let n = r.nrows();
    let mut inverse = Array2::zeros((n, n));

    for j in 0..n {
        let mut e = Array1::zeros(n);
        e[j] = 1.0;
        let column = solve_upper_triangular(r, &e)?;
        inverse.column_mut(j).assign(&column);
    }

    Ok(inverse)
}
