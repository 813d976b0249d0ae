//! Dense symmetric positive-definite helpers

use crate::structs::{RegcovError, Result};
use ndarray::Array2;

/// Lower-triangular Cholesky factor `L` with `a = L Lᵀ`
///
/// # Errors
/// Returns error if `a` is not square or not positive definite
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(RegcovError::ShapeMismatch(format!(
            "Cholesky needs a square matrix, got {:?}",
            a.dim()
        )));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !(diag > 0.0 && diag.is_finite()) {
            return Err(RegcovError::NotPositiveDefinite(format!(
                "non-positive pivot {diag:.3e} at column {j}"
            )));
        }
        let pivot = diag.sqrt();
        l[[j, j]] = pivot;

        for i in (j + 1)..n {
            let mut v = a[[i, j]];
            for k in 0..j {
                v -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = v / pivot;
        }
    }
    Ok(l)
}

/// Inverse of a symmetric positive-definite matrix
///
/// # Errors
/// Returns error if `a` is not positive definite
pub fn inverse_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    let n = l.nrows();

    // L⁻¹ by forward substitution, column by column
    let mut l_inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        for i in col..n {
            let mut v = if i == col { 1.0 } else { 0.0 };
            for k in col..i {
                v -= l[[i, k]] * l_inv[[k, col]];
            }
            l_inv[[i, col]] = v / l[[i, i]];
        }
    }

    let mut inv = l_inv.t().dot(&l_inv);
    symmetrize(&mut inv);
    Ok(inv)
}

/// log det of a symmetric positive-definite matrix, `-inf` otherwise
#[must_use]
pub fn log_det_spd(a: &Array2<f64>) -> f64 {
    match cholesky(a) {
        Ok(l) => 2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>(),
        Err(_) => f64::NEG_INFINITY,
    }
}

/// Replace `a` with `(a + aᵀ) / 2`
pub fn symmetrize(a: &mut Array2<f64>) {
    let n = a.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (a[[i, j]] + a[[j, i]]);
            a[[i, j]] = v;
            a[[j, i]] = v;
        }
    }
}

/// Largest absolute deviation of `a` from the identity
#[cfg(test)]
pub(crate) fn max_identity_deviation(a: &Array2<f64>) -> f64 {
    a.indexed_iter()
        .map(|((i, j), &v)| (v - if i == j { 1.0 } else { 0.0 }).abs())
        .fold(0.0, f64::max)
}
