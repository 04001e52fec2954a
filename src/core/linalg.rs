//! Small dense helpers shared by the projector, initializer and SNR metric.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SpikeError};

/// Column norms below this are treated as zero columns.
pub const NORM_FLOOR: f64 = 1e-12;

/// Euclidean norm of every column.
pub fn column_norms(m: &Array2<f64>) -> Array1<f64> {
    m.map_axis(Axis(0), |col| col.dot(&col).sqrt())
}

/// Scale every column of `m` to unit norm.
///
/// Columns whose norm is below [`NORM_FLOOR`] come back as exact zeros
/// instead of NaN.
pub fn safe_normalize_columns(m: &Array2<f64>) -> Array2<f64> {
    let norms = column_norms(m);
    let mut out = m.clone();
    for (mut col, &norm) in out.axis_iter_mut(Axis(1)).zip(norms.iter()) {
        if norm < NORM_FLOOR || !norm.is_finite() {
            col.fill(0.0);
        } else {
            col.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Inverse of a symmetric positive-definite matrix via Cholesky.
///
/// Fails with [`SpikeError::Singular`] when a pivot is not strictly positive.
pub fn spd_inverse(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (n, m) = a.dim();
    if n != m {
        return Err(SpikeError::shape(format!(
            "spd_inverse needs a square matrix, got {n}x{m}"
        )));
    }

    // Lower-triangular factor, a = l * l^T.
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if !(diag > NORM_FLOOR) || !diag.is_finite() {
            return Err(SpikeError::singular(format!(
                "matrix is not positive definite (pivot {j} = {diag:e})"
            )));
        }
        let ljj = diag.sqrt();
        l[[j, j]] = ljj;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / ljj;
        }
    }

    // Invert l by forward substitution, then a^-1 = l^-T l^-1.
    let mut l_inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        l_inv[[col, col]] = 1.0 / l[[col, col]];
        for i in (col + 1)..n {
            let mut s = 0.0;
            for k in col..i {
                s -= l[[i, k]] * l_inv[[k, col]];
            }
            l_inv[[i, col]] = s / l[[i, i]];
        }
    }
    Ok(l_inv.t().dot(&l_inv))
}

/// Outcome of [`standardize_columns`].
#[derive(Debug, Clone)]
pub struct Standardized {
    pub data: Array2<f64>,
    /// Some column mean was not close to zero and has been subtracted.
    pub recentered: bool,
    /// Some column standard deviation was not close to one and has been divided out.
    pub rescaled: bool,
}

/// Bring every column to zero mean and unit (population) variance.
///
/// Columns that already satisfy the invariant are left bit-for-bit alone.
/// A constant column cannot be rescaled and is rejected.
pub fn standardize_columns(x: &Array2<f64>) -> Result<Standardized> {
    let (t, d) = x.dim();
    if t < 2 || d == 0 {
        return Err(SpikeError::shape(format!(
            "trajectory needs at least 2 timepoints and 1 latent dimension, got {t}x{d}"
        )));
    }

    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(d));
    let recentered = mean.iter().any(|m| m.abs() > 1e-8);
    let mut data = if recentered { x - &mean } else { x.clone() };

    let std = data.std_axis(Axis(0), 0.0);
    if let Some(k) = std.iter().position(|s| *s < NORM_FLOOR) {
        return Err(SpikeError::invalid(format!(
            "latent dimension {k} is constant and cannot be standardized"
        )));
    }
    let rescaled = std.iter().any(|s| (s - 1.0).abs() > 1e-8 + 1e-5);
    if rescaled {
        data /= &std;
    }

    Ok(Standardized {
        data,
        recentered,
        rescaled,
    })
}
