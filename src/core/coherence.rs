//! Mutual coherence of loading columns and its Welch feasibility floor.

use ndarray::Array2;

use crate::linalg::safe_normalize_columns;

/// Mutual coherence of the columns of `ct`.
///
/// `mu(C) = max_{i != j} |<c_i, c_j>| / (||c_i|| ||c_j||)`. Zero columns
/// contribute nothing. A matrix with fewer than two columns has coherence 0.
pub fn compute_coherence(ct: &Array2<f64>) -> f64 {
    let normed = safe_normalize_columns(ct);
    let gram = normed.t().dot(&normed);
    let n = gram.nrows();

    let mut worst = 0.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            worst = worst.max(gram[[i, j]].abs());
        }
    }
    worst
}

/// Welch lower bound on the coherence of `n_neurons` unit vectors in
/// `d_latent` dimensions. Zero when the vectors can be mutually orthogonal.
pub fn coherence_floor(d_latent: usize, n_neurons: usize) -> f64 {
    if n_neurons <= d_latent || d_latent == 0 {
        return 0.0;
    }
    let n = n_neurons as f64;
    let d = d_latent as f64;
    ((n - d) / (d * (n - 1.0))).sqrt()
}
