//! Synthetic latent trajectories (timepoints x latent), standardized per column.

use ndarray::Array2;

use crate::error::{Result, SpikeError};
use crate::linalg::standardize_columns;
use crate::prng::Prng;

/// Independent Gaussian AR(1) processes, `z_t = phi z_{t-1} + e_t`.
///
/// `phi` must lie in (-1, 1). Each process starts from its stationary law.
pub fn ar1_trajectory(
    n_timepoints: usize,
    d_latent: usize,
    phi: f64,
    rng: &mut Prng,
) -> Result<Array2<f64>> {
    if !(phi > -1.0 && phi < 1.0) {
        return Err(SpikeError::invalid(format!(
            "AR(1) coefficient must be in (-1, 1), got {phi}"
        )));
    }
    if n_timepoints < 2 || d_latent == 0 {
        return Err(SpikeError::shape(format!(
            "need at least 2 timepoints and 1 latent dimension, got {n_timepoints}x{d_latent}"
        )));
    }

    let innovation = (1.0 - phi * phi).sqrt();
    let mut x = Array2::<f64>::zeros((n_timepoints, d_latent));
    for k in 0..d_latent {
        let mut z = rng.next_gaussian();
        for t in 0..n_timepoints {
            x[[t, k]] = z;
            z = phi * z + innovation * rng.next_gaussian();
        }
    }
    Ok(standardize_columns(&x)?.data)
}

/// A point circling the origin of a 2-D latent space `cycles` times, starting
/// at `phase` radians.
pub fn rotating_trajectory(n_timepoints: usize, cycles: f64, phase: f64) -> Result<Array2<f64>> {
    if n_timepoints < 3 {
        return Err(SpikeError::shape(format!(
            "need at least 3 timepoints, got {n_timepoints}"
        )));
    }
    let x = Array2::from_shape_fn((n_timepoints, 2), |(t, k)| {
        let angle = phase + 2.0 * core::f64::consts::PI * cycles * t as f64 / n_timepoints as f64;
        if k == 0 {
            angle.cos()
        } else {
            angle.sin()
        }
    });
    Ok(standardize_columns(&x)?.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn assert_standard(x: &Array2<f64>) {
        let mean = x.mean_axis(Axis(0)).unwrap();
        let std = x.std_axis(Axis(0), 0.0);
        for k in 0..x.ncols() {
            assert!(mean[k].abs() < 1e-8, "mean {}", mean[k]);
            assert!((std[k] - 1.0).abs() < 1e-6, "std {}", std[k]);
        }
    }

    #[test]
    fn ar1_is_standardized_and_autocorrelated() {
        let mut rng = Prng::new(13);
        let x = ar1_trajectory(2000, 3, 0.95, &mut rng).unwrap();
        assert_eq!(x.dim(), (2000, 3));
        assert_standard(&x);

        let lag1: f64 = (1..2000).map(|t| x[[t, 0]] * x[[t - 1, 0]]).sum::<f64>() / 1999.0;
        assert!(lag1 > 0.8, "lag-1 autocorrelation {lag1}");
    }

    #[test]
    fn ar1_rejects_explosive_coefficient() {
        let mut rng = Prng::new(1);
        assert!(ar1_trajectory(100, 2, 1.0, &mut rng).is_err());
    }

    #[test]
    fn rotation_is_standardized() {
        let x = rotating_trajectory(360, 3.0, 0.4).unwrap();
        assert_standard(&x);
    }
}
