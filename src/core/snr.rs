//! Signal-to-noise metrics for the log-linear Poisson observation model.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SpikeError};
use crate::linalg::spd_inverse;
use crate::rates::firing_rates;

/// Scores how well the observations let one recover the latent trajectory, in dB.
///
/// The calibrator relies on one property only: for a fixed loading direction
/// the score must be non-decreasing in a uniform gain applied to `ct`.
/// Numerically singular configurations should be reported as
/// [`SpikeError::Singular`]; the calibrator recovers from those.
pub trait SnrMetric {
    fn evaluate(&self, x: &Array2<f64>, ct: &Array2<f64>, b: &Array1<f64>) -> Result<f64>;
}

impl<F> SnrMetric for F
where
    F: Fn(&Array2<f64>, &Array2<f64>, &Array1<f64>) -> Result<f64>,
{
    fn evaluate(&self, x: &Array2<f64>, ct: &Array2<f64>, b: &Array1<f64>) -> Result<f64> {
        self(x, ct, b)
    }
}

/// Cramer-Rao SNR bound from the time-averaged Fisher information.
///
/// For Poisson counts with rate `lambda_tn = exp(x_t c_n + b_n)` the Fisher
/// information about `x_t` is `sum_n lambda_tn c_n c_n^T`. Averaging over time
/// gives `J = CT diag(mean_t lambda_tn) CT^T`, and
///
/// `SNR = 10 log10(var(x) * d / tr(J^-1))`
///
/// where `var(x)` is the mean per-dimension latent variance. With the bias
/// refit to a fixed mean rate, `J` scales with the square of a uniform gain,
/// so the bound is strictly increasing in gain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FisherSnrBound;

impl SnrMetric for FisherSnrBound {
    fn evaluate(&self, x: &Array2<f64>, ct: &Array2<f64>, b: &Array1<f64>) -> Result<f64> {
        let rates = firing_rates(x, ct, b)?;
        let mean_rates = rates
            .mean_axis(Axis(0))
            .ok_or_else(|| SpikeError::shape("trajectory has no timepoints"))?;

        let weighted = ct * &mean_rates;
        let fisher = weighted.dot(&ct.t());
        let crlb = spd_inverse(&fisher)?.diag().sum();

        let d = x.ncols() as f64;
        let signal = x.var_axis(Axis(0), 0.0).mean().unwrap_or(0.0);
        let snr = 10.0 * (signal * d / crlb).log10();
        if !snr.is_finite() {
            return Err(SpikeError::singular(format!(
                "SNR is not finite (signal {signal:e}, bound {crlb:e})"
            )));
        }
        Ok(snr)
    }
}
