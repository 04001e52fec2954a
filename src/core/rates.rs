//! Log-linear Poisson rate model: `rate = exp(x * CT + b)`.
//!
//! `x` is the latent trajectory (timepoints x latent), `CT` the transposed
//! loading matrix (latent x neurons) and `b` one bias per neuron, added to
//! every timepoint row.

use ndarray::{Array1, Array2, Axis};

use crate::error::{Result, SpikeError};

pub(crate) fn check_model_shapes(x: &Array2<f64>, ct: &Array2<f64>, b: &Array1<f64>) -> Result<()> {
    let (t, d) = x.dim();
    let (dc, n) = ct.dim();
    if t == 0 || d == 0 || n == 0 {
        return Err(SpikeError::shape(format!(
            "empty model: trajectory {t}x{d}, loading^T {dc}x{n}"
        )));
    }
    if dc != d {
        return Err(SpikeError::shape(format!(
            "trajectory has {d} latent dimensions but loading^T has {dc} rows"
        )));
    }
    if b.len() != n {
        return Err(SpikeError::shape(format!(
            "bias has {} entries for {n} neurons",
            b.len()
        )));
    }
    Ok(())
}

/// Firing rate of every neuron at every timepoint (timepoints x neurons).
pub fn firing_rates(x: &Array2<f64>, ct: &Array2<f64>, b: &Array1<f64>) -> Result<Array2<f64>> {
    check_model_shapes(x, ct, b)?;
    let mut logits = x.dot(ct);
    logits += b;
    Ok(logits.mapv(f64::exp))
}

/// Largest latent projection `max_t x_t * c_n` of every neuron.
pub fn peak_projections(x: &Array2<f64>, ct: &Array2<f64>) -> Array1<f64> {
    x.dot(ct)
        .map_axis(Axis(0), |col| col.fold(f64::NEG_INFINITY, |m, &v| m.max(v)))
}

/// Largest rate of every neuron over time.
pub fn peak_rates(rates: &Array2<f64>) -> Array1<f64> {
    rates.map_axis(Axis(0), |col| col.fold(0.0f64, |m, &v| m.max(v)))
}

/// Finds a bias that brings every neuron to a target firing rate while the
/// loading directions stay fixed.
pub trait RateMatcher {
    /// Returns the new bias together with the rates it produces.
    fn match_rate(
        &self,
        x: &Array2<f64>,
        ct: &Array2<f64>,
        b: &Array1<f64>,
        target_rate: f64,
    ) -> Result<(Array1<f64>, Array2<f64>)>;
}

/// Matches the time-averaged rate of every neuron in closed form:
/// `b_n = ln(target) - ln(mean_t exp(x_t * c_n))`.
///
/// The mean of exponentials goes through a log-sum-exp, so very large gains
/// never overflow. The incoming bias is not needed and is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanRateMatcher;

impl RateMatcher for MeanRateMatcher {
    fn match_rate(
        &self,
        x: &Array2<f64>,
        ct: &Array2<f64>,
        b: &Array1<f64>,
        target_rate: f64,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        check_model_shapes(x, ct, b)?;
        if !(target_rate > 0.0) || !target_rate.is_finite() {
            return Err(SpikeError::invalid(format!(
                "target rate must be positive, got {target_rate}"
            )));
        }

        let logits = x.dot(ct);
        let ln_t = (logits.nrows() as f64).ln();
        let ln_target = target_rate.ln();

        let bias = logits.map_axis(Axis(0), |col| {
            let peak = col.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            let lse = peak + col.iter().map(|&v| (v - peak).exp()).sum::<f64>().ln();
            ln_target - (lse - ln_t)
        });
        if let Some(n) = bias.iter().position(|v| !v.is_finite()) {
            return Err(SpikeError::singular(format!(
                "bias for neuron {n} is not finite"
            )));
        }

        let rates = (logits + &bias).mapv(f64::exp);
        Ok((bias, rates))
    }
}
