//! Per-neuron gain corrections that hold every peak firing rate under a ceiling.

use ndarray::{s, Array1, Array2};
use tracing::warn;

use crate::error::{Result, SpikeError};
use crate::rates::{check_model_shapes, peak_projections, peak_rates, RateMatcher};

/// Peak projections at or below this cannot be capped through the gain.
pub const PROJECTION_FLOOR: f64 = 1e-12;

/// Relative overshoot of the ceiling tolerated as rounding.
pub const CEILING_SLACK: f64 = 1e-9;

const GAIN_BISECTIONS: usize = 64;

/// Per-neuron gains that keep every peak rate under the ceiling.
#[derive(Debug, Clone)]
pub struct GainAdjustment {
    /// Trial gain for uncapped neurons, corrective gain for capped ones.
    pub gains: Array1<f64>,
    pub capped: Vec<bool>,
    /// Bias the corrective gains are exact against.
    pub bias: Array1<f64>,
    /// Peak rates at the trial gain, before any capping.
    pub peak_rates: Array1<f64>,
}

impl GainAdjustment {
    pub fn capped_count(&self) -> usize {
        self.capped.iter().filter(|&&c| c).count()
    }
}

/// Cap each neuron's peak firing rate at `rate_ceiling`.
///
/// Scales `ct` by `current_gain`, refits the bias to `target_rate` and, for
/// every neuron whose peak rate overshoots the ceiling, solves the log-linear
/// model for the gain that lands the peak exactly on it:
///
/// `g' = g + ln(ceiling / peak_rate) / peak_projection`
///
/// Neurons with a peak projection below [`PROJECTION_FLOOR`] keep the trial
/// gain and are not marked capped: no gain moves their rate.
pub fn adjust_gain<R: RateMatcher + ?Sized>(
    matcher: &R,
    x: &Array2<f64>,
    ct: &Array2<f64>,
    b: &Array1<f64>,
    current_gain: f64,
    target_rate: f64,
    rate_ceiling: f64,
) -> Result<GainAdjustment> {
    check_model_shapes(x, ct, b)?;
    if !(current_gain > 0.0) || !current_gain.is_finite() {
        return Err(SpikeError::invalid(format!(
            "trial gain must be positive, got {current_gain}"
        )));
    }
    if !(target_rate > 0.0) {
        return Err(SpikeError::invalid("target rate must be positive"));
    }
    if !(rate_ceiling > 0.0) {
        return Err(SpikeError::invalid("rate ceiling must be positive"));
    }

    let projections = peak_projections(x, ct);
    let scaled = ct * current_gain;
    let (bias, rates) = matcher.match_rate(x, &scaled, b, target_rate)?;
    let peaks = peak_rates(&rates);

    let n = ct.ncols();
    let mut gains = Array1::from_elem(n, current_gain);
    let mut capped = vec![false; n];
    let mut stuck = 0usize;

    for i in 0..n {
        if peaks[i] <= rate_ceiling {
            continue;
        }
        if projections[i] <= PROJECTION_FLOOR {
            stuck += 1;
            continue;
        }
        let corrected = current_gain + (rate_ceiling / peaks[i]).ln() / projections[i];
        gains[i] = corrected.max(0.0);
        capped[i] = true;
    }

    if stuck > 0 {
        warn!(
            neurons = stuck,
            "peak rate above ceiling but latent projection is ~0; gain left at trial value"
        );
    }

    Ok(GainAdjustment {
        gains,
        capped,
        bias,
        peak_rates: peaks,
    })
}

/// Cap each neuron's peak firing rate at `rate_ceiling` while its mean rate
/// stays at `target_rate`.
///
/// Refitting the bias after [`adjust_gain`] raises every capped neuron's rate
/// again. Here each neuron over the ceiling instead gets the largest gain in
/// `[0, current_gain]` whose rate-matched peak stays under the ceiling, found
/// by bisection through `matcher` on that neuron alone. At gain 0 the neuron
/// fires at `target_rate` everywhere, so a feasible gain always exists.
///
/// The returned bias is refit against the final gains. A peak still over the
/// ceiling after that refit is reported as [`SpikeError::Singular`].
pub fn adjust_gain_at_mean_rate<R: RateMatcher + ?Sized>(
    matcher: &R,
    x: &Array2<f64>,
    ct: &Array2<f64>,
    b: &Array1<f64>,
    current_gain: f64,
    target_rate: f64,
    rate_ceiling: f64,
) -> Result<GainAdjustment> {
    if target_rate > rate_ceiling {
        return Err(SpikeError::invalid(format!(
            "target rate {target_rate} exceeds rate ceiling {rate_ceiling}"
        )));
    }
    let trial = adjust_gain(matcher, x, ct, b, current_gain, target_rate, rate_ceiling)?;
    if trial.capped_count() == 0 {
        return Ok(trial);
    }

    let mut gains = trial.gains.clone();
    for (i, _) in trial.capped.iter().enumerate().filter(|&(_, &c)| c) {
        let column = ct.slice(s![.., i..i + 1]).to_owned();
        let bias = b.slice(s![i..i + 1]).to_owned();
        let peak_at = |gain: f64| -> Result<f64> {
            let (_, rates) = matcher.match_rate(x, &(&column * gain), &bias, target_rate)?;
            Ok(rates.fold(0.0f64, |m, &v| m.max(v)))
        };

        let (mut lo, mut hi) = (0.0, current_gain);
        for _ in 0..GAIN_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            if peak_at(mid)? <= rate_ceiling {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= 1e-12 * hi {
                break;
            }
        }
        gains[i] = lo;
    }

    let (bias, rates) = matcher.match_rate(x, &(ct * &gains), b, target_rate)?;
    let limit = rate_ceiling * (1.0 + CEILING_SLACK);
    if let Some(n) = peak_rates(&rates).iter().position(|&p| p > limit) {
        return Err(SpikeError::singular(format!(
            "neuron {n} exceeds the rate ceiling after refitting the bias"
        )));
    }

    Ok(GainAdjustment {
        gains,
        capped: trial.capped,
        bias,
        peak_rates: trial.peak_rates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{firing_rates, MeanRateMatcher};
    use ndarray::array;

    fn trajectory() -> Array2<f64> {
        Array2::from_shape_fn((120, 2), |(i, k)| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / 120.0;
            2.0f64.sqrt() * if k == 0 { phase.cos() } else { phase.sin() }
        })
    }

    #[test]
    fn uncapped_neurons_keep_trial_gain() {
        let x = trajectory();
        let ct = array![[0.1, 0.0], [0.0, 0.1]];
        let adj = adjust_gain(&MeanRateMatcher, &x, &ct, &Array1::zeros(2), 1.5, 0.01, 1.0)
            .unwrap();
        assert_eq!(adj.capped_count(), 0);
        for g in adj.gains.iter() {
            assert!((g - 1.5).abs() < 1e-12);
        }
    }

    #[test]
    fn capped_neurons_land_on_ceiling() {
        let x = trajectory();
        // Neuron 0 is strongly tuned, neuron 1 weakly.
        let ct = array![[3.0, 0.05], [0.0, 0.0]];
        let gain = 2.0;
        let ceiling = 0.05;
        let adj =
            adjust_gain(&MeanRateMatcher, &x, &ct, &Array1::zeros(2), gain, 0.01, ceiling).unwrap();

        assert!(adj.capped[0]);
        assert!(!adj.capped[1]);
        assert!(adj.gains[0] < gain);
        assert!((adj.gains[1] - gain).abs() < 1e-12);

        let rescaled = &ct * &adj.gains;
        let rates = firing_rates(&x, &rescaled, &adj.bias).unwrap();
        let peaks = peak_rates(&rates);
        assert!((peaks[0] - ceiling).abs() < 1e-9, "peak {}", peaks[0]);
        assert!(peaks[1] <= ceiling);
    }

    #[test]
    fn zero_projection_neuron_is_left_alone() {
        let x = trajectory();
        let ct = array![[0.0, 1.0], [0.0, 0.0]];
        // Target above ceiling forces the flat neuron over the cap.
        let adj =
            adjust_gain(&MeanRateMatcher, &x, &ct, &Array1::zeros(2), 1.0, 0.5, 0.4).unwrap();
        assert!(!adj.capped[0]);
        assert_eq!(adj.gains[0], 1.0);
    }

    #[test]
    fn mean_rate_capping_keeps_mean_and_ceiling() {
        let x = trajectory();
        let ct = array![[3.0, 0.05, 0.0], [0.0, 0.0, 2.0]];
        let gain = 2.0;
        let ceiling = 0.05;
        let b = Array1::zeros(3);
        let adj = adjust_gain_at_mean_rate(&MeanRateMatcher, &x, &ct, &b, gain, 0.01, ceiling)
            .unwrap();

        assert!(adj.capped[0] && adj.capped[2]);
        assert!(!adj.capped[1]);
        assert!((adj.gains[1] - gain).abs() < 1e-12);

        let rates = firing_rates(&x, &(&ct * &adj.gains), &adj.bias).unwrap();
        for m in rates.mean_axis(ndarray::Axis(0)).unwrap().iter() {
            assert!((m - 0.01).abs() < 1e-12);
        }
        let peaks = peak_rates(&rates);
        for i in [0, 2] {
            // The ceiling binds: the gain is as large as it may be.
            assert!(peaks[i] <= ceiling * (1.0 + CEILING_SLACK), "peak {}", peaks[i]);
            assert!(peaks[i] > ceiling * (1.0 - 1e-6), "peak {}", peaks[i]);
        }
    }

    #[test]
    fn plain_capping_overshoots_once_the_mean_is_restored() {
        let x = trajectory();
        let ct = array![[3.0], [0.0]];
        let b = Array1::zeros(1);
        let adj = adjust_gain(&MeanRateMatcher, &x, &ct, &b, 2.0, 0.01, 0.05).unwrap();
        let scaled = &ct * &adj.gains;
        let (_, rates) = MeanRateMatcher
            .match_rate(&x, &scaled, &Array1::zeros(1), 0.01)
            .unwrap();
        assert!(peak_rates(&rates)[0] > 0.05);
    }

    #[test]
    fn rejects_non_positive_inputs() {
        let x = trajectory();
        let ct = array![[1.0], [0.0]];
        let b = Array1::zeros(1);
        assert!(adjust_gain(&MeanRateMatcher, &x, &ct, &b, 0.0, 0.01, 1.0).is_err());
        assert!(adjust_gain(&MeanRateMatcher, &x, &ct, &b, 1.0, -0.01, 1.0).is_err());
        assert!(adjust_gain(&MeanRateMatcher, &x, &ct, &b, 1.0, 0.01, 0.0).is_err());
    }
}
