//! Gain search that scales a loading matrix to a target SNR under a firing-rate ceiling.
//!
//! The search runs in three phases:
//!
//! 1. **Bracket up**: double the upper gain until the SNR passes the target,
//!    stops improving, or the configuration turns singular.
//! 2. **Bracket down**: halve the lower gain until the SNR falls under the target.
//! 3. **Bisect** on a log scale. Every candidate is rate-capped per neuron,
//!    its bias refit, and its SNR scored. The closest candidate so far is kept,
//!    so a target that the ceiling puts out of reach still yields the best
//!    achievable result.
//!
//! Only a search in which no candidate could be scored at all is an error.

use core::fmt;
use core::str::FromStr;

use ndarray::{Array1, Array2};
use tracing::{debug, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpikeError};
use crate::gain::{adjust_gain, adjust_gain_at_mean_rate};
use crate::rates::{check_model_shapes, MeanRateMatcher, RateMatcher};
use crate::snr::SnrMetric;

const BRACKET_ROUNDS: usize = 10;
const SINGULAR_SHRINK: f64 = 0.8;
const MIN_RELATIVE_WIDTH: f64 = 1e-6;

/// What to favour once some neurons hit the rate ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Priority {
    /// Refit the bias so every neuron keeps the target mean rate.
    Mean,
    /// Push capped neurons' peak rates onto the ceiling.
    #[default]
    Max,
}

impl FromStr for Priority {
    type Err = SpikeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Priority::Mean),
            "max" => Ok(Priority::Max),
            other => Err(SpikeError::invalid(format!(
                "priority must be 'mean' or 'max', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Mean => f.write_str("mean"),
            Priority::Max => f.write_str("max"),
        }
    }
}

/// Search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CalibrationConfig {
    pub priority: Priority,
    /// Bisection rounds.
    pub max_iter: usize,
    /// Accepted relative SNR error, in (0, 1).
    pub tolerance: f64,
    /// Initial lower gain of the bracket.
    pub min_gain: f64,
    /// Initial upper gain of the bracket.
    pub max_gain: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Max,
            max_iter: 40,
            tolerance: 0.1,
            min_gain: 0.5,
            max_gain: 1.0,
        }
    }
}

impl CalibrationConfig {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_gain_range(mut self, min_gain: f64, max_gain: f64) -> Self {
        self.min_gain = min_gain;
        self.max_gain = max_gain;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(SpikeError::invalid("max_iter must be positive"));
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(SpikeError::invalid(format!(
                "tolerance must be in (0, 1), got {}",
                self.tolerance
            )));
        }
        let finite_positive = |g: f64| g > 0.0 && g.is_finite();
        if !finite_positive(self.min_gain) || !finite_positive(self.max_gain) {
            return Err(SpikeError::invalid(format!(
                "gains must be positive, got [{}, {}]",
                self.min_gain, self.max_gain
            )));
        }
        if self.min_gain > self.max_gain {
            return Err(SpikeError::invalid(format!(
                "min_gain {} exceeds max_gain {}",
                self.min_gain, self.max_gain
            )));
        }
        Ok(())
    }
}

/// Rates and SNR the calibration aims for.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationTarget {
    /// Mean firing rate per bin.
    pub target_rate: f64,
    /// Hard per-neuron ceiling on the firing rate per bin.
    pub rate_ceiling: f64,
    /// Target SNR in dB. Must be non-zero: errors are measured relative to it.
    pub target_snr: f64,
}

impl CalibrationTarget {
    pub fn new(target_rate: f64, rate_ceiling: f64, target_snr: f64) -> Self {
        Self {
            target_rate,
            rate_ceiling,
            target_snr,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_rate > 0.0) || !self.target_rate.is_finite() {
            return Err(SpikeError::invalid(format!(
                "target rate must be positive, got {}",
                self.target_rate
            )));
        }
        if !(self.rate_ceiling > 0.0) {
            return Err(SpikeError::invalid(format!(
                "rate ceiling must be positive, got {}",
                self.rate_ceiling
            )));
        }
        if self.target_rate > self.rate_ceiling {
            return Err(SpikeError::invalid(format!(
                "target rate {} exceeds rate ceiling {}",
                self.target_rate, self.rate_ceiling
            )));
        }
        if self.target_snr == 0.0 || !self.target_snr.is_finite() {
            return Err(SpikeError::invalid(format!(
                "target SNR must be finite and non-zero, got {}",
                self.target_snr
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Outcome {
    /// The SNR is within tolerance of the target.
    Converged,
    /// The target was out of reach; the closest candidate is returned.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    BracketUp,
    BracketDown,
    Bisect,
}

/// One gain the search evaluated. `snr` is `None` when the configuration was singular.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchStep {
    pub phase: SearchPhase,
    pub gain: f64,
    pub snr: Option<f64>,
    pub capped: usize,
}

/// Result of a calibration: a rescaled loading matrix and the bias fit against it.
#[derive(Debug, Clone)]
pub struct Calibration {
    /// Loading matrix, neurons x latent.
    pub loading: Array2<f64>,
    pub bias: Array1<f64>,
    pub snr: f64,
    /// Per-neuron gain applied to the input loading matrix.
    pub gains: Array1<f64>,
    pub outcome: Outcome,
    /// Bisection rounds used.
    pub iterations: usize,
    pub trace: Vec<SearchStep>,
}

#[derive(Debug, Clone)]
struct Candidate {
    gains: Array1<f64>,
    bias: Array1<f64>,
    snr: f64,
    capped: usize,
}

/// Scales loading matrices to a target SNR.
///
/// `S` scores a configuration, `R` refits the bias to a mean rate.
pub struct Calibrator<S, R = MeanRateMatcher> {
    config: CalibrationConfig,
    snr: S,
    matcher: R,
}

impl<S: SnrMetric> Calibrator<S, MeanRateMatcher> {
    pub fn new(config: CalibrationConfig, snr: S) -> Self {
        Self {
            config,
            snr,
            matcher: MeanRateMatcher,
        }
    }
}

impl<S: SnrMetric, R: RateMatcher> Calibrator<S, R> {
    pub fn with_matcher<R2: RateMatcher>(self, matcher: R2) -> Calibrator<S, R2> {
        Calibrator {
            config: self.config,
            snr: self.snr,
            matcher,
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Rescale `loading` (neurons x latent) so the SNR of the trajectory `x`
    /// matches `target.target_snr` within the configured relative tolerance.
    ///
    /// The injected SNR metric must be non-decreasing in a uniform gain; the
    /// bracketing and bisection rely on it.
    pub fn calibrate(
        &self,
        x: &Array2<f64>,
        loading: &Array2<f64>,
        bias: &Array1<f64>,
        target: &CalibrationTarget,
    ) -> Result<Calibration> {
        self.config.validate()?;
        target.validate()?;
        let ct = loading.t().to_owned();
        check_model_shapes(x, &ct, bias)?;

        let tgt = target.target_snr;
        let mut trace = Vec::new();

        // Phase 1: grow the upper bound until it overshoots the target.
        let mut max_gain = self.config.max_gain;
        let mut prev_snr = f64::NEG_INFINITY;
        for _ in 0..BRACKET_ROUNDS {
            match self.probe(x, &ct, bias, max_gain, target.target_rate) {
                Ok(snr) => {
                    trace.push(step(SearchPhase::BracketUp, max_gain, Some(snr), 0));
                    if snr > tgt || snr < prev_snr {
                        break;
                    }
                    prev_snr = snr;
                    max_gain *= 2.0;
                }
                Err(e) if e.is_singular() => {
                    trace.push(step(SearchPhase::BracketUp, max_gain, None, 0));
                    max_gain *= SINGULAR_SHRINK;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // Phase 2: shrink the lower bound until it undershoots the target.
        let mut min_gain = self.config.min_gain;
        let mut prev_snr = f64::INFINITY;
        for _ in 0..BRACKET_ROUNDS {
            match self.probe(x, &ct, bias, min_gain, target.target_rate) {
                Ok(snr) => {
                    trace.push(step(SearchPhase::BracketDown, min_gain, Some(snr), 0));
                    if snr < tgt || snr > prev_snr {
                        break;
                    }
                    prev_snr = snr;
                }
                Err(e) if e.is_singular() => {
                    trace.push(step(SearchPhase::BracketDown, min_gain, None, 0));
                }
                Err(e) => return Err(e),
            }
            min_gain *= 0.5;
        }
        debug!(min_gain, max_gain, "gain bracket");

        // Phase 3: log-scale bisection.
        let mut best: Option<Candidate> = None;
        let mut curr_bias = bias.clone();
        let mut iterations = 0;

        for i in 0..self.config.max_iter {
            iterations = i + 1;
            let gain = (min_gain * max_gain).sqrt();

            let cand = match self.candidate(x, &ct, &curr_bias, gain, target) {
                Ok(c) => c,
                Err(e) if e.is_singular() => {
                    debug!(gain, error = %e, "singular candidate; shrinking upper bound");
                    trace.push(step(SearchPhase::Bisect, gain, None, 0));
                    max_gain = gain;
                    continue;
                }
                Err(e) => return Err(e),
            };

            trace.push(step(SearchPhase::Bisect, gain, Some(cand.snr), cand.capped));
            debug!(
                iteration = i,
                gain,
                snr = cand.snr,
                capped = cand.capped,
                "bisection candidate"
            );

            let improves = best
                .as_ref()
                .map_or(true, |b| (cand.snr - tgt).abs() < (b.snr - tgt).abs());
            if improves {
                best = Some(cand.clone());
            }

            let rel_err = (cand.snr - tgt).abs() / tgt.abs();
            if rel_err <= self.config.tolerance {
                info!(iterations, snr = cand.snr, rel_err, "calibration converged");
                return Ok(Calibration {
                    loading: (&ct * &cand.gains).reversed_axes(),
                    bias: cand.bias,
                    snr: cand.snr,
                    gains: cand.gains,
                    outcome: Outcome::Converged,
                    iterations,
                    trace,
                });
            }

            curr_bias = cand.bias.clone();
            if cand.snr < tgt {
                min_gain = gain;
            } else {
                max_gain = gain;
            }

            // Every neuron capped below the candidate: the effective gain is
            // capped_max. Tighten the upper bound to it unless that would
            // invert the bracket.
            let capped_max = cand.gains.fold(f64::NEG_INFINITY, |m, &g| m.max(g));
            if capped_max < gain && capped_max > min_gain {
                max_gain = max_gain.min(capped_max);
            }

            if (max_gain - min_gain) / min_gain < MIN_RELATIVE_WIDTH {
                debug!(iterations, "search bracket exhausted");
                break;
            }
        }

        let Some(best) = best else {
            return Err(SpikeError::Convergence { target_snr: tgt });
        };

        warn!(
            target_snr = tgt,
            best_snr = best.snr,
            "could not reach target SNR; using best solution found"
        );
        let loading_t = &ct * &best.gains;
        let (bias, snr) = match self.config.priority {
            Priority::Mean => {
                let (b, _) = self
                    .matcher
                    .match_rate(x, &loading_t, &best.bias, target.target_rate)?;
                let snr = self.snr.evaluate(x, &loading_t, &b)?;
                (b, snr)
            }
            Priority::Max => (best.bias, best.snr),
        };

        Ok(Calibration {
            loading: loading_t.reversed_axes(),
            bias,
            snr,
            gains: best.gains,
            outcome: Outcome::BestEffort,
            iterations,
            trace,
        })
    }

    // SNR at a uniform gain with the bias refit to the target rate.
    fn probe(
        &self,
        x: &Array2<f64>,
        ct: &Array2<f64>,
        bias: &Array1<f64>,
        gain: f64,
        target_rate: f64,
    ) -> Result<f64> {
        let scaled = ct * gain;
        let (b, _) = self.matcher.match_rate(x, &scaled, bias, target_rate)?;
        self.snr.evaluate(x, &scaled, &b)
    }

    fn candidate(
        &self,
        x: &Array2<f64>,
        ct: &Array2<f64>,
        bias: &Array1<f64>,
        gain: f64,
        target: &CalibrationTarget,
    ) -> Result<Candidate> {
        match self.config.priority {
            Priority::Mean => {
                let adj = adjust_gain_at_mean_rate(
                    &self.matcher,
                    x,
                    ct,
                    bias,
                    gain,
                    target.target_rate,
                    target.rate_ceiling,
                )?;
                let snr = self.snr.evaluate(x, &(ct * &adj.gains), &adj.bias)?;
                Ok(Candidate {
                    capped: adj.capped_count(),
                    gains: adj.gains,
                    bias: adj.bias,
                    snr,
                })
            }
            Priority::Max => {
                let adj = adjust_gain(
                    &self.matcher,
                    x,
                    ct,
                    bias,
                    gain,
                    target.target_rate,
                    target.rate_ceiling,
                )?;
                let capped = adj.capped_count();
                let scaled = ct * &adj.gains;
                let (b, _) = self
                    .matcher
                    .match_rate(x, &scaled, bias, target.target_rate)?;

                // The refit above can lift capped peaks back over the ceiling;
                // cap again against the refit bias and keep that bias.
                let again = adjust_gain(
                    &self.matcher,
                    x,
                    &scaled,
                    &b,
                    1.0,
                    target.target_rate,
                    target.rate_ceiling,
                )?;
                let gains = adj.gains * &again.gains;
                let snr = self.snr.evaluate(x, &(ct * &gains), &again.bias)?;
                Ok(Candidate {
                    gains,
                    bias: again.bias,
                    snr,
                    capped,
                })
            }
        }
    }
}

fn step(phase: SearchPhase, gain: f64, snr: Option<f64>, capped: usize) -> SearchStep {
    SearchStep {
        phase,
        gain,
        snr,
        capped,
    }
}

/// Calibrate with the default mean-rate matcher.
pub fn calibrate<S: SnrMetric>(
    x: &Array2<f64>,
    loading: &Array2<f64>,
    bias: &Array1<f64>,
    target: &CalibrationTarget,
    snr: S,
    config: CalibrationConfig,
) -> Result<Calibration> {
    Calibrator::new(config, snr).calibrate(x, loading, bias, target)
}
