//! End-to-end generation of Poisson spike counts with a controlled SNR.

use ndarray::{Array1, Array2};
use tracing::{info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::calibrate::{CalibrationConfig, CalibrationTarget, Calibrator, Outcome, Priority};
use crate::coherence::{coherence_floor, compute_coherence};
use crate::error::{Result, SpikeError};
use crate::init::{synthesize_with_report, CoherenceSchedule};
use crate::linalg::standardize_columns;
use crate::prng::Prng;
use crate::rates::{firing_rates, MeanRateMatcher, RateMatcher};
use crate::snr::SnrMetric;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ObservationConfig {
    pub n_neurons: usize,
    /// Mean firing rate per bin.
    pub target_rate: f64,
    /// Per-neuron ceiling on the firing rate per bin.
    pub rate_ceiling: f64,
    /// Coherence target for a synthesized loading matrix.
    pub coherence: f64,
    /// Probability that a synthesized loading entry is zeroed.
    pub sparsity: f64,
    /// Target SNR in dB.
    pub target_snr: f64,
    pub calibration: CalibrationConfig,
    pub schedule: CoherenceSchedule,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            n_neurons: 100,
            target_rate: 0.01,
            rate_ceiling: 1.0,
            coherence: 0.5,
            sparsity: 0.1,
            target_snr: 10.0,
            calibration: CalibrationConfig::default().with_priority(Priority::Mean),
            schedule: CoherenceSchedule::default(),
        }
    }
}

impl ObservationConfig {
    pub fn with_neurons(mut self, n_neurons: usize) -> Self {
        self.n_neurons = n_neurons;
        self
    }

    pub fn with_rates(mut self, target_rate: f64, rate_ceiling: f64) -> Self {
        self.target_rate = target_rate;
        self.rate_ceiling = rate_ceiling;
        self
    }

    pub fn with_loading_profile(mut self, coherence: f64, sparsity: f64) -> Self {
        self.coherence = coherence;
        self.sparsity = sparsity;
        self
    }

    pub fn with_target_snr(mut self, target_snr: f64) -> Self {
        self.target_snr = target_snr;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_schedule(mut self, schedule: CoherenceSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn target(&self) -> CalibrationTarget {
        CalibrationTarget::new(self.target_rate, self.rate_ceiling, self.target_snr)
    }
}

/// Generated spike counts and the model that produced them.
#[derive(Debug, Clone)]
pub struct Observations {
    /// Spike counts, timepoints x neurons.
    pub counts: Array2<u64>,
    /// Loading matrix, neurons x latent.
    pub loading: Array2<f64>,
    pub bias: Array1<f64>,
    /// Firing rates behind `counts`, timepoints x neurons.
    pub rates: Array2<f64>,
    pub snr: f64,
    pub outcome: Outcome,
    /// Coherence of the calibrated loading matrix.
    pub coherence: f64,
    /// The standardized trajectory the counts were generated from.
    pub trajectory: Array2<f64>,
}

/// Generate Poisson observations of the latent trajectory `x` (timepoints x latent).
///
/// When `loading` is `None` a loading matrix is synthesized with the
/// configured coherence and sparsity. The trajectory is standardized first
/// if its columns are not zero-mean and unit-variance.
pub fn generate_observations<S: SnrMetric>(
    x: &Array2<f64>,
    loading: Option<&Array2<f64>>,
    cfg: &ObservationConfig,
    snr: S,
    rng: &mut Prng,
) -> Result<Observations> {
    let (_, d_latent) = x.dim();
    let n = cfg.n_neurons;
    if n == 0 {
        return Err(SpikeError::invalid("n_neurons must be positive"));
    }
    if !(0.0..=1.0).contains(&cfg.sparsity) {
        return Err(SpikeError::invalid(format!(
            "sparsity must be in [0, 1], got {}",
            cfg.sparsity
        )));
    }
    let target = cfg.target();
    target.validate()?;
    cfg.calibration.validate()?;

    let floor = coherence_floor(d_latent, n);
    if cfg.coherence < floor {
        return Err(SpikeError::CoherenceInfeasible {
            target: cfg.coherence,
            floor,
        });
    }
    if let Some(c) = loading {
        if c.dim() != (n, d_latent) {
            return Err(SpikeError::shape(format!(
                "loading matrix is {:?}, expected ({n}, {d_latent})",
                c.dim()
            )));
        }
    }

    let standardized = standardize_columns(x)?;
    if standardized.recentered {
        warn!("latent trajectory must have zero mean; subtracting mean");
    }
    if standardized.rescaled {
        warn!("latent trajectory must have unit variance; normalizing");
    }
    let x = standardized.data;

    let loading = match loading {
        Some(c) => c.clone(),
        None => {
            synthesize_with_report(
                d_latent,
                n,
                cfg.coherence,
                cfg.sparsity,
                &cfg.schedule,
                rng,
            )?
            .loading
        }
    };

    let ct = loading.t().to_owned();
    let (bias, _) = MeanRateMatcher.match_rate(&x, &ct, &Array1::zeros(n), cfg.target_rate)?;

    let cal = Calibrator::new(cfg.calibration, snr).calibrate(&x, &loading, &bias, &target)?;

    let loading_t = cal.loading.t().to_owned();
    let rates = firing_rates(&x, &loading_t, &cal.bias)?;
    let counts = rates.mapv(|r| rng.poisson(r));
    let coherence = compute_coherence(&loading_t);

    info!(
        neurons = n,
        timepoints = x.nrows(),
        snr = cal.snr,
        outcome = ?cal.outcome,
        spikes = counts.sum(),
        "observations generated"
    );

    Ok(Observations {
        counts,
        loading: cal.loading,
        bias: cal.bias,
        rates,
        snr: cal.snr,
        outcome: cal.outcome,
        coherence,
        trajectory: x,
    })
}
