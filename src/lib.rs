//! # spikesnr
//!
//! Synthetic neural spike counts with a known loading matrix, a known
//! signal-to-noise ratio and a bounded firing-rate regime, for validating
//! neural decoding and latent-inference methods against ground truth.
//!
//! Observations follow a log-linear Poisson model, `rate = exp(x C^T + b)`.
//! The interesting work happens in two places:
//!
//! - [`init`] synthesizes a loading matrix with prescribed sparsity and
//!   bounded mutual coherence.
//! - [`calibrate`] searches for the gain that brings the SNR to a target
//!   while a per-neuron ceiling caps every firing rate.
//!
//! ## Quick Start
//!
//! ```
//! use spikesnr::prelude::*;
//!
//! let mut rng = Prng::new(42);
//! let x = ar1_trajectory(400, 2, 0.9, &mut rng).unwrap();
//!
//! let cfg = ObservationConfig::default()
//!     .with_neurons(10)
//!     .with_loading_profile(0.9, 0.0)
//!     .with_target_snr(5.0)
//!     .with_schedule(CoherenceSchedule::default().with_budget(2, 50));
//! let obs = generate_observations(&x, None, &cfg, FisherSnrBound, &mut rng).unwrap();
//!
//! assert_eq!(obs.counts.dim(), (400, 10));
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialize/deserialize the configuration types
//!
//! ## Modules
//!
//! - [`projection`]: Simplex and L1-ball projections
//! - [`coherence`]: Mutual coherence and its feasibility floor
//! - [`init`]: Coherence-constrained loading matrix synthesis
//! - [`gain`]: Per-neuron rate capping
//! - [`calibrate`]: SNR calibration search
//! - [`observation`]: The full observation pipeline

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/linalg.rs"]
pub mod linalg;

#[path = "core/projection.rs"]
pub mod projection;

#[path = "core/coherence.rs"]
pub mod coherence;

#[path = "core/rates.rs"]
pub mod rates;

#[path = "core/snr.rs"]
pub mod snr;

#[path = "core/init.rs"]
pub mod init;

#[path = "core/gain.rs"]
pub mod gain;

#[path = "core/calibrate.rs"]
pub mod calibrate;

#[path = "core/latent.rs"]
pub mod latent;

#[path = "core/observation.rs"]
pub mod observation;

/// Prelude module for convenient imports.
///
/// ```
/// use spikesnr::prelude::*;
/// ```
pub mod prelude {
    pub use crate::calibrate::{
        calibrate, Calibration, CalibrationConfig, CalibrationTarget, Calibrator, Outcome,
        Priority,
    };
    pub use crate::coherence::{coherence_floor, compute_coherence};
    pub use crate::error::SpikeError;
    pub use crate::gain::{adjust_gain, adjust_gain_at_mean_rate, GainAdjustment};
    pub use crate::init::{
        synthesize_loading_matrix, synthesize_with_report, CoherenceSchedule, LoadingSynthesis,
    };
    pub use crate::latent::{ar1_trajectory, rotating_trajectory};
    pub use crate::observation::{generate_observations, ObservationConfig, Observations};
    pub use crate::prng::Prng;
    pub use crate::projection::{project_l1ball, project_simplex};
    pub use crate::rates::{firing_rates, MeanRateMatcher, RateMatcher};
    pub use crate::snr::{FisherSnrBound, SnrMetric};
}
