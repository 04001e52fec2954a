use thiserror::Error;

/// Everything that can go wrong while synthesizing or calibrating observations.
///
/// Only [`SpikeError::Singular`] is recoverable: the calibrator treats it as a
/// signal to shrink its search bracket. Every other variant is a contract
/// violation or the terminal convergence failure.
#[derive(Debug, Error)]
pub enum SpikeError {
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(
        "coherence target {target} is below the feasibility floor {floor:.4} \
         (sqrt((neurons - latent) / (latent * (neurons - 1))))"
    )]
    CoherenceInfeasible { target: f64, floor: f64 },

    #[error("numerically singular configuration: {0}")]
    Singular(String),

    #[error("failed to find a solution for target SNR {target_snr} dB")]
    Convergence { target_snr: f64 },
}

impl SpikeError {
    pub fn is_singular(&self) -> bool {
        matches!(self, SpikeError::Singular(_))
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        SpikeError::Shape(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SpikeError::InvalidParameter(msg.into())
    }

    pub(crate) fn singular(msg: impl Into<String>) -> Self {
        SpikeError::Singular(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SpikeError>;
