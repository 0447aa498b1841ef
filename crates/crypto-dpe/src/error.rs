use storage_config::StoreError;
use thiserror::Error;

/// Failures surfaced by the DPE engine.
///
/// Validation variants never change state. `StorageFailure`, `RngFailure`,
/// `KeyGeneration`, `NonFiniteCiphertext` and `Task` fail the request only; the
/// current snapshot stays usable.
#[derive(Debug, Error)]
pub enum DpeError {
    #[error("invalid dimension: {detail}")]
    InvalidDimension { detail: String },
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },
    #[error("engine not configured - call config/rotate first")]
    Unconfigured,
    #[error("vector dimension {actual} does not match configured dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("malformed vector: {detail}")]
    MalformedVector { detail: String },
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("entropy source unavailable: {0}")]
    RngFailure(String),
    #[error("transform key generation failed: {0}")]
    KeyGeneration(String),
    #[error("encryption produced a non-finite value at index {index}")]
    NonFiniteCiphertext { index: usize },
    #[error("worker task failed: {0}")]
    Task(String),
}

impl DpeError {
    pub(crate) fn invalid_dimension(detail: impl Into<String>) -> Self {
        Self::InvalidDimension {
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedVector {
            detail: detail.into(),
        }
    }

    /// Whether the caller can fix the failure by changing the request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimension { .. }
                | Self::InvalidConfig { .. }
                | Self::Unconfigured
                | Self::DimensionMismatch { .. }
                | Self::MalformedVector { .. }
        )
    }
}

impl From<StoreError> for DpeError {
    fn from(err: StoreError) -> Self {
        Self::StorageFailure(err.to_string())
    }
}
