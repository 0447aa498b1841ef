//! Engine configuration and the fixed bounds it is checked against.

use serde::{Deserialize, Serialize};

use crate::error::DpeError;

/// Hard upper bound on the vector dimension; caps the O(dimension²) matrix.
pub const MAX_DIMENSION: usize = 8192;
pub const DEFAULT_SCALING_FACTOR: f64 = 1.0;
pub const DEFAULT_APPROXIMATION_FACTOR: f64 = 5.0;
/// Squared-norm ceiling for plaintext vectors.
pub const DEFAULT_MAX_VECTOR_NORM_SQUARED: f64 = 1e12;
pub const DEFAULT_MEMORY_WARNING_BYTES: u64 = 100 * 1024 * 1024;

/// Tunables for the DPE engine. Every field has a default, so an empty TOML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Largest dimension a rotate may request. Never above [`MAX_DIMENSION`].
    pub max_dimension: usize,
    /// Scaling factor used when the first rotate omits it.
    pub default_scaling_factor: f64,
    /// Approximation factor used when the first rotate omits it.
    pub default_approximation_factor: f64,
    /// Vectors whose squared norm exceeds this are rejected.
    pub max_vector_norm_squared: f64,
    /// Matrix size (bytes) above which rotate emits a memory warning.
    pub memory_warning_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dimension: MAX_DIMENSION,
            default_scaling_factor: DEFAULT_SCALING_FACTOR,
            default_approximation_factor: DEFAULT_APPROXIMATION_FACTOR,
            max_vector_norm_squared: DEFAULT_MAX_VECTOR_NORM_SQUARED,
            memory_warning_bytes: DEFAULT_MEMORY_WARNING_BYTES,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, DpeError> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| DpeError::invalid_config(format!("failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DpeError> {
        if self.max_dimension == 0 || self.max_dimension > MAX_DIMENSION {
            return Err(DpeError::invalid_config(format!(
                "max_dimension must be between 1 and {MAX_DIMENSION} (got {})",
                self.max_dimension
            )));
        }
        if !(self.default_scaling_factor.is_finite() && self.default_scaling_factor > 0.0) {
            return Err(DpeError::invalid_config(format!(
                "default_scaling_factor must be positive (got {})",
                self.default_scaling_factor
            )));
        }
        if !(self.default_approximation_factor.is_finite()
            && self.default_approximation_factor >= 0.0)
        {
            return Err(DpeError::invalid_config(format!(
                "default_approximation_factor must be non-negative (got {})",
                self.default_approximation_factor
            )));
        }
        if !(self.max_vector_norm_squared.is_finite() && self.max_vector_norm_squared > 0.0) {
            return Err(DpeError::invalid_config(format!(
                "max_vector_norm_squared must be positive (got {})",
                self.max_vector_norm_squared
            )));
        }
        Ok(())
    }

    /// Bytes held by a `dimension × dimension` f64 matrix.
    #[must_use]
    pub fn matrix_bytes(dimension: usize) -> u64 {
        (dimension as u64) * (dimension as u64) * 8
    }

    /// Warning text when a matrix of `dimension` exceeds the memory threshold.
    #[must_use]
    pub fn memory_warning(&self, dimension: usize) -> Option<String> {
        let bytes = Self::matrix_bytes(dimension);
        (bytes > self.memory_warning_bytes).then(|| {
            format!(
                "dimension {dimension} requires approx {} MiB of memory for the matrix",
                bytes / 1024 / 1024
            )
        })
    }
}
