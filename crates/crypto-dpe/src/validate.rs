//! Gate between untrusted input and the encryption engine.

use crate::config::{EngineConfig, DEFAULT_MAX_VECTOR_NORM_SQUARED};
use crate::error::DpeError;
use crate::snapshot::Snapshot;

/// A vector that passed [`VectorValidator::validate`] against `snapshot`.
///
/// Only the validator constructs it, so the engine never sees unchecked input
/// and always encrypts under the snapshot the input was checked against.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedVector<'a> {
    values: &'a [f64],
    snapshot: &'a Snapshot,
}

impl<'a> ValidatedVector<'a> {
    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VectorValidator {
    max_norm_squared: f64,
}

impl Default for VectorValidator {
    fn default() -> Self {
        Self {
            max_norm_squared: DEFAULT_MAX_VECTOR_NORM_SQUARED,
        }
    }
}

impl VectorValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_norm_squared: config.max_vector_norm_squared,
        }
    }

    pub fn validate<'a>(
        &self,
        vector: &'a [f64],
        snapshot: &'a Snapshot,
    ) -> Result<ValidatedVector<'a>, DpeError> {
        if vector.len() != snapshot.dimension() {
            return Err(DpeError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: vector.len(),
            });
        }
        let mut norm_squared = 0.0;
        for (index, value) in vector.iter().enumerate() {
            if !value.is_finite() {
                return Err(DpeError::malformed(format!(
                    "vector element {index} is invalid (NaN or Inf)"
                )));
            }
            norm_squared += value * value;
        }
        // an overflowing sum is +Inf and fails this check too
        if norm_squared > self.max_norm_squared {
            return Err(DpeError::malformed("vector magnitude too large"));
        }
        Ok(ValidatedVector { values: vector, snapshot })
    }
}
