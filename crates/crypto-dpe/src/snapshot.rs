//! Immutable configuration snapshots and their persisted form.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::config::MAX_DIMENSION;
use crate::error::DpeError;
use crate::rng::SEED_LEN;
use crate::transform::{fingerprint, TransformKey};

/// Effective, validated rotate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotParams {
    pub dimension: usize,
    pub scaling_factor: f64,
    pub approximation_factor: f64,
}

impl SnapshotParams {
    pub fn validate(&self, max_dimension: usize) -> Result<(), DpeError> {
        if self.dimension == 0 || self.dimension > max_dimension {
            return Err(DpeError::invalid_dimension(format!(
                "dimension {} must be between 1 and {max_dimension}",
                self.dimension
            )));
        }
        if !(self.scaling_factor.is_finite() && self.scaling_factor > 0.0) {
            return Err(DpeError::invalid_config(format!(
                "scaling_factor must be positive (got {})",
                self.scaling_factor
            )));
        }
        if !(self.approximation_factor.is_finite() && self.approximation_factor >= 0.0) {
            return Err(DpeError::invalid_config(format!(
                "approximation_factor must be non-negative (got {})",
                self.approximation_factor
            )));
        }
        Ok(())
    }
}

/// One version of the engine configuration together with its transform key.
pub struct Snapshot {
    version: u64,
    params: SnapshotParams,
    key: TransformKey,
}

impl Snapshot {
    pub fn new(version: u64, params: SnapshotParams, key: TransformKey) -> Result<Self, DpeError> {
        if key.dimension() != params.dimension {
            return Err(DpeError::KeyGeneration(format!(
                "transform key dimension {} does not match configured dimension {}",
                key.dimension(),
                params.dimension
            )));
        }
        Ok(Self {
            version,
            params,
            key,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn params(&self) -> SnapshotParams {
        self.params
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn scaling_factor(&self) -> f64 {
        self.params.scaling_factor
    }

    pub fn approximation_factor(&self) -> f64 {
        self.params.approximation_factor
    }

    pub fn key_id(&self) -> &str {
        self.key.key_id()
    }

    pub fn key(&self) -> &TransformKey {
        &self.key
    }

    /// Serialize into the blob handed to the configuration store.
    pub fn encode(&self) -> Result<Vec<u8>, DpeError> {
        let record = PersistedSnapshot {
            version: self.version,
            dimension: self.params.dimension,
            scaling_factor: self.params.scaling_factor,
            approximation_factor: self.params.approximation_factor,
            seed: STANDARD.encode(self.key.seed()),
            key_id: self.key.key_id().to_string(),
        };
        let bytes = serde_json::to_vec(&record)
            .map_err(|e| DpeError::StorageFailure(format!("encode configuration: {e}")))?;
        Ok(bytes)
    }

    /// Rebuild a snapshot from a persisted blob, regenerating the matrix.
    pub fn decode(bytes: &[u8]) -> Result<Self, DpeError> {
        PersistedSnapshot::from_bytes(bytes)?.into_snapshot()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("params", &self.params)
            .field("key_id", &self.key.key_id())
            .finish()
    }
}

/// Wire form of a snapshot. Parsing it is cheap; [`Self::into_snapshot`]
/// pays for the matrix.
#[derive(Serialize, Deserialize)]
pub(crate) struct PersistedSnapshot {
    pub(crate) version: u64,
    pub(crate) dimension: usize,
    pub(crate) scaling_factor: f64,
    pub(crate) approximation_factor: f64,
    seed: String,
    pub(crate) key_id: String,
}

impl Drop for PersistedSnapshot {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl PersistedSnapshot {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, DpeError> {
        let record: Self = serde_json::from_slice(bytes)
            .map_err(|e| corrupt(format!("unreadable configuration blob: {e}")))?;
        record
            .params()
            .validate(MAX_DIMENSION)
            .map_err(|e| corrupt(format!("persisted configuration rejected: {e}")))?;
        Ok(record)
    }

    pub(crate) fn params(&self) -> SnapshotParams {
        SnapshotParams {
            dimension: self.dimension,
            scaling_factor: self.scaling_factor,
            approximation_factor: self.approximation_factor,
        }
    }

    pub(crate) fn into_snapshot(self) -> Result<Snapshot, DpeError> {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(self.seed.as_bytes())
                .map_err(|e| corrupt(format!("decode seed: {e}")))?,
        );
        let seed: Zeroizing<[u8; SEED_LEN]> = Zeroizing::new(
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| corrupt(format!("seed must be {SEED_LEN} bytes (got {})", decoded.len())))?,
        );
        if fingerprint(&seed, self.dimension) != self.key_id {
            return Err(corrupt("key id does not match persisted seed"));
        }
        let key = TransformKey::from_seed(&seed, self.dimension)?;
        Snapshot::new(self.version, self.params(), key)
    }
}

fn corrupt(detail: impl Into<String>) -> DpeError {
    DpeError::StorageFailure(detail.into())
}
