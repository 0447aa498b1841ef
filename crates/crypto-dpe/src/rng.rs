//! Secure randomness for key generation and per-request noise.
//!
//! Entropy comes from an [`EntropySource`] and is expanded with ChaCha20.
//! Production code uses [`OsEntropy`]; tests may plug in [`SeededEntropy`],
//! which is reproducible but still a cryptographic stream.

use std::sync::{Arc, Mutex};

use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use zeroize::Zeroizing;

use crate::error::DpeError;

/// Length of every generator seed, in bytes (256-bit).
pub const SEED_LEN: usize = 32;

pub trait EntropySource: Send + Sync {
    /// Fill `dest` with entropy, or fail with [`DpeError::RngFailure`].
    fn fill(&self, dest: &mut [u8]) -> Result<(), DpeError>;
}

/// Shared pointer helper for engine components.
pub type SharedEntropy = Arc<dyn EntropySource>;

/// Operating-system entropy.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), DpeError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| DpeError::RngFailure(e.to_string()))
    }
}

/// Deterministic ChaCha20 entropy for tests.
pub struct SeededEntropy {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededEntropy {
    pub fn new(seed: [u8; SEED_LEN]) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_seed(seed)),
        }
    }

    pub fn from_u64(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl EntropySource for SeededEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), DpeError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| DpeError::RngFailure(e.to_string()))?;
        rng.fill_bytes(dest);
        Ok(())
    }
}

/// ChaCha20 stream used to draw floats.
pub struct SecureRng {
    inner: ChaCha20Rng,
}

impl SecureRng {
    /// Seed a fresh stream from `source`.
    pub fn from_entropy(source: &dyn EntropySource) -> Result<Self, DpeError> {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        source.fill(&mut seed[..])?;
        Ok(Self::from_seed(&seed))
    }

    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            inner: ChaCha20Rng::from_seed(*seed),
        }
    }

    /// `n` floats drawn uniformly from `[0, 1)`.
    ///
    /// Batch form of [`SecureRng::uniform`] for callers and tests that want a
    /// whole buffer. Encryption and key generation draw one value at a time
    /// from the same stream through `uniform` and [`SecureRng::fill_normal`].
    pub fn floats(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.uniform()).collect()
    }

    pub fn uniform(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Overwrite `dest` with independent standard normal samples.
    pub fn fill_normal(&mut self, dest: &mut [f64]) {
        for value in dest.iter_mut() {
            *value = StandardNormal.sample(&mut self.inner);
        }
    }
}
