//! Secret transform generation: a random orthogonal matrix expanded from a
//! 256-bit seed.
//!
//! Rows are drawn from a standard normal distribution and orthonormalized with
//! modified Gram–Schmidt followed by a second full projection pass. The second
//! pass removes the loss of orthogonality plain Gram–Schmidt accumulates at
//! large dimensions, keeping `max |M Mᵗ − I|` far below
//! [`ORTHONORMALITY_TOLERANCE`] up to [`MAX_DIMENSION`].

use std::fmt;

use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::config::MAX_DIMENSION;
use crate::error::DpeError;
use crate::rng::{EntropySource, SecureRng, SEED_LEN};

/// Largest accepted entry of `|M Mᵗ − I|`.
pub const ORTHONORMALITY_TOLERANCE: f64 = 1e-6;

const SLOW_GENERATION_DIMENSION: usize = 2048;
const MIN_RESIDUAL_NORM: f64 = 1e-8;
const MAX_ROW_REDRAWS: usize = 8;
const KEY_ID_HEX_LEN: usize = 16;

/// Square row-major matrix. Zeroed on drop.
pub struct TransformMatrix {
    dimension: usize,
    data: Vec<f64>,
}

impl TransformMatrix {
    /// Wrap raw row-major data. Only the shape is checked.
    pub fn from_row_major(dimension: usize, data: Vec<f64>) -> Result<Self, DpeError> {
        if dimension == 0 || data.len() != dimension * dimension {
            return Err(DpeError::KeyGeneration(format!(
                "expected {dimension}x{dimension} matrix data, got {} values",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    /// `out = M · input`. Both slices must have length `dimension`.
    pub fn apply(&self, input: &[f64], out: &mut [f64]) {
        debug_assert_eq!(input.len(), self.dimension);
        debug_assert_eq!(out.len(), self.dimension);
        for (slot, row) in out.iter_mut().zip(self.data.chunks_exact(self.dimension)) {
            *slot = dot(row, input);
        }
    }

    /// Largest entry of `|M Mᵗ − I|`.
    pub fn orthonormality_error(&self) -> f64 {
        let mut worst = 0.0_f64;
        for i in 0..self.dimension {
            let row_i = self.row(i);
            for j in 0..=i {
                let expected = if i == j { 1.0 } else { 0.0 };
                let deviation = (dot(row_i, self.row(j)) - expected).abs();
                if deviation.is_nan() {
                    return f64::INFINITY;
                }
                worst = worst.max(deviation);
            }
        }
        worst
    }

    pub fn check_orthonormal(&self, tolerance: f64) -> Result<(), DpeError> {
        let error = self.orthonormality_error();
        if error > tolerance {
            return Err(DpeError::KeyGeneration(format!(
                "orthonormality check failed: max deviation {error:e} exceeds {tolerance:e}"
            )));
        }
        Ok(())
    }
}

impl Drop for TransformMatrix {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for TransformMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformMatrix")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

/// Orthonormalize the rows of a row-major `dimension × dimension` buffer in place.
///
/// A row that collapses below [`MIN_RESIDUAL_NORM`] after projection is
/// redrawn from `rng`.
pub fn orthonormalize_rows(
    dimension: usize,
    data: &mut [f64],
    rng: &mut SecureRng,
) -> Result<(), DpeError> {
    if data.len() != dimension * dimension {
        return Err(DpeError::KeyGeneration(format!(
            "expected {} values, got {}",
            dimension * dimension,
            data.len()
        )));
    }
    for i in 0..dimension {
        let (done, rest) = data.split_at_mut(i * dimension);
        let row = &mut rest[..dimension];
        let mut redraws = 0;
        loop {
            for _pass in 0..2 {
                for basis in done.chunks_exact(dimension) {
                    let projection = dot(basis, row);
                    axpy(row, -projection, basis);
                }
            }
            let norm = dot(row, row).sqrt();
            if norm.is_finite() && norm > MIN_RESIDUAL_NORM {
                let inv = norm.recip();
                row.iter_mut().for_each(|value| *value *= inv);
                break;
            }
            redraws += 1;
            if redraws > MAX_ROW_REDRAWS {
                return Err(DpeError::KeyGeneration(format!(
                    "row {i} stayed linearly dependent after {MAX_ROW_REDRAWS} redraws"
                )));
            }
            debug!(row = i, norm, "redrawing degenerate row");
            rng.fill_normal(row);
        }
    }
    Ok(())
}

/// Secret transform: the seed is the persisted key material, the matrix is
/// derived from it.
pub struct TransformKey {
    seed: Zeroizing<[u8; SEED_LEN]>,
    key_id: String,
    matrix: TransformMatrix,
}

impl TransformKey {
    /// Draw a fresh seed from `source` and expand it.
    pub fn generate(dimension: usize, source: &dyn EntropySource) -> Result<Self, DpeError> {
        check_dimension(dimension)?;
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        source.fill(&mut seed[..])?;
        Self::from_seed(&seed, dimension)
    }

    /// Deterministically expand `seed` into a `dimension × dimension` orthogonal matrix.
    pub fn from_seed(seed: &[u8; SEED_LEN], dimension: usize) -> Result<Self, DpeError> {
        check_dimension(dimension)?;
        if dimension > SLOW_GENERATION_DIMENSION {
            warn!(
                dimension,
                "generating large orthogonal matrix, this can be slow"
            );
        }
        let mut rng = SecureRng::from_seed(seed);
        let mut data = vec![0.0; dimension * dimension];
        rng.fill_normal(&mut data);
        if let Err(err) = orthonormalize_rows(dimension, &mut data, &mut rng) {
            data.zeroize();
            return Err(err);
        }
        let matrix = TransformMatrix::from_row_major(dimension, data)?;
        matrix.check_orthonormal(ORTHONORMALITY_TOLERANCE)?;
        let key_id = fingerprint(seed, dimension);
        debug!(dimension, key_id = %key_id, "derived transform matrix");
        Ok(Self {
            seed: Zeroizing::new(*seed),
            key_id,
            matrix,
        })
    }

    pub fn dimension(&self) -> usize {
        self.matrix.dimension()
    }

    /// Public fingerprint of the key; safe to log.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn matrix(&self) -> &TransformMatrix {
        &self.matrix
    }

    pub(crate) fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }
}

impl fmt::Debug for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformKey")
            .field("key_id", &self.key_id)
            .field("dimension", &self.dimension())
            .finish_non_exhaustive()
    }
}

/// BLAKE3 fingerprint of a seed bound to its dimension.
pub fn fingerprint(seed: &[u8; SEED_LEN], dimension: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dpe-transform-key");
    hasher.update(seed);
    hasher.update(&(dimension as u64).to_le_bytes());
    let digest = hasher.finalize().to_hex();
    digest.as_str()[..KEY_ID_HEX_LEN].to_string()
}

fn check_dimension(dimension: usize) -> Result<(), DpeError> {
    if dimension == 0 || dimension > MAX_DIMENSION {
        return Err(DpeError::invalid_dimension(format!(
            "dimension {dimension} must be between 1 and {MAX_DIMENSION}"
        )));
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn axpy(y: &mut [f64], alpha: f64, x: &[f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}
