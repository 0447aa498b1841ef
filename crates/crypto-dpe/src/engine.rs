//! Scale-and-Perturb encryption: `c = s · M · v + λ`.
//!
//! `λ` is drawn uniformly from the d-ball of radius `s · β / NOISE_RADIUS_DIVISOR`:
//! a standard normal vector fixes the direction and `R · x^(1/d)`, `x ~ U(0, 1)`,
//! fixes the length. Every call seeds a new generator from the entropy source;
//! the engine keeps no noise between calls.

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::DpeError;
use crate::rng::{SecureRng, SharedEntropy};
use crate::validate::ValidatedVector;

/// Noise radius is `s · β / NOISE_RADIUS_DIVISOR`.
///
/// For unit plaintexts the relative noise is `β / 8`, which keeps the cosine
/// drift at β = 2 near `0.95 · 0.0625 / 1.0625 ≈ 0.056`.
pub const NOISE_RADIUS_DIVISOR: f64 = 8.0;

/// Encrypted vector together with the snapshot that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
    values: Vec<f64>,
    version: u64,
    key_id: String,
}

impl Ciphertext {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Version of the snapshot used for encryption.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Radius of the noise ball for scaling factor `s` and approximation factor `β`.
#[must_use]
pub fn noise_radius(scaling_factor: f64, approximation_factor: f64) -> f64 {
    scaling_factor * approximation_factor / NOISE_RADIUS_DIVISOR
}

/// Draw one perturbation vector of length `dimension`.
pub fn sample_noise(
    rng: &mut SecureRng,
    dimension: usize,
    scaling_factor: f64,
    approximation_factor: f64,
) -> Result<Zeroizing<Vec<f64>>, DpeError> {
    let mut noise = Zeroizing::new(vec![0.0; dimension]);
    let radius = noise_radius(scaling_factor, approximation_factor);
    if radius == 0.0 || dimension == 0 {
        return Ok(noise);
    }
    rng.fill_normal(&mut noise);
    let direction_norm = noise.iter().map(|x| x * x).sum::<f64>().sqrt();
    if !(direction_norm.is_finite() && direction_norm > 0.0) {
        return Err(DpeError::RngFailure(
            "noise direction has zero norm".into(),
        ));
    }
    let length = radius * rng.uniform().powf(1.0 / dimension as f64);
    let scale = length / direction_norm;
    noise.iter_mut().for_each(|x| *x *= scale);
    Ok(noise)
}

/// Stateless SAP encryptor.
#[derive(Clone)]
pub struct Encryptor {
    entropy: SharedEntropy,
}

impl Encryptor {
    pub fn new(entropy: SharedEntropy) -> Self {
        Self { entropy }
    }

    /// Encrypt `input` under the snapshot it was validated against.
    pub fn encrypt(&self, input: ValidatedVector<'_>) -> Result<Ciphertext, DpeError> {
        let snapshot = input.snapshot();
        let dimension = snapshot.dimension();
        let scaling_factor = snapshot.scaling_factor();

        let mut rng = SecureRng::from_entropy(self.entropy.as_ref())?;
        let noise = sample_noise(
            &mut rng,
            dimension,
            scaling_factor,
            snapshot.approximation_factor(),
        )?;

        let mut rotated = Zeroizing::new(vec![0.0; dimension]);
        snapshot.key().matrix().apply(input.values(), &mut rotated);

        let mut values = Vec::with_capacity(dimension);
        for (index, (r, n)) in rotated.iter().zip(noise.iter()).enumerate() {
            let value = scaling_factor * r + n;
            if !value.is_finite() {
                return Err(DpeError::NonFiniteCiphertext { index });
            }
            values.push(value);
        }

        debug!(
            dimension,
            version = snapshot.version(),
            key_id = %snapshot.key_id(),
            "encrypted vector"
        );
        Ok(Ciphertext {
            values,
            version: snapshot.version(),
            key_id: snapshot.key_id().to_string(),
        })
    }
}
