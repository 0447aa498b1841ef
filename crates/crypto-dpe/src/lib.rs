//! Distance-preserving encryption for embedding vectors.
//!
//! Vectors are encrypted with Scale-and-Perturb: a secret orthogonal matrix
//! `M`, a scaling factor `s` and bounded noise controlled by the
//! approximation factor `β`:
//!
//! ```text
//! ciphertext = s · M · v + λ,   ‖λ‖ ≤ s · β / 8
//! ```
//!
//! Distances and angles between ciphertexts track those between plaintexts,
//! so similarity search works on encrypted vectors. The same vector never
//! encrypts twice to the same output while `β > 0`.
//!
//! [`ConfigManager`] owns the versioned [`Snapshot`] and persists it through
//! a [`storage_config::ConfigStorage`]; [`VectorValidator`] gates input;
//! [`Encryptor`] performs the transform.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod rng;
pub mod snapshot;
pub mod transform;
pub mod validate;

pub use config::{EngineConfig, MAX_DIMENSION};
pub use engine::{Ciphertext, Encryptor};
pub use error::DpeError;
pub use manager::{ConfigManager, RotateOutcome, RotateRequest};
pub use rng::{EntropySource, OsEntropy, SeededEntropy, SharedEntropy};
pub use snapshot::{Snapshot, SnapshotParams};
pub use transform::{TransformKey, TransformMatrix};
pub use validate::{ValidatedVector, VectorValidator};
