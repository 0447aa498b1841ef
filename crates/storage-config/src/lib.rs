//! Persisted-configuration store contract for the DPE secrets engine.
//!
//! The host's secret-storage backend hands the engine a single opaque slot:
//! one blob that can be read back and replaced wholesale. Everything the
//! engine knows about its configuration lives inside that blob.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{ConfigStorage, FsConfigStore, InMemoryConfigStore, SharedStorage};
