//! Owner of the current configuration snapshot.
//!
//! Readers clone an `Arc<Snapshot>` and keep it for the whole request.
//! Rotates generate the new key without holding any lock, then take the
//! rotate mutex to assign the version, persist the blob and swap the pointer.
//! That last step runs on its own task so a cancelled caller cannot persist
//! a snapshot without installing it. A failed persist leaves the previous
//! snapshot in place.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use storage_config::SharedStorage;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::error::DpeError;
use crate::rng::SharedEntropy;
use crate::snapshot::{PersistedSnapshot, Snapshot, SnapshotParams};
use crate::transform::TransformKey;

/// Fields of a rotate request after payload decoding. `None` keeps the
/// previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RotateRequest {
    pub dimension: Option<i64>,
    pub scaling_factor: Option<f64>,
    pub approximation_factor: Option<f64>,
}

/// Result of a successful rotate.
#[derive(Debug, Clone)]
pub struct RotateOutcome {
    pub snapshot: Arc<Snapshot>,
    /// Operator-facing diagnostics, such as the large-matrix memory warning.
    pub warnings: Vec<String>,
}

pub struct ConfigManager {
    config: EngineConfig,
    storage: SharedStorage,
    entropy: SharedEntropy,
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
    rotate_lock: Arc<Mutex<()>>,
}

impl ConfigManager {
    /// Build a manager and restore whatever snapshot `storage` holds.
    pub async fn open(
        config: EngineConfig,
        storage: SharedStorage,
        entropy: SharedEntropy,
    ) -> Result<Self, DpeError> {
        config.validate()?;
        let manager = Self {
            config,
            storage,
            entropy,
            current: Arc::new(RwLock::new(None)),
            rotate_lock: Arc::new(Mutex::new(())),
        };
        if let Some(blob) = manager.storage.get().await? {
            let snapshot = restore(Zeroizing::new(blob)).await?;
            info!(
                dimension = snapshot.dimension(),
                version = snapshot.version(),
                key_id = %snapshot.key_id(),
                "restored persisted configuration"
            );
            manager.store(Some(Arc::new(snapshot)));
        }
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot in effect right now.
    pub fn current(&self) -> Result<Arc<Snapshot>, DpeError> {
        self.load().ok_or(DpeError::Unconfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.load().is_some()
    }

    /// Merge `request` over `previous` (or the configured defaults) and
    /// validate the result.
    pub fn resolve(
        &self,
        request: &RotateRequest,
        previous: Option<&Snapshot>,
    ) -> Result<SnapshotParams, DpeError> {
        let dimension = match (request.dimension, previous) {
            (Some(requested), _) => self.check_dimension(requested)?,
            (None, Some(previous)) => previous.dimension(),
            (None, None) => {
                return Err(DpeError::invalid_dimension(
                    "dimension is required on the first rotate",
                ))
            }
        };
        let params = SnapshotParams {
            dimension,
            scaling_factor: request.scaling_factor.unwrap_or_else(|| {
                previous.map_or(self.config.default_scaling_factor, Snapshot::scaling_factor)
            }),
            approximation_factor: request.approximation_factor.unwrap_or_else(|| {
                previous.map_or(
                    self.config.default_approximation_factor,
                    Snapshot::approximation_factor,
                )
            }),
        };
        params.validate(self.config.max_dimension)?;
        Ok(params)
    }

    fn check_dimension(&self, requested: i64) -> Result<usize, DpeError> {
        usize::try_from(requested)
            .ok()
            .filter(|d| (1..=self.config.max_dimension).contains(d))
            .ok_or_else(|| {
                DpeError::invalid_dimension(format!(
                    "dimension {requested} must be between 1 and {}",
                    self.config.max_dimension
                ))
            })
    }

    /// Install a new snapshot with a freshly generated transform key.
    pub async fn rotate(&self, request: RotateRequest) -> Result<RotateOutcome, DpeError> {
        let previous = self.load();
        let params = self.resolve(&request, previous.as_deref())?;
        drop(previous);

        let mut warnings = Vec::new();
        if let Some(warning) = self.config.memory_warning(params.dimension) {
            warn!(dimension = params.dimension, "{warning}");
            warnings.push(warning);
        }

        let entropy = Arc::clone(&self.entropy);
        let dimension = params.dimension;
        let key = tokio::task::spawn_blocking(move || {
            TransformKey::generate(dimension, entropy.as_ref())
        })
        .await
        .map_err(|e| DpeError::Task(e.to_string()))??;

        let guard = Arc::clone(&self.rotate_lock).lock_owned().await;
        let commit = tokio::spawn(commit(
            guard,
            Arc::clone(&self.storage),
            Arc::clone(&self.current),
            params,
            key,
        ));
        let snapshot = commit
            .await
            .map_err(|e| DpeError::Task(e.to_string()))??;
        Ok(RotateOutcome { snapshot, warnings })
    }

    /// Reload from storage after the host reports an external change.
    ///
    /// Returns whether the current snapshot was replaced. A blob older than
    /// the in-memory snapshot, or carrying the same version and key, is ignored.
    pub async fn invalidate(&self) -> Result<bool, DpeError> {
        let Some(blob) = self.storage.get().await? else {
            debug!("invalidate found no persisted configuration, keeping current");
            return Ok(false);
        };
        let blob = Zeroizing::new(blob);
        let record = PersistedSnapshot::from_bytes(&blob)?;
        if !supersedes(self.load().as_deref(), record.version, &record.key_id) {
            debug!(version = record.version, "persisted configuration is not newer");
            return Ok(false);
        }
        let snapshot = tokio::task::spawn_blocking(move || record.into_snapshot())
            .await
            .map_err(|e| DpeError::Task(e.to_string()))??;

        let _guard = self.rotate_lock.lock().await;
        // a rotate may have landed while the matrix was being rebuilt
        if !supersedes(
            self.load().as_deref(),
            snapshot.version(),
            snapshot.key_id(),
        ) {
            return Ok(false);
        }
        info!(
            version = snapshot.version(),
            key_id = %snapshot.key_id(),
            "reloaded configuration from storage"
        );
        self.store(Some(Arc::new(snapshot)));
        Ok(true)
    }

    fn load(&self) -> Option<Arc<Snapshot>> {
        load(&self.current)
    }

    fn store(&self, snapshot: Option<Arc<Snapshot>>) {
        store(&self.current, snapshot);
    }
}

/// Assign the next version, persist and swap, all while holding `_guard`.
async fn commit(
    _guard: OwnedMutexGuard<()>,
    storage: SharedStorage,
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
    params: SnapshotParams,
    key: TransformKey,
) -> Result<Arc<Snapshot>, DpeError> {
    let version = load(&current).map_or(0, |s| s.version()) + 1;
    let snapshot = Arc::new(Snapshot::new(version, params, key)?);
    let blob = Zeroizing::new(snapshot.encode()?);
    if let Err(err) = storage.put(&blob).await {
        warn!(version, error = %err, "failed to persist rotated configuration");
        return Err(err.into());
    }
    store(&current, Some(Arc::clone(&snapshot)));
    info!(
        dimension = snapshot.dimension(),
        scaling_factor = snapshot.scaling_factor(),
        approximation_factor = snapshot.approximation_factor(),
        version,
        key_id = %snapshot.key_id(),
        "rotated transform configuration"
    );
    Ok(snapshot)
}

/// Whether a stored snapshot `(version, key_id)` should replace `current`.
///
/// Higher versions win. At equal versions a different key wins too: two
/// processes rotated concurrently and storage holds the one that persisted last.
fn supersedes(current: Option<&Snapshot>, version: u64, key_id: &str) -> bool {
    current.map_or(true, |current| {
        version > current.version() || (version == current.version() && key_id != current.key_id())
    })
}

fn load(current: &RwLock<Option<Arc<Snapshot>>>) -> Option<Arc<Snapshot>> {
    current
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn store(current: &RwLock<Option<Arc<Snapshot>>>, snapshot: Option<Arc<Snapshot>>) {
    *current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
}

async fn restore(blob: Zeroizing<Vec<u8>>) -> Result<Snapshot, DpeError> {
    tokio::task::spawn_blocking(move || Snapshot::decode(&blob))
        .await
        .map_err(|e| DpeError::Task(e.to_string()))?
}
