//! Secrets-engine backend serving distance-preserving encryption.
//!
//! Paths:
//! - `config/rotate` (alias `config/root`): set dimension and factors, always
//!   generating a new transform key.
//! - `encrypt/vector`: encrypt one plaintext vector under the current key.
//! - `help`: describe the engine.

use std::sync::Arc;

use async_trait::async_trait;
use crypto_dpe::{ConfigManager, DpeError, EngineConfig, Encryptor, SharedEntropy, VectorValidator};
use runtime_router::{CommandRouter, RouterCommand, RouterError, RouterResponse, SessionContext};
use serde_json::{json, Value};
use storage_config::SharedStorage;
use tracing::{debug, info, warn};

pub mod payload;
pub mod response;

pub const PATH_ROTATE: &str = "config/rotate";
pub const PATH_ROOT: &str = "config/root";
pub const PATH_ENCRYPT: &str = "encrypt/vector";
pub const PATH_HELP: &str = "help";

pub const HELP: &str = "\
The DPE secrets engine encrypts embedding vectors with Scale-and-Perturb \
distance-preserving encryption. Ciphertexts keep approximate distances and \
angles, so similarity search still works on them. Configure the engine with \
config/rotate (dimension, scaling_factor, approximation_factor); every rotate \
generates a new secret transform. Encrypt with encrypt/vector.";

pub struct DpeBackend {
    manager: ConfigManager,
    encryptor: Encryptor,
    validator: VectorValidator,
}

impl DpeBackend {
    /// Open the backend, restoring any configuration held by `storage`.
    pub async fn open(
        config: EngineConfig,
        storage: SharedStorage,
        entropy: SharedEntropy,
    ) -> Result<Self, DpeError> {
        let validator = VectorValidator::new(&config);
        let encryptor = Encryptor::new(Arc::clone(&entropy));
        let manager = ConfigManager::open(config, storage, entropy).await?;
        info!(configured = manager.is_configured(), "dpe backend ready");
        Ok(Self {
            manager,
            encryptor,
            validator,
        })
    }

    pub fn manager(&self) -> &ConfigManager {
        &self.manager
    }

    /// Called by the host when the stored configuration changed underneath us.
    pub async fn invalidate(&self) -> Result<bool, DpeError> {
        self.manager.invalidate().await
    }

    async fn rotate(&self, ctx: &SessionContext, data: &Value) -> Result<RouterResponse, DpeError> {
        let request = payload::rotate_request(data)?;
        let outcome = self.manager.rotate(request).await?;
        info!(
            principal = %ctx.principal,
            trace_id = %ctx.trace_id,
            dimension = outcome.snapshot.dimension(),
            version = outcome.snapshot.version(),
            key_id = %outcome.snapshot.key_id(),
            "configuration rotated"
        );
        Ok(response::rotated(outcome))
    }

    async fn encrypt(&self, ctx: &SessionContext, data: &Value) -> Result<RouterResponse, DpeError> {
        let snapshot = self.manager.current()?;
        let vector = payload::vector(data)?;
        let encryptor = self.encryptor.clone();
        let validator = self.validator;
        let worker_snapshot = Arc::clone(&snapshot);
        let ciphertext = tokio::task::spawn_blocking(move || {
            let validated = validator.validate(&vector, &worker_snapshot)?;
            encryptor.encrypt(validated)
        })
        .await
        .map_err(|e| DpeError::Task(e.to_string()))??;

        info!(
            principal = %ctx.principal,
            trace_id = %ctx.trace_id,
            dimension = snapshot.dimension(),
            version = snapshot.version(),
            key_id = %snapshot.key_id(),
            "vector encrypted"
        );
        Ok(response::encrypted(ciphertext))
    }

    fn help() -> RouterResponse {
        RouterResponse::ok(json!({
            "help": HELP,
            "paths": [PATH_ROTATE, PATH_ROOT, PATH_ENCRYPT, PATH_HELP],
        }))
    }
}

#[async_trait]
impl CommandRouter for DpeBackend {
    async fn dispatch(
        &self,
        ctx: SessionContext,
        command: RouterCommand,
    ) -> Result<RouterResponse, RouterError> {
        let path = command.name.trim_matches('/');
        let result = match path {
            PATH_ROTATE | PATH_ROOT => self.rotate(&ctx, &command.payload).await,
            PATH_ENCRYPT => self.encrypt(&ctx, &command.payload).await,
            PATH_HELP => Ok(Self::help()),
            other => {
                return Err(RouterError::NotFound {
                    detail: format!("unsupported path '{other}'"),
                })
            }
        };
        result.map_err(|err| {
            if err.is_client_error() {
                debug!(principal = %ctx.principal, path, error = %err, "request rejected");
            } else {
                warn!(principal = %ctx.principal, path, error = %err, "request failed");
            }
            response::router_error(&err)
        })
    }
}
