//! Runtime command router contract shared by the secrets-engine backend and
//! its hosts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Caller identity as reported by the host, used for audit logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Principal the host authenticated.
    pub principal: String,
    /// Identifier that lets log sinks correlate host and backend spans.
    pub trace_id: Uuid,
}

impl SessionContext {
    /// Context for `principal` with a fresh trace id.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            trace_id: Uuid::new_v4(),
        }
    }
}

/// Normalized command forwarded by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterCommand {
    /// Request path (e.g., `config/rotate`, `encrypt/vector`).
    pub name: String,
    /// Raw request data.
    pub payload: Value,
}

impl RouterCommand {
    /// Construct a new router command.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Successful response emitted by the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterResponse {
    /// Status code aligned with transport-level status semantics.
    pub status_code: u16,
    /// Payload returned to the client.
    pub payload: Value,
    /// Operator-facing warnings attached to an otherwise successful response.
    pub diagnostics: Vec<String>,
}

impl RouterResponse {
    /// Convenience constructor for OK responses.
    #[must_use]
    pub const fn ok(payload: Value) -> Self {
        Self {
            status_code: 200,
            payload,
            diagnostics: Vec::new(),
        }
    }

    /// Attach diagnostics to the response.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl IntoIterator<Item = String>) -> Self {
        self.diagnostics.extend(diagnostics);
        self
    }
}

/// Router errors mapped back to the host.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterError {
    /// The request payload failed validation.
    #[error("invalid request: {detail}")]
    InvalidRequest { detail: String },
    /// The target command is not registered.
    #[error("not found: {detail}")]
    NotFound { detail: String },
    /// Any other unexpected failure.
    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl RouterError {
    /// Map the error into an HTTP-like status code for host usage.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Internal { .. } => 500,
        }
    }
}

/// Command router abstraction implemented by backends.
#[async_trait]
pub trait CommandRouter: Send + Sync {
    /// Dispatch a normalized command.
    async fn dispatch(
        &self,
        ctx: SessionContext,
        command: RouterCommand,
    ) -> Result<RouterResponse, RouterError>;
}

/// Shared pointer helper for hosts.
pub type SharedRouter = Arc<dyn CommandRouter>;
