//! Response assembly: engine results and errors in router form.

use crypto_dpe::{Ciphertext, DpeError, RotateOutcome};
use runtime_router::{RouterError, RouterResponse};
use serde_json::json;

use crate::payload::{FIELD_APPROXIMATION_FACTOR, FIELD_DIMENSION, FIELD_SCALING_FACTOR};

pub const FIELD_CIPHERTEXT: &str = "ciphertext";

/// Echo the effective rotate parameters. Key material never leaves the engine.
pub fn rotated(outcome: RotateOutcome) -> RouterResponse {
    let params = outcome.snapshot.params();
    RouterResponse::ok(json!({
        FIELD_DIMENSION: params.dimension,
        FIELD_SCALING_FACTOR: params.scaling_factor,
        FIELD_APPROXIMATION_FACTOR: params.approximation_factor,
    }))
    .with_diagnostics(outcome.warnings)
}

pub fn encrypted(ciphertext: Ciphertext) -> RouterResponse {
    RouterResponse::ok(json!({ FIELD_CIPHERTEXT: ciphertext.into_values() }))
}

/// Client-correctable failures become `InvalidRequest`, everything else `Internal`.
pub fn router_error(err: &DpeError) -> RouterError {
    let detail = err.to_string();
    if err.is_client_error() {
        RouterError::InvalidRequest { detail }
    } else {
        RouterError::Internal { detail }
    }
}
