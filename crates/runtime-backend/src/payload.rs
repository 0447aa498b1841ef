//! Lenient decoding of request data.
//!
//! Hosts do not agree on how numbers travel: some send JSON numbers, some
//! send strings, some send a whole vector as one JSON-encoded string. The
//! helpers here accept all of those and leave range checks to the engine.

use crypto_dpe::{DpeError, RotateRequest};
use serde_json::{Map, Value};

pub const FIELD_VECTOR: &str = "vector";
pub const FIELD_DIMENSION: &str = "dimension";
pub const FIELD_SCALING_FACTOR: &str = "scaling_factor";
pub const FIELD_APPROXIMATION_FACTOR: &str = "approximation_factor";

/// Decode the fields of a rotate request. Absent or `null` fields stay `None`.
pub fn rotate_request(payload: &Value) -> Result<RotateRequest, DpeError> {
    let empty = Map::new();
    let fields = match payload {
        Value::Object(fields) => fields,
        Value::Null => &empty,
        _ => {
            return Err(DpeError::InvalidConfig {
                detail: "request data must be an object".into(),
            })
        }
    };
    Ok(RotateRequest {
        dimension: present(fields, FIELD_DIMENSION).map(dimension).transpose()?,
        scaling_factor: present(fields, FIELD_SCALING_FACTOR)
            .map(|v| factor(FIELD_SCALING_FACTOR, v))
            .transpose()?,
        approximation_factor: present(fields, FIELD_APPROXIMATION_FACTOR)
            .map(|v| factor(FIELD_APPROXIMATION_FACTOR, v))
            .transpose()?,
    })
}

/// Extract the plaintext vector from an encrypt request.
///
/// Accepts an array of numbers or numeric strings, a string holding a JSON
/// array, or a one-element array wrapping such a string. `"NaN"` and `"inf"`
/// decode to their float values so the validator can reject them.
pub fn vector(payload: &Value) -> Result<Vec<f64>, DpeError> {
    let raw = payload
        .get(FIELD_VECTOR)
        .filter(|v| !v.is_null())
        .ok_or_else(|| malformed("missing required field 'vector'"))?;
    match raw {
        Value::Array(items) => match items.as_slice() {
            [Value::String(inner)] if inner.trim_start().starts_with('[') => embedded(inner),
            _ => elements(items),
        },
        Value::String(inner) => embedded(inner),
        _ => Err(malformed("vector must be an array of numbers")),
    }
}

fn embedded(raw: &str) -> Result<Vec<f64>, DpeError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => elements(&items),
        Ok(_) => Err(malformed("vector string must hold a JSON array")),
        Err(e) => Err(malformed(format!("vector string is not valid JSON: {e}"))),
    }
}

fn elements(items: &[Value]) -> Result<Vec<f64>, DpeError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            number(item).ok_or_else(|| malformed(format!("vector element {index} is not a number")))
        })
        .collect()
}

fn present<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| !v.is_null())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn dimension(value: &Value) -> Result<i64, DpeError> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if let Some(dimension) = exact {
        return Ok(dimension);
    }
    match number(value) {
        // 2^63 is exact in f64; anything at or past it cannot be an i64
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(f as i64),
        Some(f) if f.fract() == 0.0 => Err(DpeError::InvalidDimension {
            detail: format!("dimension {f} is out of range"),
        }),
        _ => Err(DpeError::InvalidDimension {
            detail: format!("dimension must be an integer (got {value})"),
        }),
    }
}

fn factor(name: &str, value: &Value) -> Result<f64, DpeError> {
    number(value).ok_or_else(|| DpeError::InvalidConfig {
        detail: format!("{name} must be a number (got {value})"),
    })
}

fn malformed(detail: impl Into<String>) -> DpeError {
    DpeError::MalformedVector {
        detail: detail.into(),
    }
}
