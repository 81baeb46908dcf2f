//! Demo formatters, registered as plain functions.

use serde_json::Value;

use homehub_domain::error::{HubError, ValidationError};

fn wrong_type(expected: &'static str, value: &Value) -> HubError {
    ValidationError::WrongType {
        expected,
        got: value.to_string(),
    }
    .into()
}

/// Upper-case a string value.
pub(crate) fn upper(value: Value) -> Result<Value, HubError> {
    match value {
        Value::String(text) => Ok(Value::String(text.to_uppercase())),
        other => Err(wrong_type("string", &other)),
    }
}

/// Negate a boolean, or mirror a 0–100 percentage.
pub(crate) fn invert(value: Value) -> Result<Value, HubError> {
    match &value {
        Value::Bool(on) => Ok(Value::Bool(!on)),
        Value::Number(n) => match n.as_f64() {
            Some(pct) if (0.0..=100.0).contains(&pct) => Ok(Value::from(100.0 - pct)),
            _ => Err(wrong_type("percentage", &value)),
        },
        _ => Err(wrong_type("boolean or percentage", &value)),
    }
}
