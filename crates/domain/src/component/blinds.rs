//! Window blinds position; `0` is fully open, `100` fully closed.

use serde_json::Value;

use super::{Behavior, ComponentKind, MethodTable, clamp_percent, number};
use crate::error::ValidationError;

const OPEN: u8 = 0;
const CLOSED: u8 = 100;

/// Blinds position facet. Out-of-range targets are rejected, not clamped.
pub struct Blinds;

impl Behavior for Blinds {
    type State = u8;

    const KIND: ComponentKind = ComponentKind::Blinds;

    fn initial_state() -> u8 {
        OPEN
    }

    fn methods() -> MethodTable<u8> {
        METHODS
    }
}

const METHODS: MethodTable<u8> = &[("set", set), ("open", open), ("close", close)];

fn open(_: &u8, _: &Value) -> Result<u8, ValidationError> {
    Ok(OPEN)
}

fn close(_: &u8, _: &Value) -> Result<u8, ValidationError> {
    Ok(CLOSED)
}

fn set(_: &u8, target: &Value) -> Result<u8, ValidationError> {
    let value = number(target)?;
    if !(f64::from(OPEN)..=f64::from(CLOSED)).contains(&value) {
        return Err(ValidationError::OutOfRange {
            value,
            min: f64::from(OPEN),
            max: f64::from(CLOSED),
        });
    }
    Ok(clamp_percent(value))
}
