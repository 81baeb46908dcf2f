//! Dimmer level, clamped to `0..=100`.

use serde_json::Value;

use super::{Behavior, ComponentKind, MethodTable, clamp_percent, number};
use crate::error::ValidationError;

/// Brightness percentage facet.
pub struct Brightness;

impl Behavior for Brightness {
    type State = u8;

    const KIND: ComponentKind = ComponentKind::Brightness;

    fn initial_state() -> u8 {
        0
    }

    fn methods() -> MethodTable<u8> {
        METHODS
    }
}

const METHODS: MethodTable<u8> = &[("set", set), ("increase", increase), ("decrease", decrease)];

fn set(_: &u8, target: &Value) -> Result<u8, ValidationError> {
    Ok(clamp_percent(number(target)?))
}

fn increase(current: &u8, target: &Value) -> Result<u8, ValidationError> {
    Ok(clamp_percent(f64::from(*current) + number(target)?))
}

fn decrease(current: &u8, target: &Value) -> Result<u8, ValidationError> {
    Ok(clamp_percent(f64::from(*current) - number(target)?))
}
