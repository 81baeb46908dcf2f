//! On/off switch.

use serde_json::Value;

use super::{Behavior, ComponentKind, MethodTable};
use crate::error::ValidationError;

/// Boolean on/off facet.
pub struct Switch;

impl Behavior for Switch {
    type State = bool;

    const KIND: ComponentKind = ComponentKind::Switch;

    fn initial_state() -> bool {
        false
    }

    fn methods() -> MethodTable<bool> {
        METHODS
    }
}

const METHODS: MethodTable<bool> = &[
    ("turn_on", turn_on),
    ("turn_off", turn_off),
    ("toggle", toggle),
    ("set", set),
];

fn turn_on(_: &bool, _: &Value) -> Result<bool, ValidationError> {
    Ok(true)
}

fn turn_off(_: &bool, _: &Value) -> Result<bool, ValidationError> {
    Ok(false)
}

fn toggle(current: &bool, _: &Value) -> Result<bool, ValidationError> {
    Ok(!current)
}

fn set(_: &bool, target: &Value) -> Result<bool, ValidationError> {
    target.as_bool().ok_or_else(|| ValidationError::WrongType {
        expected: "boolean",
        got: target.to_string(),
    })
}
