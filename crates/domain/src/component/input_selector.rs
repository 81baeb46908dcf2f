//! Input source selector (e.g. `hdmi1`).

use serde_json::Value;

use super::{Behavior, ComponentKind, MethodTable};
use crate::error::ValidationError;

pub struct InputSelector;

impl Behavior for InputSelector {
    type State = String;

    const KIND: ComponentKind = ComponentKind::InputSelector;

    fn initial_state() -> String {
        String::new()
    }

    fn methods() -> MethodTable<String> {
        METHODS
    }
}

const METHODS: MethodTable<String> = &[("set", set)];

#[allow(clippy::ptr_arg)]
fn set(_: &String, target: &Value) -> Result<String, ValidationError> {
    target
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| ValidationError::WrongType {
            expected: "string",
            got: target.to_string(),
        })
}
