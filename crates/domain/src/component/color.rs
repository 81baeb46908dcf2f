//! RGB light color.

use serde_json::Value;

use super::{Behavior, ComponentKind, MethodTable};
use crate::color::Color;
use crate::error::ValidationError;

/// Color facet of an RGB light.
pub struct ColorLight;

impl Behavior for ColorLight {
    type State = Color;

    const KIND: ComponentKind = ComponentKind::Color;

    fn initial_state() -> Color {
        Color::WHITE
    }

    fn methods() -> MethodTable<Color> {
        METHODS
    }
}

const METHODS: MethodTable<Color> = &[("set", set)];

fn set(_: &Color, target: &Value) -> Result<Color, ValidationError> {
    Color::from_target(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_set_color_from_hex_target() {
        let next = ColorLight::transition("set").unwrap()(&Color::WHITE, &json!("#102030"));
        assert_eq!(next.unwrap(), Color::rgb(0x10, 0x20, 0x30));
    }

    #[test]
    fn should_reject_invalid_color() {
        let next = ColorLight::transition("set").unwrap()(&Color::WHITE, &json!(12));
        assert!(matches!(next, Err(ValidationError::InvalidColor(_))));
    }
}
