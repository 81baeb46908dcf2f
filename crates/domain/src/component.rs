//! Component behaviors — the pure half of a device facet.
//!
//! A behavior names a [`ComponentKind`], an initial state and a method
//! table of pure [`Transition`]s computing the next state from the current
//! one and a JSON target. Invoking the external handler and committing the
//! state is the runtime's job (`homehub-app`); nothing here performs IO.

mod blinds;
mod brightness;
mod color;
mod input_selector;
mod switch;

pub use blinds::Blinds;
pub use brightness::Brightness;
pub use color::ColorLight;
pub use input_selector::InputSelector;
pub use switch::Switch;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Pure state transition: `(current, target) → next`.
pub type Transition<T> = fn(&T, &Value) -> Result<T, ValidationError>;

/// Named method table of a behavior.
pub type MethodTable<T> = &'static [(&'static str, Transition<T>)];

/// Built-in component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Switch,
    Brightness,
    Color,
    Blinds,
    InputSelector,
}

impl ComponentKind {
    /// Conventional component name inside an entity (`lamp.switch`).
    #[must_use]
    pub fn default_name(self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Brightness => "brightness",
            Self::Color => "color",
            Self::Blinds => "blinds",
            Self::InputSelector => "input_selector",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Static description of one component behavior.
pub trait Behavior {
    /// Public state type of the component.
    type State: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    const KIND: ComponentKind;

    fn initial_state() -> Self::State;

    fn methods() -> MethodTable<Self::State>;

    /// Look up a transition by method name.
    fn transition(method: &str) -> Option<Transition<Self::State>> {
        Self::methods()
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, t)| *t)
    }
}

/// Read a numeric target.
pub(crate) fn number(target: &Value) -> Result<f64, ValidationError> {
    target.as_f64().ok_or_else(|| ValidationError::WrongType {
        expected: "number",
        got: target.to_string(),
    })
}

/// Clamp a number into the `0..=100` percentage range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn clamp_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}
