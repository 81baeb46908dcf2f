//! Cross-component coupling of composite devices.
//!
//! Each composite [`EntityType`] owns a static rule table keyed by the
//! component being changed. Given the state that component is about to
//! commit and a view of its siblings, a rule yields at most one
//! [`FollowUp`] call on a sibling. Follow-ups are plain method calls: they
//! are never coupled again, so one invocation produces a bounded set of
//! side effects.

use serde_json::Value;

use super::EntityType;
use crate::color::Color;

pub const SWITCH: &str = "switch";
pub const BRIGHTNESS: &str = "brightness";
pub const COLOR: &str = "color";

/// Brightness a lamp jumps to when switched on while fully dimmed.
pub const FULL_BRIGHTNESS: u8 = 100;

/// A method call that must run on a sibling component.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub component: &'static str,
    pub method: &'static str,
    pub target: Value,
}

impl FollowUp {
    fn new(component: &'static str, method: &'static str, target: Value) -> Self {
        Self {
            component,
            method,
            target,
        }
    }
}

/// Read access to the committed state of an entity's components.
pub trait StateView {
    fn state_of(&self, component: &str) -> Option<Value>;
}

/// Derive a follow-up from the source component's proposed state.
pub type Rule = fn(&Value, &dyn StateView) -> Option<FollowUp>;

/// `(source component, rule)` pairs.
pub type RuleTable = &'static [(&'static str, Rule)];

const DIMMABLE: RuleTable = &[
    (SWITCH, switch_drives_brightness),
    (BRIGHTNESS, brightness_drives_switch),
];

const RGB: RuleTable = &[
    (SWITCH, switch_drives_brightness),
    (BRIGHTNESS, brightness_drives_switch),
    (COLOR, color_drives_switch),
];

impl EntityType {
    /// Coupling rules of this device type.
    #[must_use]
    pub fn coupling_rules(self) -> RuleTable {
        match self {
            Self::DimmableLamp => DIMMABLE,
            Self::RgbLamp => RGB,
            Self::Switch | Self::Lamp | Self::Blinds | Self::InputSelector | Self::Composed => &[],
        }
    }
}

/// Every follow-up caused by `component` moving to `proposed`, in table order.
#[must_use]
pub fn follow_ups(
    entity_type: EntityType,
    component: &str,
    proposed: &Value,
    view: &dyn StateView,
) -> Vec<FollowUp> {
    entity_type
        .coupling_rules()
        .iter()
        .filter(|(source, _)| *source == component)
        .filter_map(|(_, rule)| rule(proposed, view))
        .collect()
}

fn is_on(view: &dyn StateView) -> bool {
    view.state_of(SWITCH)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn brightness(view: &dyn StateView) -> u64 {
    view.state_of(BRIGHTNESS)
        .and_then(|v| v.as_u64())
        .unwrap_or(0)
}

fn switch_drives_brightness(proposed: &Value, view: &dyn StateView) -> Option<FollowUp> {
    match proposed.as_bool()? {
        true if brightness(view) == 0 => Some(FollowUp::new(
            BRIGHTNESS,
            "set",
            Value::from(FULL_BRIGHTNESS),
        )),
        false if brightness(view) != 0 => Some(FollowUp::new(BRIGHTNESS, "set", Value::from(0))),
        _ => None,
    }
}

fn brightness_drives_switch(proposed: &Value, view: &dyn StateView) -> Option<FollowUp> {
    let level = proposed.as_u64()?;
    match (level, is_on(view)) {
        (0, true) => Some(FollowUp::new(SWITCH, "turn_off", Value::Null)),
        (1.., false) => Some(FollowUp::new(SWITCH, "turn_on", Value::Null)),
        _ => None,
    }
}

fn color_drives_switch(proposed: &Value, view: &dyn StateView) -> Option<FollowUp> {
    let color: Color = serde_json::from_value(proposed.clone()).ok()?;
    match (color == Color::BLACK, is_on(view)) {
        (true, true) => Some(FollowUp::new(SWITCH, "turn_off", Value::Null)),
        (false, false) => Some(FollowUp::new(SWITCH, "turn_on", Value::Null)),
        _ => None,
    }
}
