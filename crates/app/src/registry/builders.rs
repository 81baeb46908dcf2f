//! Default entity builders, one per built-in entity type.
//!
//! Builders only assemble components. The coupling between them is a
//! property of the [`EntityType`] and is applied by the registry at call
//! time.

use serde_json::{Map, Value};

use homehub_domain::component::{Blinds, Brightness, ColorLight, InputSelector, Switch};
use homehub_domain::entity::coupling::{BRIGHTNESS, COLOR, SWITCH};
use homehub_domain::entity::{EntitySpec, EntityType};
use homehub_domain::error::HubError;

use super::{Builder, EntityRegistry};
use crate::entity::Entity;

const BLINDS: &str = "blinds";
const INPUT_SELECTOR: &str = "input_selector";

const DEFAULTS: &[(&str, Builder)] = &[
    ("switch", switch as Builder),
    ("lamp", lamp as Builder),
    ("dimmable_lamp", dimmable_lamp as Builder),
    ("rgb_lamp", rgb_lamp as Builder),
    ("blinds", blinds as Builder),
    ("input_selector", input_selector as Builder),
];

pub(super) fn defaults() -> &'static [(&'static str, Builder)] {
    DEFAULTS
}

fn switch(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::Switch)
        .settings(settings.clone())
        .component(registry.component::<Switch>(name, spec, SWITCH)?)
        .build())
}

fn lamp(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::Lamp)
        .settings(settings.clone())
        .component(registry.component::<Switch>(name, spec, SWITCH)?)
        .build())
}

fn dimmable_lamp(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::DimmableLamp)
        .settings(settings.clone())
        .component(registry.component::<Switch>(name, spec, SWITCH)?)
        .component(registry.component::<Brightness>(name, spec, BRIGHTNESS)?)
        .build())
}

fn rgb_lamp(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::RgbLamp)
        .settings(settings.clone())
        .component(registry.component::<Switch>(name, spec, SWITCH)?)
        .component(registry.component::<Brightness>(name, spec, BRIGHTNESS)?)
        .component(registry.component::<ColorLight>(name, spec, COLOR)?)
        .build())
}

fn blinds(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::Blinds)
        .settings(settings.clone())
        .component(registry.component::<Blinds>(name, spec, BLINDS)?)
        .build())
}

fn input_selector(
    registry: &EntityRegistry,
    name: &str,
    spec: &EntitySpec,
    settings: &Map<String, Value>,
) -> Result<Entity, HubError> {
    Ok(Entity::builder(name, EntityType::InputSelector)
        .settings(settings.clone())
        .component(registry.component::<InputSelector>(name, spec, INPUT_SELECTOR)?)
        .build())
}
