//! Read-only views of entities handed to transports and broadcast streams.

use serde::Serialize;
use serde_json::{Map, Value};

use super::EntityType;
use crate::component::ComponentKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub kind: ComponentKind,
    pub state: Value,
    pub methods: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub name: String,
    pub entity_type: EntityType,
    pub components: Vec<ComponentSnapshot>,
    pub settings: Map<String, Value>,
}

impl EntitySnapshot {
    /// Current state of one component.
    #[must_use]
    pub fn state_of(&self, component: &str) -> Option<&Value> {
        self.components
            .iter()
            .find(|c| c.name == component)
            .map(|c| &c.state)
    }
}
