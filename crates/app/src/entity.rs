//! Runtime entities — a named, typed, ordered set of components.

use std::sync::Arc;

use serde_json::{Map, Value};

use homehub_domain::address::Address;
use homehub_domain::auth::Context;
use homehub_domain::entity::coupling::StateView;
use homehub_domain::entity::{EntitySnapshot, EntityType};
use homehub_domain::error::HubError;

use crate::component::DynComponent;

pub struct Entity {
    name: String,
    entity_type: EntityType,
    components: Vec<Arc<dyn DynComponent>>,
    settings: Map<String, Value>,
}

impl Entity {
    #[must_use]
    pub fn builder(name: impl Into<String>, entity_type: EntityType) -> EntityBuilder {
        EntityBuilder {
            entity: Self {
                name: name.into(),
                entity_type,
                components: Vec::new(),
                settings: Map::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    #[must_use]
    pub fn settings(&self) -> &Map<String, Value> {
        &self.settings
    }

    /// Components in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &Arc<dyn DynComponent>> {
        self.components.iter()
    }

    /// Address of `component` on this entity.
    #[must_use]
    pub fn address(&self, component: &str) -> Address {
        Address::new(&self.name, component)
    }

    /// # Errors
    ///
    /// Returns [`HubError::ComponentNotFound`] with the dotted address.
    pub fn component(&self, name: &str) -> Result<&Arc<dyn DynComponent>, HubError> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| HubError::ComponentNotFound(self.address(name).to_string()))
    }

    /// Invoke `method` on `component`, without any coupling.
    ///
    /// # Errors
    ///
    /// [`HubError::ComponentNotFound`] when the component or the method is
    /// unknown, plus anything the component's handler returns.
    pub async fn call_method(
        &self,
        component: &str,
        method: &str,
        target: &Value,
        context: &Context,
    ) -> Result<Value, HubError> {
        self.component(component)?
            .call(method, target, context)
            .await
    }

    #[must_use]
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            name: self.name.clone(),
            entity_type: self.entity_type,
            components: self.components.iter().map(|c| c.snapshot()).collect(),
            settings: self.settings.clone(),
        }
    }
}

impl StateView for Entity {
    fn state_of(&self, component: &str) -> Option<Value> {
        self.component(component).ok().map(|c| c.state())
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("entity_type", &self.entity_type)
            .field(
                "components",
                &self.components.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[must_use]
pub struct EntityBuilder {
    entity: Entity,
}

impl EntityBuilder {
    pub fn settings(mut self, settings: Map<String, Value>) -> Self {
        self.entity.settings = settings;
        self
    }

    /// Append a component. A later component with the same name replaces
    /// the earlier one in place.
    pub fn component(mut self, component: Arc<dyn DynComponent>) -> Self {
        match self
            .entity
            .components
            .iter_mut()
            .find(|c| c.name() == component.name())
        {
            Some(existing) => *existing = component,
            None => self.entity.components.push(component),
        }
        self
    }

    pub fn build(self) -> Entity {
        self.entity
    }
}
