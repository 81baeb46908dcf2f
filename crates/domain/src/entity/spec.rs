//! Declarative entity specification, as produced by the config loader.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::validate_name;
use crate::error::ConfigError;

/// One entity as declared in configuration.
///
/// ```toml
/// [[entities]]
/// name = "desk_lamp"
/// type = "dimmable_lamp"
/// control_service = "virtual"
///
/// [entities.components.switch]
/// config = { device = "desk" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Output service driving every component that does not override it.
    #[serde(default)]
    pub control_service: Option<String>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// Per-component control configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Overrides the entity's `control_service`.
    #[serde(default)]
    pub service: Option<String>,
    /// Arguments handed to the output service.
    #[serde(default)]
    pub config: Value,
    /// Formatter applied to the new state before the service sees it.
    #[serde(default)]
    pub formatter: Option<String>,
}

impl EntitySpec {
    /// Check that the entity can be addressed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for empty or dotted names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        for name in self.components.keys() {
            validate_name(name)?;
        }
        Ok(())
    }

    /// Output binding of `component`.
    ///
    /// The component's own `service` wins over the entity's
    /// `control_service`. `None` when neither is set: the component then
    /// only holds state.
    #[must_use]
    pub fn binding(&self, component: &str) -> Option<Binding<'_>> {
        let declared = self.components.get(component);
        let service = declared
            .and_then(|c| c.service.as_deref())
            .or(self.control_service.as_deref())?;
        Some(Binding {
            service,
            config: declared.map_or(&NULL, |c| &c.config),
            formatter: declared.and_then(|c| c.formatter.as_deref()),
        })
    }
}

static NULL: Value = Value::Null;

/// Resolved output binding of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding<'a> {
    pub service: &'a str,
    pub config: &'a Value,
    pub formatter: Option<&'a str>,
}
