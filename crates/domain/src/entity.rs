//! Entity — a named device composed of components.
//!
//! The domain side of an entity is its [`EntityType`], the declarative
//! [`EntitySpec`] it is built from, the [coupling](coupling) table that ties
//! its components together, and the serializable [`EntitySnapshot`].

pub mod coupling;
mod snapshot;
mod spec;

pub use snapshot::{ComponentSnapshot, EntitySnapshot};
pub use spec::{Binding, ComponentSpec, EntitySpec};

use serde::{Deserialize, Serialize};

/// Device category of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Switch,
    Lamp,
    DimmableLamp,
    RgbLamp,
    Blinds,
    InputSelector,
    /// Built by a custom builder; no coupling.
    Composed,
}

impl EntityType {
    /// Type tag used in declarative specs.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Switch => "switch",
            Self::Lamp => "lamp",
            Self::DimmableLamp => "dimmable_lamp",
            Self::RgbLamp => "rgb_lamp",
            Self::Blinds => "blinds",
            Self::InputSelector => "input_selector",
            Self::Composed => "composed",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
