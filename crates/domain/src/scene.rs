//! Scene — a named bulk-state template.
//!
//! Activating a scene calls `set` on every target in declaration order.
//! Application is best-effort: a failing target is reported and the rest
//! still run, nothing is rolled back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{Address, validate_name};
use crate::error::ConfigError;

/// One `address → target` pair of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneTarget {
    pub address: Address,
    pub target: Value,
}

/// A scene as declared in configuration.
///
/// ```toml
/// [[scenes]]
/// name = "movie"
/// activate = [
///     { address = "living_room.brightness", target = 20 },
///     { address = "blinds.blinds", target = 100 },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub name: String,
    #[serde(default)]
    pub activate: Vec<SceneTarget>,
    #[serde(default)]
    pub deactivate: Vec<SceneTarget>,
}

impl SceneSpec {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for an empty or dotted name and
    /// [`ConfigError::MissingField`] when the scene activates nothing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;
        if self.activate.is_empty() {
            return Err(ConfigError::MissingField {
                item: self.name.clone(),
                field: "activate".to_string(),
            });
        }
        Ok(())
    }
}
