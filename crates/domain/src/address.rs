//! Dotted addresses: `entity.component` and `entity.component.method`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};

/// Check that `name` can be used as one fragment of a dotted address.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidName`] when the name is empty or contains a dot.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.contains('.') {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// `entity.component` — unique across the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    entity: String,
    component: String,
}

impl Address {
    #[must_use]
    pub fn new(entity: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            component: component.into(),
        }
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.component)
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((entity, component))
                if !entity.is_empty() && !component.is_empty() && !component.contains('.') =>
            {
                Ok(Self::new(entity, component))
            }
            _ => Err(ValidationError::InvalidAddress(s.to_string())),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

/// `entity.component.method` — the target of a dotted method call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodAddress {
    pub address: Address,
    pub method: String,
}

impl FromStr for MethodAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, method) = s
            .rsplit_once('.')
            .filter(|(_, method)| !method.is_empty())
            .ok_or_else(|| ValidationError::InvalidAddress(s.to_string()))?;
        Ok(Self {
            address: address
                .parse()
                .map_err(|_| ValidationError::InvalidAddress(s.to_string()))?,
            method: method.to_string(),
        })
    }
}

impl fmt::Display for MethodAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.method)
    }
}
