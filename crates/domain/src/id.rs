//! Opaque identifiers handed out by the kernel.
//!
//! Events, bus listeners and store callbacks are tagged with a random UUID
//! so callers can refer to them (and remove them) without holding a
//! reference. The type parameter only keeps the kinds apart.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Random identifier of a `T`.
pub struct Id<T> {
    uuid: Uuid,
    _kind: PhantomData<fn() -> T>,
}

/// Marker for event-bus listener registrations.
#[derive(Debug)]
pub enum Listener {}

/// Marker for reactive-store callback registrations.
#[derive(Debug)]
pub enum StoreCallback {}

pub type EventId = Id<crate::event::Event>;
pub type ListenerId = Id<Listener>;
pub type CallbackId = Id<StoreCallback>;

impl<T> Id<T> {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual impls: deriving would require the same bounds on `T`.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.uuid)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uuid.fmt(f)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self::from_uuid)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.uuid.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_generate_distinct_ids() {
        assert_ne!(ListenerId::new(), ListenerId::new());
    }

    #[test]
    fn should_parse_displayed_id() {
        let id = CallbackId::new();
        let parsed: CallbackId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn should_serialize_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let id = EventId::from_uuid(uuid);
        assert_eq!(
            serde_json::to_value(id).unwrap(),
            serde_json::Value::String(uuid.to_string())
        );
        let back: EventId = serde_json::from_value(serde_json::to_value(id).unwrap()).unwrap();
        assert_eq!(back.as_uuid(), uuid);
    }

    #[test]
    fn should_reject_malformed_id() {
        assert!("not-a-uuid".parse::<ListenerId>().is_err());
    }
}
