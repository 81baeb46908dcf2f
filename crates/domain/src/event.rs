//! Event — an immutable record of something that happened.
//!
//! Events are addressed by a dot-separated [`topic`](Event::topic). The bus
//! resolves listeners by walking the topic left to right, see
//! [`Event::walk_path`].

use serde::Serialize;

use crate::auth::Context;
use crate::id::EventId;
use crate::time::{Timestamp, now};

/// Well-known topics dispatched by the kernel.
pub mod topics {
    /// Listeners registered here receive every event.
    pub const MATCH_ALL: &str = "*";
    /// Dispatched once per entity when it is loaded.
    pub const ENTITY_CREATED: &str = "entity.created";
    /// Dispatched after every successful registry method call.
    pub const ENTITY_STATE_CHANGED: &str = "entity.state_changed";
    /// Dispatched when the kernel lifecycle changes state.
    pub const CORE_STATE_CHANGED: &str = "core.state_changed";
}

/// One dispatched occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    id: EventId,
    topic: String,
    payload: serde_json::Value,
    #[serde(skip)]
    context: Context,
    timestamp: Timestamp,
}

impl Event {
    /// Create a new event stamped with the current time.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: serde_json::Value, context: Context) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            payload,
            context,
            timestamp: now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Prefixes of the topic, shortest first: `a.b.c` yields `a`, `a.b`, `a.b.c`.
    pub fn walk_path(&self) -> impl Iterator<Item = &str> {
        let topic = self.topic.as_str();
        topic
            .match_indices('.')
            .map(move |(idx, _)| &topic[..idx])
            .chain(std::iter::once(topic))
    }

    /// Every listener key that matches this event, in resolution order:
    /// `a`, `a.*`, `a.b`, `a.b.*`, … followed by [`topics::MATCH_ALL`].
    #[must_use]
    pub fn listener_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for prefix in self.walk_path() {
            keys.push(prefix.to_string());
            keys.push(format!("{prefix}.*"));
        }
        keys.push(topics::MATCH_ALL.to_string());
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(topic: &str) -> Event {
        Event::new(topic, serde_json::json!({}), Context::system())
    }

    #[test]
    fn should_walk_topic_prefixes_left_to_right() {
        let ev = event("a.b.c");
        let path: Vec<_> = ev.walk_path().collect();
        assert_eq!(path, vec!["a", "a.b", "a.b.c"]);
    }

    #[test]
    fn should_walk_single_fragment_topic() {
        let ev = event("startup");
        let path: Vec<_> = ev.walk_path().collect();
        assert_eq!(path, vec!["startup"]);
    }

    #[test]
    fn should_produce_hierarchical_listener_keys() {
        let ev = event("a.b.c");
        assert_eq!(
            ev.listener_keys(),
            vec!["a", "a.*", "a.b", "a.b.*", "a.b.c", "a.b.c.*", "*"]
        );
    }

    #[test]
    fn should_serialize_without_context() {
        let ev = Event::new("x.y", serde_json::json!({"v": 1}), Context::system());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["topic"], "x.y");
        assert_eq!(json["payload"]["v"], 1);
        assert!(json.get("context").is_none());
    }
}
