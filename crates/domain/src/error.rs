//! Common error types used across the workspace.
//!
//! Each concern owns a typed error that converts into [`HubError`] via
//! `#[from]`. Lookup misses are distinct variants so that the registry
//! boundary can recognise and swallow them.

use crate::auth::Context;

/// Top-level error for every kernel operation.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Bad or missing declarative configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A target value was rejected by a component.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The caller's context lacks the required permission.
    #[error("not authorized: {0}")]
    NotAuthorized(#[from] NotAuthorizedError),

    /// Job submission or completion failed.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("component not found: {0}")]
    ComponentNotFound(String),

    #[error("no listener {id} registered on topic {topic}")]
    EventCallbackNotFound { topic: String, id: String },

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("scene not found: {0}")]
    SceneNotFound(String),

    #[error("store entry not found: {0}")]
    EntryNotFound(String),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("formatter not found: {0}")]
    FormatterNotFound(String),

    /// An external handler (output service, formatter, callback) failed.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HubError {
    /// Wrap an arbitrary error raised by an external handler.
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Handler(err.into())
    }

    /// Whether this error is a lookup miss (entity, component, flow, …).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound(_)
                | Self::ComponentNotFound(_)
                | Self::EventCallbackNotFound { .. }
                | Self::FlowNotFound(_)
                | Self::SceneNotFound(_)
                | Self::EntryNotFound(_)
                | Self::ServiceNotFound(_)
                | Self::FormatterNotFound(_)
        )
    }
}

/// Declarative configuration problems. Fatal to the item being loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing field `{field}` in {item}")]
    MissingField { item: String, field: String },

    #[error("invalid value for `{field}` in {item}: {reason}")]
    InvalidField {
        item: String,
        field: String,
        reason: String,
    },

    #[error("invalid name `{0}`: names must be non-empty and contain no dots")]
    InvalidName(String),

    #[error("unknown entity type `{0}`")]
    UnknownEntityType(String),

    #[error("duplicate entry `{0}`")]
    Duplicate(String),

    #[error("flow `{flow}` has no steps")]
    EmptyFlow { flow: String },

    #[error("flow `{flow}`: node `{from}` links to unknown node `{to}`")]
    UnknownNode {
        flow: String,
        from: String,
        to: String,
    },

    #[error("flow `{flow}` contains a cycle")]
    CyclicFlow { flow: String },

    #[error("service `{service}` rejected its configuration")]
    RejectedConfig { service: String },
}

/// Rejected component targets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("value {value} out of range {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("expected {expected}, got {got}")]
    WrongType { expected: &'static str, got: String },

    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("invalid address `{0}`")]
    InvalidAddress(String),
}

/// Authorization failure, carrying the denied context and scope for audit.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{context} is not allowed to `{permission}` on `{scope}`")]
pub struct NotAuthorizedError {
    pub context: Context,
    pub scope: String,
    pub permission: String,
}

/// Job hand-off failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("job queue is full")]
    QueueFull,

    #[error("scheduler is stopped")]
    Stopped,

    #[error("job was cancelled before completion")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_config_error_into_hub_error() {
        let err: HubError = ConfigError::InvalidName("a.b".to_string()).into();
        assert!(matches!(err, HubError::Config(ConfigError::InvalidName(_))));
    }

    #[test]
    fn should_classify_lookup_misses_as_not_found() {
        assert!(HubError::EntityNotFound("lamp".to_string()).is_not_found());
        assert!(HubError::ComponentNotFound("lamp.switch".to_string()).is_not_found());
        assert!(!HubError::Scheduler(SchedulerError::Stopped).is_not_found());
    }

    #[test]
    fn should_display_out_of_range_error() {
        let err = ValidationError::OutOfRange {
            value: 120.0,
            min: 0.0,
            max: 100.0,
        };
        assert_eq!(err.to_string(), "value 120 out of range 0..=100");
    }

    #[test]
    fn should_wrap_handler_error_as_source() {
        let err = HubError::handler("device offline");
        assert!(matches!(err, HubError::Handler(_)));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("device offline"));
    }

    #[test]
    fn should_include_cause_in_wrapped_error_message() {
        let err: HubError = ConfigError::MissingField {
            item: "desk".to_string(),
            field: "type".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "configuration error: missing field `type` in desk"
        );

        let err: HubError = SchedulerError::QueueFull.into();
        assert_eq!(err.to_string(), "scheduler error: job queue is full");

        let err = HubError::handler("device offline");
        assert_eq!(err.to_string(), "handler failed: device offline");
    }
}
