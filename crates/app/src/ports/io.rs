//! IO ports — the services components and flows talk to.
//!
//! An **output service** pushes a value to the outside world (a bulb, a
//! relay, a log) and returns what it committed. An **input service**
//! pushes values from the outside world into the kernel through an
//! [`InputSink`]. A **formatter** transforms a value on its way between
//! the two.

use async_trait::async_trait;
use serde_json::Value;

use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};

use crate::callback::Callback;

/// Where an input service delivers the values it produces.
pub type InputSink = Callback<(Value, Context)>;

#[async_trait]
pub trait OutputService: Send + Sync {
    /// Check the per-binding configuration once, when the handler is built.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is unusable.
    fn validate_config(&self, _config: &Value) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Input validator. Rejected values are skipped without calling
    /// [`run`](Self::run).
    fn accepts(&self, _value: &Value) -> bool {
        true
    }

    /// Push `value` out and return the value that was applied.
    ///
    /// # Errors
    ///
    /// Any failure of the external system, usually [`HubError::Handler`].
    async fn run(&self, value: Value, context: &Context, config: &Value)
    -> Result<Value, HubError>;
}

#[async_trait]
pub trait InputService: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is unusable.
    fn validate_config(&self, _config: &Value) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Start producing values into `sink`. Long-running producers must spawn
    /// their own job and return.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot be set up.
    async fn setup(&self, config: &Value, sink: InputSink) -> Result<(), HubError>;
}

#[async_trait]
pub trait Formatter: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when `value` cannot be formatted.
    async fn format(&self, value: Value) -> Result<Value, HubError>;
}

#[async_trait]
impl<F> Formatter for F
where
    F: Fn(Value) -> Result<Value, HubError> + Send + Sync,
{
    async fn format(&self, value: Value) -> Result<Value, HubError> {
        self(value)
    }
}
