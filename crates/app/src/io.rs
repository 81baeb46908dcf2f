//! Service registry — the IO layer components and flows are bound to.
//!
//! Plugins register output services, input services and formatters by
//! name. Builders then ask for a [`BoundHandler`]: a closure that applies
//! the optional formatter, checks the service's input validator and runs
//! the service with its per-binding configuration.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};

use crate::ports::{Formatter, InputService, InputSink, OutputService};
use crate::scheduler::{JobHandle, Scheduler};

/// An output service bound to one configuration.
///
/// Resolves to `None` when the service's validator rejected the value and
/// the service was not called.
pub type BoundHandler =
    Arc<dyn Fn(Value, Context) -> BoxFuture<'static, Result<Option<Value>, HubError>> + Send + Sync>;

#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    outputs: Mutex<HashMap<String, Arc<dyn OutputService>>>,
    inputs: Mutex<HashMap<String, Arc<dyn InputService>>>,
    formatters: Mutex<HashMap<String, Arc<dyn Formatter>>>,
}

fn insert<T: ?Sized>(
    table: &Mutex<HashMap<String, Arc<T>>>,
    name: String,
    value: Arc<T>,
) -> Result<(), HubError> {
    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
    if table.contains_key(&name) {
        return Err(ConfigError::Duplicate(name).into());
    }
    table.insert(name, value);
    Ok(())
}

fn lookup<T: ?Sized>(table: &Mutex<HashMap<String, Arc<T>>>, name: &str) -> Option<Arc<T>> {
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler,
                outputs: Mutex::default(),
                inputs: Mutex::default(),
                formatters: Mutex::default(),
            }),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_output_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn OutputService>,
    ) -> Result<(), HubError> {
        let name = name.into();
        tracing::debug!(service = %name, "output service registered");
        insert(&self.inner.outputs, name, service)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_input_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn InputService>,
    ) -> Result<(), HubError> {
        let name = name.into();
        tracing::debug!(service = %name, "input service registered");
        insert(&self.inner.inputs, name, service)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_formatter(
        &self,
        name: impl Into<String>,
        formatter: Arc<dyn Formatter>,
    ) -> Result<(), HubError> {
        let name = name.into();
        tracing::debug!(formatter = %name, "formatter registered");
        insert(&self.inner.formatters, name, formatter)
    }

    /// # Errors
    ///
    /// Returns [`HubError::ServiceNotFound`] for unknown names.
    pub fn output_service(&self, name: &str) -> Result<Arc<dyn OutputService>, HubError> {
        lookup(&self.inner.outputs, name).ok_or_else(|| HubError::ServiceNotFound(name.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`HubError::ServiceNotFound`] for unknown names.
    pub fn input_service(&self, name: &str) -> Result<Arc<dyn InputService>, HubError> {
        lookup(&self.inner.inputs, name).ok_or_else(|| HubError::ServiceNotFound(name.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`HubError::FormatterNotFound`] for unknown names.
    pub fn formatter(&self, name: &str) -> Result<Arc<dyn Formatter>, HubError> {
        lookup(&self.inner.formatters, name)
            .ok_or_else(|| HubError::FormatterNotFound(name.to_string()))
    }

    /// Bind `service` to `config`, optionally formatting values first.
    ///
    /// # Errors
    ///
    /// Lookup misses for the service or formatter, and
    /// [`ConfigError`]s from the service's configuration check.
    pub fn build_handler(
        &self,
        service: &str,
        config: Value,
        formatter: Option<&str>,
    ) -> Result<BoundHandler, HubError> {
        let output = self.output_service(service)?;
        output.validate_config(&config)?;
        let formatter = formatter.map(|name| self.formatter(name)).transpose()?;
        let config = Arc::new(config);
        let service = Arc::<str>::from(service);

        Ok(Arc::new(move |value: Value, context: Context| {
            let output = Arc::clone(&output);
            let formatter = formatter.clone();
            let config = Arc::clone(&config);
            let service = Arc::clone(&service);
            async move {
                let value = match formatter {
                    Some(formatter) => formatter.format(value).await?,
                    None => value,
                };
                if !output.accepts(&value) {
                    tracing::debug!(%service, %value, "value rejected by service validator");
                    return Ok(None);
                }
                output.run(value, &context, &config).await.map(Some)
            }
            .boxed()
        }))
    }

    /// Run `service` once as a scheduled job.
    ///
    /// # Errors
    ///
    /// See [`build_handler`](Self::build_handler); also fails when the job
    /// cannot be submitted.
    pub fn run_service(
        &self,
        service: &str,
        value: Value,
        config: Value,
        context: Context,
    ) -> Result<JobHandle<Result<Option<Value>, HubError>>, HubError> {
        let handler = self.build_handler(service, config, None)?;
        Ok(self.inner.scheduler.run(handler(value, context))?)
    }

    /// Validate `config` and start the input service, wiring it to `sink`.
    ///
    /// # Errors
    ///
    /// Lookup misses, configuration errors and setup failures.
    pub async fn setup_input(
        &self,
        service: &str,
        config: &Value,
        sink: InputSink,
    ) -> Result<(), HubError> {
        let input = self.input_service(service)?;
        input.validate_config(config)?;
        input.setup(config, sink).await
    }
}

fn count<T: ?Sized>(table: &Mutex<HashMap<String, Arc<T>>>) -> usize {
    table.lock().unwrap_or_else(PoisonError::into_inner).len()
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("outputs", &count(&self.inner.outputs))
            .field("inputs", &count(&self.inner.inputs))
            .field("formatters", &count(&self.inner.formatters))
            .finish_non_exhaustive()
    }
}
