//! Simulated output services.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use homehub_app::ports::OutputService;
use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};

const DEFAULT_DEVICE: &str = "default";

/// Devices that accept any value and remember the last one.
///
/// The device is picked by the binding's `device` config key; bindings
/// without one share the `default` device.
#[derive(Debug, Default)]
pub struct VirtualDevices {
    values: Mutex<BTreeMap<String, Value>>,
}

impl VirtualDevices {
    /// Last value pushed to `device`.
    #[must_use]
    pub fn last(&self, device: &str) -> Option<Value> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned()
    }

    /// Devices that received at least one value, sorted.
    #[must_use]
    pub fn devices(&self) -> Vec<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

fn device(config: &Value) -> &str {
    config
        .get("device")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DEVICE)
}

#[async_trait]
impl OutputService for VirtualDevices {
    fn validate_config(&self, config: &Value) -> Result<(), ConfigError> {
        let valid = match config {
            Value::Null => true,
            Value::Object(map) => map.get("device").is_none_or(Value::is_string),
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidField {
                item: "virtual".to_string(),
                field: "device".to_string(),
                reason: format!("expected a device name, got {config}"),
            })
        }
    }

    async fn run(&self, value: Value, context: &Context, config: &Value) -> Result<Value, HubError> {
        let device = device(config);
        tracing::debug!(device, %value, %context, "virtual device updated");
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.to_string(), value.clone());
        Ok(value)
    }
}

/// Logs every value it receives and passes it through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

#[async_trait]
impl OutputService for LogOutput {
    async fn run(&self, value: Value, context: &Context, config: &Value) -> Result<Value, HubError> {
        let label = config.get("label").and_then(Value::as_str).unwrap_or("log");
        tracing::info!(label, %value, %context, "output");
        Ok(value)
    }
}
