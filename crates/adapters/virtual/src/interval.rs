//! Interval input service backed by the kernel [`Timer`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use homehub_app::callback::callback;
use homehub_app::ports::{InputService, InputSink};
use homehub_app::timer::{Timer, TimerHandle};
use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};
use homehub_domain::time::Timestamp;

/// Emits a value every `seconds`.
///
/// Config: `{ seconds = <positive number>, payload = <any>? }`. Without a
/// payload the firing time (RFC 3339) is emitted.
pub struct IntervalInput {
    timer: Timer,
    context: Context,
    handles: Arc<Mutex<Vec<TimerHandle>>>,
}

impl IntervalInput {
    /// Timers started by [`setup`](InputService::setup) are pushed to
    /// `handles` so the owner can cancel them.
    #[must_use]
    pub fn new(timer: Timer, context: Context, handles: Arc<Mutex<Vec<TimerHandle>>>) -> Self {
        Self {
            timer,
            context,
            handles,
        }
    }
}

fn interval(config: &Value) -> Result<Duration, ConfigError> {
    let seconds = config
        .get("seconds")
        .ok_or_else(|| ConfigError::MissingField {
            item: "interval".to_string(),
            field: "seconds".to_string(),
        })?;
    match seconds.as_f64() {
        Some(secs) if secs > 0.0 && secs.is_finite() => Ok(Duration::from_secs_f64(secs)),
        _ => Err(ConfigError::InvalidField {
            item: "interval".to_string(),
            field: "seconds".to_string(),
            reason: format!("expected a positive number, got {seconds}"),
        }),
    }
}

#[async_trait]
impl InputService for IntervalInput {
    fn validate_config(&self, config: &Value) -> Result<(), ConfigError> {
        interval(config).map(|_| ())
    }

    async fn setup(&self, config: &Value, sink: InputSink) -> Result<(), HubError> {
        let every = interval(config)?;
        let payload = config.get("payload").cloned();
        let context = self.context.clone();

        let handle = self.timer.periodic(
            every,
            callback(move |at: Timestamp| {
                let value = payload
                    .clone()
                    .unwrap_or_else(|| Value::String(at.to_rfc3339()));
                sink((value, context.clone()))
            }),
            true,
        )?;
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        tracing::debug!(?every, "interval input started");
        Ok(())
    }
}
