//! # homehub-adapter-virtual
//!
//! Virtual/demo plugin providing simulated IO for testing and demonstration
//! purposes.
//!
//! ## Provided services
//!
//! | Name | Kind | Behaviour |
//! |------|------|-----------|
//! | `virtual` | output | Remembers the last value pushed to each `device` |
//! | `log` | output | Logs the value and passes it through |
//! | `interval` | input | Emits `payload` (or the firing time) every `seconds` |
//! | `upper` | formatter | Upper-cases strings |
//! | `invert` | formatter | Negates booleans, mirrors percentages (`100 - n`) |
//!
//! ## Dependency rule
//!
//! Depends on `homehub-app` (port traits) and `homehub-domain` only.

mod formatters;
mod interval;
mod outputs;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use homehub_app::hub::Hub;
use homehub_app::ports::{OutputService, Plugin};
use homehub_app::timer::TimerHandle;
use homehub_domain::error::HubError;

pub use interval::IntervalInput;
pub use outputs::{LogOutput, VirtualDevices};

/// Virtual plugin registering simulated services on a [`Hub`].
#[derive(Default)]
pub struct VirtualPlugin {
    devices: Arc<VirtualDevices>,
    timers: Arc<Mutex<Vec<TimerHandle>>>,
}

impl VirtualPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The simulated devices behind the `virtual` output service.
    #[must_use]
    pub fn devices(&self) -> &VirtualDevices {
        &self.devices
    }
}

#[async_trait]
impl Plugin for VirtualPlugin {
    fn name(&self) -> &str {
        "virtual"
    }

    fn register(&self, hub: &Hub) -> Result<(), HubError> {
        hub.add_output_service("virtual", Arc::clone(&self.devices) as Arc<dyn OutputService>)?;
        hub.add_output_service("log", Arc::new(LogOutput))?;
        hub.add_input_service(
            "interval",
            Arc::new(IntervalInput::new(
                hub.timer().clone(),
                hub.system_context().clone(),
                Arc::clone(&self.timers),
            )),
        )?;
        hub.add_formatter("upper", Arc::new(formatters::upper))?;
        hub.add_formatter("invert", Arc::new(formatters::invert))?;
        Ok(())
    }

    async fn teardown(&self) -> Result<(), HubError> {
        let timers = std::mem::take(
            &mut *self.timers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for timer in &timers {
            timer.cancel();
        }
        tracing::debug!(timers = timers.len(), "virtual plugin torn down");
        Ok(())
    }
}
