//! The hub — one object wiring every kernel service together.
//!
//! [`Hub`] is what plugins and transports talk to. It owns the single
//! system [`Context`] internal callers run with and forwards plugin
//! registrations to the [`ServiceRegistry`] and the [`Scheduler`].

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;

use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError, SchedulerError};
use homehub_domain::event::topics::CORE_STATE_CHANGED;
use homehub_domain::lifecycle::CoreState;

use crate::event_bus::EventBus;
use crate::flow_engine::FlowEngine;
use crate::io::ServiceRegistry;
use crate::ports::{Formatter, InputService, LifecycleHook, OutputService, Plugin};
use crate::registry::EntityRegistry;
use crate::scheduler::{Scheduler, SchedulerConfig, ShutdownReport};
use crate::store::DataStore;
use crate::timer::Timer;

#[derive(Clone)]
pub struct Hub {
    scheduler: Scheduler,
    timer: Timer,
    store: DataStore,
    bus: EventBus,
    io: ServiceRegistry,
    registry: EntityRegistry,
    flows: FlowEngine,
    system: Context,
    plugins: Arc<Mutex<Vec<String>>>,
}

impl Hub {
    /// Build every service on top of a fresh scheduler in `Starting`.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let scheduler = Scheduler::new(config);
        let system = Context::system();
        let timer = Timer::new(scheduler.clone());
        let store = DataStore::new(scheduler.clone());
        let bus = EventBus::new(scheduler.clone());
        let io = ServiceRegistry::new(scheduler.clone());
        let registry = EntityRegistry::new(
            scheduler.clone(),
            bus.clone(),
            io.clone(),
            system.clone(),
        );
        let flows = FlowEngine::new(scheduler.clone(), store.clone(), io.clone());

        let hub = Self {
            scheduler,
            timer,
            store,
            bus,
            io,
            registry,
            flows,
            system,
            plugins: Arc::default(),
        };
        for state in [CoreState::Running, CoreState::Stopping] {
            hub.add_lifecycle_hook(state, hub.state_announcer());
        }
        hub
    }

    fn state_announcer(&self) -> Arc<dyn LifecycleHook> {
        let bus = self.bus.clone();
        let system = self.system.clone();
        Arc::new(move |state: CoreState| {
            let published = bus.publish(
                CORE_STATE_CHANGED,
                json!({ "state": state }),
                system.clone(),
            );
            async move { published.map_err(HubError::from) }
        })
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    #[must_use]
    pub fn store(&self) -> &DataStore {
        &self.store
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn io(&self) -> &ServiceRegistry {
        &self.io
    }

    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn flows(&self) -> &FlowEngine {
        &self.flows
    }

    /// The context internal callers run with.
    #[must_use]
    pub fn system_context(&self) -> &Context {
        &self.system
    }

    pub fn add_lifecycle_hook(&self, state: CoreState, hook: Arc<dyn LifecycleHook>) {
        self.scheduler.add_lifecycle_hook(state, hook);
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_output_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn OutputService>,
    ) -> Result<(), HubError> {
        self.io.add_output_service(name, service)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_input_service(
        &self,
        name: impl Into<String>,
        service: Arc<dyn InputService>,
    ) -> Result<(), HubError> {
        self.io.add_input_service(name, service)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when `name` is already taken.
    pub fn add_formatter(
        &self,
        name: impl Into<String>,
        formatter: Arc<dyn Formatter>,
    ) -> Result<(), HubError> {
        self.io.add_formatter(name, formatter)
    }

    /// Let `plugin` register itself and schedule its teardown for
    /// `Stopping`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Duplicate`] for a second plugin with the same name,
    /// plus whatever [`Plugin::register`] returns.
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), HubError> {
        let name = plugin.name().to_string();
        if self.plugins().contains(&name) {
            return Err(ConfigError::Duplicate(name).into());
        }
        plugin.register(self)?;
        self.plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.clone());

        self.add_lifecycle_hook(
            CoreState::Stopping,
            Arc::new(move |_: CoreState| {
                let plugin = Arc::clone(&plugin);
                async move { plugin.teardown().await }
            }),
        );
        tracing::info!(plugin = %name, "plugin registered");
        Ok(())
    }

    /// Names of the registered plugins, in registration order.
    #[must_use]
    pub fn plugins(&self) -> Vec<String> {
        self.plugins
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start the execution context and enter `Running`.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// # Errors
    ///
    /// See [`Scheduler::shutdown`].
    pub async fn shutdown(&self) -> Result<ShutdownReport, SchedulerError> {
        self.scheduler.shutdown().await
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("state", &self.scheduler.state())
            .field("plugins", &self.plugins())
            .finish_non_exhaustive()
    }
}
