//! Entity registry — builds entities from declarative specs and routes
//! method calls to them.
//!
//! ## Method calls
//! [`EntityRegistry::call_method`] authorizes the caller on
//! `entity.<name>`, proposes the new state, runs the coupling follow-ups of
//! the entity type as scheduled jobs, commits, then republishes the entity
//! snapshot and dispatches [`ENTITY_STATE_CHANGED`]. Lookup misses and
//! denials are logged and turn the call into a no-op.
//!
//! ## Builders
//! Each entity type tag maps to a [`Builder`]. The default builders live in
//! [`builders`]; plugins add their own with
//! [`EntityRegistry::add_builder`].

mod builders;
mod scenes;

pub use scenes::SceneOutcome;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio_stream::Stream;

use homehub_domain::address::{Address, MethodAddress};
use homehub_domain::auth::{Context, ENTITY_SCOPE, WRITE};
use homehub_domain::component::Behavior;
use homehub_domain::entity::coupling::{FollowUp, follow_ups};
use homehub_domain::entity::{EntitySnapshot, EntitySpec};
use homehub_domain::error::{ConfigError, HubError, NotAuthorizedError};
use homehub_domain::event::topics::{ENTITY_CREATED, ENTITY_STATE_CHANGED};
use homehub_domain::scene::SceneSpec;

use crate::component::{Component, DynComponent};
use crate::entity::Entity;
use crate::event_bus::EventBus;
use crate::io::ServiceRegistry;
use crate::load::LoadReport;
use crate::scheduler::Scheduler;
use crate::stream::lossy;

/// Default capacity of the entity snapshot channel.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Turns a declarative spec into an entity: `(registry, name, spec, settings)`.
pub type Builder =
    fn(&EntityRegistry, &str, &EntitySpec, &Map<String, Value>) -> Result<Entity, HubError>;

#[derive(Clone)]
pub struct EntityRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    bus: EventBus,
    io: ServiceRegistry,
    system: Context,
    builders: Mutex<HashMap<String, Builder>>,
    entities: Mutex<BTreeMap<String, Arc<Entity>>>,
    scenes: Mutex<HashMap<String, SceneSpec>>,
    snapshots: broadcast::Sender<EntitySnapshot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EntityRegistry {
    /// A registry with the default builders. Events are dispatched with
    /// `system`.
    #[must_use]
    pub fn new(scheduler: Scheduler, bus: EventBus, io: ServiceRegistry, system: Context) -> Self {
        let (snapshots, _) = broadcast::channel(DEFAULT_SNAPSHOT_CAPACITY);
        let builders = builders::defaults()
            .iter()
            .map(|(tag, builder)| ((*tag).to_string(), *builder))
            .collect();
        Self {
            inner: Arc::new(Inner {
                scheduler,
                bus,
                io,
                system,
                builders: Mutex::new(builders),
                entities: Mutex::default(),
                scenes: Mutex::default(),
                snapshots,
            }),
        }
    }

    /// Register a builder for a custom entity type tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Duplicate`] when the tag is already taken.
    pub fn add_builder(&self, tag: impl Into<String>, builder: Builder) -> Result<(), HubError> {
        let tag = tag.into();
        let mut builders = lock(&self.inner.builders);
        if builders.contains_key(&tag) {
            return Err(ConfigError::Duplicate(tag).into());
        }
        builders.insert(tag, builder);
        Ok(())
    }

    /// Build and register every spec, skipping the ones that fail.
    ///
    /// Dispatches [`ENTITY_CREATED`] once per loaded entity.
    pub fn load_entities(&self, specs: &[EntitySpec]) -> LoadReport {
        let mut report = LoadReport::default();
        for spec in specs {
            report.record("entity", &spec.name, self.load_entity(spec));
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "entities loaded"
        );
        report
    }

    fn load_entity(&self, spec: &EntitySpec) -> Result<(), HubError> {
        spec.validate()?;
        if lock(&self.inner.entities).contains_key(&spec.name) {
            return Err(ConfigError::Duplicate(spec.name.clone()).into());
        }
        let builder = lock(&self.inner.builders)
            .get(&spec.entity_type)
            .copied()
            .ok_or_else(|| ConfigError::UnknownEntityType(spec.entity_type.clone()))?;

        let entity = builder(self, &spec.name, spec, &spec.settings)?;
        let snapshot = entity.snapshot();
        {
            let mut entities = lock(&self.inner.entities);
            if entities.contains_key(&spec.name) {
                return Err(ConfigError::Duplicate(spec.name.clone()).into());
            }
            entities.insert(spec.name.clone(), Arc::new(entity));
        }

        let payload = serde_json::to_value(&snapshot).map_err(HubError::handler)?;
        self.inner
            .bus
            .publish(ENTITY_CREATED, payload, self.inner.system.clone())?;
        Ok(())
    }

    /// Build one component of `entity`, bound to the output service its
    /// spec declares. Used by builders.
    ///
    /// # Errors
    ///
    /// Lookup misses and configuration errors from the service registry.
    pub fn component<B: Behavior + 'static>(
        &self,
        entity: &str,
        spec: &EntitySpec,
        component: &str,
    ) -> Result<Arc<dyn DynComponent>, HubError> {
        let handler = spec
            .binding(component)
            .map(|binding| {
                self.inner
                    .io
                    .build_handler(binding.service, binding.config.clone(), binding.formatter)
            })
            .transpose()?;
        let address = Address::new(entity, component);
        Ok(Arc::new(Component::<B>::new(address, handler)))
    }

    /// # Errors
    ///
    /// Returns [`HubError::EntityNotFound`] for unknown names.
    pub fn entity(&self, name: &str) -> Result<Arc<Entity>, HubError> {
        lock(&self.inner.entities)
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::EntityNotFound(name.to_string()))
    }

    /// Every entity, sorted by name.
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        lock(&self.inner.entities).values().cloned().collect()
    }

    /// Snapshots of every entity, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities().iter().map(|e| e.snapshot()).collect()
    }

    /// Entity snapshots republished after every committed method call.
    pub fn subscribe_entities(&self) -> impl Stream<Item = EntitySnapshot> + Send + use<> {
        lossy(self.inner.snapshots.subscribe(), "entity registry")
    }

    /// Invoke `method` on `entity.component` with coupling.
    ///
    /// Returns the committed state, or `None` when the entity or component
    /// is unknown or the context may not write to the entity. Those cases
    /// are logged, never raised.
    ///
    /// # Errors
    ///
    /// Validation errors and handler failures.
    pub async fn call_method(
        &self,
        entity: &str,
        component: &str,
        method: &str,
        target: Value,
        context: Context,
    ) -> Result<Option<Value>, HubError> {
        match self.invoke(entity, component, method, &target, &context).await {
            Ok(state) => Ok(Some(state)),
            Err(
                err @ (HubError::EntityNotFound(_)
                | HubError::ComponentNotFound(_)
                | HubError::NotAuthorized(_)),
            ) => {
                tracing::warn!(%err, entity, component, method, "method call ignored");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// [`call_method`](Self::call_method) addressed as
    /// `entity.component.method`.
    ///
    /// # Errors
    ///
    /// [`HubError::Validation`] when `address` is malformed, plus what
    /// [`call_method`](Self::call_method) returns.
    pub async fn call_method_dotted(
        &self,
        address: &str,
        target: Value,
        context: Context,
    ) -> Result<Option<Value>, HubError> {
        let MethodAddress { address, method } = address.parse::<MethodAddress>()?;
        self.call_method(address.entity(), address.component(), &method, target, context)
            .await
    }

    async fn invoke(
        &self,
        entity: &str,
        component: &str,
        method: &str,
        target: &Value,
        context: &Context,
    ) -> Result<Value, HubError> {
        authorize(entity, context)?;
        let entity = self.entity(entity)?;
        let proposal = entity.component(component)?.propose(method, target)?;

        let coupled = follow_ups(entity.entity_type(), component, proposal.value(), entity.as_ref());
        for follow_up in coupled {
            self.run_follow_up(&entity, follow_up, context).await;
        }

        let state = entity
            .component(component)?
            .commit(proposal, context)
            .await?;
        self.publish_change(&entity, component, &state, context);
        Ok(state)
    }

    /// Run one coupled call as its own job and wait for it. The follow-up is
    /// a plain call: it never couples again.
    async fn run_follow_up(&self, entity: &Arc<Entity>, follow_up: FollowUp, context: &Context) {
        let registry = self.clone();
        let target = Arc::clone(entity);
        let ctx = context.clone();
        let job = self.inner.scheduler.run(async move {
            let state = target
                .call_method(follow_up.component, follow_up.method, &follow_up.target, &ctx)
                .await?;
            registry.publish_change(&target, follow_up.component, &state, &ctx);
            Ok::<_, HubError>(())
        });
        let outcome = match job {
            Ok(job) => job.join().await.map_err(HubError::from).and_then(|r| r),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = outcome {
            tracing::warn!(%err, entity = entity.name(), "coupled call failed");
        }
    }

    fn publish_change(&self, entity: &Entity, component: &str, state: &Value, context: &Context) {
        let _ = self.inner.snapshots.send(entity.snapshot());
        let component_type = entity.component(component).ok().map(|c| c.kind());
        let payload = json!({
            "entity": entity.name(),
            "component": component,
            "new_state": state,
            "component_type": component_type,
            "executing_context": context,
        });
        if let Err(err) =
            self.inner
                .bus
                .publish(ENTITY_STATE_CHANGED, payload, self.inner.system.clone())
        {
            tracing::warn!(%err, entity = entity.name(), "failed to dispatch state change");
        }
    }
}

fn authorize(entity: &str, context: &Context) -> Result<(), NotAuthorizedError> {
    let scope = format!("{ENTITY_SCOPE}.{entity}");
    if context.authorize(&scope, WRITE) {
        Ok(())
    } else {
        Err(NotAuthorizedError {
            context: context.clone(),
            scope,
            permission: WRITE.to_string(),
        })
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &lock(&self.inner.entities).keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::callback::callback;
    use crate::ports::OutputService;
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use homehub_domain::auth::User;
    use homehub_domain::entity::EntityType;
    use homehub_domain::event::Event;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    /// Output service recording `(config, value)` per call, in order.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) calls: Mutex<Vec<(Value, Value)>>,
    }

    #[async_trait]
    impl OutputService for Recorder {
        async fn run(
            &self,
            value: Value,
            _context: &Context,
            config: &Value,
        ) -> Result<Value, HubError> {
            self.calls
                .lock()
                .unwrap()
                .push((config.clone(), value.clone()));
            Ok(value)
        }
    }

    pub(crate) struct Fixture {
        pub(crate) registry: EntityRegistry,
        pub(crate) bus: EventBus,
        pub(crate) recorder: Arc<Recorder>,
    }

    pub(crate) fn fixture() -> Fixture {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.start();
        let bus = EventBus::new(scheduler.clone());
        let io = ServiceRegistry::new(scheduler.clone());
        let recorder = Arc::new(Recorder::default());
        io.add_output_service("recorder", Arc::clone(&recorder) as Arc<dyn OutputService>)
            .unwrap();
        let registry = EntityRegistry::new(scheduler, bus.clone(), io, Context::system());
        Fixture {
            registry,
            bus,
            recorder,
        }
    }

    pub(crate) fn spec(name: &str, entity_type: &str) -> EntitySpec {
        serde_json::from_value(json!({
            "name": name,
            "type": entity_type,
            "control_service": "recorder",
            "components": {
                "switch": { "config": { "part": "switch" } },
                "brightness": { "config": { "part": "brightness" } },
                "color": { "config": { "part": "color" } },
                "blinds": { "config": { "part": "blinds" } }
            }
        }))
        .unwrap()
    }

    fn collect(bus: &EventBus, topic: &str) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.listen(
            topic,
            callback(move |event| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(event);
                    Ok(())
                }
            }),
        );
        seen
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn system() -> Context {
        Context::system()
    }

    // ── Loading ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn should_build_entities_with_type_specific_components() {
        let f = fixture();
        let report = f
            .registry
            .load_entities(&[spec("desk", "rgb_lamp"), spec("hall", "blinds")]);

        assert!(report.is_complete());
        let desk = f.registry.entity("desk").unwrap();
        assert_eq!(desk.entity_type(), EntityType::RgbLamp);
        let names: Vec<_> = desk.components().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["switch", "brightness", "color"]);
        assert!(f.registry.entity("hall").unwrap().component("blinds").is_ok());
    }

    #[tokio::test]
    async fn should_skip_bad_specs_and_load_the_rest() {
        let f = fixture();
        let mut unbound = spec("unbound", "switch");
        unbound.control_service = Some("missing".to_string());

        let report = f.registry.load_entities(&[
            spec("a.b", "switch"),
            spec("desk", "toaster"),
            unbound,
            spec("ok", "switch"),
            spec("ok", "lamp"),
        ]);

        assert_eq!(report.loaded, vec!["ok"]);
        assert_eq!(report.failed.len(), 4);
        assert!(matches!(
            report.failed[1].1,
            HubError::Config(ConfigError::UnknownEntityType(_))
        ));
        assert!(matches!(report.failed[2].1, HubError::ServiceNotFound(_)));
        assert!(matches!(
            report.failed[3].1,
            HubError::Config(ConfigError::Duplicate(_))
        ));
        assert_eq!(f.registry.entities().len(), 1);
    }

    #[tokio::test]
    async fn should_dispatch_entity_created_once_per_entity() {
        let f = fixture();
        let created = collect(&f.bus, ENTITY_CREATED);

        f.registry
            .load_entities(&[spec("desk", "lamp"), spec("hall", "switch")]);
        settle().await;

        let created = created.lock().unwrap();
        let names: Vec<_> = created
            .iter()
            .map(|e| e.payload()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["desk", "hall"]);
    }

    #[tokio::test]
    async fn should_build_custom_entity_type_with_added_builder() {
        fn fan(
            registry: &EntityRegistry,
            name: &str,
            spec: &EntitySpec,
            settings: &Map<String, Value>,
        ) -> Result<Entity, HubError> {
            Ok(Entity::builder(name, EntityType::Composed)
                .settings(settings.clone())
                .component(registry.component::<homehub_domain::component::Switch>(
                    name, spec, "switch",
                )?)
                .component(registry.component::<homehub_domain::component::Brightness>(
                    name, spec, "speed",
                )?)
                .build())
        }

        let f = fixture();
        f.registry.add_builder("fan", fan).unwrap();
        assert!(f.registry.add_builder("fan", fan).is_err());

        let report = f.registry.load_entities(&[spec("ceiling", "fan")]);

        assert!(report.is_complete());
        let fan = f.registry.entity("ceiling").unwrap();
        assert!(fan.component("speed").is_ok());
    }

    // ── Method calls ─────────────────────────────────────────────────

    #[tokio::test]
    async fn should_commit_state_and_dispatch_state_changed() {
        let f = fixture();
        f.registry.load_entities(&[spec("hall", "switch")]);
        let changes = collect(&f.bus, ENTITY_STATE_CHANGED);

        let state = f
            .registry
            .call_method("hall", "switch", "turn_on", Value::Null, system())
            .await
            .unwrap();
        settle().await;

        assert_eq!(state, Some(json!(true)));
        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        let payload = changes[0].payload();
        assert_eq!(payload["entity"], "hall");
        assert_eq!(payload["component"], "switch");
        assert_eq!(payload["new_state"], true);
        assert_eq!(payload["component_type"], "switch");
        assert_eq!(payload["executing_context"]["user"]["name"], "system");
    }

    #[tokio::test]
    async fn should_swallow_unknown_entity_without_dispatching() {
        let f = fixture();
        let changes = collect(&f.bus, ENTITY_STATE_CHANGED);

        let state = f
            .registry
            .call_method("ghost", "switch", "turn_on", Value::Null, system())
            .await
            .unwrap();
        settle().await;

        assert_eq!(state, None);
        assert!(changes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_swallow_unknown_component_and_method() {
        let f = fixture();
        f.registry.load_entities(&[spec("hall", "switch")]);

        let missing_component = f
            .registry
            .call_method("hall", "color", "set", json!("#000000"), system())
            .await
            .unwrap();
        let missing_method = f
            .registry
            .call_method("hall", "switch", "dim", Value::Null, system())
            .await
            .unwrap();

        assert_eq!(missing_component, None);
        assert_eq!(missing_method, None);
    }

    #[tokio::test]
    async fn should_ignore_caller_without_write_permission() {
        let f = fixture();
        f.registry.load_entities(&[spec("hall", "switch")]);
        let reader = Context::new(
            User::new(
                "guest",
                HashMap::from([("entity.*".to_string(), vec!["r".to_string()])]),
            ),
            true,
        );

        let state = f
            .registry
            .call_method("hall", "switch", "turn_on", Value::Null, reader)
            .await
            .unwrap();

        assert_eq!(state, None);
        assert!(f.recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_raise_validation_errors_to_the_caller() {
        let f = fixture();
        f.registry.load_entities(&[spec("hall", "blinds")]);

        let result = f
            .registry
            .call_method("hall", "blinds", "set", json!(150), system())
            .await;

        assert!(matches!(result, Err(HubError::Validation(_))));
    }

    #[tokio::test]
    async fn should_resolve_dotted_method_address() {
        let f = fixture();
        f.registry.load_entities(&[spec("desk", "dimmable_lamp")]);

        let state = f
            .registry
            .call_method_dotted("desk.brightness.set", json!(40), system())
            .await
            .unwrap();

        assert_eq!(state, Some(json!(40)));
        assert!(matches!(
            f.registry
                .call_method_dotted("desk.brightness", json!(40), system())
                .await,
            Err(HubError::Validation(_))
        ));
    }

    // ── Coupling ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn should_raise_brightness_before_switch_handler_runs() {
        let f = fixture();
        f.registry.load_entities(&[spec("desk", "dimmable_lamp")]);

        f.registry
            .call_method("desk", "switch", "turn_on", Value::Null, system())
            .await
            .unwrap();

        let desk = f.registry.entity("desk").unwrap();
        assert_eq!(desk.component("brightness").unwrap().state(), json!(100));
        assert_eq!(desk.component("switch").unwrap().state(), json!(true));
        let calls = f.recorder.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[
                (json!({"part": "brightness"}), json!(100)),
                (json!({"part": "switch"}), json!(true)),
            ]
        );
    }

    #[tokio::test]
    async fn should_turn_switch_off_when_dimmed_to_zero() {
        let f = fixture();
        f.registry.load_entities(&[spec("desk", "dimmable_lamp")]);
        f.registry
            .call_method("desk", "switch", "turn_on", Value::Null, system())
            .await
            .unwrap();

        f.registry
            .call_method("desk", "brightness", "set", json!(0), system())
            .await
            .unwrap();

        let desk = f.registry.entity("desk").unwrap();
        assert_eq!(desk.component("switch").unwrap().state(), json!(false));
        assert_eq!(desk.component("brightness").unwrap().state(), json!(0));
    }

    #[tokio::test]
    async fn should_not_couple_plain_lamp() {
        let f = fixture();
        f.registry.load_entities(&[spec("desk", "lamp")]);

        f.registry
            .call_method("desk", "switch", "turn_on", Value::Null, system())
            .await
            .unwrap();

        assert_eq!(f.recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_dispatch_state_change_for_coupled_component_too() {
        let f = fixture();
        f.registry.load_entities(&[spec("desk", "rgb_lamp")]);
        let changes = collect(&f.bus, ENTITY_STATE_CHANGED);

        f.registry
            .call_method("desk", "color", "set", json!("#000000"), system())
            .await
            .unwrap();
        f.registry
            .call_method("desk", "color", "set", json!("#ff0000"), system())
            .await
            .unwrap();
        settle().await;

        let components: Vec<_> = changes
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.payload()["component"].as_str().unwrap().to_string())
            .collect();
        assert!(components.contains(&"switch".to_string()));
        assert_eq!(components.iter().filter(|c| *c == "color").count(), 2);
        let desk = f.registry.entity("desk").unwrap();
        assert_eq!(desk.component("switch").unwrap().state(), json!(true));
    }

    #[tokio::test]
    async fn should_republish_snapshot_after_commit() {
        let f = fixture();
        f.registry.load_entities(&[spec("hall", "switch")]);
        let mut snapshots = Box::pin(f.registry.subscribe_entities());

        f.registry
            .call_method("hall", "switch", "toggle", Value::Null, system())
            .await
            .unwrap();

        let snapshot = snapshots.next().await.unwrap();
        assert_eq!(snapshot.name, "hall");
        assert_eq!(snapshot.state_of("switch"), Some(&json!(true)));
    }
}
