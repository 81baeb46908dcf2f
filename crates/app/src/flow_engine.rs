//! Flow engine — runs validated flow graphs triggered by input services.
//!
//! Each flow is compiled once: formatter steps resolve to a [`Formatter`],
//! output steps to a [`BoundHandler`], `store`/`retrieve` steps to a key in
//! the [`DataStore`] under `flow.<flow>.<key>`. The trigger input service is
//! wired to [`FlowEngine::run_flow`].
//!
//! Execution is breadth-first and fully scheduled: a node runs as a job,
//! and every `(next node, payload)` pair it yields becomes another job.
//! Pass-through nodes forward their input; the others forward their result.
//! An output service rejecting a value ends that branch.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use homehub_domain::auth::Context;
use homehub_domain::error::{ConfigError, HubError};
use homehub_domain::flow::{
    FlowGraph, FlowSettings, FlowSpec, FlowStep, StepKind, parse_micro_flow, store_key,
};

use crate::callback::callback;
use crate::io::{BoundHandler, ServiceRegistry};
use crate::load::LoadReport;
use crate::ports::Formatter;
use crate::scheduler::Scheduler;
use crate::store::DataStore;

enum Action {
    Format(Arc<dyn Formatter>),
    Output(BoundHandler),
    Store(String),
    Retrieve(String),
}

struct Node {
    action: Action,
    pass_through: bool,
    next_nodes: Vec<String>,
}

/// A compiled flow.
pub struct Flow {
    graph: FlowGraph,
    settings: FlowSettings,
    nodes: HashMap<String, Node>,
    suspended: AtomicBool,
}

impl Flow {
    #[must_use]
    pub fn name(&self) -> &str {
        self.graph.name()
    }

    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    #[must_use]
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// A suspended flow ignores its entry point.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            tracing::info!(flow = self.name(), "flow suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            tracing::info!(flow = self.name(), "flow resumed");
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("graph", &self.graph)
            .field("settings", &self.settings)
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Run the node's action and pair every successor with its payload.
    async fn execute(
        &self,
        flow: &str,
        payload: Value,
        context: &Context,
        store: &DataStore,
    ) -> Result<Vec<(String, Value)>, HubError> {
        let result = match &self.action {
            Action::Format(formatter) => Some(formatter.format(payload.clone()).await?),
            Action::Output(handler) => handler(payload.clone(), context.clone()).await?,
            Action::Store(key) => {
                store.update(&store_key(flow, key), payload.clone());
                Some(payload.clone())
            }
            Action::Retrieve(key) => Some(store.get(&store_key(flow, key))?),
        };
        let Some(result) = result else {
            return Ok(Vec::new());
        };
        let forwarded = if self.pass_through { payload } else { result };
        Ok(self
            .next_nodes
            .iter()
            .map(|id| (id.clone(), forwarded.clone()))
            .collect())
    }
}

#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    store: DataStore,
    io: ServiceRegistry,
    flows: Mutex<BTreeMap<String, Arc<Flow>>>,
}

impl FlowEngine {
    #[must_use]
    pub fn new(scheduler: Scheduler, store: DataStore, io: ServiceRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler,
                store,
                io,
                flows: Mutex::default(),
            }),
        }
    }

    fn flows(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Flow>>> {
        self.inner.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse, build and register every micro-syntax definition, skipping
    /// the ones that fail.
    pub async fn load_flows(&self, definitions: &BTreeMap<String, Vec<Value>>) -> LoadReport {
        let mut report = LoadReport::default();
        for (name, elements) in definitions {
            let result = match parse_micro_flow(name, elements) {
                Ok(spec) => self.add_flow(&spec).await,
                Err(err) => Err(err.into()),
            };
            report.record("flow", name, result);
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "flows loaded"
        );
        report
    }

    /// Build `spec`, register it and wire its trigger.
    ///
    /// # Errors
    ///
    /// [`ConfigError`]s from graph validation, lookup misses for services
    /// and formatters, and trigger setup failures.
    pub async fn add_flow(&self, spec: &FlowSpec) -> Result<(), HubError> {
        let flow = Arc::new(self.build_flow(spec)?);
        {
            let mut flows = self.flows();
            if flows.contains_key(&spec.name) {
                return Err(ConfigError::Duplicate(spec.name.clone()).into());
            }
            flows.insert(spec.name.clone(), flow);
        }

        let engine = self.clone();
        let name = spec.name.clone();
        let sink = callback(move |(payload, context): (Value, Context)| {
            let result = engine.run_flow(&name, payload, context);
            async move { result }
        });
        let setup = self
            .inner
            .io
            .setup_input(&spec.trigger.service, &spec.trigger.config, sink)
            .await;
        if setup.is_err() {
            self.flows().remove(&spec.name);
        }
        setup
    }

    /// Compile `spec` without registering it.
    ///
    /// # Errors
    ///
    /// See [`add_flow`](Self::add_flow).
    pub fn build_flow(&self, spec: &FlowSpec) -> Result<Flow, HubError> {
        let graph = spec.graph()?;
        let nodes = graph
            .nodes()
            .map(|(id, node)| {
                let compiled = Node {
                    action: self.action(&spec.name, &node.step)?,
                    pass_through: node.pass_through,
                    next_nodes: node.next_nodes.clone(),
                };
                Ok((id.to_string(), compiled))
            })
            .collect::<Result<HashMap<_, _>, HubError>>()?;
        Ok(Flow {
            graph,
            settings: spec.settings,
            nodes,
            suspended: AtomicBool::new(!spec.settings.active),
        })
    }

    fn action(&self, flow: &str, step: &FlowStep) -> Result<Action, HubError> {
        let io = &self.inner.io;
        Ok(match step.kind {
            StepKind::Formatter => Action::Format(io.formatter(&step.name)?),
            StepKind::Output => Action::Output(io.build_handler(&step.name, step.config.clone(), None)?),
            StepKind::Store | StepKind::Retrieve if step.name.is_empty() => {
                return Err(ConfigError::MissingField {
                    item: flow.to_string(),
                    field: "key".to_string(),
                }
                .into());
            }
            StepKind::Store => Action::Store(step.name.clone()),
            StepKind::Retrieve => Action::Retrieve(step.name.clone()),
        })
    }

    /// # Errors
    ///
    /// Returns [`HubError::FlowNotFound`] for unknown names.
    pub fn flow(&self, name: &str) -> Result<Arc<Flow>, HubError> {
        self.flows()
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::FlowNotFound(name.to_string()))
    }

    #[must_use]
    pub fn flow_names(&self) -> Vec<String> {
        self.flows().keys().cloned().collect()
    }

    /// Start `name` at its root node with `payload`. Returns once the root
    /// job is scheduled; a suspended flow does nothing.
    ///
    /// # Errors
    ///
    /// [`HubError::FlowNotFound`] for unknown names, or a scheduler error.
    pub fn run_flow(&self, name: &str, payload: Value, context: Context) -> Result<(), HubError> {
        let flow = self.flow(name)?;
        if flow.is_suspended() {
            tracing::debug!(flow = name, "flow is suspended, input ignored");
            return Ok(());
        }
        let root = flow.graph.root().to_string();
        self.schedule(flow, root, payload, context)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`HubError::FlowNotFound`] for unknown names.
    pub fn resume(&self, name: &str) -> Result<(), HubError> {
        self.flow(name)?.resume();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`HubError::FlowNotFound`] for unknown names.
    pub fn suspend(&self, name: &str) -> Result<(), HubError> {
        self.flow(name)?.suspend();
        Ok(())
    }

    fn schedule(
        &self,
        flow: Arc<Flow>,
        node: String,
        payload: Value,
        context: Context,
    ) -> Result<(), HubError> {
        let engine = self.clone();
        self.inner.scheduler.submit(async move {
            engine.step(flow, &node, payload, context).await;
            Ok(())
        })?;
        Ok(())
    }

    async fn step(&self, flow: Arc<Flow>, id: &str, payload: Value, context: Context) {
        let Some(node) = flow.nodes.get(id) else {
            tracing::error!(flow = flow.name(), node = id, "node missing from compiled flow");
            return;
        };
        match node
            .execute(flow.name(), payload, &context, &self.inner.store)
            .await
        {
            Ok(next) => {
                for (next_id, payload) in next {
                    if let Err(err) = self.schedule(Arc::clone(&flow), next_id, payload, context.clone()) {
                        tracing::warn!(%err, flow = flow.name(), node = id, "failed to schedule next node");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, flow = flow.name(), node = id, "flow node failed");
                if flow.settings.suspend_on_error {
                    flow.suspend();
                }
            }
        }
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("flows", &self.flow_names())
            .finish_non_exhaustive()
    }
}
