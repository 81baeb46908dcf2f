//! Flow — a static execution graph triggered by an input service.
//!
//! Flows are declared in the compact "micro" syntax (see [`syntax`]) and
//! turned into a validated [`FlowGraph`] before anything runs.

mod graph;
pub mod syntax;

pub use graph::{FlowGraph, NodeSpec};
pub use syntax::parse_micro_flow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Id of the node every flow starts at.
pub const ROOT_NODE: &str = "1";

/// Which nodes forward their *input* instead of their return value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassThrough {
    Always,
    #[default]
    ExceptFormatter,
    Never,
}

/// Per-flow settings from the optional leading `config` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// A failing node suspends the whole flow until it is resumed.
    pub suspend_on_error: bool,
    /// Inactive flows are built suspended.
    pub active: bool,
    pub pass_through: PassThrough,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            suspend_on_error: false,
            active: true,
            pass_through: PassThrough::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Transforms the payload through a registered formatter.
    Formatter,
    /// Writes the payload to the reactive store.
    Store,
    /// Replaces the payload with a value read from the reactive store.
    Retrieve,
    /// Hands the payload to an output service.
    Output,
}

impl StepKind {
    /// Whether the step's purpose is to produce a new payload.
    #[must_use]
    pub fn transforms(self) -> bool {
        matches!(self, Self::Formatter | Self::Retrieve)
    }
}

/// One step after the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub kind: StepKind,
    /// Formatter or output-service name; the store key for built-in nodes.
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

impl FlowStep {
    /// Whether this step forwards its input under the given policy.
    #[must_use]
    pub fn passes_through(&self, policy: PassThrough) -> bool {
        match policy {
            PassThrough::Always => true,
            PassThrough::ExceptFormatter => !self.kind.transforms(),
            PassThrough::Never => false,
        }
    }
}

/// Input service that triggers a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub service: String,
    #[serde(default)]
    pub config: Value,
}

/// Parsed flow declaration, before graph validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    pub settings: FlowSettings,
    pub trigger: TriggerSpec,
    pub steps: Vec<FlowStep>,
}

impl FlowSpec {
    /// Link the steps into a chain `1 → 2 → … → n` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyFlow`] when there is no step after the
    /// trigger, or any error raised by [`FlowGraph::new`].
    pub fn graph(&self) -> Result<FlowGraph, ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyFlow {
                flow: self.name.clone(),
            });
        }
        let count = self.steps.len();
        let nodes = self
            .steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                let id = idx + 1;
                let next_nodes = if id < count {
                    vec![(id + 1).to_string()]
                } else {
                    Vec::new()
                };
                let node = NodeSpec {
                    step: step.clone(),
                    pass_through: step.passes_through(self.settings.pass_through),
                    next_nodes,
                };
                (id.to_string(), node)
            })
            .collect();
        FlowGraph::new(&self.name, ROOT_NODE, nodes)
    }
}

/// Reactive-store key used by the `store`/`retrieve` nodes of `flow`.
#[must_use]
pub fn store_key(flow: &str, key: &str) -> String {
    format!("flow.{flow}.{key}")
}
