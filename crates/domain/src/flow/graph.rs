use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::FlowStep;
use crate::error::ConfigError;

/// One node of a validated flow graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSpec {
    pub step: FlowStep,
    /// Successors receive this node's input instead of its return value.
    pub pass_through: bool,
    pub next_nodes: Vec<String>,
}

/// A flow graph whose links all resolve and which contains no cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowGraph {
    name: String,
    root: String,
    nodes: BTreeMap<String, NodeSpec>,
    order: Vec<String>,
}

impl FlowGraph {
    /// Validate and build a graph.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyFlow`] when `nodes` is empty
    /// - [`ConfigError::UnknownNode`] when the root or any `next_nodes` id is missing
    /// - [`ConfigError::CyclicFlow`] when the links contain a cycle
    pub fn new(
        name: &str,
        root: &str,
        nodes: BTreeMap<String, NodeSpec>,
    ) -> Result<Self, ConfigError> {
        if nodes.is_empty() {
            return Err(ConfigError::EmptyFlow {
                flow: name.to_string(),
            });
        }
        if !nodes.contains_key(root) {
            return Err(ConfigError::UnknownNode {
                flow: name.to_string(),
                from: "root".to_string(),
                to: root.to_string(),
            });
        }
        for (id, node) in &nodes {
            if let Some(missing) = node.next_nodes.iter().find(|n| !nodes.contains_key(*n)) {
                return Err(ConfigError::UnknownNode {
                    flow: name.to_string(),
                    from: id.clone(),
                    to: missing.clone(),
                });
            }
        }
        let order = topological_order(&nodes).ok_or_else(|| ConfigError::CyclicFlow {
            flow: name.to_string(),
        })?;

        Ok(Self {
            name: name.to_string(),
            root: root.to_string(),
            nodes,
            order,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &NodeSpec)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Node ids in a dependency-respecting order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }
}

/// Kahn's algorithm. `None` when the graph has a cycle.
fn topological_order(nodes: &BTreeMap<String, NodeSpec>) -> Option<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = nodes.keys().map(|id| (id.as_str(), 0)).collect();
    for node in nodes.values() {
        for next in &node.next_nodes {
            if let Some(degree) = in_degree.get_mut(next.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        let Some(node) = nodes.get(id) else { continue };
        for next in &node.next_nodes {
            if let Some(degree) = in_degree.get_mut(next.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next.as_str());
                }
            }
        }
    }

    (order.len() == nodes.len()).then_some(order)
}
