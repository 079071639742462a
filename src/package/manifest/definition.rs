use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Top-level definition keys that hold build steps. Includes the pre-2.12
/// names so old definitions still enumerate their steps.
pub const ACTION_KINDS: &[&str] = &[
    "deploy", "contract", "invoke", "clone", "provision", "pull", "import", "var", "setting",
    "router",
];

/// Build definition as written by the external builder.
///
/// Only the fields the store reasons about are typed; everything else round
/// trips through `actions`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDefinition {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(flatten)]
    pub actions: BTreeMap<String, Value>,
}

impl BuildDefinition {
    /// Configuration of a step (`deploy.Token` → `actions["deploy"]["Token"]`).
    pub fn step(&self, label: &str) -> Option<&Value> {
        let (kind, name) = label.split_once('.')?;
        self.actions.get(kind)?.get(name)
    }

    /// All step labels in the definition, unordered.
    pub fn step_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for kind in ACTION_KINDS {
            if let Some(Value::Object(steps)) = self.actions.get(*kind) {
                for name in steps.keys() {
                    labels.push(format!("{}.{}", kind, name));
                }
            }
        }
        labels
    }

    /// Step labels in dependency order, following each step's `depends`.
    pub fn topological_steps(&self) -> Result<Vec<String>> {
        let labels = self.step_labels();
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: BTreeMap<String, NodeIndex> = BTreeMap::new();
        for label in &labels {
            nodes.insert(label.clone(), graph.add_node(label.clone()));
        }

        for label in &labels {
            let depends = self
                .step(label)
                .and_then(|cfg| cfg.get("depends"))
                .and_then(Value::as_array);
            for dep in depends.into_iter().flatten() {
                let dep = dep.as_str().ok_or_else(|| {
                    Error::InvalidInput(format!("step '{}' has a non-string dependency", label))
                })?;
                let from = nodes.get(dep).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "step '{}' depends on unknown step '{}'",
                        label, dep
                    ))
                })?;
                graph.add_edge(*from, nodes[label], ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            Error::InvalidInput(format!(
                "dependency cycle through step '{}'",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(order.into_iter().map(|idx| graph[idx].clone()).collect())
    }

    /// Rename an action kind, rewriting every `depends` entry that points
    /// at the old prefix.
    pub fn rename_action(&mut self, from: &str, to: &str) {
        if let Some(steps) = self.actions.remove(from) {
            match self.actions.get_mut(to) {
                Some(Value::Object(existing)) => {
                    if let Value::Object(moved) = steps {
                        existing.extend(moved);
                    }
                }
                _ => {
                    self.actions.insert(to.to_string(), steps);
                }
            }
        }

        let old_prefix = format!("{}.", from);
        for kind in ACTION_KINDS {
            let Some(Value::Object(steps)) = self.actions.get_mut(*kind) else {
                continue;
            };
            for cfg in steps.values_mut() {
                let Some(Value::Array(depends)) = cfg.get_mut("depends") else {
                    continue;
                };
                for dep in depends.iter_mut() {
                    if let Some(rest) = dep.as_str().and_then(|d| d.strip_prefix(&old_prefix)) {
                        *dep = Value::String(format!("{}.{}", to, rest));
                    }
                }
            }
        }
    }
}
