//! Bindings attach values to input variables.
//!
//! A binding's value is either a literal embedded in the definition or a
//! promise: a reference `node_id.var` to an output of another node. The
//! reserved start node id refers to the workflow's own inputs.

use crate::literal::Literal;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A reference to an output variable of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputReference {
    /// The producing node (`start-node` for workflow inputs).
    pub node_id: NodeId,
    /// The output variable name (or its alias).
    pub var: String,
}

impl OutputReference {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, var: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            var: var.into(),
        }
    }

    /// Creates a reference to a workflow input.
    #[must_use]
    pub fn workflow_input(var: impl Into<String>) -> Self {
        Self::new(NodeId::start(), var)
    }

    /// Returns true if this points at a workflow input.
    #[must_use]
    pub fn is_workflow_input(&self) -> bool {
        self.node_id.is_start()
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.var)
    }
}

/// The value side of a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingData {
    /// A constant.
    Scalar(Literal),
    /// An upstream output or workflow input.
    Promise(OutputReference),
    /// A collection assembled from several bindings.
    Collection(Vec<BindingData>),
    /// A map assembled from several bindings.
    Map(BTreeMap<String, BindingData>),
}

impl BindingData {
    /// Collects every promise in this binding, depth first.
    #[must_use]
    pub fn promises(&self) -> Vec<&OutputReference> {
        let mut out = Vec::new();
        collect_promises(self, &mut out);
        out
    }
}

fn collect_promises<'a>(data: &'a BindingData, out: &mut Vec<&'a OutputReference>) {
    match data {
        BindingData::Scalar(_) => {}
        BindingData::Promise(reference) => out.push(reference),
        BindingData::Collection(items) => items.iter().for_each(|i| collect_promises(i, out)),
        BindingData::Map(entries) => entries.values().for_each(|i| collect_promises(i, out)),
    }
}

/// Binds a value to an input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// The input variable being bound.
    pub var: String,
    /// Where the value comes from.
    pub binding: BindingData,
}

impl Binding {
    /// Binds a constant.
    #[must_use]
    pub fn literal(var: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self {
            var: var.into(),
            binding: BindingData::Scalar(value.into()),
        }
    }

    /// Binds an upstream node's output.
    #[must_use]
    pub fn promise(var: impl Into<String>, node_id: impl Into<NodeId>, output: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            binding: BindingData::Promise(OutputReference::new(node_id, output)),
        }
    }

    /// Binds a workflow input.
    #[must_use]
    pub fn workflow_input(var: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            binding: BindingData::Promise(OutputReference::workflow_input(input)),
        }
    }

    /// Binds arbitrary binding data.
    #[must_use]
    pub fn new(var: impl Into<String>, binding: BindingData) -> Self {
        Self {
            var: var.into(),
            binding,
        }
    }
}
