//! Typed interfaces for workflows, tasks and launch plans.
//!
//! An interface declares named input and output variables with their
//! [`LiteralType`]. The resolver asks an [`InterfaceProvider`] for the
//! interfaces of referenced entities; when the provider does not know an
//! entity the corresponding checks are deferred to runtime.

use crate::literal::LiteralType;
use serde::{Deserialize, Serialize};
use skein_core::Identifier;
use std::collections::{BTreeMap, HashMap};

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// The variable's type.
    #[serde(rename = "type")]
    pub ty: LiteralType,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    /// Creates a variable of the given type.
    #[must_use]
    pub fn new(ty: LiteralType) -> Self {
        Self {
            ty,
            description: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Named, typed inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedInterface {
    /// Input variables by name.
    #[serde(default)]
    pub inputs: BTreeMap<String, Variable>,
    /// Output variables by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, Variable>,
}

impl TypedInterface {
    /// Creates an empty interface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input variable.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.inputs.insert(name.into(), Variable::new(ty));
        self
    }

    /// Adds an output variable.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, ty: LiteralType) -> Self {
        self.outputs.insert(name.into(), Variable::new(ty));
        self
    }

    /// Returns the declared input type, if any.
    #[must_use]
    pub fn input_type(&self, name: &str) -> Option<&LiteralType> {
        self.inputs.get(name).map(|v| &v.ty)
    }

    /// Returns the declared output type, if any.
    #[must_use]
    pub fn output_type(&self, name: &str) -> Option<&LiteralType> {
        self.outputs.get(name).map(|v| &v.ty)
    }
}

/// Source of statically known interfaces for referenced entities.
///
/// Returning `None` means "unknown here": checks that depend on the
/// interface are deferred to runtime rather than reported.
pub trait InterfaceProvider {
    /// Interface of a registered task.
    fn task_interface(&self, id: &Identifier) -> Option<TypedInterface>;

    /// Interface of a registered workflow used as a sub-workflow.
    fn workflow_interface(&self, id: &Identifier) -> Option<TypedInterface>;

    /// Interface of a launch plan.
    fn launch_plan_interface(&self, id: &Identifier) -> Option<TypedInterface>;
}

/// A provider that knows nothing; every interface check is deferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterfaces;

impl InterfaceProvider for NoInterfaces {
    fn task_interface(&self, _id: &Identifier) -> Option<TypedInterface> {
        None
    }

    fn workflow_interface(&self, _id: &Identifier) -> Option<TypedInterface> {
        None
    }

    fn launch_plan_interface(&self, _id: &Identifier) -> Option<TypedInterface> {
        None
    }
}

/// A map-backed provider, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces {
    tasks: HashMap<Identifier, TypedInterface>,
    workflows: HashMap<Identifier, TypedInterface>,
    launch_plans: HashMap<Identifier, TypedInterface>,
}

impl StaticInterfaces {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task interface.
    #[must_use]
    pub fn with_task(mut self, id: Identifier, interface: TypedInterface) -> Self {
        self.tasks.insert(id, interface);
        self
    }

    /// Registers a workflow interface.
    #[must_use]
    pub fn with_workflow(mut self, id: Identifier, interface: TypedInterface) -> Self {
        self.workflows.insert(id, interface);
        self
    }

    /// Registers a launch plan interface.
    #[must_use]
    pub fn with_launch_plan(mut self, id: Identifier, interface: TypedInterface) -> Self {
        self.launch_plans.insert(id, interface);
        self
    }
}

impl InterfaceProvider for StaticInterfaces {
    fn task_interface(&self, id: &Identifier) -> Option<TypedInterface> {
        self.tasks.get(id).cloned()
    }

    fn workflow_interface(&self, id: &Identifier) -> Option<TypedInterface> {
        self.workflows.get(id).cloned()
    }

    fn launch_plan_interface(&self, id: &Identifier) -> Option<TypedInterface> {
        self.launch_plans.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_builder() {
        let interface = TypedInterface::new()
            .with_input("x", LiteralType::Integer)
            .with_output("y", LiteralType::String);

        assert_eq!(interface.input_type("x"), Some(&LiteralType::Integer));
        assert_eq!(interface.output_type("y"), Some(&LiteralType::String));
        assert!(interface.input_type("y").is_none());
    }

    #[test]
    fn static_provider_lookup() {
        let id = Identifier::task("p", "d", "square", "v1");
        let provider = StaticInterfaces::new()
            .with_task(id.clone(), TypedInterface::new().with_input("x", LiteralType::Integer));

        assert!(provider.task_interface(&id).is_some());
        assert!(provider.workflow_interface(&id).is_none());
        assert!(NoInterfaces.task_interface(&id).is_none());
    }

    #[test]
    fn variable_serde_uses_type_key() {
        let var = Variable::new(LiteralType::Boolean).with_description("flag");
        let json = serde_json::to_value(&var).expect("serialize");
        assert_eq!(json["type"], serde_json::json!("boolean"));
        assert_eq!(json["description"], serde_json::json!("flag"));
    }
}
