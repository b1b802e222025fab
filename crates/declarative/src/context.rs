//! Declaration context and progress callbacks
//!
//! Resources are declared through an explicit [`DeclarationContext`] that
//! carries the stack name and the schema registry. Nothing is registered in
//! ambient global state; the context is handed to the graph builder when the
//! program is done declaring.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::planner::Plan;
use crate::schema::SchemaRegistry;
use crate::types::{Action, Input, NodeOutcome, OutputRef, Urn, Value};

/// A resource declaration as collected by the context
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub urn: Urn,
    pub type_name: String,
    pub name: String,
    pub inputs: BTreeMap<String, Input>,
    /// Explicit ordering dependencies
    pub depends_on: BTreeSet<Urn>,
}

/// Handle to a declared resource, used to reference its outputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    urn: Urn,
}

impl ResourceHandle {
    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    /// Reference one of the resource's outputs
    pub fn output(&self, property: impl Into<String>) -> OutputRef {
        OutputRef::new(self.urn.clone(), property)
    }
}

/// Collects the declarations of one program run
#[derive(Debug)]
pub struct DeclarationContext<'a> {
    stack: String,
    schemas: Option<&'a SchemaRegistry>,
    declarations: Vec<Declaration>,
    exports: BTreeMap<String, OutputRef>,
}

impl<'a> DeclarationContext<'a> {
    /// A context without schema validation
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            schemas: None,
            declarations: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    /// A context validating every declaration against `schemas`
    pub fn with_schemas(stack: impl Into<String>, schemas: &'a SchemaRegistry) -> Self {
        Self {
            schemas: Some(schemas),
            ..Self::new(stack)
        }
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// URN a declaration of `type_name`/`name` gets in this stack
    pub fn urn(&self, type_name: &str, name: &str) -> Urn {
        Urn::new(&self.stack, type_name, name)
    }

    /// Start declaring a resource
    pub fn resource<'c>(
        &'c mut self,
        type_name: impl Into<String>,
        name: impl Into<String>,
    ) -> ResourceBuilder<'c, 'a> {
        ResourceBuilder {
            ctx: self,
            type_name: type_name.into(),
            name: name.into(),
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Add a declaration, validating its name and schema
    pub fn declare(
        &mut self,
        type_name: impl Into<String>,
        name: impl Into<String>,
        inputs: BTreeMap<String, Input>,
        depends_on: BTreeSet<Urn>,
    ) -> Result<ResourceHandle> {
        let type_name = type_name.into();
        let name = name.into();
        validate_name(&name)?;

        let urn = self.urn(&type_name, &name);
        if self.declarations.iter().any(|d| d.urn == urn) {
            return Err(Error::DuplicateResource(urn));
        }

        let declaration = Declaration {
            urn: urn.clone(),
            type_name,
            name,
            inputs,
            depends_on,
        };
        if let Some(schemas) = self.schemas {
            schemas.validate(&declaration)?;
        }

        log::trace!("Declared {urn}");
        self.declarations.push(declaration);
        Ok(ResourceHandle { urn })
    }

    /// Declare a stack output
    pub fn export(&mut self, name: impl Into<String>, output: OutputRef) {
        self.exports.insert(name.into(), output);
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn exports(&self) -> &BTreeMap<String, OutputRef> {
        &self.exports
    }

    /// Hand the collected declarations and exports to the graph builder
    pub fn into_parts(self) -> (Vec<Declaration>, BTreeMap<String, OutputRef>) {
        (self.declarations, self.exports)
    }
}

/// Check a stack name: resource name rules, and no path separators
pub fn validate_stack_name(stack: &str) -> Result<()> {
    validate_name(stack)?;
    if stack.contains(['/', '\\']) {
        return Err(Error::InvalidName {
            name: stack.to_string(),
            reason: "stack name must not contain path separators".to_string(),
        });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains("::") {
        Some("name must not contain '::'")
    } else if name.chars().any(char::is_whitespace) {
        Some("name must not contain whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Builder for a single declaration
pub struct ResourceBuilder<'c, 'a> {
    ctx: &'c mut DeclarationContext<'a>,
    type_name: String,
    name: String,
    inputs: BTreeMap<String, Input>,
    depends_on: BTreeSet<Urn>,
}

impl ResourceBuilder<'_, '_> {
    /// Literal input
    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), Input::Literal(value.into()));
        self
    }

    /// Input taken from another resource's output
    pub fn input_ref(mut self, key: impl Into<String>, output: OutputRef) -> Self {
        self.inputs.insert(key.into(), Input::Ref(output));
        self
    }

    /// Explicit ordering dependency without data flow
    pub fn depends_on(mut self, handle: &ResourceHandle) -> Self {
        self.depends_on.insert(handle.urn.clone());
        self
    }

    pub fn depends_on_urn(mut self, urn: Urn) -> Self {
        self.depends_on.insert(urn);
        self
    }

    pub fn declare(self) -> Result<ResourceHandle> {
        self.ctx
            .declare(self.type_name, self.name, self.inputs, self.depends_on)
    }
}

/// Progress callback for execution operations
///
/// All calls happen on the thread driving the apply, never on workers.
pub trait ProgressCallback: Send {
    /// Called before the first operation of an apply
    fn on_batch_start(&mut self, count: usize);

    /// Called when a node's operation is dispatched to a worker
    fn on_resource_start(&mut self, urn: &Urn, action: Action);

    /// Called when a node reaches its final status
    fn on_resource_complete(&mut self, urn: &Urn, outcome: NodeOutcome<'_>);

    /// Called after the last node settled
    fn on_batch_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _count: usize) {}
    fn on_resource_start(&mut self, _urn: &Urn, _action: Action) {}
    fn on_resource_complete(&mut self, _urn: &Urn, _outcome: NodeOutcome<'_>) {}
    fn on_batch_complete(&mut self) {}
}

/// Confirmation callback, asked once per apply before anything runs
pub trait ConfirmCallback: Send {
    /// Decide whether `plan` should be carried out
    fn confirm(&mut self, plan: &Plan) -> bool;
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _plan: &Plan) -> bool {
        true
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _plan: &Plan) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, FieldSpec, ResourceSchema};
    use serde_json::json;

    #[test]
    fn test_declare_through_builder() {
        let mut ctx = DeclarationContext::new("dev");
        let ns = ctx
            .resource("kubernetes:core/v1:Namespace", "nginx-ns")
            .input("name", "nginx-ns")
            .declare()
            .unwrap();
        let deployment = ctx
            .resource("kubernetes:apps/v1:Deployment", "nginx")
            .input_ref("namespace", ns.output("name"))
            .input("replicas", 2)
            .declare()
            .unwrap();

        assert_eq!(
            deployment.urn().as_str(),
            "urn:strata:dev::kubernetes:apps/v1:Deployment::nginx"
        );
        let declared = &ctx.declarations()[1];
        assert_eq!(
            declared.inputs["namespace"],
            Input::Ref(OutputRef::new(ns.urn().clone(), "name"))
        );
        assert_eq!(declared.inputs["replicas"], Input::Literal(json!(2)));
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut ctx = DeclarationContext::new("dev");
        ctx.resource("t:index:A", "a").declare().unwrap();
        let err = ctx.resource("t:index:A", "a").declare().unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(_)));
        // same name, different type is a different resource
        assert!(ctx.resource("t:index:B", "a").declare().is_ok());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut ctx = DeclarationContext::new("dev");
        for name in ["", "a::b", "with space"] {
            let err = ctx.resource("t:index:A", name).declare().unwrap_err();
            assert!(matches!(err, Error::InvalidName { .. }), "{name:?}");
        }
    }

    #[test]
    fn test_stack_names() {
        assert!(validate_stack_name("dev").is_ok());
        assert!(validate_stack_name("team.prod-2").is_ok());
        for stack in ["", "a::b", "two words", "../x", "a/b", "a\\b"] {
            let err = validate_stack_name(stack).unwrap_err();
            assert!(matches!(err, Error::InvalidName { .. }), "{stack:?}");
        }
    }

    #[test]
    fn test_schema_validation_at_declaration_time() {
        let mut registry = SchemaRegistry::new();
        registry.register(ResourceSchema {
            type_name: "t:index:A",
            inputs: vec![FieldSpec::required("size", FieldKind::Integer)],
            outputs: vec![],
        });

        let mut ctx = DeclarationContext::with_schemas("dev", &registry);
        let err = ctx
            .resource("t:index:A", "a")
            .input("size", "big")
            .declare()
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
        assert!(ctx.declarations().is_empty());

        assert!(ctx.resource("t:index:A", "a").input("size", 3).declare().is_ok());
    }

    #[test]
    fn test_exports_collected() {
        let mut ctx = DeclarationContext::new("dev");
        let svc = ctx.resource("t:index:Service", "nginx").declare().unwrap();
        ctx.export("nginxServiceIp", svc.output("ingress_ip"));

        let (declarations, exports) = ctx.into_parts();
        assert_eq!(declarations.len(), 1);
        assert_eq!(exports["nginxServiceIp"].property, "ingress_ip");
    }
}
