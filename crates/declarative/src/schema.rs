//! Resource schemas, validated at declaration time

use std::collections::BTreeMap;
use std::fmt;

use crate::context::Declaration;
use crate::error::{Error, Result};
use crate::types::{Input, Value};

/// The shape a literal input must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Bool,
    Map,
    List,
    Any,
}

impl FieldKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Map => value.is_object(),
            Self::List => value.is_array(),
            Self::Any => true,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Map => "map",
            Self::List => "list",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

/// One input field of a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Fixed input/output schema of a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSchema {
    pub type_name: &'static str,
    pub inputs: Vec<FieldSpec>,
    /// Output properties the provider publishes
    pub outputs: Vec<&'static str>,
}

impl ResourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.inputs.iter().find(|f| f.name == name)
    }

    pub fn has_output(&self, property: &str) -> bool {
        self.outputs.contains(&property)
    }

    /// Check declared inputs against the schema.
    ///
    /// References are accepted for any field; their values are only known
    /// once the owner has run.
    pub fn validate_inputs(
        &self,
        inputs: &BTreeMap<String, Input>,
    ) -> std::result::Result<(), String> {
        for (key, input) in inputs {
            let Some(field) = self.field(key) else {
                return Err(format!("unknown input '{key}' for {}", self.type_name));
            };
            if let Input::Literal(value) = input
                && !field.kind.accepts(value)
            {
                return Err(format!(
                    "input '{key}' must be a {}, got {value}",
                    field.kind
                ));
            }
        }

        if let Some(missing) = self
            .inputs
            .iter()
            .find(|f| f.required && !inputs.contains_key(f.name))
        {
            return Err(format!("missing required input '{}'", missing.name));
        }

        Ok(())
    }
}

/// Schemas keyed by resource type
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.type_name.to_string(), schema);
    }

    pub fn get(&self, type_name: &str) -> Option<&ResourceSchema> {
        self.schemas.get(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Validate a declaration: known type, valid inputs, and references to
    /// outputs that the owner's type actually publishes.
    pub fn validate(&self, declaration: &Declaration) -> Result<()> {
        let schema_error = |message: String| Error::Schema {
            urn: declaration.urn.clone(),
            message,
        };

        let schema = self.get(&declaration.type_name).ok_or_else(|| {
            let known: Vec<_> = self.type_names().collect();
            schema_error(format!(
                "unknown resource type {} (known types: {})",
                declaration.type_name,
                known.join(", ")
            ))
        })?;
        schema.validate_inputs(&declaration.inputs).map_err(schema_error)?;

        for output in declaration.inputs.values().filter_map(Input::output_ref) {
            if let Some(owner_schema) = self.get(output.owner.type_name())
                && !owner_schema.has_output(&output.property)
            {
                return Err(schema_error(format!(
                    "{} has no output '{}'",
                    owner_schema.type_name, output.property
                )));
            }
        }

        Ok(())
    }
}
