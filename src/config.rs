//! Declaration file loading
//!
//! A program is a `strata.toml` (or `strata.json`) file:
//!
//! ```toml
//! stack = "dev"
//!
//! [settings]
//! jobs = 4
//!
//! [[resources]]
//! type = "kubernetes:core/v1:Namespace"
//! name = "nginx-ns"
//! inputs = { name = "nginx-ns" }
//!
//! [[resources]]
//! type = "kubernetes:apps/v1:Deployment"
//! name = "nginx-deployment"
//! inputs = { namespace = "${nginx-ns.name}", image = "nginx:latest" }
//!
//! [exports]
//! namespace = "${nginx-ns.name}"
//! ```
//!
//! A string input of exactly the form `${name.property}` references an
//! output of the resource whose logical name is `name`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use declarative::{
    DeclarationContext, ExecuteOptions, Graph, Input, OutputRef, RetryConfig, SchemaRegistry,
    Urn, Value,
};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::sandbox::SandboxSettings;

static REFERENCE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\$\{(?P<name>.+)\.(?P<property>[A-Za-z_][A-Za-z0-9_]*)\}$").ok()
});

/// Errors in the structure of a declaration file
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{context}: no resource named '{name}'")]
    UnknownResource { name: String, context: String },

    #[error("{context}: '{name}' names more than one resource ({types})")]
    AmbiguousName {
        name: String,
        context: String,
        types: String,
    },

    #[error("export '{name}' must be a reference like ${{resource.property}}, got {value}")]
    InvalidExport { name: String, value: String },

    #[error("unsupported declaration file format: {0}")]
    UnsupportedFormat(String),
}

/// Supported declaration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Format picked by file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("(none)").to_string(),
            )),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }
}

/// A parsed declaration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    #[serde(default = "default_stack")]
    pub stack: String,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Stack output name to `${resource.property}` reference
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

fn default_stack() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Maximum concurrent provider operations (0 = unbounded)
    pub jobs: usize,
    pub retry: RetrySettings,
    pub sandbox: SandboxSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay.as_millis() as u64,
            backoff_factor: config.backoff_factor,
            max_delay_ms: config.max_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            bail!(
                "retry.backoff_factor must be a finite number of at least 1.0, got {}",
                self.backoff_factor
            );
        }
        Ok(())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// One `[[resources]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Logical names (or URNs) that must be applied first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Program {
    /// Load a declaration file, picking the format by extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content, format).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let program: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        declarative::validate_stack_name(&program.stack)?;
        program.settings.retry.validate()?;
        Ok(program)
    }

    /// Execution options from settings; `jobs` overrides the file
    pub fn execute_options(&self, jobs: Option<usize>, dry_run: bool) -> ExecuteOptions {
        ExecuteOptions {
            dry_run,
            jobs: jobs.unwrap_or(self.settings.jobs),
            retry: RetryConfig::from(&self.settings.retry),
        }
    }

    /// Declare every resource and export into `ctx`
    pub fn declare(&self, ctx: &mut DeclarationContext<'_>) -> Result<()> {
        let index = NameIndex::new(ctx, &self.resources);

        for resource in &self.resources {
            let context = format!("resource '{}'", resource.name);
            let mut inputs = BTreeMap::new();
            for (key, value) in &resource.inputs {
                let input = match value.as_str().and_then(reference) {
                    Some((name, property)) => {
                        Input::Ref(OutputRef::new(index.urn(name, &context)?, property))
                    }
                    None => Input::Literal(value.clone()),
                };
                inputs.insert(key.clone(), input);
            }

            let depends_on = resource
                .depends_on
                .iter()
                .map(|dep| match Urn::parse(dep) {
                    Some(urn) => Ok(urn),
                    None => index.urn(dep, &context),
                })
                .collect::<Result<_, ConfigError>>()?;

            ctx.declare(&resource.type_name, &resource.name, inputs, depends_on)
                .with_context(|| format!("Invalid {context}"))?;
        }

        for (name, value) in &self.exports {
            let Some((owner, property)) = reference(value) else {
                return Err(ConfigError::InvalidExport {
                    name: name.clone(),
                    value: value.clone(),
                }
                .into());
            };
            let urn = index.urn(owner, &format!("export '{name}'"))?;
            ctx.export(name.clone(), OutputRef::new(urn, property));
        }

        log::debug!(
            "Declared {} resources and {} exports for stack {}",
            self.resources.len(),
            self.exports.len(),
            self.stack
        );
        Ok(())
    }

    /// Declare the program against `schemas` and freeze it into a graph
    pub fn graph(&self, schemas: &SchemaRegistry) -> Result<Graph> {
        let mut ctx = DeclarationContext::with_schemas(&self.stack, schemas);
        self.declare(&mut ctx)?;
        Graph::from_context(ctx).context("Invalid resource graph")
    }
}

/// Split `${name.property}` into its parts
fn reference(text: &str) -> Option<(&str, &str)> {
    let captures = REFERENCE.as_ref()?.captures(text)?;
    let name = captures.name("name")?.as_str();
    let property = captures.name("property")?.as_str();
    Some((name, property))
}

/// Logical name to URN(s) of the declared resources
struct NameIndex {
    by_name: BTreeMap<String, Vec<Urn>>,
}

impl NameIndex {
    fn new(ctx: &DeclarationContext<'_>, resources: &[ResourceDecl]) -> Self {
        let mut by_name: BTreeMap<String, Vec<Urn>> = BTreeMap::new();
        for resource in resources {
            let urns = by_name.entry(resource.name.clone()).or_default();
            let urn = ctx.urn(&resource.type_name, &resource.name);
            if !urns.contains(&urn) {
                urns.push(urn);
            }
        }
        Self { by_name }
    }

    fn urn(&self, name: &str, context: &str) -> Result<Urn, ConfigError> {
        match self.by_name.get(name).map(Vec::as_slice) {
            Some([urn]) => Ok(urn.clone()),
            Some(urns) if urns.len() > 1 => Err(ConfigError::AmbiguousName {
                name: name.to_string(),
                context: context.to_string(),
                types: urns
                    .iter()
                    .map(Urn::type_name)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            _ => Err(ConfigError::UnknownResource {
                name: name.to_string(),
                context: context.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource;
    use serde_json::json;
    use tempfile::TempDir;

    const NGINX: &str = r#"
stack = "staging"

[settings]
jobs = 2
retry = { max_attempts = 5, base_delay_ms = 10 }
sandbox = { load_balancers = false }

[[resources]]
type = "kubernetes:core/v1:Namespace"
name = "nginx-ns"
inputs = { name = "nginx-ns" }

[[resources]]
type = "kubernetes:apps/v1:Deployment"
name = "nginx-deployment"
inputs = { namespace = "${nginx-ns.name}", image = "nginx:latest", replicas = 2, labels = { app = "nginx" } }

[[resources]]
type = "kubernetes:core/v1:Service"
name = "nginx-service"
depends_on = ["nginx-deployment"]

[resources.inputs]
namespace = "${nginx-ns.name}"
selector = { app = "nginx" }
type = "LoadBalancer"

[exports]
ip = "${nginx-service.ingress_ip}"
"#;

    fn toml(content: &str) -> Program {
        Program::parse(content, ConfigFormat::Toml).unwrap()
    }

    #[test]
    fn test_parse_settings() {
        let program = toml(NGINX);
        assert_eq!(program.stack, "staging");
        assert_eq!(program.resources.len(), 3);
        assert!(!program.settings.sandbox.load_balancers);

        let opts = program.execute_options(None, false);
        assert_eq!(opts.jobs, 2);
        assert_eq!(opts.retry.max_attempts, 5);
        assert_eq!(opts.retry.base_delay, Duration::from_millis(10));
        assert_eq!(opts.retry.backoff_factor, 2.0);
        assert_eq!(program.execute_options(Some(8), true).jobs, 8);
    }

    #[test]
    fn test_defaults() {
        let program = toml("");
        assert_eq!(program.stack, "dev");
        assert!(program.resources.is_empty());
        assert!(program.settings.sandbox.load_balancers);
        assert_eq!(
            program.execute_options(None, false).retry,
            RetryConfig::default()
        );
    }

    #[test]
    fn test_rejects_bad_backoff_factor() {
        for factor in ["-2.0", "0.5", "nan", "inf"] {
            let content = format!("[settings.retry]\nbackoff_factor = {factor}\n");
            let err = Program::parse(&content, ConfigFormat::Toml).unwrap_err();
            assert!(err.to_string().contains("backoff_factor"), "{factor}");
        }
        assert!(Program::parse("[settings.retry]\nbackoff_factor = 1.0\n", ConfigFormat::Toml).is_ok());
    }

    #[test]
    fn test_rejects_bad_stack_names() {
        for stack in ["", "a::b", "../x", "prod/eu"] {
            let content = format!("stack = \"{stack}\"\n");
            let err = Program::parse(&content, ConfigFormat::Toml).unwrap_err();
            assert!(err.to_string().contains("invalid name"), "{stack}");
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let program = toml(
            r#"
[[resources]]
type = "kubernetes:core/v1:Namespace"
name = "ns"
inputs = { name = "${ns.uid}" }
"#,
        );
        let err = program.graph(&resource::schemas()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<declarative::Error>(),
            Some(declarative::Error::Cycle { .. })
        ));
    }

    #[test]
    fn test_references_become_edges() {
        let program = toml(NGINX);
        let graph = program.graph(&resource::schemas()).unwrap();

        let ns = Urn::new("staging", resource::namespace::TYPE, "nginx-ns");
        let deploy = Urn::new("staging", resource::deployment::TYPE, "nginx-deployment");
        let svc = Urn::new("staging", resource::service::TYPE, "nginx-service");

        let deploy_node = graph.node(&deploy).unwrap();
        assert_eq!(
            deploy_node.inputs["namespace"].output_ref(),
            Some(&OutputRef::new(ns.clone(), "name"))
        );
        assert_eq!(deploy_node.inputs["image"], Input::Literal(json!("nginx:latest")));
        assert!(graph.node(&svc).unwrap().dependencies.contains(&deploy));
        assert_eq!(
            graph.exports()["ip"],
            OutputRef::new(svc, "ingress_ip")
        );
    }

    #[test]
    fn test_json_program() {
        let content = json!({
            "stack": "dev",
            "resources": [
                {"type": "kubernetes:core/v1:Namespace", "name": "a"},
                {"type": "kubernetes:core/v1:Namespace", "name": "b", "depends_on": ["a"]},
            ],
        })
        .to_string();
        let program = Program::parse(&content, ConfigFormat::Json).unwrap();
        let graph = program.graph(&resource::schemas()).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_unknown_reference() {
        let program = toml(
            r#"
[[resources]]
type = "kubernetes:core/v1:Namespace"
name = "ns"
inputs = { name = "${missing.name}" }
"#,
        );
        let err = program.graph(&resource::schemas()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownResource {
                name: "missing".into(),
                context: "resource 'ns'".into()
            })
        );
    }

    #[test]
    fn test_ambiguous_reference() {
        let program = toml(
            r#"
[[resources]]
type = "kubernetes:core/v1:Namespace"
name = "nginx"

[[resources]]
type = "kubernetes:core/v1:Service"
name = "nginx"
inputs = { namespace = "default" }

[exports]
name = "${nginx.name}"
"#,
        );
        let err = program.graph(&resource::schemas()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::AmbiguousName { .. })
        ));
    }

    #[test]
    fn test_export_must_be_reference() {
        let program = toml("[exports]\nip = \"1.2.3.4\"\n");
        let err = program.graph(&resource::schemas()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidExport { .. })
        ));
    }

    #[test]
    fn test_embedded_reference_is_literal() {
        assert_eq!(reference("prefix-${nginx-ns.name}"), None);
        assert_eq!(reference("${nginx-ns}"), None);
        assert_eq!(
            reference("${my.cluster.kubeconfig}"),
            Some(("my.cluster", "kubeconfig"))
        );
    }

    #[test]
    fn test_schema_errors_surface() {
        let program = toml(
            r#"
[[resources]]
type = "kubernetes:apps/v1:Deployment"
name = "nginx"
inputs = { namespace = "default" }
"#,
        );
        let err = program.graph(&resource::schemas()).unwrap_err();
        assert!(err.to_string().contains("Invalid resource 'nginx'"));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, NGINX).unwrap();
        assert_eq!(Program::load(&path).unwrap().stack, "staging");

        let yaml = dir.path().join("strata.yaml");
        std::fs::write(&yaml, "stack: dev").unwrap();
        let err = Program::load(&yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnsupportedFormat(_))
        ));
    }
}
