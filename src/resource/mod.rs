//! Resource types known to strata
//!
//! Every type is a [`ResourceKind`] variant carrying its typed arguments.
//! Declarations are checked against the fixed [`ResourceSchema`] of their
//! type when they are declared; the typed arguments are parsed once the
//! inputs are fully resolved, right before the sandbox materializes the
//! object.

use declarative::{PropertyMap, ProviderError, ResourceSchema, SchemaRegistry, Value};
use serde::de::DeserializeOwned;

pub mod cluster;
pub mod deployment;
pub mod kube_provider;
pub mod namespace;
pub mod service;

pub use cluster::ClusterArgs;
pub use deployment::DeploymentArgs;
pub use kube_provider::KubeProviderArgs;
pub use namespace::NamespaceArgs;
pub use service::{ServiceArgs, ServiceType};

/// Typed arguments of one resource, tagged by type
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    Cluster(ClusterArgs),
    KubeProvider(KubeProviderArgs),
    Namespace(NamespaceArgs),
    Deployment(DeploymentArgs),
    Service(ServiceArgs),
}

impl ResourceKind {
    /// Parse resolved inputs into the typed arguments of `type_name`
    pub fn parse(type_name: &str, inputs: &PropertyMap) -> Result<Self, ProviderError> {
        match type_name {
            cluster::TYPE => args(inputs).map(Self::Cluster),
            kube_provider::TYPE => args(inputs).map(Self::KubeProvider),
            namespace::TYPE => args(inputs).map(Self::Namespace),
            deployment::TYPE => args(inputs).map(Self::Deployment),
            service::TYPE => args(inputs).map(Self::Service),
            other => Err(ProviderError::Unsupported {
                type_name: other.to_string(),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Cluster(_) => cluster::TYPE,
            Self::KubeProvider(_) => kube_provider::TYPE,
            Self::Namespace(_) => namespace::TYPE,
            Self::Deployment(_) => deployment::TYPE,
            Self::Service(_) => service::TYPE,
        }
    }

    /// Short prefix used in provider-assigned ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Cluster(_) => "eks",
            Self::KubeProvider(_) => "k8sp",
            Self::Namespace(_) => "ns",
            Self::Deployment(_) => "deploy",
            Self::Service(_) => "svc",
        }
    }

    /// Kubernetes namespace the object lives in, for namespaced kinds
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Deployment(args) => Some(&args.namespace),
            Self::Service(args) => Some(&args.namespace),
            _ => None,
        }
    }

    /// Outputs the object publishes once it exists at `site`
    pub fn outputs(&self, site: &Site<'_>) -> Result<PropertyMap, ProviderError> {
        match self {
            Self::Cluster(args) => Ok(args.outputs(site)),
            Self::KubeProvider(args) => args.outputs(),
            Self::Namespace(args) => Ok(args.outputs(site)),
            Self::Deployment(args) => Ok(args.outputs(site)),
            Self::Service(args) => args.outputs(site),
        }
    }
}

fn args<T: DeserializeOwned>(inputs: &PropertyMap) -> Result<T, ProviderError> {
    let object = Value::Object(inputs.clone().into_iter().collect());
    serde_json::from_value(object).map_err(|e| ProviderError::invalid_inputs(e.to_string()))
}

/// Registry holding the schema of every supported type
pub fn schemas() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    for schema in all_schemas() {
        registry.register(schema);
    }
    registry
}

fn all_schemas() -> [ResourceSchema; 5] {
    [
        cluster::schema(),
        kube_provider::schema(),
        namespace::schema(),
        deployment::schema(),
        service::schema(),
    ]
}

/// Where an object is materialized: its id, logical name and sandbox knobs.
///
/// Generated names and addresses are derived from the id, so the same
/// resource always gets the same values.
#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub id: &'a str,
    /// Logical resource name from the declaration
    pub name: &'a str,
    /// Whether LoadBalancer services get an ingress address
    pub load_balancers: bool,
}

impl Site<'_> {
    fn digest(&self) -> blake3::Hash {
        blake3::hash(self.id.as_bytes())
    }

    /// Stable hex suffix for auto-generated names
    pub fn suffix(&self) -> String {
        self.digest().to_hex()[..7].to_string()
    }

    /// Auto-generated name: logical name plus a stable suffix
    pub fn auto_name(&self) -> String {
        format!("{}-{}", self.name, self.suffix())
    }

    /// Address derived from the id inside `prefix.0.0/16`
    pub fn address(&self, prefix: &str) -> String {
        let bytes = self.digest();
        let bytes = bytes.as_bytes();
        format!("{prefix}.{}.{}", bytes[0], bytes[1].max(1))
    }

    /// UUID-shaped identifier derived from the id
    pub fn uid(&self) -> String {
        let hex = self.digest().to_hex();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}
