//! EKS cluster

use declarative::{FieldKind, FieldSpec, PropertyMap, ResourceSchema};
use serde::Deserialize;
use serde_json::json;

use super::Site;

pub const TYPE: &str = "eks:index:Cluster";

const DEFAULT_VERSION: &str = "1.30";
const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";
const DEFAULT_CAPACITY: u32 = 2;

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        type_name: TYPE,
        inputs: vec![
            FieldSpec::optional("version", FieldKind::String),
            FieldSpec::optional("instance_type", FieldKind::String),
            FieldSpec::optional("desired_capacity", FieldKind::Integer),
        ],
        outputs: vec!["name", "endpoint", "version", "kubeconfig"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterArgs {
    pub version: Option<String>,
    pub instance_type: Option<String>,
    pub desired_capacity: Option<u32>,
}

impl ClusterArgs {
    pub fn outputs(&self, site: &Site<'_>) -> PropertyMap {
        let name = format!("{}-eksCluster-{}", site.name, site.suffix());
        let endpoint = format!("https://{}.sandbox.eks.local", site.uid());
        let version = self.version.as_deref().unwrap_or(DEFAULT_VERSION);
        let kubeconfig = kubeconfig(&name, &endpoint);

        log::debug!(
            "Cluster {name}: {} x {}",
            self.desired_capacity.unwrap_or(DEFAULT_CAPACITY),
            self.instance_type.as_deref().unwrap_or(DEFAULT_INSTANCE_TYPE)
        );

        PropertyMap::from([
            ("name".to_string(), json!(name)),
            ("endpoint".to_string(), json!(endpoint)),
            ("version".to_string(), json!(version)),
            ("kubeconfig".to_string(), json!(kubeconfig)),
        ])
    }
}

/// Kubeconfig document for the cluster, serialized as JSON
fn kubeconfig(name: &str, endpoint: &str) -> String {
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": name, "cluster": { "server": endpoint } }],
        "contexts": [{ "name": "aws", "context": { "cluster": name, "user": "aws" } }],
        "current-context": "aws",
        "users": [{ "name": "aws", "user": {} }],
    })
    .to_string()
}
