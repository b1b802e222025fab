//! Kubernetes deployment of a single container image

use std::collections::BTreeMap;

use declarative::{FieldKind, FieldSpec, PropertyMap, ResourceSchema};
use serde::Deserialize;
use serde_json::json;

use super::Site;

pub const TYPE: &str = "kubernetes:apps/v1:Deployment";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        type_name: TYPE,
        inputs: vec![
            FieldSpec::required("namespace", FieldKind::String),
            FieldSpec::optional("name", FieldKind::String),
            FieldSpec::required("image", FieldKind::String),
            FieldSpec::optional("replicas", FieldKind::Integer),
            FieldSpec::optional("labels", FieldKind::Map),
            FieldSpec::optional("provider", FieldKind::String),
        ],
        outputs: vec!["name", "namespace", "replicas", "ready_replicas", "selector"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentArgs {
    pub namespace: String,
    pub name: Option<String>,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub provider: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl DeploymentArgs {
    pub fn outputs(&self, site: &Site<'_>) -> PropertyMap {
        let name = self.name.clone().unwrap_or_else(|| site.auto_name());
        let selector = if self.labels.is_empty() {
            BTreeMap::from([("app".to_string(), name.clone())])
        } else {
            self.labels.clone()
        };

        PropertyMap::from([
            ("name".to_string(), json!(name)),
            ("namespace".to_string(), json!(self.namespace)),
            ("replicas".to_string(), json!(self.replicas)),
            ("ready_replicas".to_string(), json!(self.replicas)),
            ("selector".to_string(), json!(selector)),
        ])
    }
}
