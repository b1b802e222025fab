//! Kubernetes namespace

use declarative::{FieldKind, FieldSpec, PropertyMap, ResourceSchema};
use serde::Deserialize;
use serde_json::json;

use super::Site;

pub const TYPE: &str = "kubernetes:core/v1:Namespace";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        type_name: TYPE,
        inputs: vec![
            FieldSpec::optional("name", FieldKind::String),
            FieldSpec::optional("provider", FieldKind::String),
        ],
        outputs: vec!["name", "uid"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceArgs {
    pub name: Option<String>,
    pub provider: Option<String>,
}

impl NamespaceArgs {
    pub fn outputs(&self, site: &Site<'_>) -> PropertyMap {
        let name = self.name.clone().unwrap_or_else(|| site.auto_name());
        PropertyMap::from([
            ("name".to_string(), json!(name)),
            ("uid".to_string(), json!(site.uid())),
        ])
    }
}
