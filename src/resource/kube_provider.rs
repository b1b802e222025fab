//! Kubernetes provider configured from a kubeconfig

use declarative::{FieldKind, FieldSpec, PropertyMap, ProviderError, ResourceSchema, Value};
use serde::Deserialize;
use serde_json::json;

pub const TYPE: &str = "pulumi:providers:kubernetes";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        type_name: TYPE,
        inputs: vec![FieldSpec::required("kubeconfig", FieldKind::String)],
        outputs: vec!["endpoint"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubeProviderArgs {
    pub kubeconfig: String,
}

impl KubeProviderArgs {
    /// The API server of the kubeconfig's first cluster
    pub fn outputs(&self) -> Result<PropertyMap, ProviderError> {
        let config: Value = serde_json::from_str(&self.kubeconfig)
            .map_err(|e| ProviderError::invalid_inputs(format!("kubeconfig is not valid JSON: {e}")))?;
        let endpoint = config
            .pointer("/clusters/0/cluster/server")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::invalid_inputs("kubeconfig has no cluster server"))?;

        Ok(PropertyMap::from([("endpoint".to_string(), json!(endpoint))]))
    }
}
