//! Kubernetes service exposing a set of pods

use std::collections::BTreeMap;

use declarative::{FieldKind, FieldSpec, PropertyMap, ProviderError, ResourceSchema};
use serde::Deserialize;
use serde_json::json;

use super::Site;

pub const TYPE: &str = "kubernetes:core/v1:Service";

/// Cluster-internal service addresses
const CLUSTER_IP_PREFIX: &str = "10.100";
/// Load balancer ingress addresses (TEST-NET-3)
const INGRESS_PREFIX: &str = "203.0";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        type_name: TYPE,
        inputs: vec![
            FieldSpec::required("namespace", FieldKind::String),
            FieldSpec::optional("name", FieldKind::String),
            FieldSpec::optional("selector", FieldKind::Map),
            FieldSpec::optional("port", FieldKind::Integer),
            FieldSpec::optional("target_port", FieldKind::Integer),
            FieldSpec::optional("type", FieldKind::String),
            FieldSpec::optional("provider", FieldKind::String),
        ],
        outputs: vec!["name", "namespace", "cluster_ip", "ingress", "ingress_ip"],
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceArgs {
    pub namespace: String,
    pub name: Option<String>,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    #[serde(default = "default_port")]
    pub port: u16,
    pub target_port: Option<u16>,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
    pub provider: Option<String>,
}

fn default_port() -> u16 {
    80
}

impl ServiceArgs {
    /// Outputs of the service.
    ///
    /// A LoadBalancer publishes its address as the first ingress entry; when
    /// the sandbox provisions no load balancer the entry list stays empty
    /// and the service fails with `NoIngress` rather than exporting nothing.
    pub fn outputs(&self, site: &Site<'_>) -> Result<PropertyMap, ProviderError> {
        let name = self.name.clone().unwrap_or_else(|| site.auto_name());
        let ingress: Vec<_> = match self.service_type {
            ServiceType::LoadBalancer if site.load_balancers => {
                vec![json!({ "ip": site.address(INGRESS_PREFIX) })]
            }
            _ => Vec::new(),
        };

        let mut outputs = PropertyMap::from([
            ("name".to_string(), json!(name)),
            ("namespace".to_string(), json!(self.namespace)),
            ("cluster_ip".to_string(), json!(site.address(CLUSTER_IP_PREFIX))),
            ("ingress".to_string(), json!(ingress)),
        ]);

        if self.service_type == ServiceType::LoadBalancer {
            let ip = ingress
                .first()
                .and_then(|entry| entry.get("ip"))
                .cloned()
                .ok_or_else(|| ProviderError::NoIngress {
                    service: format!("{}/{name}", self.namespace),
                })?;
            outputs.insert("ingress_ip".to_string(), ip);
        }

        log::debug!(
            "Service {name}: port {} -> {}",
            self.port,
            self.target_port.unwrap_or(self.port)
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(service_type: &str) -> ServiceArgs {
        serde_json::from_value(json!({
            "namespace": "nginx-ns",
            "name": "nginx",
            "selector": {"app": "nginx"},
            "type": service_type,
        }))
        .unwrap()
    }

    fn site(load_balancers: bool) -> Site<'static> {
        Site {
            id: "svc-1",
            name: "nginx-service",
            load_balancers,
        }
    }

    #[test]
    fn test_cluster_ip_service_has_no_ingress() {
        let args = args("ClusterIP");
        assert_eq!(args.port, 80);

        let outputs = args.outputs(&site(true)).unwrap();
        assert_eq!(outputs["ingress"], json!([]));
        assert!(!outputs.contains_key("ingress_ip"));
        assert!(outputs["cluster_ip"].as_str().unwrap().starts_with("10.100."));
    }

    #[test]
    fn test_load_balancer_publishes_ingress_ip() {
        let outputs = args("LoadBalancer").outputs(&site(true)).unwrap();
        let ip = outputs["ingress_ip"].as_str().unwrap();
        assert!(ip.starts_with("203.0."));
        assert_eq!(outputs["ingress"][0]["ip"], json!(ip));
    }

    #[test]
    fn test_load_balancer_without_ingress_fails() {
        let err = args("LoadBalancer").outputs(&site(false)).unwrap_err();
        assert_eq!(
            err,
            ProviderError::NoIngress {
                service: "nginx-ns/nginx".into()
            }
        );
    }

    #[test]
    fn test_unknown_service_type_rejected() {
        let result = serde_json::from_value::<ServiceArgs>(json!({
            "namespace": "default",
            "type": "NodePort",
        }));
        assert!(result.is_err());
    }
}
