//! `strata init` - write the example program

use std::path::{Path, PathBuf};

use anyhow::{Context as AnyhowContext, Result, bail};

use crate::Context;
use crate::config::ConfigFormat;
use crate::ui;

/// An EKS cluster, a Kubernetes provider configured from its kubeconfig, and
/// nginx exposed through a load balancer
pub const TEMPLATE: &str = r#"# strata program: nginx on an EKS cluster
stack = "dev"

[settings]
jobs = 0

[settings.retry]
max_attempts = 3
base_delay_ms = 500

[settings.sandbox]
load_balancers = true

# The cluster
[[resources]]
type = "eks:index:Cluster"
name = "my-cluster"

# Kubernetes provider talking to the cluster
[[resources]]
type = "pulumi:providers:kubernetes"
name = "k8s-provider"
inputs = { kubeconfig = "${my-cluster.kubeconfig}" }

# Namespace for the nginx service
[[resources]]
type = "kubernetes:core/v1:Namespace"
name = "nginx-ns"
inputs = { name = "nginx-ns", provider = "${k8s-provider.endpoint}" }

# nginx deployment
[[resources]]
type = "kubernetes:apps/v1:Deployment"
name = "nginx-deployment"

[resources.inputs]
namespace = "${nginx-ns.name}"
name = "nginx"
image = "nginx:latest"
replicas = 2
labels = { app = "nginx" }
provider = "${k8s-provider.endpoint}"

# Expose nginx through a load balancer
[[resources]]
type = "kubernetes:core/v1:Service"
name = "nginx-service"

[resources.inputs]
namespace = "${nginx-ns.name}"
name = "nginx"
selector = { app = "nginx" }
port = 80
target_port = 80
type = "LoadBalancer"
provider = "${k8s-provider.endpoint}"

[exports]
nginxServiceIp = "${nginx-service.ingress_ip}"
kubeConfig = "${my-cluster.kubeconfig}"
"#;

pub fn run(ctx: &Context, force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Could not determine current directory")?;
    let path = write_template(&cwd, force)?;

    if !ctx.quiet {
        ui::success(&format!("Wrote {}", path.display()));
        ui::dim("Run 'strata preview' to see the plan, then 'strata up' to apply it");
    }
    Ok(())
}

/// Write the template into `dir`, refusing to overwrite unless `force`
pub fn write_template(dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(format!("strata.{}", ConfigFormat::Toml.extension()));
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    std::fs::write(&path, TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote example program to {}", path.display());
    Ok(path)
}
