#[macro_use]
extern crate log;

use anyhow::{Context, anyhow};
use kube::Client;
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::{net::SocketAddr, sync::Arc, time::Duration};

mod admission;
mod assignment_modifications;
mod chart_assignment_controller;
mod cluster_api;
mod deletion;
mod errors;
mod event_router;
mod http_server;
mod provisioner;
mod release;
mod status;
#[cfg(test)]
mod test_utils;
mod utils;

use admission::AssignmentValidator;
use chart_assignment_controller::kube_controller;
use http_server::start_http_server;
use provisioner::PullSecret;
use release::ReleaseRegistry;

/// The K8s field manager name.
const MANAGER: &'static str = "chart-assignment-controller";

/// The K8s finalizer name.
///
/// Note, changing the finalizer name is a breaking change and needs
/// additional code to remove the old finalizer (name) from all affected
/// K8s objects. So, think twice before you rename it, otherwise users might
/// be stuck with ChartAssignments which cannot be deleted.
const FINALIZER: &'static str = "helm.apps.cloudrobotics.com";

/// Name of the cloud cluster, which uses workload identity instead of image
/// pull secrets.
const CLOUD_CLUSTER: &'static str = "cloud";

/// Requeue delay while an assignment converges.
const REQUEUE_FAST: Duration = Duration::from_secs(3);
/// Requeue delay once an assignment is ready or failed.
const REQUEUE_SLOW: Duration = Duration::from_secs(3 * 60);

#[derive(Clone, Debug)]
struct Configuration {
    /// The cluster this controller instance serves.
    cluster: String,
    /// If set, the admission webhook only admits assignments to this cluster.
    webhook_cluster_name: Option<String>,
    pull_secret: PullSecret,
    /// Maximum number of concurrent reconciliations, `0` is unbounded.
    concurrency: u16,
    listen_addr: SocketAddr,
}

impl Configuration {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| env_var(&lookup, name);
        let cluster = var("CLUSTER_NAME").ok_or_else(|| anyhow!("CLUSTER_NAME must be set"))?;
        let concurrency = match var("RECONCILE_CONCURRENCY") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("invalid RECONCILE_CONCURRENCY {:?}", v))?,
            None => 4,
        };
        let listen_addr = var("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
        let listen_port = var("LISTEN_PORT").unwrap_or_else(|| "9000".to_string());
        let listen_addr = format!("{}:{}", listen_addr, listen_port)
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {}:{}", listen_addr, listen_port))?;
        Ok(Configuration {
            cluster,
            webhook_cluster_name: var("WEBHOOK_CLUSTER_NAME"),
            pull_secret: PullSecret {
                name: var("PULL_SECRET_NAME").unwrap_or_else(|| "gcr-json-key".to_string()),
                source_namespace: var("PULL_SECRET_NAMESPACE")
                    .unwrap_or_else(|| "default".to_string()),
            },
            concurrency,
            listen_addr,
        })
    }

    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

fn env_var(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;
    let configuration = Configuration::from_env()?;

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(provider);
    let http_server = start_http_server(
        configuration.listen_addr,
        registry,
        AssignmentValidator::new(configuration.webhook_cluster_name.clone()),
    );

    let client = Client::try_default().await?;
    info!(
        "start ChartAssignment controller for cluster {} ...",
        configuration.cluster
    );
    let controller = kube_controller(
        configuration,
        client.clone(),
        Arc::new(ReleaseRegistry::default()),
    )
    .start(client);
    tokio::select! {
       _ = controller => (),
       res = http_server => res?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = Configuration::from_lookup(lookup(&[("CLUSTER_NAME", "robot-1")])).unwrap();
        assert_eq!(c.cluster, "robot-1");
        assert_eq!(c.webhook_cluster_name, None);
        assert_eq!(
            c.pull_secret,
            PullSecret {
                name: "gcr-json-key".to_string(),
                source_namespace: "default".to_string(),
            }
        );
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.listen_addr, "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn overrides() {
        let c = Configuration::from_lookup(lookup(&[
            ("CLUSTER_NAME", " cloud "),
            ("WEBHOOK_CLUSTER_NAME", "cloud"),
            ("PULL_SECRET_NAME", "registry-key"),
            ("PULL_SECRET_NAMESPACE", "kube-system"),
            ("RECONCILE_CONCURRENCY", "0"),
            ("LISTEN_ADDR", "127.0.0.1"),
            ("LISTEN_PORT", "8443"),
        ]))
        .unwrap();
        assert_eq!(c.cluster, "cloud");
        assert_eq!(c.webhook_cluster_name.as_deref(), Some("cloud"));
        assert_eq!(c.pull_secret.name, "registry-key");
        assert_eq!(c.pull_secret.source_namespace, "kube-system");
        assert_eq!(c.concurrency, 0);
        assert_eq!(c.listen_addr, "127.0.0.1:8443".parse().unwrap());
    }

    #[test]
    fn cluster_name_is_required() {
        assert!(Configuration::from_lookup(lookup(&[])).is_err());
        assert!(Configuration::from_lookup(lookup(&[("CLUSTER_NAME", "  ")])).is_err());
    }

    #[test]
    fn invalid_concurrency() {
        let err = Configuration::from_lookup(lookup(&[
            ("CLUSTER_NAME", "robot-1"),
            ("RECONCILE_CONCURRENCY", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RECONCILE_CONCURRENCY"));
    }
}
