//! Kubernetes pod discovery.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KubeConfig};
use regex::Regex;

use crate::config::Config;
use crate::state::CorePod;

const RW_CORE_PATTERN: &str = r"rw-core[0-9]-";
const RO_CORE_PATTERN: &str = r"ro-core-";

/// Lists the running RW and RO core pods of the configured namespace.
#[derive(Clone)]
pub struct PodLister {
    client: Client,
    namespace: String,
    rw_filter: Regex,
    ro_filter: Regex,
}

impl PodLister {
    /// Create a new instance, initializing the Kubernetes client.
    pub async fn new(config: &Config) -> Result<Self> {
        let client = init_client(config).await?;
        let (rw_filter, ro_filter) = core_name_filters()?;
        Ok(Self {
            client,
            namespace: config.pod_namespace.clone(),
            rw_filter,
            ro_filter,
        })
    }

    /// Fetch the current `(rw_pods, ro_pods)` lists.
    ///
    /// Only pods in phase `Running` with every status condition `True` are
    /// considered; ordering of the returned lists is not guaranteed.
    pub async fn list_core_pods(&self) -> Result<(Vec<CorePod>, Vec<CorePod>)> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .context("error listing pods from Kubernetes")?;
        Ok(classify_pods(pods.items, &self.rw_filter, &self.ro_filter))
    }
}

/// Build the RW and RO core pod name filters.
pub(crate) fn core_name_filters() -> Result<(Regex, Regex)> {
    let rw = Regex::new(RW_CORE_PATTERN).context("error compiling RW core name filter")?;
    let ro = Regex::new(RO_CORE_PATTERN).context("error compiling RO core name filter")?;
    Ok((rw, ro))
}

/// Split the listed pods into RW and RO core pods.
pub(crate) fn classify_pods(pods: Vec<Pod>, rw_filter: &Regex, ro_filter: &Regex) -> (Vec<CorePod>, Vec<CorePod>) {
    let mut rw_pods = Vec::new();
    let mut ro_pods = Vec::new();

    'items: for pod in pods {
        // Only pods that are actually running should be considered.
        let Some(status) = pod.status.as_ref() else { continue };
        if status.phase.as_deref() != Some("Running") {
            continue;
        }
        for condition in status.conditions.as_deref().unwrap_or_default() {
            if condition.status != "True" {
                continue 'items;
            }
        }

        let name = pod.metadata.name.clone().unwrap_or_default();
        let core = CorePod {
            name: name.clone(),
            address: status.pod_ip.clone().unwrap_or_default(),
            node: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()).unwrap_or_default(),
            ..Default::default()
        };
        if rw_filter.is_match(&name) {
            tracing::debug!(pod = %core.name, address = %core.address, node = %core.node, "found RW core pod");
            rw_pods.push(core);
        } else if ro_filter.is_match(&name) {
            tracing::debug!(pod = %core.name, address = %core.address, node = %core.node, "found RO core pod");
            ro_pods.push(core);
        }
    }

    (rw_pods, ro_pods)
}

/// Initialize the Kubernetes client.
///
/// An explicit API server URL and/or kubeconfig path takes precedence;
/// otherwise the in-cluster environment is used.
async fn init_client(config: &Config) -> Result<Client> {
    let kube_config = if !config.k8s_kube_config_path.is_empty() {
        let kubeconfig = Kubeconfig::read_from(&config.k8s_kube_config_path)
            .context("error reading kubeconfig from K8S_KUBE_CONFIG_PATH")?;
        let mut kube_config = KubeConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("error building config from kubeconfig")?;
        if !config.k8s_api_server.is_empty() {
            kube_config.cluster_url = config.k8s_api_server.parse().context("invalid K8S_API_SERVER URL")?;
        }
        kube_config
    } else if !config.k8s_api_server.is_empty() {
        KubeConfig::new(config.k8s_api_server.parse().context("invalid K8S_API_SERVER URL")?)
    } else {
        KubeConfig::infer()
            .await
            .context("unable to load in-cluster config, try setting K8S_API_SERVER and K8S_KUBE_CONFIG_PATH")?
    };
    Client::try_from(kube_config).context("error initializing Kubernetes client")
}
