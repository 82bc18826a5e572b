//! Runtime configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
///
/// All values come from the process environment; undefined keys take the
/// documented defaults.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// URL of the Kubernetes API server; empty selects in-cluster config.
    #[serde(default)]
    pub k8s_api_server: String,
    /// Path to a kubeconfig file; empty selects in-cluster config.
    #[serde(default)]
    pub k8s_kube_config_path: String,
    /// The Kubernetes namespace scanned for core pods.
    #[serde(default = "Config::default_pod_namespace")]
    pub pod_namespace: String,
    /// The gRPC port every core pod listens on.
    #[serde(default = "Config::default_pod_grpc_port")]
    pub pod_grpc_port: u16,

    /// Expected number of RW core pods; must be even.
    #[serde(default = "Config::default_num_rw_pods")]
    pub num_rw_pods: usize,
    /// Expected number of RO core pods.
    #[serde(default = "Config::default_num_ro_pods")]
    pub num_ro_pods: usize,

    /// Address of the affinity router's configuration gRPC API.
    #[serde(default = "Config::default_afrouter_api_address")]
    pub afrouter_api_address: String,
    /// The router identifier used in affinity calls.
    #[serde(default = "Config::default_afrouter_router_name")]
    pub afrouter_router_name: String,
    /// The router cluster name for RW backends.
    #[serde(default = "Config::default_afrouter_rw_cluster_name")]
    pub afrouter_rw_cluster_name: String,
    /// The router cluster name for RO backends.
    #[serde(default = "Config::default_afrouter_ro_cluster_name")]
    pub afrouter_ro_cluster_name: String,

    /// The event bus topic carrying device discovery events.
    #[serde(default = "Config::default_kafka_topic")]
    pub kafka_topic: String,
    /// The event bus host.
    #[serde(default = "Config::default_kafka_host")]
    pub kafka_host: String,
    /// The event bus port.
    #[serde(default = "Config::default_kafka_port")]
    pub kafka_port: u16,
    /// The consumer group identifier used on the event bus.
    #[serde(default = "Config::default_kafka_instance_id")]
    pub kafka_instance_id: String,
}

impl Config {
    /// Create a new config instance from the process environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.pod_grpc_port == 0 {
            bail!("POD_GRPC_PORT must be a number in the range [1, 65535]");
        }
        if self.num_rw_pods == 0 || self.num_rw_pods % 2 != 0 {
            bail!("NUM_RW_PODS must be an even number >= 2, got {}", self.num_rw_pods);
        }
        if self.num_ro_pods == 0 {
            bail!("NUM_RO_PODS must be a number >= 1, got {}", self.num_ro_pods);
        }
        if self.kafka_port == 0 {
            bail!("KAFKA_PORT must be a number in the range [1, 65535]");
        }
        Ok(())
    }

    fn default_pod_namespace() -> String {
        "voltha".into()
    }

    fn default_pod_grpc_port() -> u16 {
        50057
    }

    fn default_num_rw_pods() -> usize {
        6
    }

    fn default_num_ro_pods() -> usize {
        3
    }

    fn default_afrouter_api_address() -> String {
        "localhost:55554".into()
    }

    fn default_afrouter_router_name() -> String {
        "vcore".into()
    }

    fn default_afrouter_rw_cluster_name() -> String {
        "vcore".into()
    }

    fn default_afrouter_ro_cluster_name() -> String {
        "ro_vcore".into()
    }

    fn default_kafka_topic() -> String {
        "AffinityRouter".into()
    }

    fn default_kafka_host() -> String {
        "kafka".into()
    }

    fn default_kafka_port() -> u16 {
        9092
    }

    fn default_kafka_instance_id() -> String {
        "arouterd".into()
    }
}
