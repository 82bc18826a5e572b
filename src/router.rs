//! Programming client for the affinity router.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use crate::config::Config;
use crate::grpc::{Affinity, ConfigurationClient, Conn};

const METRIC_ROUTER_CALL_FAILURES: &str = "arouterd_router_call_failures";

/// The router-side server identifier carried on every connection update.
const CONN_SERVER: &str = "grpc_command";
/// The route every device affinity is bound under.
const AFFINITY_ROUTE: &str = "dev_manager";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a channel to the router's configuration API.
///
/// HTTP/2 keepalive tears the channel down when the router goes away, so a
/// failed RPC surfaces the loss promptly.
pub async fn connect(addr: &str) -> Result<Channel> {
    tracing::debug!(address = %addr, "trying to connect to the affinity router");
    let endpoint = Endpoint::from_shared(format!("http://{}", addr))
        .context("invalid affinity router address")?
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
        .keep_alive_timeout(KEEPALIVE_TIMEOUT)
        .keep_alive_while_idle(true);
    let channel = endpoint.connect().await.context("error connecting to the affinity router")?;
    tracing::debug!("connection succeeded");
    Ok(channel)
}

/// Handle for the two idempotent router programming RPCs.
///
/// RPC failures are logged and swallowed; the periodic reconciler re-asserts
/// state. A transport-level failure additionally trips the connection-scoped
/// shutdown channel, unwinding every task of this router connection.
#[derive(Clone)]
pub struct RouterHandle {
    client: ConfigurationClient<Channel>,
    config: Arc<Config>,
    shutdown: broadcast::Sender<()>,
}

impl RouterHandle {
    /// Create a new instance over an established channel.
    pub fn new(channel: Channel, config: Arc<Config>, shutdown: broadcast::Sender<()>) -> Self {
        metrics::register_counter!(METRIC_ROUTER_CALL_FAILURES, metrics::Unit::Count, "failed affinity router RPC calls");
        Self {
            client: ConfigurationClient::new(channel),
            config,
            shutdown,
        }
    }

    /// Update the network endpoint of a `(cluster, backend, connection)` triple.
    pub async fn set_connection(&self, cluster: &str, backend: &str, connection: &str, addr: &str, port: u16) {
        tracing::debug!(%cluster, %backend, %connection, %addr, "configuring backend connection");
        let conn = Conn {
            server: CONN_SERVER.into(),
            cluster: cluster.into(),
            backend: backend.into(),
            connection: connection.into(),
            addr: addr.into(),
            port: port as u64,
        };
        let mut client = self.client.clone();
        match client.set_connection(conn).await {
            Ok(res) => tracing::debug!(result = ?res.into_inner(), "SetConnection complete"),
            Err(status) => self.handle_failure("SetConnection", status),
        }
    }

    /// Bind a device ID to a backend.
    pub async fn set_affinity(&self, backend: &str, id: &str) {
        tracing::debug!(%backend, device = %id, "setting device affinity");
        let affinity = Affinity {
            router: self.config.afrouter_router_name.clone(),
            route: AFFINITY_ROUTE.into(),
            cluster: self.config.afrouter_rw_cluster_name.clone(),
            backend: backend.into(),
            id: id.into(),
        };
        let mut client = self.client.clone();
        match client.set_affinity(affinity).await {
            Ok(res) => tracing::debug!(result = ?res.into_inner(), "SetAffinity complete"),
            Err(status) => self.handle_failure("SetAffinity", status),
        }
    }

    /// Bind every device ID of the given set to a backend.
    pub async fn set_affinities(&self, ids: &HashSet<String>, backend: &str) {
        for id in ids {
            self.set_affinity(backend, id).await;
        }
    }

    fn handle_failure(&self, rpc: &str, status: Status) {
        metrics::increment_counter!(METRIC_ROUTER_CALL_FAILURES);
        if status.code() == Code::Unavailable {
            tracing::info!("connection to the affinity router lost");
            let _res = self.shutdown.send(());
        } else {
            tracing::debug!(%rpc, error = %status, "router RPC call failed");
        }
    }
}
