//! Short-lived gRPC clients for querying and reconciling core pod devices.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tonic::transport::{Channel, Endpoint};

use crate::grpc::{DeviceId, DeviceIds, Empty, VcoreServiceClient};
use crate::state::CorePod;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

async fn connect(pod: &CorePod, port: u16) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{}:{}", pod.address, port))
        .context("invalid core pod address")?
        .connect_timeout(DIAL_TIMEOUT)
        .timeout(DIAL_TIMEOUT);
    endpoint.connect().await.context("error connecting to core pod")
}

/// Query the set of device IDs currently owned by the given pod.
///
/// Any failure yields an empty set; callers preserve the previous set
/// rather than overwriting it with an empty result.
pub async fn query_device_ids(pod: &CorePod, port: u16) -> HashSet<String> {
    let channel = match connect(pod, port).await {
        Ok(channel) => channel,
        Err(err) => {
            tracing::debug!(pod = %pod.name, error = ?err, "could not query devices, connect failed");
            return HashSet::new();
        }
    };
    let mut client = VcoreServiceClient::new(channel);
    match client.list_device_ids(Empty {}).await {
        Ok(res) => res.into_inner().items.into_iter().map(|device| device.id).collect(),
        Err(status) => {
            tracing::error!(pod = %pod.name, error = %status, "error listing device IDs");
            HashSet::new()
        }
    }
}

/// Query device IDs for every pod serially, keeping a pod's old ID set
/// whenever a new list is not returned.
pub async fn query_all_device_ids(pods: &mut [CorePod], port: u16) {
    for pod in pods.iter_mut() {
        let ids = query_device_ids(pod, port).await;
        if !ids.is_empty() {
            pod.device_ids = ids;
        }
    }
}

/// Push a set of device IDs into the given pod, seeding a replacement with
/// its active-active peer's devices. Returns whether the call succeeded.
pub async fn reconcile_device_ids(pod: &CorePod, ids: &HashSet<String>, port: u16) -> bool {
    let channel = match connect(pod, port).await {
        Ok(channel) => channel,
        Err(err) => {
            tracing::debug!(pod = %pod.name, error = ?err, "could not reconcile devices, connect failed");
            return false;
        }
    };
    let id_list = DeviceIds {
        items: ids.iter().map(|id| DeviceId { id: id.clone() }).collect(),
    };
    let mut client = VcoreServiceClient::new(channel);
    match client.reconcile_devices(id_list).await {
        Ok(_res) => true,
        Err(status) => {
            tracing::error!(pod = %pod.name, error = %status, "error reconciling device IDs");
            false
        }
    }
}
