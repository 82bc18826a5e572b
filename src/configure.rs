//! Initial configuration of the affinity router.
//!
//! Runs once per router connection: waits for the full complement of core
//! pods, pairs the RW pods, assigns router coordinates, and programs every
//! connection and known affinity.

use std::time::Duration;

use futures::stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::grouping;
use crate::k8s::PodLister;
use crate::router::RouterHandle;
use crate::state::{CoreGroup, CorePod, CoreState};
use crate::vcore;

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Build and program the full router state from the observed pods.
///
/// Polls until exactly the expected number of RW and RO pods is observed and
/// the grouping succeeds, waiting indefinitely; returns `None` when shutdown
/// is signalled first.
pub async fn run(
    lister: &PodLister,
    router: &RouterHandle,
    config: &Config,
    shutdown: &mut BroadcastStream<()>,
) -> Option<CoreState> {
    let (mut groups, mut ro_pods);
    loop {
        if let Some((built, ro)) = try_build_groups(lister, config).await {
            groups = built;
            ro_pods = ro;
            break;
        }
        tokio::select! {
            _ = shutdown.next() => return None,
            _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => (),
        }
    }

    assign_rw_coordinates(&mut groups, &config.afrouter_rw_cluster_name);
    tracing::info!("core grouping completed");

    tracing::info!("setting affinities");
    for group in &groups {
        for pod in group {
            router.set_affinities(&pod.device_ids, &pod.backend).await;
        }
    }
    tracing::info!("setting connections");
    for group in &groups {
        for pod in group {
            router
                .set_connection(&pod.cluster, &pod.backend, &pod.connection, &pod.address, config.pod_grpc_port)
                .await;
        }
    }

    assign_ro_coordinates(&mut ro_pods, &config.afrouter_ro_cluster_name);
    for pod in &ro_pods {
        router
            .set_connection(&pod.cluster, &pod.backend, &pod.connection, &pod.address, config.pod_grpc_port)
            .await;
    }

    Some(CoreState { groups, ro_pods })
}

/// One configuration attempt: list, gate on pod counts, probe, group.
async fn try_build_groups(lister: &PodLister, config: &Config) -> Option<(Vec<CoreGroup>, Vec<CorePod>)> {
    let (mut rw_pods, ro_pods) = match lister.list_core_pods().await {
        Ok(pods) => pods,
        Err(err) => {
            tracing::error!(error = ?err, "error listing core pods");
            return None;
        }
    };
    if rw_pods.len() != config.num_rw_pods || ro_pods.len() != config.num_ro_pods {
        tracing::debug!(
            rw = rw_pods.len(),
            ro = ro_pods.len(),
            "one or more RW/RO pod(s) are offline, will wait and retry",
        );
        return None;
    }

    // Fetch the devices held by each running core.
    vcore::query_all_device_ids(&mut rw_pods, config.pod_grpc_port).await;

    match grouping::group_pods(rw_pods) {
        Ok(groups) => Some((groups, ro_pods)),
        Err(err) => {
            tracing::error!(error = %err, "error grouping RW pods, will wait and retry");
            None
        }
    }
}

/// Assign router coordinates to every RW slot: backend `<cluster><g+1>`,
/// connection `<backend><s+1>`.
pub(crate) fn assign_rw_coordinates(groups: &mut [CoreGroup], cluster: &str) {
    for (g, group) in groups.iter_mut().enumerate() {
        for (s, pod) in group.iter_mut().enumerate() {
            pod.cluster = cluster.to_string();
            pod.backend = format!("{}{}", cluster, g + 1);
            pod.connection = format!("{}{}", pod.backend, s + 1);
        }
    }
}

/// Assign router coordinates to every RO pod: backend `<cluster><k+1>`,
/// connection `<backend>1`.
pub(crate) fn assign_ro_coordinates(ro_pods: &mut [CorePod], cluster: &str) {
    for (k, pod) in ro_pods.iter_mut().enumerate() {
        pod.cluster = cluster.to_string();
        pod.backend = format!("{}{}", cluster, k + 1);
        pod.connection = format!("{}1", pod.backend);
    }
}
