//! Periodic reconciliation of router state against pod churn.
//!
//! Every tick the current pod set is re-listed and compared against the
//! model; pods that restarted with a new address are matched to their old
//! slot by node, seeded with their peer's devices, and re-programmed under
//! the slot's unchanged backend/connection names.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::k8s::PodLister;
use crate::router::RouterHandle;
use crate::state::{peer, CoreGroup, CorePod, SharedState};
use crate::vcore;

const METRIC_RECONCILE_ERRORS: &str = "arouterd_reconcile_errors";

const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// The periodic pod monitor of one router connection.
pub struct Reconciler {
    /// Runtime config.
    config: Arc<Config>,
    /// Pod discovery client.
    lister: PodLister,
    /// Handle used to re-program changed slots.
    router: RouterHandle,
    /// The per-connection core state.
    state: SharedState,
    /// A channel used for triggering shutdown of this router connection.
    shutdown: BroadcastStream<()>,
}

impl Reconciler {
    /// Create a new instance.
    pub fn new(
        config: Arc<Config>,
        lister: PodLister,
        router: RouterHandle,
        state: SharedState,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        metrics::register_counter!(METRIC_RECONCILE_ERRORS, metrics::Unit::Count, "reconciliation cycles aborted on errors");
        Self {
            config,
            lister,
            router,
            state,
            shutdown: BroadcastStream::new(shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::info!("reconciler initialized");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RECONCILE_INTERVAL) => (),
                _ = self.shutdown.next() => break,
            }
            self.tick().await;
        }
        Ok(())
    }

    async fn tick(&self) {
        let (rw_pods, ro_pods) = match self.lister.list_core_pods().await {
            Ok(pods) => pods,
            Err(err) => {
                metrics::increment_counter!(METRIC_RECONCILE_ERRORS);
                tracing::error!(error = ?err, "error listing core pods, skipping reconciliation cycle");
                return;
            }
        };
        self.reconcile_rw(rw_pods).await;
        self.reconcile_ro(ro_pods).await;
    }

    /// Reconcile the RW groups against the observed RW pods.
    async fn reconcile_rw(&self, mut observed: Vec<CorePod>) {
        if observed.len() != self.config.num_rw_pods {
            tracing::debug!(observed = observed.len(), "one or more RW pod(s) are offline, will wait and retry");
            return;
        }

        vcore::query_all_device_ids(&mut observed, self.config.pod_grpc_port).await;

        let addrs_changed = {
            let mut state = self.state.lock().await;
            update_slot_devices(&mut state.groups, &observed);
            observed.iter().any(|pod| !has_rw_address(&state.groups, &pod.address))
        };
        if !addrs_changed {
            return;
        }

        tracing::debug!("RW pod address change detected");
        self.apply_rw_addr_diffs(&observed).await;
    }

    /// Re-program every RW slot whose pod was replaced.
    async fn apply_rw_addr_diffs(&self, observed: &[CorePod]) {
        let replacements = {
            let state = self.state.lock().await;
            let (changed, fresh) = rw_addr_diffs(&state.groups, observed);
            match_replacements(&state.groups, &changed, fresh)
        };

        for (g, s, replacement) in replacements {
            let (slot, peer_pod) = {
                let state = self.state.lock().await;
                (state.groups[g][s].clone(), state.groups[g][peer(s)].clone())
            };

            // Seed the replacement with its active-active peer's devices.
            let ids = vcore::query_device_ids(&peer_pod, self.config.pod_grpc_port).await;
            if !ids.is_empty() && !vcore::reconcile_device_ids(&replacement, &ids, self.config.pod_grpc_port).await {
                tracing::error!(pod = %replacement.name, "attempt to reconcile device IDs on pod failed");
            }
            self.router
                .set_connection(&slot.cluster, &slot.backend, &slot.connection, &replacement.address, self.config.pod_grpc_port)
                .await;

            let mut state = self.state.lock().await;
            let slot = &mut state.groups[g][s];
            slot.address = replacement.address;
            slot.name = replacement.name;
            if !ids.is_empty() {
                slot.device_ids = ids;
            }
        }
    }

    /// Reconcile the flat RO backend list against the observed RO pods.
    ///
    /// RO slots own a single pod each, so an address mismatch only needs a
    /// connection update; there is no device reconciliation.
    async fn reconcile_ro(&self, observed: Vec<CorePod>) {
        if observed.len() != self.config.num_ro_pods {
            tracing::debug!(observed = observed.len(), "one or more RO pod(s) are offline, will wait and retry");
            return;
        }

        let replacements = {
            let state = self.state.lock().await;
            ro_addr_diffs(&state.ro_pods, &observed)
        };
        for (k, replacement) in replacements {
            let slot = {
                let state = self.state.lock().await;
                state.ro_pods[k].clone()
            };
            self.router
                .set_connection(&slot.cluster, &slot.backend, &slot.connection, &replacement.address, self.config.pod_grpc_port)
                .await;

            let mut state = self.state.lock().await;
            state.ro_pods[k].address = replacement.address;
            state.ro_pods[k].name = replacement.name;
        }
    }
}

/// Copy freshly probed device sets into the matching slots by pod name,
/// preserving a slot's set when the probe came back empty.
pub(crate) fn update_slot_devices(groups: &mut [CoreGroup], observed: &[CorePod]) {
    let by_name: HashMap<&str, &CorePod> = observed.iter().map(|pod| (pod.name.as_str(), pod)).collect();
    for group in groups.iter_mut() {
        for slot in group.iter_mut() {
            if let Some(pod) = by_name.get(slot.name.as_str()) {
                if !pod.device_ids.is_empty() {
                    slot.device_ids = pod.device_ids.clone();
                }
            }
        }
    }
}

/// Whether any RW slot currently holds the given address.
pub(crate) fn has_rw_address(groups: &[CoreGroup], address: &str) -> bool {
    groups.iter().any(|group| group.iter().any(|pod| pod.address == address))
}

/// Determine which slots lost their pod and which observed pods are new.
///
/// A slot is changed when its address matches no observed pod; a pod is new
/// when its address is held by no slot.
pub(crate) fn rw_addr_diffs(groups: &[CoreGroup], observed: &[CorePod]) -> (Vec<(usize, usize)>, Vec<CorePod>) {
    let mut changed = Vec::new();
    for (g, group) in groups.iter().enumerate() {
        for (s, slot) in group.iter().enumerate() {
            if !observed.iter().any(|pod| pod.address == slot.address) {
                changed.push((g, s));
            }
        }
    }
    let fresh = observed
        .iter()
        .filter(|pod| !has_rw_address(groups, &pod.address))
        .cloned()
        .collect();
    (changed, fresh)
}

/// Match changed slots to new pods by node equality.
///
/// A replacement pod almost always lands on the host of the pod it
/// replaces; a changed slot with no node-matching replacement is logged and
/// left untouched.
pub(crate) fn match_replacements(
    groups: &[CoreGroup],
    changed: &[(usize, usize)],
    fresh: Vec<CorePod>,
) -> Vec<(usize, usize, CorePod)> {
    let mut by_node: HashMap<String, Vec<CorePod>> = HashMap::new();
    for pod in fresh {
        by_node.entry(pod.node.clone()).or_default().push(pod);
    }

    let mut replacements = Vec::new();
    for &(g, s) in changed {
        let slot = &groups[g][s];
        match by_node.get_mut(&slot.node).and_then(|pods| if pods.is_empty() { None } else { Some(pods.remove(0)) }) {
            Some(replacement) => replacements.push((g, s, replacement)),
            None => {
                // Leave the slot in place and limp along.
                tracing::error!(backend = %slot.backend, connection = %slot.connection, node = %slot.node, "no replacement pod on the slot's node, node appears to have changed");
            }
        }
    }
    replacements
}

/// Match RO slots whose pod vanished to observed pods not yet in the model,
/// positionally.
pub(crate) fn ro_addr_diffs(slots: &[CorePod], observed: &[CorePod]) -> Vec<(usize, CorePod)> {
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| !observed.iter().any(|pod| pod.address == slot.address))
        .map(|(k, _)| k)
        .collect();
    let fresh: Vec<CorePod> = observed
        .iter()
        .filter(|pod| !slots.iter().any(|slot| slot.address == pod.address))
        .cloned()
        .collect();
    missing.into_iter().zip(fresh).collect()
}
