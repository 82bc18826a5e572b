//! The per-connection model of core pods and their router coordinates.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

/// A single RW or RO core pod together with its router coordinates.
///
/// Router coordinates are empty until assigned during initial configuration
/// and never change for the lifetime of one router connection; the pod
/// behind a slot may be replaced, the slot's identity may not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorePod {
    /// The pod's name, stable and unique within the namespace.
    pub name: String,
    /// The pod's IP address, which may change across restarts.
    pub address: String,
    /// The node hosting the pod, used for anti-affinity.
    pub node: String,
    /// Device IDs currently owned by the pod; may be stale by seconds.
    pub device_ids: HashSet<String>,
    /// The router cluster this pod belongs to.
    pub cluster: String,
    /// The router backend name of this pod's slot.
    pub backend: String,
    /// The router connection name of this pod's slot.
    pub connection: String,
}

/// An active-active pair of RW core pods backing one router backend.
pub type CoreGroup = [CorePod; 2];

/// The peer slot index within a group.
pub fn peer(slot: usize) -> usize {
    slot ^ 1
}

/// All router-visible state for one router connection.
///
/// Discarded wholesale when the router connection drops; a fresh model is
/// built by the initial configurator on reconnect.
#[derive(Debug, Default)]
pub struct CoreState {
    /// RW pods, paired into active-active groups.
    pub groups: Vec<CoreGroup>,
    /// RO pods, mapped 1:1 onto RO backends.
    pub ro_pods: Vec<CorePod>,
}

impl CoreState {
    /// Resolve a discovered device to its owning backend, recording the ID
    /// into the owning slot's device set.
    ///
    /// Resolution prefers the publishing pod's name when the event carries
    /// one, and falls back to looking the device ID up across current slot
    /// device sets. Returns `None` when neither resolves.
    pub fn bind_device(&mut self, id: &str, publisher: &str) -> Option<String> {
        if !publisher.is_empty() {
            if let Some(backend) = self.record_device(id, |pod| pod.name == publisher) {
                return Some(backend);
            }
        }
        self.record_device(id, |pod| pod.device_ids.contains(id))
    }

    fn record_device<F: Fn(&CorePod) -> bool>(&mut self, id: &str, owns: F) -> Option<String> {
        for group in self.groups.iter_mut() {
            for pod in group.iter_mut() {
                if owns(pod) {
                    pod.device_ids.insert(id.to_string());
                    return Some(pod.backend.clone());
                }
            }
        }
        None
    }
}

/// Shared handle to the per-connection state.
///
/// The lock is held only for slot reads and writes, never across an RPC.
pub type SharedState = Arc<Mutex<CoreState>>;
