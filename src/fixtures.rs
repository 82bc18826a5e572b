use k8s_openapi::api::core::v1::{Pod, PodCondition, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::state::CorePod;

/// Build a core pod with the given placement and device IDs.
pub fn core_pod(name: &str, address: &str, node: &str, devices: &[&str]) -> CorePod {
    CorePod {
        name: name.into(),
        address: address.into(),
        node: node.into(),
        device_ids: devices.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    }
}

/// Build a synthetic pod object in the given phase with the given status conditions.
pub fn pod_object(name: &str, ip: &str, node: &str, phase: &str, conditions: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.into()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.into()),
            pod_ip: Some(ip.into()),
            conditions: Some(
                conditions
                    .iter()
                    .map(|(type_, status)| PodCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
    }
}

/// Build a running pod object with all conditions reporting true.
pub fn running_pod(name: &str, ip: &str, node: &str) -> Pod {
    pod_object(name, ip, node, "Running", &[("Ready", "True"), ("ContainersReady", "True")])
}
