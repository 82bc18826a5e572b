use crate::configure::{assign_ro_coordinates, assign_rw_coordinates};
use crate::fixtures::core_pod;

#[test]
fn rw_coordinates_follow_group_and_slot_indexes() {
    let mut groups = vec![
        [
            core_pod("rw-core0-a", "10.0.0.1", "node-a", &[]),
            core_pod("rw-core0-b", "10.0.0.2", "node-b", &[]),
        ],
        [
            core_pod("rw-core1-a", "10.0.0.3", "node-a", &[]),
            core_pod("rw-core1-b", "10.0.0.4", "node-b", &[]),
        ],
    ];
    assign_rw_coordinates(&mut groups, "vcore");

    assert!(groups[0][0].cluster == "vcore", "unexpected cluster: {}", groups[0][0].cluster);
    assert!(groups[0][0].backend == "vcore1", "unexpected backend: {}", groups[0][0].backend);
    assert!(groups[0][0].connection == "vcore11", "unexpected connection: {}", groups[0][0].connection);
    assert!(groups[0][1].backend == "vcore1", "unexpected backend: {}", groups[0][1].backend);
    assert!(groups[0][1].connection == "vcore12", "unexpected connection: {}", groups[0][1].connection);
    assert!(groups[1][0].backend == "vcore2", "unexpected backend: {}", groups[1][0].backend);
    assert!(groups[1][0].connection == "vcore21", "unexpected connection: {}", groups[1][0].connection);
    assert!(groups[1][1].connection == "vcore22", "unexpected connection: {}", groups[1][1].connection);
}

#[test]
fn ro_coordinates_follow_pod_indexes() {
    let mut ro_pods = vec![
        core_pod("ro-core-a", "10.0.1.1", "node-a", &[]),
        core_pod("ro-core-b", "10.0.1.2", "node-b", &[]),
    ];
    assign_ro_coordinates(&mut ro_pods, "ro_vcore");

    assert!(ro_pods[0].cluster == "ro_vcore", "unexpected cluster: {}", ro_pods[0].cluster);
    assert!(ro_pods[0].backend == "ro_vcore1", "unexpected backend: {}", ro_pods[0].backend);
    assert!(ro_pods[0].connection == "ro_vcore11", "unexpected connection: {}", ro_pods[0].connection);
    assert!(ro_pods[1].backend == "ro_vcore2", "unexpected backend: {}", ro_pods[1].backend);
    assert!(ro_pods[1].connection == "ro_vcore21", "unexpected connection: {}", ro_pods[1].connection);
}

#[test]
fn coordinate_assignment_is_idempotent() {
    let mut groups = vec![[
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &[]),
        core_pod("rw-core0-b", "10.0.0.2", "node-b", &[]),
    ]];
    assign_rw_coordinates(&mut groups, "vcore");
    let first = groups.clone();
    assign_rw_coordinates(&mut groups, "vcore");
    assert!(groups == first, "expected repeated assignment to leave coordinates unchanged");
}
