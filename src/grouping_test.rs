use crate::error::GroupingError;
use crate::fixtures::core_pod;
use crate::grouping::group_pods;
use crate::state::CoreGroup;

/// Assert total allocation, pair size, and node anti-affinity.
fn assert_invariants(groups: &[CoreGroup], input_len: usize) {
    assert!(
        groups.len() == input_len / 2,
        "expected {} groups for {} pods, got {}",
        input_len / 2,
        input_len,
        groups.len()
    );
    for group in groups {
        assert!(
            group[0].node != group[1].node,
            "pods {} and {} were paired on the same node {}",
            group[0].name,
            group[1].name,
            group[0].node
        );
    }
    let mut names: Vec<&str> = groups.iter().flat_map(|group| group.iter().map(|pod| pod.name.as_str())).collect();
    let total = names.len();
    assert!(total == input_len, "expected {} pods across all groups, got {}", input_len, total);
    names.sort_unstable();
    names.dedup();
    assert!(names.len() == total, "expected every pod to appear in exactly one group");
}

#[test]
fn intersecting_pods_on_distinct_nodes_are_paired() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1"]),
        core_pod("rw-core0-b", "10.0.0.2", "node-b", &["d1"]),
    ];
    let groups = group_pods(pods).expect("grouping failed");

    assert_invariants(&groups, 2);
    assert!(groups[0][0].name == "rw-core0-a", "unexpected first slot pod: {}", groups[0][0].name);
    assert!(groups[0][1].name == "rw-core0-b", "unexpected second slot pod: {}", groups[0][1].name);
}

#[test]
fn intersecting_pods_on_the_same_node_fail_grouping() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1"]),
        core_pod("rw-core0-b", "10.0.0.2", "node-a", &["d1"]),
    ];
    let err = group_pods(pods).expect_err("grouping should have failed");
    assert!(
        err == GroupingError::InsufficientNodeDiversity,
        "expected InsufficientNodeDiversity, got {:?}",
        err
    );
}

#[test]
fn empty_pods_fill_the_remaining_group() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1"]),
        core_pod("rw-core0-b", "10.0.0.2", "node-b", &["d1"]),
        core_pod("rw-core1-a", "10.0.0.3", "node-c", &[]),
        core_pod("rw-core1-b", "10.0.0.4", "node-d", &[]),
    ];
    let groups = group_pods(pods).expect("grouping failed");

    assert_invariants(&groups, 4);
    let intersecting = groups
        .iter()
        .find(|group| group.iter().any(|pod| pod.name == "rw-core0-a"))
        .expect("no group holds rw-core0-a");
    assert!(
        intersecting.iter().any(|pod| pod.name == "rw-core0-b"),
        "intersecting pods were split across groups"
    );
}

#[test]
fn singleton_groups_take_forced_node_distinct_candidates() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1"]),
        core_pod("rw-core1-a", "10.0.0.2", "node-b", &["d2"]),
        core_pod("rw-core0-b", "10.0.0.3", "node-b", &[]),
        core_pod("rw-core1-b", "10.0.0.4", "node-a", &[]),
    ];
    let groups = group_pods(pods).expect("grouping failed");

    assert_invariants(&groups, 4);
    // Each empty pod has exactly one node-distinct group to land in.
    assert!(groups[0][0].name == "rw-core0-a" && groups[0][1].name == "rw-core0-b", "unexpected first group");
    assert!(groups[1][0].name == "rw-core1-a" && groups[1][1].name == "rw-core1-b", "unexpected second group");
}

#[test]
fn pods_without_devices_group_under_anti_affinity() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &[]),
        core_pod("rw-core0-b", "10.0.0.2", "node-b", &[]),
        core_pod("rw-core1-a", "10.0.0.3", "node-c", &[]),
        core_pod("rw-core1-b", "10.0.0.4", "node-d", &[]),
    ];
    let groups = group_pods(pods).expect("grouping failed");
    assert_invariants(&groups, 4);
}

#[test]
fn node_starved_placement_fails_grouping() {
    let pods = vec![
        core_pod("rw-core0-a", "10.0.0.1", "node-a", &[]),
        core_pod("rw-core0-b", "10.0.0.2", "node-a", &[]),
        core_pod("rw-core1-a", "10.0.0.3", "node-a", &[]),
        core_pod("rw-core1-b", "10.0.0.4", "node-b", &[]),
    ];
    let err = group_pods(pods).expect_err("grouping should have failed");
    assert!(
        err == GroupingError::InsufficientNodeDiversity,
        "expected InsufficientNodeDiversity, got {:?}",
        err
    );
}

#[test]
fn grouping_is_deterministic_for_a_given_input_order() {
    let pods = || {
        vec![
            core_pod("rw-core0-a", "10.0.0.1", "node-a", &["d1", "d2"]),
            core_pod("rw-core0-b", "10.0.0.2", "node-b", &["d2"]),
            core_pod("rw-core1-a", "10.0.0.3", "node-a", &["d9"]),
            core_pod("rw-core1-b", "10.0.0.4", "node-c", &["d9"]),
            core_pod("rw-core2-a", "10.0.0.5", "node-b", &[]),
            core_pod("rw-core2-b", "10.0.0.6", "node-d", &[]),
        ]
    };
    let first = group_pods(pods()).expect("grouping failed");
    let second = group_pods(pods()).expect("grouping failed");

    assert_invariants(&first, 6);
    assert!(first == second, "expected identical groupings for identical input");
    // Intersection pairs form first, in input order.
    assert!(first[0][0].name == "rw-core0-a" && first[0][1].name == "rw-core0-b", "unexpected first group");
    assert!(first[1][0].name == "rw-core1-a" && first[1][1].name == "rw-core1-b", "unexpected second group");
}
