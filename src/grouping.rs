//! Pairing of RW core pods into active-active groups.
//!
//! Pods whose device sets intersect belong together, pairs must never share
//! a node, and the outcome is deterministic for a given input order.

use std::collections::HashSet;

use crate::error::GroupingError;
use crate::state::{CoreGroup, CorePod};

/// Pair `2N` RW pods into `N` groups of two.
///
/// Runs in three phases: pods with intersecting device sets are paired
/// first, leftover pods start new groups on nodes not yet represented, and
/// remaining pods fill incomplete groups under node anti-affinity. Fails
/// with `InsufficientNodeDiversity` when anti-affinity cannot be satisfied.
pub fn group_pods(pods: Vec<CorePod>) -> Result<Vec<CoreGroup>, GroupingError> {
    let target = pods.len() / 2;

    let (mut groups, mut leftover) = pair_intersecting(pods, target);
    if groups.len() < target {
        start_remaining_groups(&mut groups, &mut leftover, target);
    }
    if groups.len() < target {
        return Err(GroupingError::InsufficientNodeDiversity);
    }
    fill_incomplete_groups(&mut groups, leftover)?;

    let mut out = Vec::with_capacity(groups.len());
    for mut group in groups {
        match (group.pop(), group.pop()) {
            (Some(second), Some(first)) => out.push([first, second]),
            _ => return Err(GroupingError::InsufficientNodeDiversity),
        }
    }
    Ok(out)
}

/// Phase A: start a group per pod with devices, pairing it with the first
/// later pod whose device set intersects and whose node differs.
///
/// Stops as soon as `target` groups have been started or the pool is
/// exhausted. Pods with no devices, and anything left when the loop stops,
/// end up in the leftover pool.
fn pair_intersecting(mut pool: Vec<CorePod>, target: usize) -> (Vec<Vec<CorePod>>, Vec<CorePod>) {
    let mut groups: Vec<Vec<CorePod>> = Vec::new();
    let mut leftover: Vec<CorePod> = Vec::new();

    while !pool.is_empty() {
        let lead = pool.remove(0);
        if lead.device_ids.is_empty() {
            leftover.push(lead);
            continue;
        }

        let mut group = vec![lead];
        let mut mate = None;
        for (k, candidate) in pool.iter().enumerate() {
            if candidate.device_ids.is_empty() {
                continue;
            }
            if !intersects(&group[0].device_ids, &candidate.device_ids) {
                continue;
            }
            if candidate.node == group[0].node {
                // This should never happen.
                tracing::error!(
                    lead = %group[0].name,
                    candidate = %candidate.name,
                    "pods intersect but share a node, not pairing",
                );
                continue;
            }
            mate = Some(k);
            break;
        }
        if let Some(k) = mate {
            group.push(pool.remove(k));
        }
        groups.push(group);

        if groups.len() == target {
            leftover.append(&mut pool);
            break;
        }
    }

    (groups, leftover)
}

/// Phase B: start singleton groups from the leftover pool, one per node not
/// already represented in any existing group, until `target` groups exist.
fn start_remaining_groups(groups: &mut Vec<Vec<CorePod>>, pool: &mut Vec<CorePod>, target: usize) {
    let mut k = 0;
    while groups.len() < target && k < pool.len() {
        if node_in_groups(&pool[k].node, groups) {
            k += 1;
            continue;
        }
        let pod = pool.remove(k);
        groups.push(vec![pod]);
    }
}

/// Phase C: fill every incomplete group with a node-distinct pod from the
/// pool.
///
/// Groups down to a single remaining candidate are resolved first and their
/// assignment removed from every other candidate list; when no forced
/// choice remains, the first pending group takes its first candidate.
fn fill_incomplete_groups(groups: &mut [Vec<CorePod>], pool: Vec<CorePod>) -> Result<(), GroupingError> {
    let mut pending: Vec<(usize, Vec<usize>)> = groups
        .iter()
        .enumerate()
        .filter(|(_, group)| group.len() != 2)
        .map(|(gi, group)| {
            let candidates = pool
                .iter()
                .enumerate()
                .filter(|(_, pod)| pod.node != group[0].node)
                .map(|(pi, _)| pi)
                .collect::<Vec<_>>();
            (gi, candidates)
        })
        .collect();
    let mut taken = vec![false; pool.len()];

    while !pending.is_empty() {
        for (_, candidates) in pending.iter_mut() {
            candidates.retain(|&pi| !taken[pi]);
        }
        if pending.iter().any(|(_, candidates)| candidates.is_empty()) {
            return Err(GroupingError::InsufficientNodeDiversity);
        }

        // Forced choices first, then the first pending group's first candidate.
        let next = pending
            .iter()
            .position(|(_, candidates)| candidates.len() == 1)
            .unwrap_or(0);
        let (gi, candidates) = pending.remove(next);
        let pi = candidates[0];
        taken[pi] = true;
        groups[gi].push(pool[pi].clone());
    }

    Ok(())
}

fn intersects(d1: &HashSet<String>, d2: &HashSet<String>) -> bool {
    d1.iter().any(|id| d2.contains(id))
}

fn node_in_groups(node: &str, groups: &[Vec<CorePod>]) -> bool {
    groups.iter().any(|group| group.iter().any(|pod| pod.node == node))
}
