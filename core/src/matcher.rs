//! Peering matcher
//!
//! Pure decision logic for one pass: pairs each participant with at most one
//! gateway (same cluster value, same location), classifies how much of each
//! pair's bidirectional peering already exists, and derives the teardown set
//! from whatever peering refs are left unclaimed. No I/O happens here, which
//! is what keeps the policy unit-testable.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::inventory::Inventory;
use crate::provider::{parse_network_id, NetworkRef};

/// Canonical name shared by both sides of a pair's peering.
///
/// The fixed shape is what lets teardown find both halves from either side
/// without auxiliary state.
pub fn peering_name(gateway: &str, participant: &str) -> String {
    format!("{gateway}to{participant}")
}

/// How much of a matched pair's bidirectional peering exists right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeeringPresence {
    /// Neither side holds a ref to the other
    Absent,
    /// Only the gateway side exists (earlier pass failed after the first
    /// create, or the participant side was deleted externally)
    GatewayHalf,
    /// Only the participant side exists
    ParticipantHalf,
    /// Both refs present
    Established,
}

/// A participant matched to its gateway.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub gateway: NetworkRef,
    pub participant: NetworkRef,
    /// Gateway's load balancer address, when already tagged on
    pub gateway_address: Option<String>,
    pub peering_name: String,
    pub presence: PeeringPresence,
}

/// One relationship to tear down: the participant's default route plus both
/// peering halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownItem {
    pub peering_name: String,
    /// Side holding the private route table
    pub participant: NetworkRef,
    /// The opposite side of the relationship
    pub counterpart: NetworkRef,
}

/// Everything one pass has decided to do.
#[derive(Debug, Default)]
pub struct MatchPlan {
    pub pairs: Vec<MatchedPair>,
    pub teardowns: Vec<TeardownItem>,
    /// Participants with no matching gateway this pass (names, for logging)
    pub unmatched: Vec<String>,
}

fn network_ref(id: &str, resource_group: &str, name: &str) -> NetworkRef {
    NetworkRef {
        id: id.to_string(),
        resource_group: resource_group.to_string(),
        name: name.to_string(),
    }
}

/// Compute the full desired/actual diff for one pass.
///
/// Gateways and participants are scanned once. Each matched pair retains the
/// gateway-side ref that names its participant; after the scan, every
/// unretained gateway ref and every ref still held by an unmatched
/// participant becomes a teardown item. Removal sets are collected first and
/// emitted afterwards; nothing is removed from a list while it is iterated.
pub fn plan(inventory: &Inventory) -> MatchPlan {
    let mut plan = MatchPlan::default();
    // retained[g] holds indices into gateway g's peering list
    let mut retained: Vec<HashSet<usize>> =
        vec![HashSet::new(); inventory.gateways.len()];

    for participant in &inventory.participants {
        let mut candidates: Vec<usize> = inventory
            .gateways
            .iter()
            .enumerate()
            .filter(|(_, g)| {
                g.cluster == participant.cluster && g.net.location == participant.net.location
            })
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            debug!(
                participant = %participant.net.name,
                cluster = %participant.cluster,
                "no gateway for participant"
            );
            plan.unmatched.push(participant.net.name.clone());
            continue;
        }

        if candidates.len() > 1 {
            candidates.sort_by(|a, b| {
                inventory.gateways[*a]
                    .net
                    .name
                    .cmp(&inventory.gateways[*b].net.name)
            });
            let names: Vec<&str> = candidates
                .iter()
                .map(|i| inventory.gateways[*i].net.name.as_str())
                .collect();
            // deliberately not a failure: the policy picks the smallest name
            warn!(
                participant = %participant.net.name,
                cluster = %participant.cluster,
                candidates = ?names,
                chosen = names[0],
                "participant matches multiple gateways"
            );
        }

        let gateway_index = candidates[0];
        let gateway = &inventory.gateways[gateway_index];

        let gateway_side = gateway
            .net
            .peerings
            .iter()
            .position(|p| p.remote_network_id == participant.net.id);
        if let Some(index) = gateway_side {
            retained[gateway_index].insert(index);
        }
        let participant_side = participant
            .net
            .peerings
            .iter()
            .any(|p| p.remote_network_id == gateway.net.id);

        let presence = match (gateway_side.is_some(), participant_side) {
            (true, true) => PeeringPresence::Established,
            (true, false) => PeeringPresence::GatewayHalf,
            (false, true) => PeeringPresence::ParticipantHalf,
            (false, false) => PeeringPresence::Absent,
        };

        plan.pairs.push(MatchedPair {
            gateway: network_ref(
                &gateway.net.id,
                &gateway.net.resource_group,
                &gateway.net.name,
            ),
            participant: network_ref(
                &participant.net.id,
                &participant.net.resource_group,
                &participant.net.name,
            ),
            gateway_address: gateway.private_address.clone(),
            peering_name: peering_name(&gateway.net.name, &participant.net.name),
            presence,
        });
    }

    // Stale refs: whatever is left on a gateway after all retentions points
    // at a network that no longer matches it.
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for (gateway_index, gateway) in inventory.gateways.iter().enumerate() {
        for (index, reference) in gateway.net.peerings.iter().enumerate() {
            if retained[gateway_index].contains(&index) {
                continue;
            }
            let remote = match parse_network_id(&reference.remote_network_id) {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(
                        gateway = %gateway.net.name,
                        peering = %reference.name,
                        error = %err,
                        "cannot resolve stale peering remote, skipping"
                    );
                    continue;
                }
            };
            if seen.insert((reference.name.clone(), remote.id.clone())) {
                plan.teardowns.push(TeardownItem {
                    peering_name: reference.name.clone(),
                    participant: remote,
                    counterpart: network_ref(
                        &gateway.net.id,
                        &gateway.net.resource_group,
                        &gateway.net.name,
                    ),
                });
            }
        }
    }

    // Orphaned refs: an unmatched participant may still hold peerings from a
    // gateway that has since been removed or re-tagged.
    let matched: HashSet<&str> = plan
        .pairs
        .iter()
        .map(|p| p.participant.name.as_str())
        .collect();
    for participant in &inventory.participants {
        if matched.contains(participant.net.name.as_str()) {
            continue;
        }
        for reference in &participant.net.peerings {
            let remote = match parse_network_id(&reference.remote_network_id) {
                Ok(remote) => remote,
                Err(err) => {
                    warn!(
                        participant = %participant.net.name,
                        peering = %reference.name,
                        error = %err,
                        "cannot resolve orphaned peering remote, skipping"
                    );
                    continue;
                }
            };
            if seen.insert((reference.name.clone(), participant.net.id.clone())) {
                plan.teardowns.push(TeardownItem {
                    peering_name: reference.name.clone(),
                    participant: network_ref(
                        &participant.net.id,
                        &participant.net.resource_group,
                        &participant.net.name,
                    ),
                    counterpart: remote,
                });
            }
        }
    }

    plan
}
