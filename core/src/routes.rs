//! Default route synchronization
//!
//! Keeps each matched participant's private route table holding exactly one
//! default route at the gateway's load balancer address. The route lives
//! under a fixed name so teardown can find it with no auxiliary state, and
//! creation is an upsert keyed by that name: a pass that reruns or a table
//! that drifted converges instead of accumulating duplicates.

use tracing::debug;

use crate::config::MeshSettings;
use crate::provider::{NetworkProvider, NetworkRef, NextHopKind, ProviderError, RouteSpec};

/// The route a matched participant should carry.
pub fn desired_route(settings: &MeshSettings, gateway_address: &str) -> RouteSpec {
    RouteSpec {
        address_prefix: settings.route_prefix.clone(),
        next_hop: NextHopKind::VirtualAppliance,
        next_hop_address: Some(gateway_address.to_string()),
    }
}

/// Ensure the participant's default route points at the gateway address.
///
/// Returns `Ok(true)` when a write was issued, `Ok(false)` when the existing
/// route already matched and nothing was touched.
pub async fn ensure_default_route(
    provider: &dyn NetworkProvider,
    settings: &MeshSettings,
    participant: &NetworkRef,
    gateway_address: &str,
) -> Result<bool, ProviderError> {
    let desired = desired_route(settings, gateway_address);
    let existing = provider
        .get_route(
            &participant.resource_group,
            &settings.route_table_name,
            &settings.route_name,
        )
        .await?;
    if existing.as_ref() == Some(&desired) {
        debug!(participant = %participant, "default route already current");
        return Ok(false);
    }
    provider
        .upsert_route(
            &participant.resource_group,
            &settings.route_table_name,
            &settings.route_name,
            &desired,
        )
        .await?;
    Ok(true)
}

/// Remove the participant's default route. Removing an absent route is a
/// success on every backend.
pub async fn remove_default_route(
    provider: &dyn NetworkProvider,
    settings: &MeshSettings,
    participant: &NetworkRef,
) -> Result<(), ProviderError> {
    provider
        .delete_route(
            &participant.resource_group,
            &settings.route_table_name,
            &settings.route_name,
        )
        .await
}
