//! Cloud network provider abstraction
//!
//! Defines the minimal surface the reconciler needs from the cloud control
//! plane: listing virtual networks and get/create/delete on peerings and
//! routes. The Azure Resource Manager backend lives in [`azure`]; an
//! in-memory double for tests lives in [`memory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod azure;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

/// Errors surfaced by a provider backend.
///
/// All variants are transient from the reconciler's point of view: the
/// operation that hit one is skipped and re-derived on the next pass.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Malformed resource id: {0}")]
    MalformedId(String),
}

/// One side of a virtual network peering, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeeringRef {
    /// Peering name on this side
    pub name: String,
    /// Full resource id of the network on the other side
    pub remote_network_id: String,
}

/// A virtual network as listed by the provider.
///
/// Read fresh every pass and discarded at pass end; nothing here is cached
/// across passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    /// Full resource id
    pub id: String,
    /// Short name
    pub name: String,
    /// Resource group holding the network (and its route tables)
    pub resource_group: String,
    /// Provider region, e.g. `eastus`
    pub location: String,
    /// Tag map; keys are unique
    pub tags: BTreeMap<String, String>,
    /// Peerings configured on this network, in provider order
    pub peerings: Vec<PeeringRef>,
}

impl VirtualNetwork {
    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Resource group + name of a network, with its full id.
///
/// Teardown items carry these for both sides of a relationship so deletions
/// can be issued without re-reading the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRef {
    pub id: String,
    pub resource_group: String,
    pub name: String,
}

impl fmt::Display for NetworkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

/// Parse resource group and network name out of a full ARM resource id.
///
/// Ids look like
/// `/subscriptions/S/resourceGroups/RG/providers/Microsoft.Network/virtualNetworks/NAME`;
/// the group sits at segment 4 and the name at segment 8.
pub fn parse_network_id(id: &str) -> Result<NetworkRef, ProviderError> {
    let parts: Vec<&str> = id.split('/').collect();
    let (Some(resource_group), Some(name)) = (parts.get(4), parts.get(8)) else {
        return Err(ProviderError::MalformedId(id.to_string()));
    };
    if resource_group.is_empty() || name.is_empty() {
        return Err(ProviderError::MalformedId(id.to_string()));
    }
    Ok(NetworkRef {
        id: id.to_string(),
        resource_group: (*resource_group).to_string(),
        name: (*name).to_string(),
    })
}

/// Desired configuration for one side of a peering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringSpec {
    /// Full resource id of the remote network
    pub remote_network_id: String,
    pub allow_network_access: bool,
    pub allow_forwarded_traffic: bool,
    pub allow_gateway_transit: bool,
    pub use_remote_gateways: bool,
}

impl PeeringSpec {
    /// Gateway-side peering: traffic to the participant is allowed but the
    /// gateway does not accept forwarded traffic from it.
    pub fn gateway_side(remote_network_id: &str) -> Self {
        Self {
            remote_network_id: remote_network_id.to_string(),
            allow_network_access: true,
            allow_forwarded_traffic: false,
            allow_gateway_transit: false,
            use_remote_gateways: false,
        }
    }

    /// Participant-side peering: the participant forwards its traffic into
    /// the gateway network.
    pub fn participant_side(remote_network_id: &str) -> Self {
        Self {
            remote_network_id: remote_network_id.to_string(),
            allow_network_access: true,
            allow_forwarded_traffic: true,
            allow_gateway_transit: false,
            use_remote_gateways: false,
        }
    }
}

/// Next-hop kind of a route entry.
///
/// Serialized variant names match the ARM wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextHopKind {
    VirtualAppliance,
    VnetLocal,
    Internet,
    VirtualNetworkGateway,
    None,
}

impl NextHopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextHopKind::VirtualAppliance => "VirtualAppliance",
            NextHopKind::VnetLocal => "VnetLocal",
            NextHopKind::Internet => "Internet",
            NextHopKind::VirtualNetworkGateway => "VirtualNetworkGateway",
            NextHopKind::None => "None",
        }
    }
}

/// A route entry in a route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Destination prefix, e.g. `0.0.0.0/0`
    pub address_prefix: String,
    pub next_hop: NextHopKind,
    /// Required when `next_hop` is `VirtualAppliance`
    pub next_hop_address: Option<String>,
}

/// The cloud control-plane operations the mesh reconciler consumes.
///
/// Peerings are keyed by (resource group, network name, peering name) and
/// routes by (resource group, route table name, route name). Deleting a
/// resource that is already gone is a success on every backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// List every virtual network visible to the credentials.
    async fn list_networks(&self) -> Result<Vec<VirtualNetwork>, ProviderError>;

    /// Fetch a single peering; `Ok(None)` when it does not exist.
    async fn get_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<Option<PeeringRef>, ProviderError>;

    /// Create or update one side of a peering.
    async fn create_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        spec: &PeeringSpec,
    ) -> Result<(), ProviderError>;

    /// Delete one side of a peering.
    async fn delete_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    /// Fetch a single route entry; `Ok(None)` when it does not exist.
    async fn get_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<Option<RouteSpec>, ProviderError>;

    /// Create or replace a route entry under a fixed name.
    async fn upsert_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
        spec: &RouteSpec,
    ) -> Result<(), ProviderError>;

    /// Delete a route entry.
    async fn delete_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network_id() {
        let id = "/subscriptions/sub1/resourceGroups/rg7/providers/Microsoft.Network/virtualNetworks/spoke3";
        let parsed = parse_network_id(id).unwrap();
        assert_eq!(parsed.resource_group, "rg7");
        assert_eq!(parsed.name, "spoke3");
        assert_eq!(parsed.id, id);
    }

    #[test]
    fn test_parse_network_id_rejects_short_ids() {
        assert!(parse_network_id("/subscriptions/sub1").is_err());
        assert!(parse_network_id("").is_err());
    }

    #[test]
    fn test_peering_spec_sides() {
        let gw = PeeringSpec::gateway_side("/id/participant");
        assert!(gw.allow_network_access);
        assert!(!gw.allow_forwarded_traffic);

        let part = PeeringSpec::participant_side("/id/gateway");
        assert!(part.allow_network_access);
        assert!(part.allow_forwarded_traffic);
        assert!(!part.use_remote_gateways);
    }

    #[test]
    fn test_next_hop_wire_names() {
        assert_eq!(NextHopKind::VirtualAppliance.as_str(), "VirtualAppliance");
        assert_eq!(
            serde_json::to_value(NextHopKind::VirtualAppliance).unwrap(),
            serde_json::json!("VirtualAppliance")
        );
    }
}
