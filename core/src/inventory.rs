//! Inventory collection and classification
//!
//! Reads the full network listing and sorts tagged members into the gateway
//! and participant sets. Classification is an explicit parse into typed
//! records; an object with malformed tags is excluded from the pass and
//! logged, never fatal. A listing failure downgrades the pass to an empty
//! inventory so the loop keeps its cadence.

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::MeshSettings;
use crate::provider::{NetworkProvider, VirtualNetwork};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("cluster tag `{key}` has an empty value")]
    EmptyCluster { key: String },
    #[error("gateway marker `{key}` has non-boolean value `{value}`")]
    BadMarker { key: String, value: String },
}

/// A member network hosting its cluster's internal load balancer.
#[derive(Debug, Clone)]
pub struct GatewayVnet {
    pub net: VirtualNetwork,
    /// Value of the cluster tag
    pub cluster: String,
    /// Load balancer frontend address; absent until the balancer is up and
    /// the address has been tagged onto the network
    pub private_address: Option<String>,
}

/// A member network eligible for peering with its cluster's gateway.
#[derive(Debug, Clone)]
pub struct ParticipantVnet {
    pub net: VirtualNetwork,
    pub cluster: String,
}

/// The two disjoint member sets of one pass.
#[derive(Debug, Default)]
pub struct Inventory {
    pub gateways: Vec<GatewayVnet>,
    pub participants: Vec<ParticipantVnet>,
}

impl Inventory {
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty() && self.participants.is_empty()
    }
}

/// Classification outcome for a single network.
#[derive(Debug)]
pub enum Membership {
    Gateway(GatewayVnet),
    Participant(ParticipantVnet),
}

/// Parse one network's tags into a typed membership record.
///
/// `Ok(None)` means the network carries no cluster tag and is simply not a
/// member. Marker values accepted as true: `true`/`1` (any case); as false:
/// `false`/`0`.
pub fn classify(
    net: VirtualNetwork,
    settings: &MeshSettings,
) -> Result<Option<Membership>, ClassifyError> {
    let Some(cluster) = net.tag(&settings.cluster_tag_key) else {
        return Ok(None);
    };
    if cluster.is_empty() {
        return Err(ClassifyError::EmptyCluster {
            key: settings.cluster_tag_key.clone(),
        });
    }
    let cluster = cluster.to_string();

    let is_gateway = match net.tag(&settings.gateway_marker_key) {
        None => false,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => {
                return Err(ClassifyError::BadMarker {
                    key: settings.gateway_marker_key.clone(),
                    value: value.to_string(),
                })
            }
        },
    };

    if is_gateway {
        let private_address = net
            .tag(&settings.gateway_address_key)
            .map(str::to_string);
        Ok(Some(Membership::Gateway(GatewayVnet {
            net,
            cluster,
            private_address,
        })))
    } else {
        Ok(Some(Membership::Participant(ParticipantVnet { net, cluster })))
    }
}

/// Read the full listing and classify it into the pass inventory.
///
/// Pure read; nothing here mutates provider state.
pub async fn collect(provider: &dyn NetworkProvider, settings: &MeshSettings) -> Inventory {
    let networks = match provider.list_networks().await {
        Ok(networks) => networks,
        Err(err) => {
            warn!(error = %err, "unable to list networks, running pass with empty inventory");
            return Inventory::default();
        }
    };

    let mut inventory = Inventory::default();
    for net in networks {
        let name = net.name.clone();
        match classify(net, settings) {
            Ok(Some(Membership::Gateway(gateway))) => inventory.gateways.push(gateway),
            Ok(Some(Membership::Participant(participant))) => {
                inventory.participants.push(participant)
            }
            Ok(None) => debug!(network = %name, "not a mesh member, skipping"),
            Err(err) => warn!(network = %name, error = %err, "excluding network from pass"),
        }
    }
    debug!(
        gateways = inventory.gateways.len(),
        participants = inventory.participants.len(),
        "collected inventory"
    );
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockNetworkProvider, ProviderError};
    use std::collections::BTreeMap;

    fn network(name: &str, tags: &[(&str, &str)]) -> VirtualNetwork {
        VirtualNetwork {
            id: format!(
                "/subscriptions/s/resourceGroups/rg-{name}/providers/Microsoft.Network/virtualNetworks/{name}"
            ),
            name: name.to_string(),
            resource_group: format!("rg-{name}"),
            location: "eastus".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            peerings: Vec::new(),
        }
    }

    #[test]
    fn test_untagged_network_is_not_a_member() {
        let settings = MeshSettings::default();
        let result = classify(network("plain", &[]), &settings).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_marker_tag_selects_gateway() {
        let settings = MeshSettings::default();
        let net = network(
            "silb0",
            &[
                ("auto_tvpc_cluster_member", "dev"),
                ("tvpc_silb_vnet", "True"),
                ("tvpc_silb_private_address", "10.0.1.4"),
            ],
        );
        match classify(net, &settings).unwrap() {
            Some(Membership::Gateway(gw)) => {
                assert_eq!(gw.cluster, "dev");
                assert_eq!(gw.private_address.as_deref(), Some("10.0.1.4"));
            }
            other => panic!("expected gateway, got {other:?}"),
        }
    }

    #[test]
    fn test_member_without_marker_is_participant() {
        let settings = MeshSettings::default();
        let net = network("spoke1", &[("auto_tvpc_cluster_member", "dev")]);
        assert!(matches!(
            classify(net, &settings).unwrap(),
            Some(Membership::Participant(_))
        ));
    }

    #[test]
    fn test_garbage_marker_is_excluded() {
        let settings = MeshSettings::default();
        let net = network(
            "odd",
            &[
                ("auto_tvpc_cluster_member", "dev"),
                ("tvpc_silb_vnet", "maybe"),
            ],
        );
        assert!(matches!(
            classify(net, &settings),
            Err(ClassifyError::BadMarker { .. })
        ));
    }

    #[test]
    fn test_empty_cluster_value_is_excluded() {
        let settings = MeshSettings::default();
        let net = network("odd", &[("auto_tvpc_cluster_member", "")]);
        assert!(matches!(
            classify(net, &settings),
            Err(ClassifyError::EmptyCluster { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_failure_yields_empty_inventory() {
        let mut provider = MockNetworkProvider::new();
        provider
            .expect_list_networks()
            .returning(|| Err(ProviderError::Transport("connection reset".to_string())));

        let inventory = collect(&provider, &MeshSettings::default()).await;
        assert!(inventory.is_empty());
    }

    #[tokio::test]
    async fn test_collect_splits_sets() {
        let mut provider = MockNetworkProvider::new();
        provider.expect_list_networks().returning(|| {
            Ok(vec![
                network(
                    "silb0",
                    &[
                        ("auto_tvpc_cluster_member", "dev"),
                        ("tvpc_silb_vnet", "True"),
                    ],
                ),
                network("spoke1", &[("auto_tvpc_cluster_member", "dev")]),
                network("bystander", &[]),
                network("broken", &[("auto_tvpc_cluster_member", "")]),
            ])
        });

        let inventory = collect(&provider, &MeshSettings::default()).await;
        assert_eq!(inventory.gateways.len(), 1);
        assert_eq!(inventory.participants.len(), 1);
    }
}
