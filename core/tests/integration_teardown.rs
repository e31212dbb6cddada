// Integration tests for mesh teardown
//
// A relationship dies when the tags stop matching: the participant's
// default route and both peering halves go, and the pass after that is a
// no-op again.

use std::collections::BTreeMap;
use std::sync::Arc;

use vnetmesh_core::provider::memory::MemoryProvider;
use vnetmesh_core::provider::VirtualNetwork;
use vnetmesh_core::{MeshSettings, Reconciler};

fn vnet_id(resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/sub/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{name}"
    )
}

fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn network(
    name: &str,
    resource_group: &str,
    location: &str,
    tag_pairs: &[(&str, &str)],
) -> VirtualNetwork {
    VirtualNetwork {
        id: vnet_id(resource_group, name),
        name: name.to_string(),
        resource_group: resource_group.to_string(),
        location: location.to_string(),
        tags: tags(tag_pairs),
        peerings: Vec::new(),
    }
}

fn gateway(name: &str, resource_group: &str, cluster: &str, address: &str) -> VirtualNetwork {
    network(
        name,
        resource_group,
        "eastus",
        &[
            ("auto_tvpc_cluster_member", cluster),
            ("tvpc_silb_vnet", "True"),
            ("tvpc_silb_private_address", address),
        ],
    )
}

fn participant(name: &str, resource_group: &str, cluster: &str) -> VirtualNetwork {
    network(
        name,
        resource_group,
        "eastus",
        &[("auto_tvpc_cluster_member", cluster)],
    )
}

fn reconciler(provider: &Arc<MemoryProvider>) -> Reconciler {
    Reconciler::new(provider.clone(), MeshSettings::default())
}

#[tokio::test]
async fn test_retagged_participant_is_torn_down() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "dev", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1", "dev"));

    let rec = reconciler(&provider);
    rec.run_pass().await;
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_some());

    // the participant leaves the cluster; no prod gateway exists
    provider.set_tags("spoke1", tags(&[("auto_tvpc_cluster_member", "prod")]));

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.peerings_removed, 2);
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());
    assert!(provider.network("silb0").unwrap().peerings.is_empty());
    assert!(provider.network("spoke1").unwrap().peerings.is_empty());

    // and the pass after the teardown touches nothing
    let before = provider.mutations();
    let summary = rec.run_pass().await;
    assert_eq!(summary.peerings_removed, 0);
    assert_eq!(summary.routes_removed, 0);
    assert_eq!(provider.mutations(), before);
}

#[tokio::test]
async fn test_untagged_participant_is_torn_down() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "dev", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1", "dev"));

    let rec = reconciler(&provider);
    rec.run_pass().await;

    // tag removed entirely: the network drops out of the inventory, but the
    // gateway's stale ref still names it
    provider.set_tags("spoke1", tags(&[]));

    rec.run_pass().await;
    assert!(provider.network("silb0").unwrap().peerings.is_empty());
    assert!(provider.network("spoke1").unwrap().peerings.is_empty());
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());
}

#[tokio::test]
async fn test_removed_gateway_orphans_are_cleaned() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "dev", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1", "dev"));

    let rec = reconciler(&provider);
    rec.run_pass().await;

    provider.remove_network("silb0");

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 0);
    assert!(provider.network("spoke1").unwrap().peerings.is_empty());
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());
}

#[tokio::test]
async fn test_participant_moves_between_gateways_in_one_pass() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb-dev", "rg-dev", "dev", "10.0.1.4"));
    provider.add_network(gateway("silb-prod", "rg-prod", "prod", "10.0.9.4"));
    provider.add_network(participant("spoke1", "rg-spoke1", "dev"));

    let rec = reconciler(&provider);
    rec.run_pass().await;
    assert_eq!(
        provider
            .route("rg-spoke1", "private_route_table", "default_route")
            .unwrap()
            .next_hop_address
            .as_deref(),
        Some("10.0.1.4")
    );

    provider.set_tags("spoke1", tags(&[("auto_tvpc_cluster_member", "prod")]));

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 0);

    // old relationship fully gone
    assert!(provider.network("silb-dev").unwrap().peerings.is_empty());
    // new relationship fully present, route repointed
    let spoke = provider.network("spoke1").unwrap();
    assert_eq!(spoke.peerings.len(), 1);
    assert_eq!(spoke.peerings[0].name, "silb-prodtospoke1");
    assert_eq!(
        provider
            .route("rg-spoke1", "private_route_table", "default_route")
            .unwrap()
            .next_hop_address
            .as_deref(),
        Some("10.0.9.4")
    );
}
