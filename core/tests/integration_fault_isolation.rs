// Integration tests for per-relationship fault isolation
//
// One failing operation must not take the rest of the pass with it: other
// relationships still converge, the failure is counted once, and the next
// pass retries from fresh state.

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
    tag_pairs: &[(&str, &str)],
) -> VirtualNetwork {
    VirtualNetwork {
        id: vnet_id(resource_group, name),
        name: name.to_string(),
        resource_group: resource_group.to_string(),
        location: "eastus".to_string(),
        tags: tags(tag_pairs),
        peerings: Vec::new(),
    }
}

fn gateway(name: &str, resource_group: &str, address: &str) -> VirtualNetwork {
    network(
        name,
        resource_group,
        &[
            ("auto_tvpc_cluster_member", "dev"),
            ("tvpc_silb_vnet", "True"),
            ("tvpc_silb_private_address", address),
        ],
    )
}

fn participant(name: &str, resource_group: &str) -> VirtualNetwork {
    network(name, resource_group, &[("auto_tvpc_cluster_member", "dev")])
}

fn reconciler(provider: &Arc<MemoryProvider>) -> Reconciler {
    Reconciler::new(provider.clone(), MeshSettings::default())
}

#[tokio::test]
async fn test_failed_peering_delete_does_not_block_the_pass() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1"));
    provider.add_network(participant("spoke2", "rg-spoke2"));

    let rec = reconciler(&provider);
    rec.run_pass().await;

    // spoke1 leaves the cluster; a third spoke appears in the same pass
    provider.set_tags("spoke1", tags(&[]));
    provider.add_network(participant("spoke3", "rg-spoke3"));
    // the gateway-side delete fails, the route and participant-side deletes
    // succeed
    provider.fail_delete_peering("silb0", "silb0tospoke1");

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 1);

    // the failed half is still there, everything else around it converged
    let silb = provider.network("silb0").unwrap();
    assert!(silb.peerings.iter().any(|p| p.name == "silb0tospoke1"));
    assert!(provider.network("spoke1").unwrap().peerings.is_empty());
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());

    // spoke2 untouched, spoke3 fully built
    assert_eq!(provider.network("spoke2").unwrap().peerings.len(), 1);
    assert_eq!(provider.network("spoke3").unwrap().peerings.len(), 1);
    assert!(provider
        .route("rg-spoke3", "private_route_table", "default_route")
        .is_some());
}

#[tokio::test]
async fn test_teardown_retries_after_transient_failure() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1"));

    let rec = reconciler(&provider);
    rec.run_pass().await;

    provider.set_tags("spoke1", tags(&[]));
    provider.fail_delete_peering("silb0", "silb0tospoke1");

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 1);
    assert_eq!(
        provider.network("silb0").unwrap().peerings.len(),
        1,
        "failed delete leaves the gateway-side ref"
    );

    provider.clear_failures();

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 0);
    assert!(provider.network("silb0").unwrap().peerings.is_empty());
}

#[tokio::test]
async fn test_failed_create_leaves_half_for_next_pass() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1"));
    provider.fail_create_peering("spoke1", "silb0tospoke1");

    let rec = reconciler(&provider);
    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 1);
    // gateway side went in first and stays; no route without the peering
    assert_eq!(provider.network("silb0").unwrap().peerings.len(), 1);
    assert!(provider.network("spoke1").unwrap().peerings.is_empty());
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());

    provider.clear_failures();

    let summary = rec.run_pass().await;
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.peerings_created, 1, "only the missing half is created");
    assert_eq!(provider.network("spoke1").unwrap().peerings.len(), 1);
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_some());
}

#[tokio::test]
async fn test_route_failure_does_not_block_other_participants() {
    let provider = Arc::new(MemoryProvider::new());
    provider.add_network(gateway("silb0", "rg-silb", "10.0.1.4"));
    provider.add_network(participant("spoke1", "rg-spoke1"));
    provider.add_network(participant("spoke2", "rg-spoke2"));
    provider.fail_upsert_route("rg-spoke1");

    let summary = reconciler(&provider).run_pass().await;
    assert_eq!(summary.failures, 1);

    // both peerings exist either way; spoke2's route landed
    assert_eq!(provider.network("spoke1").unwrap().peerings.len(), 1);
    assert!(provider
        .route("rg-spoke1", "private_route_table", "default_route")
        .is_none());
    assert!(provider
        .route("rg-spoke2", "private_route_table", "default_route")
        .is_some());
}
