//! In-memory provider double
//!
//! Simulates the network control plane for tests: networks with inline
//! peering lists, route tables, a mutating-call counter for idempotence
//! assertions, and targeted failure injection for fault-isolation tests.
//! Compiled only for tests and the `test-utils` feature.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{
    NetworkProvider, PeeringRef, PeeringSpec, ProviderError, RouteSpec, VirtualNetwork,
};

#[derive(Default)]
struct State {
    networks: Vec<VirtualNetwork>,
    /// (resource group, table name) -> route name -> route
    routes: HashMap<(String, String), HashMap<String, RouteSpec>>,
    /// Count of create/upsert/delete calls issued against this provider
    mutations: u64,
    fail_list: bool,
    /// (network name, peering name) pairs whose create/delete should fail
    fail_create_peering: HashSet<(String, String)>,
    fail_delete_peering: HashSet<(String, String)>,
    /// Resource groups whose route writes/deletes should fail
    fail_upsert_route: HashSet<String>,
    fail_delete_route: HashSet<String>,
}

/// A fully in-memory [`NetworkProvider`].
#[derive(Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
}

fn injected() -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: "injected failure".to_string(),
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network. Panics on a duplicate name; tests construct each
    /// network exactly once.
    pub fn add_network(&self, network: VirtualNetwork) {
        let mut state = self.state.lock();
        assert!(
            !state.networks.iter().any(|n| n.name == network.name),
            "duplicate network {}",
            network.name
        );
        state.networks.push(network);
    }

    /// Replace a network's tags, as an out-of-band actor would.
    pub fn set_tags(&self, network: &str, tags: BTreeMap<String, String>) {
        let mut state = self.state.lock();
        let net = state
            .networks
            .iter_mut()
            .find(|n| n.name == network)
            .unwrap_or_else(|| panic!("unknown network {network}"));
        net.tags = tags;
    }

    /// Remove a network entirely (its peerings go with it; refs held by
    /// other networks dangle, as they do on the real provider).
    pub fn remove_network(&self, network: &str) {
        self.state.lock().networks.retain(|n| n.name != network);
    }

    pub fn network(&self, name: &str) -> Option<VirtualNetwork> {
        self.state.lock().networks.iter().find(|n| n.name == name).cloned()
    }

    pub fn route(&self, resource_group: &str, table: &str, name: &str) -> Option<RouteSpec> {
        self.state
            .lock()
            .routes
            .get(&(resource_group.to_string(), table.to_string()))
            .and_then(|t| t.get(name))
            .cloned()
    }

    /// Total create/upsert/delete calls so far.
    pub fn mutations(&self) -> u64 {
        self.state.lock().mutations
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    pub fn fail_create_peering(&self, network: &str, peering: &str) {
        self.state
            .lock()
            .fail_create_peering
            .insert((network.to_string(), peering.to_string()));
    }

    pub fn fail_delete_peering(&self, network: &str, peering: &str) {
        self.state
            .lock()
            .fail_delete_peering
            .insert((network.to_string(), peering.to_string()));
    }

    pub fn fail_upsert_route(&self, resource_group: &str) {
        self.state.lock().fail_upsert_route.insert(resource_group.to_string());
    }

    pub fn fail_delete_route(&self, resource_group: &str) {
        self.state.lock().fail_delete_route.insert(resource_group.to_string());
    }

    /// Drop every injected failure.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_list = false;
        state.fail_create_peering.clear();
        state.fail_delete_peering.clear();
        state.fail_upsert_route.clear();
        state.fail_delete_route.clear();
    }
}

#[async_trait]
impl NetworkProvider for MemoryProvider {
    async fn list_networks(&self) -> Result<Vec<VirtualNetwork>, ProviderError> {
        let state = self.state.lock();
        if state.fail_list {
            return Err(ProviderError::Transport("injected list failure".into()));
        }
        Ok(state.networks.clone())
    }

    async fn get_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<Option<PeeringRef>, ProviderError> {
        let state = self.state.lock();
        let net = state
            .networks
            .iter()
            .find(|n| n.resource_group == resource_group && n.name == network);
        Ok(net.and_then(|n| n.peerings.iter().find(|p| p.name == name).cloned()))
    }

    async fn create_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        spec: &PeeringSpec,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if state
            .fail_create_peering
            .contains(&(network.to_string(), name.to_string()))
        {
            return Err(injected());
        }
        let net = state
            .networks
            .iter_mut()
            .find(|n| n.resource_group == resource_group && n.name == network)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: format!("network {network} not found"),
            })?;
        let reference = PeeringRef {
            name: name.to_string(),
            remote_network_id: spec.remote_network_id.clone(),
        };
        match net.peerings.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = reference,
            None => net.peerings.push(reference),
        }
        Ok(())
    }

    async fn delete_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if state
            .fail_delete_peering
            .contains(&(network.to_string(), name.to_string()))
        {
            return Err(injected());
        }
        if let Some(net) = state
            .networks
            .iter_mut()
            .find(|n| n.resource_group == resource_group && n.name == network)
        {
            net.peerings.retain(|p| p.name != name);
        }
        // deleting from an absent network is a no-op, as on the real provider
        Ok(())
    }

    async fn get_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<Option<RouteSpec>, ProviderError> {
        let state = self.state.lock();
        Ok(state
            .routes
            .get(&(resource_group.to_string(), table.to_string()))
            .and_then(|t| t.get(name))
            .cloned())
    }

    async fn upsert_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
        spec: &RouteSpec,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if state.fail_upsert_route.contains(resource_group) {
            return Err(injected());
        }
        state
            .routes
            .entry((resource_group.to_string(), table.to_string()))
            .or_default()
            .insert(name.to_string(), spec.clone());
        Ok(())
    }

    async fn delete_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.mutations += 1;
        if state.fail_delete_route.contains(resource_group) {
            return Err(injected());
        }
        if let Some(table) = state
            .routes
            .get_mut(&(resource_group.to_string(), table.to_string()))
        {
            table.remove(name);
        }
        Ok(())
    }
}
