// vnetmesh-core — Transit Mesh Reconciler
//
// "Does the provider state match the tags?"
//
// Every pass answers that question from scratch and fixes the difference.
// Nothing here holds durable state of its own; the cloud is the only truth.

pub mod config;
pub mod driver;
pub mod inventory;
pub mod matcher;
pub mod provider;
pub mod reconciler;
pub mod routes;

pub use config::MeshSettings;
pub use driver::{LoopDriver, LoopState};
pub use inventory::{GatewayVnet, Inventory, ParticipantVnet};
pub use matcher::{MatchPlan, MatchedPair, PeeringPresence, TeardownItem};
pub use provider::azure::{AzureCredentials, AzureProvider};
pub use provider::{NetworkProvider, PeeringRef, ProviderError, VirtualNetwork};
pub use reconciler::{PassSummary, Reconciler};
