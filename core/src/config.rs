//! Mesh settings
//!
//! Tag keys, naming contracts, and loop timing. Defaults are the values the
//! mesh has always used; everything is overridable through the CLI config
//! file.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// Tag key marking a network as a mesh member; its value names the
    /// cluster the network belongs to
    pub cluster_tag_key: String,

    /// Tag key marking a member network as its cluster's SILB gateway
    /// (boolean-like string value)
    pub gateway_marker_key: String,

    /// Tag key carrying the gateway's internal load balancer address; set on
    /// a gateway only once the load balancer exists
    pub gateway_address_key: String,

    /// Route table consulted and edited on each participant
    pub route_table_name: String,

    /// Fixed route name, so teardown can find the route without extra state
    pub route_name: String,

    /// Destination prefix of the default route
    pub route_prefix: String,

    /// Seconds to wait between reconciliation passes
    pub idle_interval_secs: u64,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            cluster_tag_key: "auto_tvpc_cluster_member".to_string(),
            gateway_marker_key: "tvpc_silb_vnet".to_string(),
            gateway_address_key: "tvpc_silb_private_address".to_string(),
            route_table_name: "private_route_table".to_string(),
            route_name: "default_route".to_string(),
            route_prefix: "0.0.0.0/0".to_string(),
            idle_interval_secs: 60,
        }
    }
}

impl MeshSettings {
    /// Validate the settings before a loop is started.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (field, value) in [
            ("cluster_tag_key", &self.cluster_tag_key),
            ("gateway_marker_key", &self.gateway_marker_key),
            ("gateway_address_key", &self.gateway_address_key),
            ("route_table_name", &self.route_table_name),
            ("route_name", &self.route_name),
        ] {
            if value.is_empty() {
                return Err(SettingsError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
        }
        if self.idle_interval_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "idle_interval_secs must be > 0".to_string(),
            ));
        }
        if !self.route_prefix.contains('/') {
            return Err(SettingsError::InvalidConfig(format!(
                "route_prefix `{}` is not a CIDR prefix",
                self.route_prefix
            )));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }
}
