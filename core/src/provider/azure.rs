//! Azure Resource Manager backend
//!
//! Thin REST client over the ARM network surface: virtual network listing
//! with `nextLink` paging, and peering/route CRUD. Authenticates with a
//! service-principal client-credentials grant and caches the bearer token
//! until shortly before expiry.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    parse_network_id, NetworkProvider, NextHopKind, PeeringRef, PeeringSpec, ProviderError,
    RouteSpec, VirtualNetwork,
};

const MANAGEMENT_BASE: &str = "https://management.azure.com";
const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const TOKEN_SCOPE: &str = "https://management.azure.com/.default";
const API_VERSION: &str = "2023-09-01";

/// Seconds shaved off a token's lifetime so it is refreshed before it lapses
/// mid-request.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 60;

const HTTP_TIMEOUT_SECS: u64 = 30;

/// Service-principal credentials plus the target subscription.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl AzureCredentials {
    /// Read credentials from the standard environment variables
    /// (`AZURE_SUBSCRIPTION_ID`, `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
    /// `AZURE_CLIENT_SECRET`).
    pub fn from_env() -> Result<Self, ProviderError> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| ProviderError::Auth(format!("{key} is not set")))
        };
        Ok(Self {
            subscription_id: var("AZURE_SUBSCRIPTION_ID")?,
            tenant_id: var("AZURE_TENANT_ID")?,
            client_id: var("AZURE_CLIENT_ID")?,
            client_secret: var("AZURE_CLIENT_SECRET")?,
        })
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// ARM-backed [`NetworkProvider`].
pub struct AzureProvider {
    http: reqwest::Client,
    creds: AzureCredentials,
    token: RwLock<Option<CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ArmPage {
    #[serde(default)]
    value: Vec<ArmVnet>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct ArmVnet {
    id: String,
    name: String,
    location: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: ArmVnetProperties,
}

#[derive(Deserialize, Default)]
struct ArmVnetProperties {
    #[serde(rename = "virtualNetworkPeerings", default)]
    peerings: Vec<ArmPeering>,
}

#[derive(Deserialize)]
struct ArmPeering {
    name: String,
    properties: ArmPeeringProperties,
}

#[derive(Deserialize)]
struct ArmPeeringProperties {
    #[serde(rename = "remoteVirtualNetwork")]
    remote: ArmResourceRef,
}

#[derive(Deserialize)]
struct ArmResourceRef {
    id: String,
}

#[derive(Deserialize)]
struct ArmRoute {
    properties: ArmRouteProperties,
}

#[derive(Deserialize)]
struct ArmRouteProperties {
    #[serde(rename = "addressPrefix")]
    address_prefix: String,
    #[serde(rename = "nextHopType")]
    next_hop_type: NextHopKind,
    #[serde(rename = "nextHopIpAddress")]
    next_hop_ip_address: Option<String>,
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

impl AzureProvider {
    pub fn new(creds: AzureCredentials) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            creds,
            token: RwLock::new(None),
        })
    }

    /// Current bearer token, refreshed through the client-credentials grant
    /// when the cached one is absent or near expiry.
    async fn bearer_token(&self) -> Result<String, ProviderError> {
        {
            let cached = self.token.read();
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let url = format!("{LOGIN_BASE}/{}/oauth2/v2.0/token", self.creds.tenant_id);
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.creds.client_id.as_str()),
            ("client_secret", self.creds.client_secret.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await.map_err(transport)?;

        let lifetime = token.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS);
        *self.token.write() = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!(lifetime_secs = lifetime, "refreshed management token");
        Ok(token.access_token)
    }

    fn network_path(&self, resource_group: &str, network: &str) -> String {
        format!(
            "{MANAGEMENT_BASE}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{network}",
            self.creds.subscription_id
        )
    }

    fn route_path(&self, resource_group: &str, table: &str, route: &str) -> String {
        format!(
            "{MANAGEMENT_BASE}/subscriptions/{}/resourceGroups/{resource_group}/providers/Microsoft.Network/routeTables/{table}/routes/{route}",
            self.creds.subscription_id
        )
    }

    /// Issue a request with the bearer token and the ARM api-version attached.
    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ProviderError> {
        let token = self.bearer_token().await?;
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .query(&[("api-version", API_VERSION)]);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(transport)
    }

    /// Fetch a fully-formed URL (a `nextLink` continuation, which already
    /// carries its own api-version query).
    async fn get_absolute(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        let token = self.bearer_token().await?;
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)
    }

    /// Map a non-success response to `ProviderError::Api`, reading the body
    /// for the message.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn convert_vnet(raw: ArmVnet) -> Option<VirtualNetwork> {
        let parsed = match parse_network_id(&raw.id) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(id = %raw.id, error = %err, "skipping network with malformed id");
                return None;
            }
        };
        let peerings = raw
            .properties
            .peerings
            .into_iter()
            .map(|p| PeeringRef {
                name: p.name,
                remote_network_id: p.properties.remote.id,
            })
            .collect();
        Some(VirtualNetwork {
            id: raw.id,
            name: raw.name,
            resource_group: parsed.resource_group,
            location: raw.location,
            tags: raw.tags,
            peerings,
        })
    }
}

#[async_trait]
impl NetworkProvider for AzureProvider {
    async fn list_networks(&self) -> Result<Vec<VirtualNetwork>, ProviderError> {
        let mut url = format!(
            "{MANAGEMENT_BASE}/subscriptions/{}/providers/Microsoft.Network/virtualNetworks",
            self.creds.subscription_id
        );
        let mut networks = Vec::new();
        let mut first_page = true;
        loop {
            let response = if first_page {
                self.send(reqwest::Method::GET, &url, None).await?
            } else {
                self.get_absolute(&url).await?
            };
            first_page = false;
            let response = Self::check(response).await?;
            let page: ArmPage = response.json().await.map_err(transport)?;
            networks.extend(page.value.into_iter().filter_map(Self::convert_vnet));
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(networks)
    }

    async fn get_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<Option<PeeringRef>, ProviderError> {
        let url = format!(
            "{}/virtualNetworkPeerings/{name}",
            self.network_path(resource_group, network)
        );
        let response = self.send(reqwest::Method::GET, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let raw: ArmPeering = response.json().await.map_err(transport)?;
        Ok(Some(PeeringRef {
            name: raw.name,
            remote_network_id: raw.properties.remote.id,
        }))
    }

    async fn create_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        spec: &PeeringSpec,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/virtualNetworkPeerings/{name}",
            self.network_path(resource_group, network)
        );
        let body = json!({
            "properties": {
                "allowVirtualNetworkAccess": spec.allow_network_access,
                "allowForwardedTraffic": spec.allow_forwarded_traffic,
                "allowGatewayTransit": spec.allow_gateway_transit,
                "useRemoteGateways": spec.use_remote_gateways,
                "remoteVirtualNetwork": { "id": spec.remote_network_id },
            }
        });
        let response = self.send(reqwest::Method::PUT, &url, Some(body)).await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_peering(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let url = format!(
            "{}/virtualNetworkPeerings/{name}",
            self.network_path(resource_group, network)
        );
        let response = self.send(reqwest::Method::DELETE, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn get_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<Option<RouteSpec>, ProviderError> {
        let url = self.route_path(resource_group, table, name);
        let response = self.send(reqwest::Method::GET, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let raw: ArmRoute = response.json().await.map_err(transport)?;
        Ok(Some(RouteSpec {
            address_prefix: raw.properties.address_prefix,
            next_hop: raw.properties.next_hop_type,
            next_hop_address: raw.properties.next_hop_ip_address,
        }))
    }

    async fn upsert_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
        spec: &RouteSpec,
    ) -> Result<(), ProviderError> {
        let url = self.route_path(resource_group, table, name);
        let body = json!({
            "properties": {
                "addressPrefix": spec.address_prefix,
                "nextHopType": spec.next_hop.as_str(),
                "nextHopIpAddress": spec.next_hop_address,
            }
        });
        let response = self.send(reqwest::Method::PUT, &url, Some(body)).await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_route(
        &self,
        resource_group: &str,
        table: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let url = self.route_path(resource_group, table, name);
        let response = self.send(reqwest::Method::DELETE, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}
