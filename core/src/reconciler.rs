//! Peering reconciler
//!
//! Executes one pass: collect the inventory, compute the match plan, tear
//! down relationships that no longer hold, then establish the matched
//! pairs and their default routes. Every mutating operation is isolated; a
//! failure is logged, counted, and skipped so the rest of the pass still
//! converges. The pass itself never aborts.
//!
//! Teardowns run before establishment so a participant that moved from one
//! gateway to another leaves the pass pointing at the new gateway, not with
//! a freshly deleted route.

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MeshSettings;
use crate::inventory;
use crate::matcher::{self, MatchPlan, MatchedPair, PeeringPresence, TeardownItem};
use crate::provider::{NetworkProvider, PeeringSpec};
use crate::routes;

/// Counters for one pass. `failures` covers individual operations; the pass
/// completes regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub gateways: usize,
    pub participants: usize,
    pub peerings_created: usize,
    pub peerings_removed: usize,
    pub routes_written: usize,
    pub routes_removed: usize,
    pub failures: usize,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} gateways, {} participants, +{} peerings, -{} peerings, +{} routes, -{} routes, {} failures",
            self.gateways,
            self.participants,
            self.peerings_created,
            self.peerings_removed,
            self.routes_written,
            self.routes_removed,
            self.failures
        )
    }
}

/// Runs reconciliation passes against a provider.
pub struct Reconciler {
    provider: Arc<dyn NetworkProvider>,
    settings: MeshSettings,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn NetworkProvider>, settings: MeshSettings) -> Self {
        Self { provider, settings }
    }

    /// Compute the match plan without mutating anything (dry run).
    pub async fn plan(&self) -> MatchPlan {
        let inventory = inventory::collect(self.provider.as_ref(), &self.settings).await;
        matcher::plan(&inventory)
    }

    /// One full level-triggered pass. State is read fresh, acted on, and
    /// discarded; nothing carries over to the next pass.
    pub async fn run_pass(&self) -> PassSummary {
        let inventory = inventory::collect(self.provider.as_ref(), &self.settings).await;
        let plan = matcher::plan(&inventory);

        let mut summary = PassSummary {
            gateways: inventory.gateways.len(),
            participants: inventory.participants.len(),
            ..PassSummary::default()
        };

        for item in &plan.teardowns {
            self.tear_down(item, &mut summary).await;
        }
        for pair in &plan.pairs {
            self.establish(pair, &mut summary).await;
        }

        summary
    }

    /// Bring one matched pair to the desired state: both peering halves plus
    /// the participant's default route.
    async fn establish(&self, pair: &MatchedPair, summary: &mut PassSummary) {
        let peered = match pair.presence {
            PeeringPresence::Established => true,
            PeeringPresence::Absent => self.create_halves(pair, true, true, summary).await,
            // one half exists: complete the other, never recreate both
            PeeringPresence::GatewayHalf => self.create_halves(pair, false, true, summary).await,
            PeeringPresence::ParticipantHalf => self.create_halves(pair, true, false, summary).await,
        };
        if !peered {
            return;
        }

        let Some(address) = pair.gateway_address.as_deref() else {
            warn!(
                gateway = %pair.gateway,
                participant = %pair.participant,
                "gateway has no private address tag yet, route deferred"
            );
            return;
        };
        match routes::ensure_default_route(
            self.provider.as_ref(),
            &self.settings,
            &pair.participant,
            address,
        )
        .await
        {
            Ok(true) => {
                summary.routes_written += 1;
                info!(
                    participant = %pair.participant,
                    next_hop = address,
                    "wrote default route"
                );
            }
            Ok(false) => {}
            Err(err) => {
                summary.failures += 1;
                warn!(
                    participant = %pair.participant,
                    error = %err,
                    "unable to write default route"
                );
            }
        }
    }

    /// Create the requested peering halves, gateway side first. Returns true
    /// when every requested half ended up present. A gateway-side failure
    /// stops before the participant side so the relationship is only ever
    /// half-built in the direction the next pass knows how to finish.
    async fn create_halves(
        &self,
        pair: &MatchedPair,
        gateway_side: bool,
        participant_side: bool,
        summary: &mut PassSummary,
    ) -> bool {
        if gateway_side {
            let spec = PeeringSpec::gateway_side(&pair.participant.id);
            let created = self
                .create_half(
                    &pair.gateway.resource_group,
                    &pair.gateway.name,
                    &pair.peering_name,
                    &spec,
                    summary,
                )
                .await;
            if !created {
                return false;
            }
        }
        if participant_side {
            let spec = PeeringSpec::participant_side(&pair.gateway.id);
            let created = self
                .create_half(
                    &pair.participant.resource_group,
                    &pair.participant.name,
                    &pair.peering_name,
                    &spec,
                    summary,
                )
                .await;
            if !created {
                return false;
            }
        }
        info!(
            gateway = %pair.gateway,
            participant = %pair.participant,
            peering = %pair.peering_name,
            "established peering"
        );
        true
    }

    /// Create one side of a peering unless it already exists with the right
    /// remote. The pre-check keeps duplicate attempts (a concurrent builder,
    /// a listing that lagged) from issuing a second write.
    async fn create_half(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        spec: &PeeringSpec,
        summary: &mut PassSummary,
    ) -> bool {
        match self.provider.get_peering(resource_group, network, name).await {
            Ok(Some(existing)) if existing.remote_network_id == spec.remote_network_id => {
                return true;
            }
            Ok(_) => {}
            Err(err) => {
                summary.failures += 1;
                warn!(
                    network = %network,
                    peering = %name,
                    error = %err,
                    "unable to check peering before create"
                );
                return false;
            }
        }
        match self
            .provider
            .create_peering(resource_group, network, name, spec)
            .await
        {
            Ok(()) => {
                summary.peerings_created += 1;
                true
            }
            Err(err) => {
                summary.failures += 1;
                warn!(
                    network = %network,
                    peering = %name,
                    error = %err,
                    "unable to create peering"
                );
                false
            }
        }
    }

    /// Remove one dead relationship: the participant's default route and
    /// both peering halves. The three deletions are independent; a failure
    /// in one is logged and the others still run.
    async fn tear_down(&self, item: &TeardownItem, summary: &mut PassSummary) {
        match routes::remove_default_route(
            self.provider.as_ref(),
            &self.settings,
            &item.participant,
        )
        .await
        {
            Ok(()) => summary.routes_removed += 1,
            Err(err) => {
                summary.failures += 1;
                warn!(
                    participant = %item.participant,
                    error = %err,
                    "unable to remove default route"
                );
            }
        }

        let mut removed = 0;
        for side in [&item.counterpart, &item.participant] {
            match self
                .provider
                .delete_peering(&side.resource_group, &side.name, &item.peering_name)
                .await
            {
                Ok(()) => {
                    summary.peerings_removed += 1;
                    removed += 1;
                }
                Err(err) => {
                    summary.failures += 1;
                    warn!(
                        network = %side,
                        peering = %item.peering_name,
                        error = %err,
                        "unable to delete peering"
                    );
                }
            }
        }
        if removed == 2 {
            info!(
                participant = %item.participant,
                counterpart = %item.counterpart,
                peering = %item.peering_name,
                "removed peering"
            );
        }
    }
}
