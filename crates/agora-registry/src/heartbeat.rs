//! Heartbeat handling: the sole write path into the store
//!
//! Two request shapes with very different costs: a lightweight ping that
//! only bumps the liveness timestamp, and a full registration that
//! replaces the agent's record wholesale, resolves its declared
//! dependencies, and reports whether the resolved topology changed.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::resolve;
use crate::store::ResourceStore;
use crate::topology::{ChangeDetector, ResolvedTopology};
use crate::types::{AgentRegistration, DependencyRequest, DependencySpec, HealthStatus};

/// Response to a lightweight ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Status after the ping was applied (always `Healthy` for known
    /// agents, `Unknown` otherwise)
    pub status: HealthStatus,
    /// Whether the agent should follow up with a full registration
    pub needs_full_refresh: bool,
}

/// Response to a full registration heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Version assigned to the committed record
    pub resource_version: u64,
    /// Version the record carried before this heartbeat, if it existed.
    /// A writer that last saw a different version was raced and overwritten
    /// (last-writer-wins).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<u64>,
    /// Status after commit
    pub status: HealthStatus,
    /// Dependency name → chosen provider
    pub resolved: ResolvedTopology,
    /// Stable hash of `resolved`
    pub topology_hash: String,
    /// Whether the topology differs from this agent's previous one; the
    /// agent only needs to rewire its outbound proxies when true
    pub topology_changed: bool,
}

/// Accepts pings and full registrations, drives resolution, and feeds the
/// change detector. Never initiates contact with an agent.
pub struct HeartbeatHandler {
    store: Arc<dyn ResourceStore>,
    detector: ChangeDetector,
    config: RegistryConfig,
}

impl HeartbeatHandler {
    /// Create a handler over the given store.
    pub fn new(store: Arc<dyn ResourceStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            detector: ChangeDetector::new(),
            config,
        }
    }

    /// The store this handler writes through.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Lightweight liveness ping.
    ///
    /// O(1): touches the timestamp under the agent's entry lock. Unknown
    /// agents get `needs_full_refresh` instead of an error; the record is
    /// created by the next full registration.
    pub async fn ping(&self, agent_id: &str) -> RegistryResult<PingResponse> {
        match self.store.get_agent(agent_id).await? {
            None => {
                debug!(agent_id = %agent_id, "Ping from unregistered agent");
                Ok(PingResponse {
                    status: HealthStatus::Unknown,
                    needs_full_refresh: true,
                })
            }
            Some(_) => {
                let record = self.store.touch_agent(agent_id).await?;
                let needs_full_refresh =
                    record.needs_full_refresh(Utc::now(), self.config.refresh_staleness);
                Ok(PingResponse {
                    status: record.status,
                    needs_full_refresh,
                })
            }
        }
    }

    /// Full registration heartbeat.
    ///
    /// Replaces the stored record (capability set wholesale), resolves the
    /// declared dependencies against a store snapshot, and reports the
    /// topology hash plus whether it changed since the last full
    /// heartbeat. A failed registration leaves the prior record intact.
    pub async fn full(
        &self,
        registration: AgentRegistration,
        dependencies: Vec<DependencyRequest>,
    ) -> RegistryResult<HeartbeatResponse> {
        let agent_id = registration.id.clone();

        // Validate the dependency specs before any store mutation
        let specs = dependencies
            .into_iter()
            .map(DependencySpec::try_from)
            .collect::<RegistryResult<Vec<_>>>()?;

        let outcome = self.store.upsert_agent(registration).await?;

        let snapshot = self.store.list_agents().await?;
        let resolved = resolve::resolve_all(&specs, &snapshot);
        let topology_hash = resolved.hash();
        let topology_changed = self.detector.changed(&agent_id, &topology_hash);

        // A rewire must reach watchers even when the registration payload
        // itself was unchanged and the upsert emitted nothing
        let resource_version = if topology_changed && !outcome.changed {
            self.store.record_modified(&agent_id).await?.resource_version
        } else {
            outcome.resource_version
        };

        if topology_changed {
            debug!(
                agent_id = %agent_id,
                resolved = resolved.len(),
                declared = specs.len(),
                topology_hash = %topology_hash,
                "Resolved topology changed"
            );
        }

        Ok(HeartbeatResponse {
            resource_version,
            previous_version: outcome.previous_version,
            status: HealthStatus::Healthy,
            resolved,
            topology_hash,
            topology_changed,
        })
    }

    /// Explicit unregister. Idempotent; also drops the agent's cached
    /// topology hash.
    pub async fn unregister(&self, agent_id: &str) -> RegistryResult<()> {
        self.store.remove_agent(agent_id).await?;
        self.detector.forget(agent_id);
        Ok(())
    }
}
