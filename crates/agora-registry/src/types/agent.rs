//! Agent records and registration payloads

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::Capability;
use crate::error::{RegistryError, RegistryResult};

/// Health status of a registered agent.
///
/// Transitions are a total function of elapsed time since the last
/// heartbeat; resolution logic never feeds back into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Never heartbeated
    Unknown,
    /// Heartbeating within the degraded threshold
    Healthy,
    /// Missed heartbeats beyond the degraded threshold, still resolvable
    Degraded,
    /// Beyond the expiry threshold; retained for audit, hidden from
    /// discovery and resolution
    Expired,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Expired => write!(f, "expired"),
        }
    }
}

impl HealthStatus {
    /// Status derived from time elapsed since the last heartbeat.
    pub fn from_elapsed(elapsed: Duration, degraded_after: Duration, expire_after: Duration) -> Self {
        if elapsed >= expire_after {
            HealthStatus::Expired
        } else if elapsed >= degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Expired agents are invisible to discovery and resolution.
    pub fn is_discoverable(&self) -> bool {
        !matches!(self, HealthStatus::Expired)
    }
}

/// Inbound full-registration payload.
///
/// Carries everything an agent declares about itself. The stored capability
/// set is replaced wholesale on each full registration, so dropped
/// capabilities cannot linger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Unique identifier, assigned by the registrant
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Logical partition; defaults to "default"
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Network endpoint where the agent's capabilities are served
    pub endpoint: String,
    /// Capabilities offered by this agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    /// Free-form labels for selector-based discovery
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Security-context tag carried through to discovery results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl AgentRegistration {
    /// Create a minimal registration.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: default_namespace(),
            endpoint: endpoint.into(),
            capabilities: Vec::new(),
            labels: HashMap::new(),
            security_context: None,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Add a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set the security context tag.
    pub fn with_security_context(mut self, ctx: impl Into<String>) -> Self {
        self.security_context = Some(ctx.into());
        self
    }

    /// Reject malformed payloads before they can touch the store.
    pub fn validate(&self) -> RegistryResult<()> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::validation("agent id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(RegistryError::validation("agent name must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(RegistryError::validation("agent endpoint must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(RegistryError::validation("agent namespace must not be empty"));
        }
        for cap in &self.capabilities {
            if cap.name.trim().is_empty() {
                return Err(RegistryError::validation("capability name must not be empty"));
            }
        }
        Ok(())
    }
}

/// The store's view of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique identifier, assigned by the registrant
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Logical partition
    pub namespace: String,
    /// Network endpoint
    pub endpoint: String,
    /// Capabilities, replaced wholesale on each full registration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
    /// Free-form labels
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Security-context tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_context: Option<String>,
    /// Current health status
    pub status: HealthStatus,
    /// When the last heartbeat (lightweight or full) landed
    pub last_heartbeat: DateTime<Utc>,
    /// When the last full registration landed, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_full_refresh: Option<DateTime<Utc>>,
    /// Monotonically increasing version of this record
    pub resource_version: u64,
}

impl AgentRecord {
    /// Build a fresh record from a registration payload.
    ///
    /// The resource version is assigned by the store at commit time.
    pub fn from_registration(reg: AgentRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id: reg.id,
            name: reg.name,
            namespace: reg.namespace,
            endpoint: reg.endpoint,
            capabilities: reg.capabilities,
            labels: reg.labels,
            security_context: reg.security_context,
            status: HealthStatus::Healthy,
            last_heartbeat: now,
            last_full_refresh: Some(now),
            resource_version: 0,
        }
    }

    /// Elapsed wall time since the last heartbeat.
    pub fn time_since_heartbeat(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check whether the last full refresh predates the staleness window.
    pub fn needs_full_refresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        match self.last_full_refresh {
            None => true,
            Some(refreshed) => {
                now.signed_duration_since(refreshed)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    >= staleness
            }
        }
    }

    /// Look up a capability this agent offers by name.
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }
}

/// Health summary returned by the status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    /// Agent id
    pub agent_id: String,
    /// Current status
    pub status: HealthStatus,
    /// Last heartbeat timestamp
    pub last_heartbeat: DateTime<Utc>,
    /// Seconds elapsed since the last heartbeat
    pub seconds_since_heartbeat: u64,
    /// Record version at read time
    pub resource_version: u64,
}
