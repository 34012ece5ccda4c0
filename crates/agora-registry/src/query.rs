//! Discovery queries over registered agents

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};
use crate::store::{ResourceStore, StoreCounts};
use crate::types::{AgentRecord, AgentStatusReport, HealthStatus};

/// Query builder for discovering agents.
///
/// Empty query matches every non-expired agent. Degraded agents remain
/// discoverable unless a status filter or `healthy_only` says otherwise,
/// which keeps consumers wired through short heartbeat gaps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Filter by namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Capability tags an agent must offer (on any single capability)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Filter by capability category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Capability name; exact unless `fuzzy`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Case-insensitive substring matching for `capability`
    #[serde(default)]
    pub fuzzy: bool,
    /// Version range at least one matching capability must satisfy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,
    /// Label selector; every entry must match the agent's labels
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Exact status filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<HealthStatus>,
    /// Shortcut for `status == Healthy`
    #[serde(default)]
    pub healthy_only: bool,
    /// Include expired records (audit views)
    #[serde(default)]
    pub include_expired: bool,
    /// Maximum number of results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl DiscoveryQuery {
    /// Query matching every non-expired agent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Require a capability tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Filter by capability category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Filter by capability name.
    pub fn with_capability(mut self, name: impl Into<String>) -> Self {
        self.capability = Some(name.into());
        self
    }

    /// Enable fuzzy capability-name matching.
    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    /// Require a version range.
    pub fn with_version(mut self, req: VersionReq) -> Self {
        self.version = Some(req);
        self
    }

    /// Add a label selector entry.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Filter by exact status.
    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only return healthy agents.
    pub fn healthy_only(mut self) -> Self {
        self.healthy_only = true;
        self
    }

    /// Include expired records.
    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    /// Limit the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check whether a record matches this query.
    pub fn matches(&self, record: &AgentRecord) -> bool {
        if !self.include_expired && !record.status.is_discoverable() {
            return false;
        }
        if self.healthy_only && record.status != HealthStatus::Healthy {
            return false;
        }
        if let Some(status) = self.status
            && record.status != status
        {
            return false;
        }
        if let Some(ns) = &self.namespace
            && record.namespace != *ns
        {
            return false;
        }
        for (key, value) in &self.labels {
            if record.labels.get(key) != Some(value) {
                return false;
            }
        }

        // Capability-level filters: a single capability must satisfy all
        // of name, category, tags, and version together
        let has_capability_filter = self.capability.is_some()
            || self.category.is_some()
            || !self.tags.is_empty()
            || self.version.is_some();
        if !has_capability_filter {
            return true;
        }

        record.capabilities.iter().any(|cap| {
            if let Some(name) = &self.capability {
                let name_ok = if self.fuzzy {
                    cap.name.to_lowercase().contains(&name.to_lowercase())
                } else {
                    cap.name == *name
                };
                if !name_ok {
                    return false;
                }
            }
            if let Some(category) = &self.category
                && cap.category != *category
            {
                return false;
            }
            if !self.tags.iter().all(|t| cap.has_tag(t)) {
                return false;
            }
            if let Some(req) = &self.version
                && !req.matches(&cap.version)
            {
                return false;
            }
            true
        })
    }
}

/// Read path over the store: discovery, status reports, counts.
pub struct DiscoveryService {
    store: Arc<dyn ResourceStore>,
}

impl DiscoveryService {
    /// Create a service over the given store.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Agents matching the query, ordered by agent id for stable output.
    pub async fn discover(&self, query: &DiscoveryQuery) -> RegistryResult<Vec<AgentRecord>> {
        let mut results: Vec<_> = self
            .store
            .list_agents()
            .await?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Fetch one agent record.
    pub async fn get_agent(&self, agent_id: &str) -> RegistryResult<AgentRecord> {
        self.store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| RegistryError::not_found(agent_id))
    }

    /// Health summary for one agent.
    pub async fn agent_status(&self, agent_id: &str) -> RegistryResult<AgentStatusReport> {
        let record = self.get_agent(agent_id).await?;
        let now = Utc::now();
        Ok(AgentStatusReport {
            agent_id: record.id.clone(),
            status: record.status,
            last_heartbeat: record.last_heartbeat,
            seconds_since_heartbeat: record.time_since_heartbeat(now).as_secs(),
            resource_version: record.resource_version,
        })
    }

    /// Agents offering a capability by exact name.
    pub async fn find_by_capability(&self, name: &str) -> RegistryResult<Vec<AgentRecord>> {
        self.discover(&DiscoveryQuery::new().with_capability(name))
            .await
    }

    /// Agents offering any capability with the given tag.
    pub async fn find_by_tag(&self, tag: &str) -> RegistryResult<Vec<AgentRecord>> {
        self.discover(&DiscoveryQuery::new().with_tag(tag)).await
    }

    /// Agents in a namespace.
    pub async fn find_by_namespace(&self, namespace: &str) -> RegistryResult<Vec<AgentRecord>> {
        self.discover(&DiscoveryQuery::new().with_namespace(namespace))
            .await
    }

    /// Aggregate counts for self-health reporting.
    pub async fn counts(&self) -> RegistryResult<StoreCounts> {
        self.store.counts().await
    }
}
