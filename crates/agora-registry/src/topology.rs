//! Resolved topology and change detection
//!
//! A topology is the mapping of dependency name to chosen provider for one
//! agent. Its hash is computed over a canonical, key-sorted serialization
//! so that logically identical topologies hash identically regardless of
//! map iteration order.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::ResolvedDependency;

/// Dependency name → chosen provider, sorted by dependency name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedTopology {
    resolved: BTreeMap<String, ResolvedDependency>,
}

impl ResolvedTopology {
    /// Empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved dependency, keyed by its capability name.
    pub fn insert(&mut self, resolved: ResolvedDependency) {
        self.resolved.insert(resolved.capability.clone(), resolved);
    }

    /// Look up the provider chosen for a dependency.
    pub fn get(&self, capability: &str) -> Option<&ResolvedDependency> {
        self.resolved.get(capability)
    }

    /// Number of resolved dependencies.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether nothing resolved.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Iterate in dependency-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolvedDependency)> {
        self.resolved.iter()
    }

    /// Stable hex digest of the canonical serialization.
    ///
    /// BTreeMap ordering plus fixed struct field order makes the
    /// serialization canonical; any single-field difference changes the
    /// digest.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, dep) in &self.resolved {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(dep.agent_id.as_bytes());
            hasher.update([0]);
            hasher.update(dep.endpoint.as_bytes());
            hasher.update([0]);
            hasher.update(dep.resource_version.to_be_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Tracks the last seen topology hash per agent so redundant rewiring can
/// be skipped on both sides of the heartbeat exchange.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_hashes: DashMap<String, String>,
}

impl ChangeDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the hash for an agent and report whether it differs from
    /// the previous observation. A first observation counts as changed.
    pub fn changed(&self, agent_id: &str, hash: &str) -> bool {
        match self.last_hashes.insert(agent_id.to_string(), hash.to_string()) {
            None => true,
            Some(previous) => previous != hash,
        }
    }

    /// Forget an agent's hash, e.g. after unregistration.
    pub fn forget(&self, agent_id: &str) {
        self.last_hashes.remove(agent_id);
    }
}
