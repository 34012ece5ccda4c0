//! Capability records offered by agents

use semver::Version;
use serde::{Deserialize, Serialize};

/// Stability marker for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    /// Stable, safe for production consumers
    Stable,
    /// Experimental, interface may change
    Experimental,
    /// Deprecated, scheduled for removal
    Deprecated,
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stability::Stable => write!(f, "stable"),
            Stability::Experimental => write!(f, "experimental"),
            Stability::Deprecated => write!(f, "deprecated"),
        }
    }
}

/// A named, versioned, tagged unit of functionality owned by one agent.
///
/// Capability names are not globally unique: multiple agents may offer the
/// same name with different tags or versions, which is what enables
/// load-balanced or specialized provider selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name (unique only within its owning agent)
    pub name: String,
    /// Category used for coarse discovery grouping
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    /// Semantic version of this capability
    #[serde(default = "default_version")]
    pub version: Version,
    /// Stability marker
    #[serde(default = "default_stability")]
    pub stability: Stability,
    /// Tags used by the required/preferred/excluded matching algorithm
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional JSON schema describing the capability's input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

fn default_version() -> Version {
    Version::new(1, 0, 0)
}

fn default_stability() -> Stability {
    Stability::Stable
}

impl Capability {
    /// Create a new stable capability at version 1.0.0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: String::new(),
            version: Version::new(1, 0, 0),
            stability: Stability::Stable,
            tags: Vec::new(),
            description: None,
            input_schema: None,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the semantic version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the stability marker.
    pub fn with_stability(mut self, stability: Stability) -> Self {
        self.stability = stability;
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Check whether this capability carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
