//! Dependency specifications and resolution outputs

use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Wire form of a declared dependency.
///
/// Either a bare capability name, or a structured spec whose tag list uses
/// `+` (preferred) and `-` (excluded) prefixes; unprefixed tags are
/// required. Converted into a [`DependencySpec`] before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyRequest {
    /// Bare capability name, no constraints
    Name(String),
    /// Structured spec
    Spec(DependencyPayload),
}

/// Structured wire payload for a dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyPayload {
    /// Capability name to resolve
    pub capability: String,
    /// Tag list with optional `+`/`-` prefixes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Semantic-version range, e.g. ">=1.2, <2"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Restrict candidates to this namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Allow case-insensitive substring matching on the capability name
    #[serde(default)]
    pub fuzzy: bool,
}

/// A declared dependency with explicit, statically validated constraints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DependencySpec {
    /// Capability name to resolve
    pub capability: String,
    /// Tags a candidate must carry (+5 score each)
    pub required_tags: Vec<String>,
    /// Tags that boost a candidate's score (+10 each) without eliminating
    pub preferred_tags: Vec<String>,
    /// Tags that hard-eliminate a candidate
    pub excluded_tags: Vec<String>,
    /// Semantic-version range a candidate must satisfy
    pub version: Option<VersionReq>,
    /// Restrict candidates to this namespace
    pub namespace: Option<String>,
    /// Case-insensitive substring match on the capability name
    pub fuzzy: bool,
}

impl DependencySpec {
    /// Spec with no constraints beyond the capability name.
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            ..Default::default()
        }
    }

    /// Add a tag, classifying it by its `+`/`-` prefix.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        match tag.strip_prefix('+') {
            Some(rest) => self.preferred_tags.push(rest.to_string()),
            None => match tag.strip_prefix('-') {
                Some(rest) => self.excluded_tags.push(rest.to_string()),
                None => self.required_tags.push(tag),
            },
        }
        self
    }

    /// Set the version constraint.
    pub fn with_version(mut self, req: VersionReq) -> Self {
        self.version = Some(req);
        self
    }

    /// Restrict to a namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Enable fuzzy name matching.
    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }
}

impl TryFrom<DependencyRequest> for DependencySpec {
    type Error = RegistryError;

    fn try_from(request: DependencyRequest) -> RegistryResult<Self> {
        match request {
            DependencyRequest::Name(name) => {
                if name.trim().is_empty() {
                    return Err(RegistryError::validation("dependency name must not be empty"));
                }
                Ok(DependencySpec::new(name))
            }
            DependencyRequest::Spec(payload) => {
                if payload.capability.trim().is_empty() {
                    return Err(RegistryError::validation(
                        "dependency capability must not be empty",
                    ));
                }
                let mut spec = DependencySpec::new(payload.capability);
                for tag in payload.tags {
                    spec = spec.with_tag(tag);
                }
                if let Some(raw) = payload.version {
                    let req = VersionReq::parse(&raw).map_err(|e| {
                        RegistryError::validation(format!("invalid version range '{}': {}", raw, e))
                    })?;
                    spec = spec.with_version(req);
                }
                spec.namespace = payload.namespace;
                spec.fuzzy = payload.fuzzy;
                Ok(spec)
            }
        }
    }
}

/// One resolved dependency: the chosen provider at resolution time.
///
/// Never persisted; recomputed on every full heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    /// Capability name as declared by the consumer
    pub capability: String,
    /// Provider agent id
    pub agent_id: String,
    /// Provider endpoint
    pub endpoint: String,
    /// Provider record version at resolution time
    pub resource_version: u64,
}
