//! Scored dependency resolution
//!
//! Resolution is a pure function of a store snapshot and a
//! [`DependencySpec`]: the same inputs always select the same provider.
//! Matching is flat and one-hop; a provider's own dependencies are never
//! inspected.

use crate::topology::ResolvedTopology;
use crate::types::{AgentRecord, Capability, DependencySpec, ResolvedDependency};

/// Score awarded for each required tag a surviving candidate carries.
pub const REQUIRED_TAG_SCORE: i64 = 5;

/// Score awarded for each preferred tag present. Absence of a preferred
/// tag neither scores nor eliminates.
pub const PREFERRED_TAG_SCORE: i64 = 10;

/// One capability offered by one agent, considered during resolution.
#[derive(Debug, Clone)]
struct Candidate<'a> {
    agent: &'a AgentRecord,
    capability: &'a Capability,
    score: i64,
}

/// Resolve one dependency against a snapshot of agent records.
///
/// Returns `None` when no candidate survives the hard filters; callers
/// treat an unresolved dependency as optional/absent rather than an error.
pub fn resolve(spec: &DependencySpec, snapshot: &[AgentRecord]) -> Option<ResolvedDependency> {
    let mut best: Option<Candidate<'_>> = None;

    for agent in snapshot {
        // Expired and never-registered agents are not candidates
        if !agent.status.is_discoverable() {
            continue;
        }
        if let Some(ns) = &spec.namespace
            && agent.namespace != *ns
        {
            continue;
        }

        for capability in &agent.capabilities {
            if !name_matches(spec, &capability.name) {
                continue;
            }
            let Some(score) = score_capability(spec, capability) else {
                continue;
            };

            let candidate = Candidate {
                agent,
                capability,
                score,
            };
            best = Some(match best.take() {
                None => candidate,
                Some(current) => pick(current, candidate),
            });
        }
    }

    best.map(|c| ResolvedDependency {
        capability: spec.capability.clone(),
        agent_id: c.agent.id.clone(),
        endpoint: c.agent.endpoint.clone(),
        resource_version: c.agent.resource_version,
    })
}

/// Resolve every declared dependency independently.
///
/// Unresolved dependencies are omitted from the topology. Cross-dependency
/// ordering is irrelevant since no resolution inspects another.
pub fn resolve_all(specs: &[DependencySpec], snapshot: &[AgentRecord]) -> ResolvedTopology {
    let mut topology = ResolvedTopology::new();
    for spec in specs {
        if let Some(resolved) = resolve(spec, snapshot) {
            topology.insert(resolved);
        }
    }
    topology
}

fn name_matches(spec: &DependencySpec, capability_name: &str) -> bool {
    if spec.fuzzy {
        capability_name
            .to_lowercase()
            .contains(&spec.capability.to_lowercase())
    } else {
        capability_name == spec.capability
    }
}

/// Apply hard filters and compute the additive score. `None` means the
/// candidate was eliminated.
fn score_capability(spec: &DependencySpec, capability: &Capability) -> Option<i64> {
    // A missing required tag eliminates
    for tag in &spec.required_tags {
        if !capability.has_tag(tag) {
            return None;
        }
    }
    // A present excluded tag eliminates, regardless of other scores
    for tag in &spec.excluded_tags {
        if capability.has_tag(tag) {
            return None;
        }
    }
    // Version range is a hard filter too
    if let Some(req) = &spec.version
        && !req.matches(&capability.version)
    {
        return None;
    }

    let mut score = spec.required_tags.len() as i64 * REQUIRED_TAG_SCORE;
    for tag in &spec.preferred_tags {
        if capability.has_tag(tag) {
            score += PREFERRED_TAG_SCORE;
        }
    }
    Some(score)
}

/// Deterministic selection between two surviving candidates: higher score,
/// then most recent heartbeat, then lexicographically smallest agent id.
fn pick<'a>(a: Candidate<'a>, b: Candidate<'a>) -> Candidate<'a> {
    if b.score != a.score {
        return if b.score > a.score { b } else { a };
    }
    if b.agent.last_heartbeat != a.agent.last_heartbeat {
        return if b.agent.last_heartbeat > a.agent.last_heartbeat {
            b
        } else {
            a
        };
    }
    if b.agent.id < a.agent.id { b } else { a }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgentRegistration, HealthStatus};
    use chrono::Utc;
    use semver::{Version, VersionReq};

    fn provider(id: &str, capability: Capability) -> AgentRecord {
        let reg = AgentRegistration::new(id, format!("Agent {}", id), format!("http://{}:9000", id))
            .with_capability(capability);
        let mut record = AgentRecord::from_registration(reg, Utc::now());
        record.resource_version = 1;
        record
    }

    fn llm_with_tags(id: &str, tags: &[&str]) -> AgentRecord {
        let mut cap = Capability::new("llm");
        for tag in tags {
            cap = cap.with_tag(*tag);
        }
        provider(id, cap)
    }

    #[test]
    fn test_required_tags_eliminate() {
        let snapshot = vec![llm_with_tags("a", &["claude"]), llm_with_tags("b", &[])];
        let spec = DependencySpec::new("llm").with_tag("claude");

        let resolved = resolve(&spec, &snapshot).unwrap();
        assert_eq!(resolved.agent_id, "a");
    }

    #[test]
    fn test_excluded_tag_eliminates_despite_score() {
        // "a" would outscore "b" on preferred tags, but carries the
        // excluded tag
        let snapshot = vec![
            llm_with_tags("a", &["claude", "opus", "fast"]),
            llm_with_tags("b", &["claude", "sonnet"]),
        ];
        let spec = DependencySpec::new("llm")
            .with_tag("claude")
            .with_tag("+fast")
            .with_tag("-opus");

        let resolved = resolve(&spec, &snapshot).unwrap();
        assert_eq!(resolved.agent_id, "b");
    }

    #[test]
    fn test_preferred_tag_scores_ten_points() {
        let with_tag = llm_with_tags("a", &["claude", "opus"]);
        let without_tag = llm_with_tags("b", &["claude"]);
        let spec = DependencySpec::new("llm").with_tag("claude").with_tag("+opus");

        let score_with = score_capability(&spec, &with_tag.capabilities[0]).unwrap();
        let score_without = score_capability(&spec, &without_tag.capabilities[0]).unwrap();
        assert_eq!(score_with - score_without, PREFERRED_TAG_SCORE);
    }

    #[test]
    fn test_required_tag_baseline_score() {
        let cap = Capability::new("llm").with_tag("a").with_tag("b");
        let spec = DependencySpec::new("llm").with_tag("a").with_tag("b");
        assert_eq!(
            score_capability(&spec, &cap),
            Some(2 * REQUIRED_TAG_SCORE)
        );
    }

    #[test]
    fn test_scenario_opus_vs_sonnet() {
        let snapshot = vec![
            llm_with_tags("agent-a", &["claude", "opus"]),
            llm_with_tags("agent-b", &["claude", "sonnet"]),
        ];

        let wants_opus = DependencySpec::new("llm").with_tag("claude").with_tag("+opus");
        assert_eq!(resolve(&wants_opus, &snapshot).unwrap().agent_id, "agent-a");

        let avoids_opus = DependencySpec::new("llm").with_tag("claude").with_tag("-opus");
        assert_eq!(resolve(&avoids_opus, &snapshot).unwrap().agent_id, "agent-b");
    }

    #[test]
    fn test_version_range_filter() {
        let old = provider("old", Capability::new("llm").with_version(Version::new(1, 2, 0)));
        let new = provider("new", Capability::new("llm").with_version(Version::new(2, 0, 0)));
        let snapshot = vec![old, new];

        let spec = DependencySpec::new("llm").with_version(VersionReq::parse(">=2.0").unwrap());
        assert_eq!(resolve(&spec, &snapshot).unwrap().agent_id, "new");

        let impossible =
            DependencySpec::new("llm").with_version(VersionReq::parse(">=9.0").unwrap());
        assert!(resolve(&impossible, &snapshot).is_none());
    }

    #[test]
    fn test_namespace_filter() {
        let mut a = llm_with_tags("a", &[]);
        a.namespace = "prod".to_string();
        let mut b = llm_with_tags("b", &[]);
        b.namespace = "staging".to_string();
        let snapshot = vec![a, b];

        let spec = DependencySpec::new("llm").with_namespace("staging");
        assert_eq!(resolve(&spec, &snapshot).unwrap().agent_id, "b");
    }

    #[test]
    fn test_fuzzy_name_match() {
        let snapshot = vec![provider("a", Capability::new("text-llm-large"))];

        let exact = DependencySpec::new("llm");
        assert!(resolve(&exact, &snapshot).is_none());

        let fuzzy = DependencySpec::new("LLM").fuzzy();
        assert_eq!(resolve(&fuzzy, &snapshot).unwrap().agent_id, "a");
    }

    #[test]
    fn test_expired_agents_are_not_candidates() {
        let mut expired = llm_with_tags("a", &[]);
        expired.status = HealthStatus::Expired;
        let snapshot = vec![expired];

        assert!(resolve(&DependencySpec::new("llm"), &snapshot).is_none());
    }

    #[test]
    fn test_degraded_agents_remain_resolvable() {
        let mut degraded = llm_with_tags("a", &[]);
        degraded.status = HealthStatus::Degraded;
        let snapshot = vec![degraded];

        assert!(resolve(&DependencySpec::new("llm"), &snapshot).is_some());
    }

    #[test]
    fn test_tie_break_most_recent_heartbeat_then_id() {
        let earlier = Utc::now() - chrono::Duration::seconds(30);
        let later = Utc::now();

        let mut a = llm_with_tags("aaa", &[]);
        a.last_heartbeat = earlier;
        let mut b = llm_with_tags("zzz", &[]);
        b.last_heartbeat = later;

        // Equal score: the fresher heartbeat wins
        let resolved = resolve(&DependencySpec::new("llm"), &[a.clone(), b.clone()]).unwrap();
        assert_eq!(resolved.agent_id, "zzz");

        // Equal score and heartbeat: the smaller id wins
        b.last_heartbeat = earlier;
        let resolved = resolve(&DependencySpec::new("llm"), &[b, a]).unwrap();
        assert_eq!(resolved.agent_id, "aaa");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let snapshot = vec![
            llm_with_tags("a", &["claude", "opus"]),
            llm_with_tags("b", &["claude", "opus"]),
        ];
        let spec = DependencySpec::new("llm").with_tag("claude").with_tag("+opus");

        let first = resolve(&spec, &snapshot);
        let second = resolve(&spec, &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolve_all_omits_unresolved() {
        let snapshot = vec![llm_with_tags("a", &[])];
        let specs = vec![
            DependencySpec::new("llm"),
            DependencySpec::new("nonexistent"),
        ];

        let topology = resolve_all(&specs, &snapshot);
        assert_eq!(topology.len(), 1);
        assert!(topology.get("llm").is_some());
        assert!(topology.get("nonexistent").is_none());
    }
}
