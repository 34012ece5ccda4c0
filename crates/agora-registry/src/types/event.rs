//! Store mutation events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentRecord;

/// Kind of store mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// First successful registration of an agent
    Added,
    /// Capability set, status, or resolved topology changed
    Modified,
    /// Agent expired or explicitly unregistered (record retained)
    Deleted,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Added => write!(f, "ADDED"),
            EventType::Modified => write!(f, "MODIFIED"),
            EventType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// One committed store mutation, strictly ordered by resource version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Mutation kind
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Snapshot of the affected agent at commit time
    pub agent: AgentRecord,
    /// Resource version assigned to this mutation
    pub resource_version: u64,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event around an agent snapshot.
    pub fn new(event_type: EventType, agent: AgentRecord) -> Self {
        Self {
            event_type,
            resource_version: agent.resource_version,
            agent,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::agent::AgentRegistration;

    #[test]
    fn test_event_type_serde() {
        let json = serde_json::to_string(&EventType::Modified).unwrap();
        assert_eq!(json, "\"MODIFIED\"");
    }

    #[test]
    fn test_event_carries_version() {
        let reg = AgentRegistration::new("a1", "Agent", "http://localhost:9000");
        let mut record = AgentRecord::from_registration(reg, Utc::now());
        record.resource_version = 42;

        let event = Event::new(EventType::Added, record);
        assert_eq!(event.resource_version, 42);
        assert_eq!(event.agent.id, "a1");
    }
}
