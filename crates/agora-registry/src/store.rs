//! Versioned, concurrency-safe storage of agent records
//!
//! The store is the sole shared mutable state in the registry. Writes are
//! serialized per agent id; the event log owns resource-version allocation
//! so that event order always matches version order. Agents are never
//! hard-deleted: expiry and unregistration mark the record `Expired` and
//! retain it for audit.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::types::{AgentRecord, AgentRegistration, Event, EventType, HealthStatus};

/// Outcome of a committed upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Version assigned to the committed record
    pub resource_version: u64,
    /// Version the record carried before this write, if it existed.
    /// A racing writer can compare this against the version it last saw
    /// to detect that it was overwritten (last-writer-wins).
    pub previous_version: Option<u64>,
    /// Whether this write created the record
    pub created: bool,
    /// Whether this write changed observable state and emitted an event
    /// (creation counts as changed)
    pub changed: bool,
}

/// Aggregate counts for registry self-health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreCounts {
    /// Registered agents, including expired ones
    pub agents: usize,
    /// Capabilities across all non-expired agents
    pub capabilities: usize,
    /// Events in the log
    pub events: usize,
}

/// Storage contract for agent records and the event log.
///
/// Implement this trait to provide alternative backends. All mutating
/// calls are atomic with respect to a per-agent-id critical section, and
/// every committed mutation bumps the agent's resource version by at
/// least one.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert or fully replace an agent record from a registration payload.
    ///
    /// The capability set is replaced wholesale. Malformed payloads are
    /// rejected without touching the prior record.
    async fn upsert_agent(&self, registration: AgentRegistration) -> RegistryResult<UpsertOutcome>;

    /// Record a lightweight heartbeat: bump the timestamp and self-heal
    /// the status back to `Healthy`. Returns the committed record.
    async fn touch_agent(&self, agent_id: &str) -> RegistryResult<AgentRecord>;

    /// Fetch one agent record.
    async fn get_agent(&self, agent_id: &str) -> RegistryResult<Option<AgentRecord>>;

    /// Snapshot of all agent records, expired ones included.
    async fn list_agents(&self) -> RegistryResult<Vec<AgentRecord>>;

    /// Commit a health-status transition. No-op if the agent is unknown
    /// or already in the requested status.
    async fn set_status(&self, agent_id: &str, status: HealthStatus) -> RegistryResult<()>;

    /// Soft-delete: mark the agent `Expired` and emit a DELETED event.
    /// Idempotent; unknown or already-expired agents are a successful no-op.
    async fn remove_agent(&self, agent_id: &str) -> RegistryResult<()>;

    /// Append a MODIFIED event for an agent whose observable state in the
    /// store did not change but whose derived state (resolved topology)
    /// did. Returns the record at its newly allocated version.
    async fn record_modified(&self, agent_id: &str) -> RegistryResult<AgentRecord>;

    /// Events with a resource version strictly greater than `version`,
    /// in version order.
    async fn events_since(&self, version: u64) -> RegistryResult<Vec<Event>>;

    /// Subscribe to live events as they are committed.
    fn subscribe(&self) -> broadcast::Receiver<Event>;

    /// Aggregate counts for self-health reporting.
    async fn counts(&self) -> RegistryResult<StoreCounts>;
}

/// Event log with version allocation.
///
/// Versions are handed out under the same lock that appends events, which
/// is what guarantees delivery order matches version order.
struct EventLog {
    next_version: u64,
    events: Vec<Event>,
}

impl EventLog {
    fn new() -> Self {
        Self {
            next_version: 0,
            events: Vec::new(),
        }
    }

    fn allocate(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn append(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// In-memory store: a sharded map of agent records plus an append-only
/// event log with broadcast fan-out.
pub struct InMemoryStore {
    agents: DashMap<String, AgentRecord>,
    log: Mutex<EventLog>,
    event_tx: broadcast::Sender<Event>,
}

impl InMemoryStore {
    /// Create a store with the given live-event channel capacity.
    pub fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Self {
            agents: DashMap::new(),
            log: Mutex::new(EventLog::new()),
            event_tx,
        }
    }

    fn log_lock(&self) -> RegistryResult<std::sync::MutexGuard<'_, EventLog>> {
        self.log
            .lock()
            .map_err(|_| RegistryError::unavailable("event log lock poisoned"))
    }

    /// Allocate a version without recording an event. Used for mutations
    /// with no observable state change (timestamp-only heartbeats).
    fn bump_version(&self) -> RegistryResult<u64> {
        Ok(self.log_lock()?.allocate())
    }

    /// Allocate a version, stamp it into the record, append the event,
    /// and fan it out to live subscribers.
    fn commit_event(
        &self,
        event_type: EventType,
        record: &mut AgentRecord,
    ) -> RegistryResult<u64> {
        let mut log = self.log_lock()?;
        let version = log.allocate();
        record.resource_version = version;
        let event = Event::new(event_type, record.clone());
        log.append(event.clone());
        drop(log);

        // Send failures just mean there are no live subscribers
        let _ = self.event_tx.send(event);
        Ok(version)
    }
}

#[cfg(test)]
impl InMemoryStore {
    /// Overwrite a record directly, bypassing version allocation. Unit
    /// tests use this to backdate heartbeats.
    pub(crate) fn inject_record(&self, record: AgentRecord) {
        self.agents.insert(record.id.clone(), record);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Observable fields of a record, ignoring timestamps and version.
fn observably_equal(a: &AgentRecord, b: &AgentRecord) -> bool {
    a.name == b.name
        && a.namespace == b.namespace
        && a.endpoint == b.endpoint
        && a.capabilities == b.capabilities
        && a.labels == b.labels
        && a.security_context == b.security_context
        && a.status == b.status
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn upsert_agent(&self, registration: AgentRegistration) -> RegistryResult<UpsertOutcome> {
        registration.validate()?;

        let agent_id = registration.id.clone();
        let now = Utc::now();
        let mut fresh = AgentRecord::from_registration(registration, now);

        // The entry guard is the per-agent critical section.
        match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().clone();
                let changed = !observably_equal(&previous, &fresh);

                let version = if changed {
                    self.commit_event(EventType::Modified, &mut fresh)?
                } else {
                    let version = self.bump_version()?;
                    fresh.resource_version = version;
                    version
                };
                occupied.insert(fresh);

                debug!(
                    agent_id = %agent_id,
                    resource_version = version,
                    changed,
                    "Agent re-registered"
                );
                Ok(UpsertOutcome {
                    resource_version: version,
                    previous_version: Some(previous.resource_version),
                    created: false,
                    changed,
                })
            }
            Entry::Vacant(vacant) => {
                let version = self.commit_event(EventType::Added, &mut fresh)?;
                info!(
                    agent_id = %agent_id,
                    namespace = %fresh.namespace,
                    capabilities = fresh.capabilities.len(),
                    resource_version = version,
                    "Agent registered"
                );
                vacant.insert(fresh);
                Ok(UpsertOutcome {
                    resource_version: version,
                    previous_version: None,
                    created: true,
                    changed: true,
                })
            }
        }
    }

    async fn touch_agent(&self, agent_id: &str) -> RegistryResult<AgentRecord> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::not_found(agent_id))?;

        entry.last_heartbeat = Utc::now();

        // Any heartbeat self-heals liveness, no re-registration required
        if entry.status != HealthStatus::Healthy {
            let old_status = entry.status;
            entry.status = HealthStatus::Healthy;
            self.commit_event(EventType::Modified, &mut entry)?;
            info!(
                agent_id = %agent_id,
                old_status = %old_status,
                "Agent recovered on heartbeat"
            );
        } else {
            entry.resource_version = self.bump_version()?;
        }

        Ok(entry.clone())
    }

    async fn get_agent(&self, agent_id: &str) -> RegistryResult<Option<AgentRecord>> {
        Ok(self.agents.get(agent_id).map(|r| r.clone()))
    }

    async fn list_agents(&self) -> RegistryResult<Vec<AgentRecord>> {
        Ok(self.agents.iter().map(|r| r.clone()).collect())
    }

    async fn set_status(&self, agent_id: &str, status: HealthStatus) -> RegistryResult<()> {
        let Some(mut entry) = self.agents.get_mut(agent_id) else {
            return Ok(());
        };
        if entry.status == status {
            return Ok(());
        }

        let old_status = entry.status;
        entry.status = status;

        // Expiry reads as a deletion to watchers; the record stays behind
        let event_type = if status == HealthStatus::Expired {
            EventType::Deleted
        } else {
            EventType::Modified
        };
        self.commit_event(event_type, &mut entry)?;

        info!(
            agent_id = %agent_id,
            old_status = %old_status,
            new_status = %status,
            "Health status changed"
        );
        Ok(())
    }

    async fn remove_agent(&self, agent_id: &str) -> RegistryResult<()> {
        let Some(mut entry) = self.agents.get_mut(agent_id) else {
            debug!(agent_id = %agent_id, "Unregister for unknown agent ignored");
            return Ok(());
        };
        if entry.status == HealthStatus::Expired {
            debug!(agent_id = %agent_id, "Unregister for expired agent ignored");
            return Ok(());
        }

        entry.status = HealthStatus::Expired;
        self.commit_event(EventType::Deleted, &mut entry)?;
        info!(agent_id = %agent_id, "Agent unregistered");
        Ok(())
    }

    async fn record_modified(&self, agent_id: &str) -> RegistryResult<AgentRecord> {
        let mut entry = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::not_found(agent_id))?;

        self.commit_event(EventType::Modified, &mut entry)?;
        debug!(
            agent_id = %agent_id,
            resource_version = entry.resource_version,
            "Derived-state change recorded"
        );
        Ok(entry.clone())
    }

    async fn events_since(&self, version: u64) -> RegistryResult<Vec<Event>> {
        let log = self.log_lock()?;
        Ok(log
            .events
            .iter()
            .filter(|e| e.resource_version > version)
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    async fn counts(&self) -> RegistryResult<StoreCounts> {
        let capabilities = self
            .agents
            .iter()
            .filter(|r| r.status.is_discoverable())
            .map(|r| r.capabilities.len())
            .sum();
        let events = self.log_lock()?.events.len();
        Ok(StoreCounts {
            agents: self.agents.len(),
            capabilities,
            events,
        })
    }
}
