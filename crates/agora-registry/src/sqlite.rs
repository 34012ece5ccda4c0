//! SQLite-backed resource store for restart durability
//!
//! Persists the agent table, a capability table keyed by (agent id,
//! capability name), and the append-only event log. Records are stored as
//! JSON blobs; the capability table is derived from them so operators can
//! query offerings with plain SQL. WAL mode keeps readers off the write
//! path. Each mutation runs in one transaction, so a failed write leaves
//! the prior record intact.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::store::{ResourceStore, StoreCounts, UpsertOutcome};
use crate::types::{AgentRecord, AgentRegistration, Event, EventType, HealthStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id               TEXT PRIMARY KEY,
    record           TEXT NOT NULL,
    resource_version INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS capabilities (
    agent_id TEXT NOT NULL,
    name     TEXT NOT NULL,
    spec     TEXT NOT NULL,
    PRIMARY KEY (agent_id, name)
);
CREATE TABLE IF NOT EXISTS events (
    resource_version INTEGER PRIMARY KEY,
    event_type       TEXT NOT NULL,
    agent_id         TEXT NOT NULL,
    event            TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO meta (key, value) VALUES ('next_version', 0);
";

/// Durable store backend on a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    event_tx: broadcast::Sender<Event>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run the schema.
    pub fn open(path: impl AsRef<Path>, event_capacity: usize) -> RegistryResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.as_ref().display(), "Opened sqlite store");
        let (event_tx, _) = broadcast::channel(event_capacity.max(1));
        Ok(Self {
            conn: Mutex::new(conn),
            event_tx,
        })
    }

    fn lock(&self) -> RegistryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::unavailable("sqlite connection lock poisoned"))
    }

    fn allocate_version(tx: &rusqlite::Transaction<'_>) -> RegistryResult<u64> {
        tx.execute(
            "UPDATE meta SET value = value + 1 WHERE key = 'next_version'",
            [],
        )?;
        let version: u64 = tx.query_row(
            "SELECT value FROM meta WHERE key = 'next_version'",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn write_record(tx: &rusqlite::Transaction<'_>, record: &AgentRecord) -> RegistryResult<()> {
        tx.execute(
            "INSERT INTO agents (id, record, resource_version) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record = ?2, resource_version = ?3",
            params![
                record.id,
                serde_json::to_string(record)?,
                record.resource_version
            ],
        )?;
        tx.execute(
            "DELETE FROM capabilities WHERE agent_id = ?1",
            params![record.id],
        )?;
        for cap in &record.capabilities {
            tx.execute(
                "INSERT INTO capabilities (agent_id, name, spec) VALUES (?1, ?2, ?3)",
                params![record.id, cap.name, serde_json::to_string(cap)?],
            )?;
        }
        Ok(())
    }

    fn append_event(
        tx: &rusqlite::Transaction<'_>,
        event_type: EventType,
        record: &AgentRecord,
    ) -> RegistryResult<Event> {
        let event = Event::new(event_type, record.clone());
        tx.execute(
            "INSERT INTO events (resource_version, event_type, agent_id, event)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.resource_version,
                event.event_type.to_string(),
                record.id,
                serde_json::to_string(&event)?
            ],
        )?;
        Ok(event)
    }

    fn read_record(conn: &Connection, agent_id: &str) -> RegistryResult<Option<AgentRecord>> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT record FROM agents WHERE id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        }
    }

    fn broadcast(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }
}

#[async_trait]
impl ResourceStore for SqliteStore {
    async fn upsert_agent(&self, registration: AgentRegistration) -> RegistryResult<UpsertOutcome> {
        registration.validate()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous = Self::read_record(&tx, &registration.id)?;
        let created = previous.is_none();
        let mut fresh = AgentRecord::from_registration(registration, Utc::now());
        let version = Self::allocate_version(&tx)?;
        fresh.resource_version = version;

        let event = match &previous {
            None => Some(Self::append_event(&tx, EventType::Added, &fresh)?),
            Some(old) => {
                let changed = old.capabilities != fresh.capabilities
                    || old.endpoint != fresh.endpoint
                    || old.name != fresh.name
                    || old.namespace != fresh.namespace
                    || old.labels != fresh.labels
                    || old.security_context != fresh.security_context
                    || old.status != fresh.status;
                if changed {
                    Some(Self::append_event(&tx, EventType::Modified, &fresh)?)
                } else {
                    None
                }
            }
        };
        let changed = event.is_some();
        Self::write_record(&tx, &fresh)?;
        tx.commit()?;
        drop(conn);

        debug!(agent_id = %fresh.id, resource_version = version, "Agent persisted");
        if let Some(event) = event {
            self.broadcast(event);
        }
        Ok(UpsertOutcome {
            resource_version: version,
            previous_version: previous.map(|p| p.resource_version),
            created,
            changed,
        })
    }

    async fn touch_agent(&self, agent_id: &str) -> RegistryResult<AgentRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(mut record) = Self::read_record(&tx, agent_id)? else {
            return Err(RegistryError::not_found(agent_id));
        };
        record.last_heartbeat = Utc::now();
        let recovered = record.status != HealthStatus::Healthy;
        record.status = HealthStatus::Healthy;
        record.resource_version = Self::allocate_version(&tx)?;

        let event = if recovered {
            Some(Self::append_event(&tx, EventType::Modified, &record)?)
        } else {
            None
        };
        Self::write_record(&tx, &record)?;
        tx.commit()?;
        drop(conn);

        if let Some(event) = event {
            self.broadcast(event);
        }
        Ok(record)
    }

    async fn get_agent(&self, agent_id: &str) -> RegistryResult<Option<AgentRecord>> {
        let conn = self.lock()?;
        Self::read_record(&conn, agent_id)
    }

    async fn list_agents(&self) -> RegistryResult<Vec<AgentRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT record FROM agents ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for raw in rows {
            records.push(serde_json::from_str(&raw?)?);
        }
        Ok(records)
    }

    async fn set_status(&self, agent_id: &str, status: HealthStatus) -> RegistryResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(mut record) = Self::read_record(&tx, agent_id)? else {
            return Ok(());
        };
        if record.status == status {
            return Ok(());
        }
        record.status = status;
        record.resource_version = Self::allocate_version(&tx)?;

        let event_type = if status == HealthStatus::Expired {
            EventType::Deleted
        } else {
            EventType::Modified
        };
        let event = Self::append_event(&tx, event_type, &record)?;
        Self::write_record(&tx, &record)?;
        tx.commit()?;
        drop(conn);

        self.broadcast(event);
        Ok(())
    }

    async fn remove_agent(&self, agent_id: &str) -> RegistryResult<()> {
        let current = self.get_agent(agent_id).await?;
        match current {
            None => Ok(()),
            Some(record) if record.status == HealthStatus::Expired => Ok(()),
            Some(_) => self.set_status(agent_id, HealthStatus::Expired).await,
        }
    }

    async fn record_modified(&self, agent_id: &str) -> RegistryResult<AgentRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let Some(mut record) = Self::read_record(&tx, agent_id)? else {
            return Err(RegistryError::not_found(agent_id));
        };
        record.resource_version = Self::allocate_version(&tx)?;
        let event = Self::append_event(&tx, EventType::Modified, &record)?;
        Self::write_record(&tx, &record)?;
        tx.commit()?;
        drop(conn);

        self.broadcast(event);
        Ok(record)
    }

    async fn events_since(&self, version: u64) -> RegistryResult<Vec<Event>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event FROM events WHERE resource_version > ?1 ORDER BY resource_version",
        )?;
        let rows = stmt.query_map(params![version], |row| row.get::<_, String>(0))?;
        let mut events = Vec::new();
        for raw in rows {
            events.push(serde_json::from_str(&raw?)?);
        }
        Ok(events)
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    async fn counts(&self) -> RegistryResult<StoreCounts> {
        let conn = self.lock()?;
        let agents: usize = conn.query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?;
        let capabilities: usize = conn.query_row(
            "SELECT COUNT(*) FROM capabilities c
             JOIN agents a ON a.id = c.agent_id
             WHERE json_extract(a.record, '$.status') != 'expired'",
            [],
            |row| row.get(0),
        )?;
        let events: usize = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(StoreCounts {
            agents,
            capabilities,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Capability;
    use tempfile::TempDir;

    fn registration(id: &str) -> AgentRegistration {
        AgentRegistration::new(id, format!("Agent {}", id), format!("http://{}:9000", id))
            .with_capability(Capability::new("llm").with_tag("claude"))
    }

    fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::open(dir.path().join("registry.db"), 64).unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let outcome = store.upsert_agent(registration("a1")).await.unwrap();
        assert!(outcome.resource_version >= 1);

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.capabilities[0].name, "llm");
        assert_eq!(record.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let version = {
            let store = open_store(&dir);
            store.upsert_agent(registration("a1")).await.unwrap();
            store
                .upsert_agent(registration("a2"))
                .await
                .unwrap()
                .resource_version
        };

        let store = open_store(&dir);
        let agents = store.list_agents().await.unwrap();
        assert_eq!(agents.len(), 2);

        // Version allocation continues past the previous run
        let next = store.upsert_agent(registration("a3")).await.unwrap();
        assert!(next.resource_version > version);

        let events = store.events_since(0).await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_soft_delete_and_events() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert_agent(registration("a1")).await.unwrap();
        store.remove_agent("a1").await.unwrap();
        store.remove_agent("a1").await.unwrap();

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.status, HealthStatus::Expired);

        let events = store.events_since(0).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::Deleted);
    }

    #[tokio::test]
    async fn test_invalid_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert_agent(registration("a1")).await.unwrap();
        let bad = AgentRegistration::new("a1", "", "http://a1:9000");
        assert!(store.upsert_agent(bad).await.is_err());

        let record = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(record.name, "Agent a1");
    }

    #[tokio::test]
    async fn test_record_modified_persists_event() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert_agent(registration("a1")).await.unwrap();
        let record = store.record_modified("a1").await.unwrap();

        let events = store.events_since(0).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Modified);
        assert_eq!(last.resource_version, record.resource_version);
    }

    #[tokio::test]
    async fn test_touch_self_heals() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert_agent(registration("a1")).await.unwrap();
        store
            .set_status("a1", HealthStatus::Degraded)
            .await
            .unwrap();

        let record = store.touch_agent("a1").await.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
    }
}
