//! # Agora Registry
//!
//! Pull-based capability registry and dependency-resolution engine for
//! Agora agent meshes. Agents push heartbeats and full registrations in;
//! the registry never initiates contact with an agent.
//!
//! ## Components
//!
//! - **Store** ([`store`]): versioned, concurrency-safe agent records with
//!   per-agent-id write serialization and an append-only event log.
//! - **Heartbeat** ([`heartbeat`]): cheap liveness pings and full
//!   registrations, the sole write path into the store.
//! - **Resolver** ([`resolve`]): scored tag/version/namespace matching
//!   that deterministically picks one provider per declared dependency.
//! - **Health** ([`health`]): background sweep aging liveness into
//!   healthy/degraded/expired states.
//! - **Topology** ([`topology`]): canonical topology hashing so both
//!   sides of a heartbeat can skip redundant rewiring.
//! - **Events** ([`events`]): ordered, restartable watch streams.
//! - **Query** ([`query`]): discovery by namespace, tag, category, label
//!   selector, fuzzy name, and version range.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use agora_registry::{
//!     AgentRegistration, Capability, DependencyRequest, HeartbeatHandler,
//!     InMemoryStore, RegistryConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::default());
//! let handler = HeartbeatHandler::new(store, RegistryConfig::default());
//!
//! // A provider registers its capability
//! let provider = AgentRegistration::new("llm-1", "LLM Provider", "http://llm-1:9000")
//!     .with_capability(Capability::new("llm").with_tag("claude"));
//! handler.full(provider, Vec::new()).await?;
//!
//! // A consumer declares a dependency and gets it resolved
//! let consumer = AgentRegistration::new("app-1", "App", "http://app-1:9000");
//! let response = handler
//!     .full(consumer, vec![DependencyRequest::Name("llm".into())])
//!     .await?;
//! assert_eq!(response.resolved.get("llm").unwrap().agent_id, "llm-1");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod heartbeat;
pub mod query;
pub mod resolve;
pub mod store;
pub mod topology;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use config::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use events::watch;
pub use health::{HealthMonitor, HealthMonitorHandle};
pub use heartbeat::{HeartbeatHandler, HeartbeatResponse, PingResponse};
pub use query::{DiscoveryQuery, DiscoveryService};
pub use resolve::{resolve, resolve_all};
pub use store::{InMemoryStore, ResourceStore, StoreCounts, UpsertOutcome};
pub use topology::{ChangeDetector, ResolvedTopology};
pub use types::{
    AgentRecord, AgentRegistration, AgentStatusReport, Capability, DependencyPayload,
    DependencyRequest, DependencySpec, Event, EventType, HealthStatus, ResolvedDependency,
    Stability,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
