//! Core data model: agents, capabilities, dependencies, events

mod agent;
mod capability;
mod dependency;
mod event;

pub use agent::{AgentRecord, AgentRegistration, AgentStatusReport, HealthStatus};
pub use capability::{Capability, Stability};
pub use dependency::{DependencyPayload, DependencyRequest, DependencySpec, ResolvedDependency};
pub use event::{Event, EventType};
