//! Background health sweep
//!
//! Ages agent liveness into states on a fixed tick. The sweep works from a
//! read snapshot and commits each transition individually, so it never
//! holds a store-wide lock, and a transient sweep failure is retried on
//! the next tick.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::store::ResourceStore;
use crate::types::HealthStatus;

/// Periodically recomputes each agent's status from elapsed time since
/// its last heartbeat.
pub struct HealthMonitor {
    store: Arc<dyn ResourceStore>,
    config: RegistryConfig,
}

/// Handle for the spawned monitor task.
pub struct HealthMonitorHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Stop the background sweep.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl HealthMonitor {
    /// Create a monitor over the given store.
    pub fn new(store: Arc<dyn ResourceStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Spawn the sweep loop on the runtime.
    pub fn spawn(self) -> HealthMonitorHandle {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "Health sweep failed; retrying next tick");
                }
            }
        });
        HealthMonitorHandle { handle }
    }

    /// One pass over a snapshot of all agents, committing status
    /// transitions one agent at a time.
    pub async fn sweep(&self) -> RegistryResult<usize> {
        let now = Utc::now();
        let snapshot = self.store.list_agents().await?;
        let mut transitions = 0;

        for record in snapshot {
            // Unregistered/expired records stay expired until an agent
            // heartbeats again; expiry itself is driven from here
            if record.status == HealthStatus::Expired {
                continue;
            }

            let elapsed = record.time_since_heartbeat(now);
            let target = HealthStatus::from_elapsed(
                elapsed,
                self.config.degraded_after,
                self.config.expire_after,
            );
            if target == record.status {
                continue;
            }

            debug!(
                agent_id = %record.id,
                elapsed_secs = elapsed.as_secs(),
                from = %record.status,
                to = %target,
                "Sweep transition"
            );
            self.store.set_status(&record.id, target).await?;
            transitions += 1;
        }

        Ok(transitions)
    }
}
