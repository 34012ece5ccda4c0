//! Registry configuration

use std::time::Duration;

/// Configuration for heartbeat aging, health sweeps, and event fan-out.
///
/// The thresholds drive the per-agent liveness state machine: an agent with
/// no heartbeat for `degraded_after` becomes `Degraded`, and after
/// `expire_after` it becomes `Expired` (retained for audit, excluded from
/// discovery and resolution).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Elapsed time without a heartbeat before an agent is marked Degraded
    pub degraded_after: Duration,
    /// Elapsed time without a heartbeat before an agent is marked Expired
    pub expire_after: Duration,
    /// Interval between health-monitor sweeps
    pub sweep_interval: Duration,
    /// A lightweight ping answers "needs full refresh" when the agent's
    /// last full registration is older than this window
    pub refresh_staleness: Duration,
    /// Capacity of the live event broadcast channel
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            degraded_after: Duration::from_secs(15),
            expire_after: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            refresh_staleness: Duration::from_secs(300),
            event_capacity: 256,
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the degraded threshold.
    pub fn with_degraded_after(mut self, d: Duration) -> Self {
        self.degraded_after = d;
        self
    }

    /// Set the expiry threshold.
    pub fn with_expire_after(mut self, d: Duration) -> Self {
        self.expire_after = d;
        self
    }

    /// Set the health sweep interval.
    pub fn with_sweep_interval(mut self, d: Duration) -> Self {
        self.sweep_interval = d;
        self
    }

    /// Set the full-refresh staleness window.
    pub fn with_refresh_staleness(mut self, d: Duration) -> Self {
        self.refresh_staleness = d;
        self
    }

    /// Set the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
