//! Configuration types.

use std::time::Duration;

/// Hard upper bound on any single stay-awake lease.
pub const LEASE_HARD_CEILING: Duration = Duration::from_secs(300); // 5 minutes

/// Pipeline tuning that does not change at runtime.
///
/// Per-dispatch settings (channels, recipients, attempt ceiling) live in
/// [`crate::settings::ForwardingPolicy`] instead.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lease requested for one receive event or retry.
    pub lease_duration: Duration,
    /// Cap applied to every lease request.
    pub lease_ceiling: Duration,
    /// Delay before the first retry; the n-th retry waits n times this.
    pub retry_base_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            lease_ceiling: LEASE_HARD_CEILING,
            retry_base_delay: Duration::from_secs(30),
        }
    }
}

impl PipelineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let lease_duration = std::env::var("SMS_RELAY_LEASE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.lease_duration);

        let retry_base_delay = std::env::var("SMS_RELAY_RETRY_BASE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.retry_base_delay);

        Self {
            lease_duration: lease_duration.min(LEASE_HARD_CEILING),
            lease_ceiling: LEASE_HARD_CEILING,
            retry_base_delay,
        }
    }
}
