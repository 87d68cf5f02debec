//! Health and liveness reporting for an external metrics collaborator.

use chrono::{DateTime, Utc};
use core_resolver::CacheStats;
use core_runtime::metrics::MetricsSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Maintenance stopped or shutdown requested.
    Degraded,
}

/// Worker pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub in_flight: usize,
}

/// Point-in-time report, serializable as the body of a health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub timestamp: DateTime<Utc>,
    pub cache: CacheStats,
    pub pool: PoolStats,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Counts from one maintenance tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub evicted_sessions: usize,
    pub purged_cache_entries: usize,
}
