//! Wire records published on the bus.

use serde::{Deserialize, Serialize};

/// A single line of container output, published on a service's log signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub host_alias: String,
    pub service_name: String,
    pub contents: String,
}

/// Host-level heartbeat, published (persisted) every five seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostHeartbeat {
    pub alias: String,
    /// Nanoseconds since the Unix epoch.
    pub time: i64,
    pub total_mem: u64,
    pub total_cpu_shares: u64,
    pub available_mem: u64,
    pub available_cpu_shares: u64,
}

/// Per-service heartbeat derived from container stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHeartbeat {
    pub spawnpoint_uri: String,
    pub name: String,
    /// Nanoseconds since the Unix epoch.
    pub time: i64,
    pub mem_alloc: u64,
    pub cpu_shares: u64,
    pub mem_usage_mib: f64,
    pub net_rx_mib: f64,
    pub net_tx_mib: f64,
    pub mb_read: f64,
    pub mb_written: f64,
    pub cpu_percent: f64,
}
