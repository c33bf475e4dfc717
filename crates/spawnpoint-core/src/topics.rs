//! Topic URI composition.
//!
//! All topics hang off a configured base path. Slots are inbound (clients
//! publish control messages to them), signals are outbound (the daemon
//! publishes telemetry and logs).

/// Composes slot and signal topic URIs from the daemon's base path.
#[derive(Debug, Clone)]
pub struct TopicSpace {
    base: String,
}

impl TopicSpace {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Inbound slot carrying new or replacement service configurations.
    pub fn config_slot(&self) -> String {
        format!("{}/slot/config", self.base)
    }

    /// Inbound slot carrying a service name to restart, or empty for
    /// respawn-all.
    pub fn restart_slot(&self) -> String {
        format!("{}/slot/restart", self.base)
    }

    /// Inbound slot carrying a service name to stop.
    pub fn stop_slot(&self) -> String {
        format!("{}/slot/stop", self.base)
    }

    /// Outbound host heartbeat signal.
    pub fn heartbeat_signal(&self) -> String {
        format!("{}/signal/heartbeat", self.base)
    }

    /// Outbound per-service heartbeat signal.
    pub fn service_heartbeat_signal(&self, service: &str) -> String {
        format!("{}/service/{}/signal/heartbeat", self.base, service)
    }

    /// Outbound per-service log signal.
    pub fn service_log_signal(&self, service: &str) -> String {
        format!("{}/service/{}/signal/log", self.base, service)
    }

    /// Inbound per-service log keep-alive slot.
    pub fn keep_log_alive_slot(&self, service: &str) -> String {
        format!("{}/service/{}/slot/keepLogAlive", self.base, service)
    }
}
