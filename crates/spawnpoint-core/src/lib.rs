//! spawnpoint-core — shared types for the Spawnpoint daemon.
//!
//! Everything that crosses a crate boundary lives here:
//!
//! - `ServiceConfiguration` — the deployable unit submitted over the bus
//! - `LogMessage`, `HostHeartbeat`, `ServiceHeartbeat` — wire records
//! - `TopicSpace` — composition of slot/signal topic URIs from a base path

pub mod config;
pub mod topics;
pub mod types;

pub use config::{parse_mem_alloc, ConfigError, ServiceConfiguration, DEFAULT_BASE_IMAGE};
pub use topics::TopicSpace;
pub use types::{HostHeartbeat, LogMessage, ServiceHeartbeat};
