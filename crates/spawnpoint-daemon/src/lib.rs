//! spawnpoint-daemon — the per-host scheduler.
//!
//! Accepts service configurations from the bus, admits them against the
//! host's resource ledger, builds and launches containers through the
//! backend, supervises their lifecycle, streams their logs to interested
//! subscribers, and emits periodic telemetry.
//!
//! # Architecture
//!
//! ```text
//! Daemon
//!   ├── ResourceLedger (admission accounting, one lock)
//!   ├── ServiceRegistry (name → RunningService, one lock)
//!   ├── LifecycleSupervisor
//!   │     ├── config consumer  ── admission → build → start
//!   │     ├── restart consumer ── named restart / respawn-all
//!   │     ├── stop consumer    ── graceful stop, release on die
//!   │     └── event consumer   ── die → restart or remove+release
//!   ├── per service: LogPipeline (keep-alive gated) + stats heartbeat
//!   └── host heartbeat loop (5 s, persisted)
//! ```
//!
//! Lock order is registry before ledger, and neither lock is ever held
//! across an I/O call.

pub mod config;
pub mod daemon;
pub mod error;
pub mod ledger;
pub mod logs;
pub mod registry;
pub mod supervisor;
pub mod telemetry;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::DaemonError;
pub use ledger::{Reservation, ReserveError, ResourceLedger};
pub use registry::{RunningService, ServiceRegistry};
pub use supervisor::LifecycleSupervisor;
