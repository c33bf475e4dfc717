//! spawnpoint-bus — pub/sub façade for the Spawnpoint daemon.
//!
//! The concrete message-bus client is an external collaborator; this crate
//! owns the seam. It provides:
//!
//! - `PayloadObject` — tagged wire payloads (numeric kind + opaque bytes)
//!   with typed encoders/decoders
//! - `BusTransport` — the trait a concrete bus client implements
//! - `BusAdapter` — the façade the daemon talks to: topic-aware publish,
//!   slot subscriptions, per-service interfaces
//! - `MemoryTransport` — in-process transport backing tests and local runs
//!
//! # Architecture
//!
//! ```text
//! Daemon ──► BusAdapter ──► dyn BusTransport
//!              │                 └── MemoryTransport (broadcast per topic)
//!              └── ServiceInterface (per-service signal/slot URIs)
//! ```

pub mod adapter;
pub mod error;
pub mod memory;
pub mod payload;
pub mod transport;

pub use adapter::{BusAdapter, ServiceInterface};
pub use error::BusError;
pub use memory::MemoryTransport;
pub use payload::{PayloadKind, PayloadObject};
pub use transport::{BusMessage, BusTransport, SubscriptionId};
