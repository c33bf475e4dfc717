//! The `ContainerBackend` trait and its wire types.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BackendError;

/// Buffer size for log and event fan-in channels.
pub(crate) const STREAM_BUFFER: usize = 20;
/// Error side-channels hold at most one flushed error.
pub(crate) const ERROR_BUFFER: usize = 1;

/// Container network attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Bridge,
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
        }
    }
}

/// Everything needed to create and start one container.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub image: String,
    pub command: Vec<String>,
    pub workdir: String,
    pub env: Vec<(String, String)>,
    pub network: NetworkMode,
    /// `"<host_alias>_<service_name>"`.
    pub container_name: String,
    pub memory_limit_mib: u64,
    pub cpu_shares: u64,
}

/// A lifecycle event observed on the backend's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub container_id: String,
    pub action: EventAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Die,
}

/// One block-I/O counter, keyed by operation (`"Read"` / `"Write"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlkioEntry {
    pub op: String,
    pub bytes: u64,
}

/// A point-in-time resource sample for one container.
///
/// CPU fields are cumulative counters; consumers compute percentages from
/// deltas between consecutive samples.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSample {
    pub cpu_total_ns: u64,
    pub system_cpu_total_ns: u64,
    pub num_cpus: u32,
    pub mem_usage_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub blkio: Vec<BlkioEntry>,
}

/// Abstract container runtime.
///
/// Log and event streams follow the channel-pair convention: a bounded
/// message channel plus a one-slot error channel that may hold an error
/// flushed after the message channel closes. A closed log stream is also
/// signalled in-band by an empty-string sentinel.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Cheap availability check. Failure at daemon startup is fatal.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Build an image from a tar build context. No layer cache; dangling
    /// intermediate images are removed even on failure.
    async fn build(&self, tag: &str, context_tar: Vec<u8>) -> Result<(), BackendError>;

    /// Create and start a container, returning its id.
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, BackendError>;

    async fn stop(&self, id: &str) -> Result<(), BackendError>;

    async fn restart(&self, id: &str) -> Result<(), BackendError>;

    async fn remove(&self, id: &str) -> Result<(), BackendError>;

    /// Attach to a container's stdout/stderr. With `include_history`, lines
    /// emitted before attachment are replayed first.
    async fn attach_logs(
        &self,
        id: &str,
        include_history: bool,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<BackendError>), BackendError>;

    /// Stream lifecycle events, optionally filtered to one container.
    async fn events(
        &self,
        filter_id: Option<&str>,
    ) -> Result<(mpsc::Receiver<ContainerEvent>, mpsc::Receiver<BackendError>), BackendError>;

    /// Stream resource samples for one container. The channel closes when
    /// the container exits.
    async fn stats(&self, id: &str) -> Result<mpsc::Receiver<StatsSample>, BackendError>;
}
