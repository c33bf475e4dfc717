//! Scriptable in-memory backend for the test suite.
//!
//! Records every call and hands tests the sending side of the log, event,
//! and stats channels so container behavior can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::{
    ContainerBackend, ContainerEvent, EventAction, LaunchSpec, StatsSample, ERROR_BUFFER,
    STREAM_BUFFER,
};
use crate::error::BackendError;

#[derive(Default)]
struct Inner {
    builds: Vec<String>,
    starts: Vec<LaunchSpec>,
    stops: Vec<String>,
    restarts: Vec<String>,
    removes: Vec<String>,
    /// container name → current container id
    ids: HashMap<String, String>,
    event_txs: Vec<mpsc::Sender<ContainerEvent>>,
    log_txs: HashMap<String, mpsc::Sender<String>>,
    stats_txs: HashMap<String, mpsc::Sender<StatsSample>>,
    fail_build: Option<String>,
    fail_start: Option<String>,
    fail_restart: Option<String>,
}

/// In-memory `ContainerBackend` with call recording and stream injection.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock state poisoned")
    }

    // ── Call records ────────────────────────────────────────────────

    pub fn build_tags(&self) -> Vec<String> {
        self.lock().builds.clone()
    }

    pub fn start_specs(&self) -> Vec<LaunchSpec> {
        self.lock().starts.clone()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.lock().stops.clone()
    }

    pub fn restart_calls(&self) -> Vec<String> {
        self.lock().restarts.clone()
    }

    pub fn remove_calls(&self) -> Vec<String> {
        self.lock().removes.clone()
    }

    /// The container id most recently started under the given name.
    pub fn container_id(&self, container_name: &str) -> Option<String> {
        self.lock().ids.get(container_name).cloned()
    }

    /// Whether a log attachment is currently open for the container.
    pub fn has_log_stream(&self, container_id: &str) -> bool {
        self.lock().log_txs.contains_key(container_id)
    }

    /// Whether a stats stream is currently open for the container.
    pub fn has_stats_stream(&self, container_id: &str) -> bool {
        self.lock().stats_txs.contains_key(container_id)
    }

    // ── Failure injection ───────────────────────────────────────────

    pub fn fail_next_build(&self, reason: &str) {
        self.lock().fail_build = Some(reason.to_string());
    }

    pub fn fail_next_start(&self, reason: &str) {
        self.lock().fail_start = Some(reason.to_string());
    }

    pub fn fail_next_restart(&self, reason: &str) {
        self.lock().fail_restart = Some(reason.to_string());
    }

    // ── Stream injection ────────────────────────────────────────────

    /// Deliver a `die` event to every open event subscription.
    pub async fn emit_die(&self, container_id: &str) {
        let txs = self.lock().event_txs.clone();
        for tx in txs {
            let _ = tx
                .send(ContainerEvent {
                    container_id: container_id.to_string(),
                    action: EventAction::Die,
                })
                .await;
        }
    }

    /// Deliver a log line to the container's attached log stream.
    pub async fn emit_log(&self, container_id: &str, line: &str) {
        let tx = self.lock().log_txs.get(container_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(line.to_string()).await;
        }
    }

    /// Close the container's log stream (drops the sender).
    pub fn close_logs(&self, container_id: &str) {
        self.lock().log_txs.remove(container_id);
    }

    /// Deliver a stats sample to the container's stats stream.
    pub async fn emit_stats(&self, container_id: &str, sample: StatsSample) {
        let tx = self.lock().stats_txs.get(container_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(sample).await;
        }
    }

    /// Close the container's stats stream.
    pub fn close_stats(&self, container_id: &str) {
        self.lock().stats_txs.remove(container_id);
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn build(&self, tag: &str, _context_tar: Vec<u8>) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.fail_build.take() {
            return Err(BackendError::Build(reason));
        }
        inner.builds.push(tag.to_string());
        Ok(())
    }

    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.fail_start.take() {
            return Err(BackendError::Start(reason));
        }
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.starts.push(spec.clone());
        inner.ids.insert(spec.container_name.clone(), id.clone());
        Ok(id)
    }

    async fn stop(&self, id: &str) -> Result<(), BackendError> {
        self.lock().stops.push(id.to_string());
        Ok(())
    }

    async fn restart(&self, id: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if let Some(reason) = inner.fail_restart.take() {
            return Err(BackendError::NotFound(reason));
        }
        inner.restarts.push(id.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.lock().removes.push(id.to_string());
        Ok(())
    }

    async fn attach_logs(
        &self,
        id: &str,
        _include_history: bool,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<BackendError>), BackendError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (_err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);
        self.lock().log_txs.insert(id.to_string(), tx);
        Ok((rx, err_rx))
    }

    async fn events(
        &self,
        _filter_id: Option<&str>,
    ) -> Result<(mpsc::Receiver<ContainerEvent>, mpsc::Receiver<BackendError>), BackendError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (_err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);
        self.lock().event_txs.push(tx);
        Ok((rx, err_rx))
    }

    async fn stats(&self, id: &str) -> Result<mpsc::Receiver<StatsSample>, BackendError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.lock().stats_txs.insert(id.to_string(), tx);
        Ok(rx)
    }
}
