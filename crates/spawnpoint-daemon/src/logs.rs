//! The per-service log pipeline.
//!
//! Attaches to a container's log stream and republishes lines on the
//! service's log signal, but only while a remote consumer has recently
//! signalled interest on the keep-alive slot. Lines that arrive while the
//! window is expired are discarded, not buffered.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use spawnpoint_backend::BackendError;
use spawnpoint_bus::{BusAdapter, PayloadObject};
use spawnpoint_core::LogMessage;

use crate::telemetry::now_ns;

/// How long a keep-alive message keeps the pipeline publishing.
pub(crate) const KEEP_ALIVE_WINDOW: Duration = Duration::from_secs(60);

/// Streams one container's output to the bus, gated by keep-alives.
pub(crate) struct LogPipeline {
    bus: BusAdapter,
    alias: String,
    service: String,
    token: CancellationToken,
}

impl LogPipeline {
    pub fn new(
        bus: BusAdapter,
        alias: String,
        service: String,
        token: CancellationToken,
    ) -> Self {
        Self {
            bus,
            alias,
            service,
            token,
        }
    }

    /// Run until the log stream closes or the task is cancelled.
    ///
    /// An empty line is the upstream-closed sentinel; any error flushed on
    /// the side channel after close is logged locally.
    pub async fn run(
        self,
        mut log_rx: mpsc::Receiver<String>,
        mut err_rx: mpsc::Receiver<BackendError>,
    ) {
        let iface = self.bus.register_service_interface(&self.service);
        let subscription = match iface.subscribe_keep_alive().await {
            Ok((id, rx)) => Some((id, rx)),
            Err(e) => {
                error!(service = %self.service, error = %e, "failed to subscribe to log keep-alive slot");
                None
            }
        };
        let (sub_id, mut keep_alive_rx) = match subscription {
            Some((id, rx)) => (Some(id), rx),
            // Without the slot the pipeline still drains the stream; the
            // initial window simply runs out unrefreshed.
            None => (None, mpsc::channel(1).1),
        };

        let mut alive = true;
        let expiry = sleep(KEEP_ALIVE_WINDOW);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!(service = %self.service, "log pipeline cancelled");
                    break;
                }
                _ = &mut expiry, if alive => {
                    debug!(service = %self.service, "log keep-alive window expired");
                    alive = false;
                }
                Some(_) = keep_alive_rx.recv() => {
                    debug!(service = %self.service, "received log keep-alive message");
                    alive = true;
                    expiry.as_mut().reset(Instant::now() + KEEP_ALIVE_WINDOW);
                }
                line = log_rx.recv() => {
                    match line {
                        None => {
                            self.flush_stream_error(&mut err_rx);
                            break;
                        }
                        Some(line) if line.is_empty() => {
                            // Upstream-closed sentinel.
                            self.flush_stream_error(&mut err_rx);
                            break;
                        }
                        Some(line) => {
                            if alive {
                                self.publish_line(&iface, line).await;
                            } else {
                                debug!(service = %self.service, "log line available, but no active recipients");
                            }
                        }
                    }
                }
            }
        }

        if let Some(id) = sub_id {
            if let Err(e) = iface.unsubscribe(id).await {
                error!(service = %self.service, error = %e, "failed to unsubscribe from log keep-alive slot");
            } else {
                debug!(service = %self.service, "unsubscribed from log keep-alive slot");
            }
        }
        debug!(service = %self.service, "log pipeline stopped");
    }

    fn flush_stream_error(&self, err_rx: &mut mpsc::Receiver<BackendError>) {
        if let Ok(e) = err_rx.try_recv() {
            error!(service = %self.service, error = %e, "error occurred while tailing logs");
        }
    }

    async fn publish_line(&self, iface: &spawnpoint_bus::ServiceInterface, line: String) {
        let message = LogMessage {
            timestamp: now_ns(),
            host_alias: self.alias.clone(),
            service_name: self.service.clone(),
            contents: line,
        };
        match PayloadObject::log(&message) {
            Ok(payload) => {
                if let Err(e) = iface.publish_log(payload).await {
                    error!(service = %self.service, error = %e, "failed to publish log message");
                }
            }
            Err(e) => error!(service = %self.service, error = %e, "failed to serialize log message"),
        }
    }
}
