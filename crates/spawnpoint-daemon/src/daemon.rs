//! Daemon wiring.
//!
//! One `Daemon` value owns the ledger, registry, bus adapter, backend, and
//! the root cancellation token; every task receives handles to this state.
//! No process-wide statics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use spawnpoint_backend::ContainerBackend;
use spawnpoint_bus::{BusAdapter, BusMessage, PayloadObject};
use spawnpoint_core::HostHeartbeat;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::ledger::ResourceLedger;
use crate::registry::ServiceRegistry;
use crate::supervisor::LifecycleSupervisor;
use crate::telemetry;

/// Pause before reopening the backend event stream after it drops.
const EVENT_STREAM_RETRY: Duration = Duration::from_secs(2);

/// The per-host scheduler daemon.
pub struct Daemon {
    config: DaemonConfig,
    ledger: Arc<ResourceLedger>,
    registry: Arc<ServiceRegistry>,
    bus: BusAdapter,
    backend: Arc<dyn ContainerBackend>,
    supervisor: Arc<LifecycleSupervisor>,
    token: CancellationToken,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        bus: BusAdapter,
        backend: Arc<dyn ContainerBackend>,
    ) -> Result<Self, DaemonError> {
        let totals = config.total_resources()?;
        let ledger = Arc::new(ResourceLedger::new(totals));
        let registry = Arc::new(ServiceRegistry::new());
        let token = CancellationToken::new();
        let supervisor = Arc::new(LifecycleSupervisor::new(
            config.alias.clone(),
            config.bw2_agent.clone(),
            bus.clone(),
            backend.clone(),
            ledger.clone(),
            registry.clone(),
            token.clone(),
        ));
        Ok(Self {
            config,
            ledger,
            registry,
            bus,
            backend,
            supervisor,
            token,
        })
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<LifecycleSupervisor> {
        &self.supervisor
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request shutdown; `run` returns once every task has exited.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Run the daemon until cancelled.
    ///
    /// A backend that cannot be probed at startup is fatal; once running,
    /// backend hiccups only restart the affected stream.
    pub async fn run(&self) -> Result<(), DaemonError> {
        self.backend
            .probe()
            .await
            .map_err(|e| DaemonError::BackendUnavailable(e.to_string()))?;

        let totals = self.ledger.total();
        info!(
            alias = %self.config.alias,
            total_mem_mib = totals.mem_mib,
            total_cpu_shares = totals.cpu_shares,
            "spawnpoint daemon starting"
        );

        let topics = self.bus.topics().clone();
        let (_, config_rx) = self.subscribe(&topics.config_slot()).await?;
        let (_, restart_rx) = self.subscribe(&topics.restart_slot()).await?;
        let (_, stop_rx) = self.subscribe(&topics.stop_slot()).await?;

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        tasks.push(tokio::spawn(consume_configs(
            self.supervisor.clone(),
            config_rx,
            self.token.clone(),
        )));
        tasks.push(tokio::spawn(consume_names(
            self.supervisor.clone(),
            restart_rx,
            NameRequest::Restart,
            self.token.clone(),
        )));
        tasks.push(tokio::spawn(consume_names(
            self.supervisor.clone(),
            stop_rx,
            NameRequest::Stop,
            self.token.clone(),
        )));
        tasks.push(tokio::spawn(consume_events(
            self.supervisor.clone(),
            self.backend.clone(),
            self.token.clone(),
        )));
        tasks.push(tokio::spawn(telemetry::host_heartbeat_loop(
            self.bus.clone(),
            self.config.alias.clone(),
            self.ledger.clone(),
            self.token.clone(),
        )));

        self.token.cancelled().await;
        info!("spawnpoint daemon shutting down");
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    /// Clear this host's retained heartbeat by publishing a zeroed one.
    pub async fn decommission(&self) -> Result<(), DaemonError> {
        let heartbeat = HostHeartbeat {
            alias: self.config.alias.clone(),
            time: telemetry::now_ns(),
            total_mem: 0,
            total_cpu_shares: 0,
            available_mem: 0,
            available_cpu_shares: 0,
        };
        let payload = PayloadObject::host_heartbeat(&heartbeat)
            .map_err(|e| DaemonError::Internal(e.to_string()))?;
        let topic = self.bus.topics().heartbeat_signal();
        self.bus.publish(&topic, payload, true).await?;
        info!(alias = %self.config.alias, "daemon decommissioned");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(spawnpoint_bus::SubscriptionId, mpsc::Receiver<BusMessage>), DaemonError> {
        self.bus
            .subscribe(topic)
            .await
            .map_err(|e| DaemonError::Internal(format!("failed to subscribe to {topic}: {e}")))
    }
}

async fn consume_configs(
    supervisor: Arc<LifecycleSupervisor>,
    mut rx: mpsc::Receiver<BusMessage>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => supervisor.handle_config_payload(msg.payload).await,
                None => break,
            },
        }
    }
    debug!("config consumer stopped");
}

#[derive(Clone, Copy)]
enum NameRequest {
    Restart,
    Stop,
}

async fn consume_names(
    supervisor: Arc<LifecycleSupervisor>,
    mut rx: mpsc::Receiver<BusMessage>,
    kind: NameRequest,
    token: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let name = match msg.payload.decode_text() {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "discarding unparseable service name payload");
                continue;
            }
        };
        match kind {
            NameRequest::Restart => supervisor.handle_restart(name.trim()).await,
            NameRequest::Stop => supervisor.handle_stop(name.trim()).await,
        }
    }
    debug!("name request consumer stopped");
}

/// Consume the backend's event stream, reopening it when it drops.
async fn consume_events(
    supervisor: Arc<LifecycleSupervisor>,
    backend: Arc<dyn ContainerBackend>,
    token: CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            break;
        }
        match backend.events(None).await {
            Ok((mut events, mut errors)) => loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    event = events.recv() => match event {
                        Some(event) => supervisor.handle_die(&event.container_id).await,
                        None => {
                            if let Ok(e) = errors.try_recv() {
                                warn!(error = %e, "backend event stream failed");
                            }
                            break;
                        }
                    },
                }
            },
            Err(e) => warn!(error = %e, "failed to open backend event stream"),
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(EVENT_STREAM_RETRY) => {}
        }
    }
    debug!("event consumer stopped");
}
