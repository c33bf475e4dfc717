//! The lifecycle supervisor — admission, deployment, restart, stop, and
//! death handling.
//!
//! Every admission-time failure is published as a log message on the
//! service's log topic and goes no further; the daemon stays healthy.
//! Registry and ledger mutations for one event share a critical section,
//! with the registry lock always taken before the ledger lock.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use spawnpoint_backend::{
    build_context, ContainerBackend, LaunchSpec, NetworkMode, ENTITY_KEY_FILE, WORKDIR,
};
use spawnpoint_bus::{BusAdapter, PayloadObject};
use spawnpoint_core::{LogMessage, ServiceConfiguration};

use crate::error::DaemonError;
use crate::ledger::{Reservation, ResourceLedger};
use crate::logs::LogPipeline;
use crate::registry::{RunningService, ServiceRegistry};
use crate::telemetry::{now_ns, service_heartbeat_loop, ServiceStatsParams};

/// Drives service state transitions from bus requests and backend events.
pub struct LifecycleSupervisor {
    alias: String,
    router: String,
    bus: BusAdapter,
    backend: Arc<dyn ContainerBackend>,
    ledger: Arc<ResourceLedger>,
    registry: Arc<ServiceRegistry>,
    token: CancellationToken,
}

impl LifecycleSupervisor {
    pub(crate) fn new(
        alias: String,
        router: String,
        bus: BusAdapter,
        backend: Arc<dyn ContainerBackend>,
        ledger: Arc<ResourceLedger>,
        registry: Arc<ServiceRegistry>,
        token: CancellationToken,
    ) -> Self {
        Self {
            alias,
            router,
            bus,
            backend,
            ledger,
            registry,
            token,
        }
    }

    // ── Config requests ─────────────────────────────────────────────

    pub(crate) async fn handle_config_payload(&self, payload: PayloadObject) {
        match payload.decode_config() {
            Ok(cfg) => self.handle_config(cfg).await,
            Err(e) => warn!(error = %e, "discarding unparseable configuration payload"),
        }
    }

    /// Admit and deploy a configuration, publishing any failure to the
    /// service's log topic.
    pub async fn handle_config(&self, cfg: ServiceConfiguration) {
        let name = cfg.name.clone();
        info!(service = %name, "received service configuration");
        if let Err(e) = self.deploy(cfg).await {
            error!(service = %name, error = %e, "deployment failed");
            self.publish_service_log(&name, &format!("[ERROR] Failed to deploy service: {e}"))
                .await;
        }
    }

    async fn deploy(&self, cfg: ServiceConfiguration) -> Result<(), DaemonError> {
        cfg.validate()?;
        let request = Reservation {
            mem_mib: cfg.mem_alloc_mib()?,
            cpu_shares: cfg.cpu_shares,
        };
        let context = build_context(&cfg)?;

        // Admission: capture any service being replaced and reserve the
        // net delta in one critical section, registry lock before ledger.
        // The old record is removed before its container is stopped so the
        // death handler cannot find it and release the re-reserved amount.
        let replaced = {
            let mut services = self.registry.guard().await;
            let replacing = services.get(&cfg.name).map(|svc| svc.reservation);
            self.ledger.reserve(request, replacing)?;
            let replaced = services.remove(&cfg.name);
            if let Some(old) = &replaced {
                old.token.cancel();
            }
            replaced
        };
        if let Some(old) = &replaced {
            info!(service = %cfg.name, container = %old.container_id, "stopping replaced service instance");
            if let Err(e) = self.backend.stop(&old.container_id).await {
                warn!(service = %cfg.name, error = %e, "failed to stop replaced container");
            }
        }

        if let Err(e) = self.backend.build(&context.image_tag, context.tar_bytes).await {
            self.ledger.release(request);
            return Err(DaemonError::BuildFailed(e.to_string()));
        }

        let spec = self.launch_spec(&cfg, &context.image_tag, request);
        let container_id = match self.backend.create_and_start(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.ledger.release(request);
                return Err(DaemonError::StartFailed(e.to_string()));
            }
        };

        let svc = RunningService {
            name: cfg.name.clone(),
            container_id,
            reservation: request,
            auto_restart: cfg.auto_restart,
            config: cfg,
            token: self.token.child_token(),
        };
        info!(service = %svc.name, container = %svc.container_id, "service container started");
        self.registry.insert(svc.clone()).await;
        self.spawn_service_tasks(&svc, false).await;
        self.publish_service_log(&svc.name, "[SUCCESS] Service container started")
            .await;
        Ok(())
    }

    fn launch_spec(
        &self,
        cfg: &ServiceConfiguration,
        image_tag: &str,
        reservation: Reservation,
    ) -> LaunchSpec {
        LaunchSpec {
            image: image_tag.to_string(),
            command: cfg.run.clone(),
            workdir: WORKDIR.to_string(),
            env: vec![
                (
                    "BW2_DEFAULT_ENTITY".to_string(),
                    format!("{WORKDIR}/{ENTITY_KEY_FILE}"),
                ),
                ("BW2_AGENT".to_string(), self.router.clone()),
            ],
            network: if cfg.use_host_net {
                NetworkMode::Host
            } else {
                NetworkMode::Bridge
            },
            container_name: format!("{}_{}", self.alias, cfg.name),
            memory_limit_mib: reservation.mem_mib,
            cpu_shares: reservation.cpu_shares,
        }
    }

    // ── Restart requests ────────────────────────────────────────────

    /// Restart one named service, or respawn every service when the name
    /// is empty.
    pub async fn handle_restart(&self, name: &str) {
        if name.is_empty() {
            self.respawn_all().await;
            return;
        }
        let Some(svc) = self.registry.get(name).await else {
            self.publish_service_log(name, "[ERROR] Attempted to restart unknown service")
                .await;
            return;
        };
        match self.backend.restart(&svc.container_id).await {
            Ok(()) => {
                info!(service = %name, "service restarted");
                self.spawn_stats_task(&svc).await;
                self.publish_service_log(name, "[INFO] Service restarted").await;
            }
            Err(e) => {
                error!(service = %name, error = %e, "restart failed");
                self.publish_service_log(name, &format!("[ERROR] Failed to restart service: {e}"))
                    .await;
            }
        }
    }

    /// Restart every registered service. A failure on one does not stop
    /// the sweep.
    async fn respawn_all(&self) {
        let services = self.registry.snapshot().await;
        info!(count = services.len(), "respawning all services");
        for svc in services {
            match self.backend.restart(&svc.container_id).await {
                Ok(()) => self.spawn_service_tasks(&svc, true).await,
                Err(e) => {
                    error!(service = %svc.name, error = %e, "respawn failed");
                    self.publish_service_log(
                        &svc.name,
                        &format!("[ERROR] Failed to respawn service: {e}"),
                    )
                    .await;
                }
            }
        }
    }

    // ── Stop requests ───────────────────────────────────────────────

    /// Stop a named service. The reservation is released by the death
    /// handler once the container's exit is observed.
    pub async fn handle_stop(&self, name: &str) {
        if !self.registry.set_auto_restart(name, false).await {
            self.publish_service_log(name, "[ERROR] Attempted to stop unknown service")
                .await;
            return;
        }
        let Some(svc) = self.registry.get(name).await else {
            return;
        };
        info!(service = %name, container = %svc.container_id, "stopping service");
        if let Err(e) = self.backend.stop(&svc.container_id).await {
            error!(service = %name, error = %e, "stop failed");
            self.publish_service_log(name, &format!("[ERROR] Failed to stop service: {e}"))
                .await;
        }
    }

    // ── Death events ────────────────────────────────────────────────

    /// React to an observed container death: restart when the service
    /// wants it, otherwise remove the record and release its reservation.
    pub async fn handle_die(&self, container_id: &str) {
        let svc = {
            let mut services = self.registry.guard().await;
            let Some(svc) = services
                .values()
                .find(|svc| svc.container_id == container_id)
                .cloned()
            else {
                // Already replaced or stopped out of band; nothing to release.
                return;
            };
            if !svc.auto_restart {
                services.remove(&svc.name);
                svc.token.cancel();
                self.ledger.release(svc.reservation);
            }
            svc
        };

        if !svc.auto_restart {
            info!(service = %svc.name, container = %container_id, "service exited");
            self.publish_service_log(&svc.name, "[INFO] Service container has stopped")
                .await;
            return;
        }

        info!(service = %svc.name, container = %container_id, "service died, restarting");
        match self.backend.restart(container_id).await {
            Ok(()) => {
                self.spawn_stats_task(&svc).await;
                self.publish_service_log(&svc.name, "[INFO] Service died and was restarted")
                    .await;
            }
            Err(e) => {
                {
                    let mut services = self.registry.guard().await;
                    if services.remove(&svc.name).is_some() {
                        svc.token.cancel();
                        self.ledger.release(svc.reservation);
                    }
                }
                error!(service = %svc.name, error = %e, "failed to restart dead service");
                self.publish_service_log(
                    &svc.name,
                    &format!("[ERROR] Service died and could not be restarted: {e}"),
                )
                .await;
            }
        }
    }

    // ── Per-service background tasks ────────────────────────────────

    /// Attach a log pipeline and a stats heartbeat task to a service.
    async fn spawn_service_tasks(&self, svc: &RunningService, include_history: bool) {
        match self
            .backend
            .attach_logs(&svc.container_id, include_history)
            .await
        {
            Ok((log_rx, err_rx)) => {
                let pipeline = LogPipeline::new(
                    self.bus.clone(),
                    self.alias.clone(),
                    svc.name.clone(),
                    svc.token.child_token(),
                );
                tokio::spawn(pipeline.run(log_rx, err_rx));
            }
            Err(e) => {
                error!(service = %svc.name, error = %e, "failed to attach to container logs");
            }
        }
        self.spawn_stats_task(svc).await;
    }

    async fn spawn_stats_task(&self, svc: &RunningService) {
        match self.backend.stats(&svc.container_id).await {
            Ok(stats_rx) => {
                let params = ServiceStatsParams {
                    spawnpoint_uri: self.bus.topics().base().to_string(),
                    name: svc.name.clone(),
                    reservation: svc.reservation,
                };
                tokio::spawn(service_heartbeat_loop(
                    self.bus.clone(),
                    params,
                    self.registry.clone(),
                    stats_rx,
                    svc.token.child_token(),
                ));
            }
            Err(e) => {
                error!(service = %svc.name, error = %e, "failed to open container stats stream");
            }
        }
    }

    /// Publish a human-readable message on the service's log signal.
    pub(crate) async fn publish_service_log(&self, service: &str, contents: &str) {
        let message = LogMessage {
            timestamp: now_ns(),
            host_alias: self.alias.clone(),
            service_name: service.to_string(),
            contents: contents.to_string(),
        };
        let payload = match PayloadObject::log(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!(service = %service, error = %e, "failed to serialize log message");
                return;
            }
        };
        let iface = self.bus.register_service_interface(service);
        if let Err(e) = iface.publish_log(payload).await {
            error!(service = %service, error = %e, "failed to publish log message");
        }
    }
}
