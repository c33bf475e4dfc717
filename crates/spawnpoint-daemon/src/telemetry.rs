//! Telemetry loops.
//!
//! Two concerns: a host-level heartbeat published every five seconds, and
//! per-service heartbeats derived from the backend's stats stream, emitted
//! at most once per period.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use spawnpoint_backend::StatsSample;
use spawnpoint_bus::{BusAdapter, PayloadObject};
use spawnpoint_core::{HostHeartbeat, ServiceHeartbeat};

use crate::ledger::{Reservation, ResourceLedger};
use crate::registry::ServiceRegistry;

/// Cadence of host heartbeats and floor between service heartbeats.
pub(crate) const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

const MIB: f64 = 1_048_576.0;

/// Nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Publish the host heartbeat (persisted) every period until cancelled.
pub(crate) async fn host_heartbeat_loop(
    bus: BusAdapter,
    alias: String,
    ledger: Arc<ResourceLedger>,
    token: CancellationToken,
) {
    let topic = bus.topics().heartbeat_signal();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(HEARTBEAT_PERIOD) => {
                let total = ledger.total();
                let available = ledger.available();
                let heartbeat = HostHeartbeat {
                    alias: alias.clone(),
                    time: now_ns(),
                    total_mem: total.mem_mib,
                    total_cpu_shares: total.cpu_shares,
                    available_mem: available.mem_mib,
                    available_cpu_shares: available.cpu_shares,
                };
                match PayloadObject::host_heartbeat(&heartbeat) {
                    Ok(payload) => {
                        if let Err(e) = bus.publish(&topic, payload, true).await {
                            warn!(error = %e, "failed to publish host heartbeat");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode host heartbeat"),
                }
            }
        }
    }
    debug!("host heartbeat loop stopped");
}

/// Identity and reservation of the service a stats task reports on.
pub(crate) struct ServiceStatsParams {
    pub spawnpoint_uri: String,
    pub name: String,
    pub reservation: Reservation,
}

/// Consume one container's stats stream and publish throttled heartbeats.
///
/// Exits when the stats channel closes, the service leaves the registry,
/// or the task is cancelled.
pub(crate) async fn service_heartbeat_loop(
    bus: BusAdapter,
    params: ServiceStatsParams,
    registry: Arc<ServiceRegistry>,
    mut stats_rx: mpsc::Receiver<StatsSample>,
    token: CancellationToken,
) {
    let iface = bus.register_service_interface(&params.name);
    let mut cpu = CpuTracker::default();
    let mut last_emit: Option<Instant> = None;

    loop {
        let sample = tokio::select! {
            _ = token.cancelled() => break,
            sample = stats_rx.recv() => match sample {
                Some(sample) => sample,
                None => break,
            },
        };
        if registry.get(&params.name).await.is_none() {
            break;
        }

        let cpu_percent = cpu.update(&sample);
        if last_emit.is_some_and(|at| at.elapsed() < HEARTBEAT_PERIOD) {
            continue;
        }
        last_emit = Some(Instant::now());

        let heartbeat = ServiceHeartbeat {
            spawnpoint_uri: params.spawnpoint_uri.clone(),
            name: params.name.clone(),
            time: now_ns(),
            mem_alloc: params.reservation.mem_mib,
            cpu_shares: params.reservation.cpu_shares,
            mem_usage_mib: sample.mem_usage_bytes as f64 / MIB,
            net_rx_mib: sample.net_rx_bytes as f64 / MIB,
            net_tx_mib: sample.net_tx_bytes as f64 / MIB,
            mb_read: blkio_bytes(&sample, "Read") as f64 / MIB,
            mb_written: blkio_bytes(&sample, "Write") as f64 / MIB,
            cpu_percent,
        };
        match PayloadObject::service_heartbeat(&heartbeat) {
            Ok(payload) => {
                if let Err(e) = iface.publish_heartbeat(payload).await {
                    warn!(service = %params.name, error = %e, "failed to publish service heartbeat");
                }
            }
            Err(e) => warn!(service = %params.name, error = %e, "failed to encode service heartbeat"),
        }
    }
    debug!(service = %params.name, "service heartbeat loop stopped");
}

fn blkio_bytes(sample: &StatsSample, op: &str) -> u64 {
    sample
        .blkio
        .iter()
        .filter(|entry| entry.op == op)
        .map(|entry| entry.bytes)
        .sum()
}

/// Computes CPU percentages from deltas between consecutive samples.
///
/// The percentage only updates when the system counter advanced;
/// otherwise the previous value is reused.
#[derive(Default)]
struct CpuTracker {
    prev: Option<(u64, u64)>,
    last_percent: f64,
}

impl CpuTracker {
    fn update(&mut self, sample: &StatsSample) -> f64 {
        if let Some((prev_cpu, prev_system)) = self.prev {
            let cpu_delta = sample.cpu_total_ns.saturating_sub(prev_cpu);
            let system_delta = sample.system_cpu_total_ns.saturating_sub(prev_system);
            if system_delta > 0 {
                self.last_percent =
                    cpu_delta as f64 / system_delta as f64 * sample.num_cpus as f64 * 100.0;
            }
        }
        self.prev = Some((sample.cpu_total_ns, sample.system_cpu_total_ns));
        self.last_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spawnpoint_backend::BlkioEntry;

    fn sample(cpu: u64, system: u64) -> StatsSample {
        StatsSample {
            cpu_total_ns: cpu,
            system_cpu_total_ns: system,
            num_cpus: 2,
            mem_usage_bytes: 64 * 1024 * 1024,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
            blkio: vec![
                BlkioEntry {
                    op: "Read".to_string(),
                    bytes: 1_048_576,
                },
                BlkioEntry {
                    op: "Read".to_string(),
                    bytes: 1_048_576,
                },
                BlkioEntry {
                    op: "Write".to_string(),
                    bytes: 3_145_728,
                },
            ],
        }
    }

    #[test]
    fn cpu_percent_from_deltas() {
        let mut tracker = CpuTracker::default();
        // First sample has no deltas yet.
        assert_eq!(tracker.update(&sample(0, 0)), 0.0);
        // 50% of one core out of two cores → 100 * (0.5/2) * 2 = 50%.
        let percent = tracker.update(&sample(500_000_000, 2_000_000_000));
        assert!((percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_system_delta_reuses_previous_value() {
        let mut tracker = CpuTracker::default();
        tracker.update(&sample(0, 0));
        let first = tracker.update(&sample(500_000_000, 2_000_000_000));
        // Same counters again: system delta is zero, value carries over.
        let second = tracker.update(&sample(500_000_000, 2_000_000_000));
        assert_eq!(first, second);
    }

    #[test]
    fn blkio_sums_by_operation() {
        let s = sample(0, 0);
        assert_eq!(blkio_bytes(&s, "Read"), 2 * 1_048_576);
        assert_eq!(blkio_bytes(&s, "Write"), 3 * 1_048_576);
        assert_eq!(blkio_bytes(&s, "Sync"), 0);
    }
}
