//! End-to-end lifecycle scenarios against the mock backend and the
//! in-memory bus transport: admission, auto-restart, replacement,
//! rejection, respawn, stop, and log keep-alive gating.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::time::{sleep, timeout};

use spawnpoint_backend::{BlkioEntry, MockBackend, StatsSample};
use spawnpoint_bus::{BusAdapter, MemoryTransport, PayloadObject};
use spawnpoint_core::{ServiceConfiguration, TopicSpace};
use spawnpoint_daemon::{Daemon, DaemonConfig, Reservation, RunningService};

const BASE: &str = "test/spawnpoint/alpha";

struct Harness {
    daemon: Arc<Daemon>,
    backend: MockBackend,
    bus: BusAdapter,
}

async fn start_daemon(total_mem_mib: u64, total_cpu_shares: u64) -> Harness {
    let backend = MockBackend::new();
    let bus = BusAdapter::new(Arc::new(MemoryTransport::new()), TopicSpace::new(BASE));
    let config = DaemonConfig {
        alias: "alpha".to_string(),
        path: BASE.to_string(),
        bw2_agent: "127.0.0.1:28589".to_string(),
        mem_alloc: format!("{total_mem_mib}M"),
        cpu_shares: total_cpu_shares,
    };
    let daemon = Arc::new(Daemon::new(config, bus.clone(), Arc::new(backend.clone())).unwrap());

    let runner = daemon.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    // Let the consumer subscriptions land before tests publish.
    sleep(Duration::from_millis(50)).await;

    Harness {
        daemon,
        backend,
        bus,
    }
}

fn service_config(
    name: &str,
    mem_mib: u64,
    cpu_shares: u64,
    auto_restart: bool,
) -> ServiceConfiguration {
    ServiceConfiguration {
        name: name.to_string(),
        bw2_entity: BASE64.encode(b"entity-bytes"),
        mem_alloc: format!("{mem_mib}M"),
        cpu_shares,
        auto_restart,
        run: vec!["./run.sh".to_string()],
        ..Default::default()
    }
}

fn stats_sample() -> StatsSample {
    StatsSample {
        cpu_total_ns: 1_000_000_000,
        system_cpu_total_ns: 4_000_000_000,
        num_cpus: 4,
        mem_usage_bytes: 64 * 1024 * 1024,
        net_rx_bytes: 2 * 1024 * 1024,
        net_tx_bytes: 1024 * 1024,
        blkio: vec![
            BlkioEntry {
                op: "Read".to_string(),
                bytes: 1024 * 1024,
            },
            BlkioEntry {
                op: "Write".to_string(),
                bytes: 3 * 1024 * 1024,
            },
        ],
    }
}

fn res(mem_mib: u64, cpu_shares: u64) -> Reservation {
    Reservation {
        mem_mib,
        cpu_shares,
    }
}

async fn submit(h: &Harness, cfg: &ServiceConfiguration) {
    h.bus
        .publish(
            &h.bus.topics().config_slot(),
            PayloadObject::config(cfg).unwrap(),
            false,
        )
        .await
        .unwrap();
}

async fn wait_for<T>(mut poll: impl FnMut() -> Option<T>, what: &str) -> T {
    for _ in 0..400 {
        if let Some(value) = poll() {
            return value;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_registered(h: &Harness, name: &str) -> RunningService {
    for _ in 0..400 {
        if let Some(svc) = h.daemon.registry().get(name).await {
            return svc;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("service {name} never appeared in the registry");
}

async fn wait_for_removed(h: &Harness, name: &str) {
    for _ in 0..400 {
        if h.daemon.registry().get(name).await.is_none() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("service {name} never left the registry");
}

#[tokio::test]
async fn admit_run_die_auto_restart() {
    let h = start_daemon(1024, 2048).await;
    submit(&h, &service_config("a", 256, 512, true)).await;
    let svc = wait_for_registered(&h, "a").await;

    assert_eq!(h.daemon.ledger().available(), res(768, 1536));
    assert_eq!(h.backend.build_tags(), vec!["spawnpoint_a"]);

    let spec = h.backend.start_specs().remove(0);
    assert_eq!(spec.image, "spawnpoint_a");
    assert_eq!(spec.container_name, "alpha_a");
    assert_eq!(spec.workdir, "/srv/spawnpoint");
    assert_eq!(spec.memory_limit_mib, 256);
    assert_eq!(spec.cpu_shares, 512);
    assert!(spec.env.contains(&(
        "BW2_DEFAULT_ENTITY".to_string(),
        "/srv/spawnpoint/entity.key".to_string()
    )));
    assert!(spec
        .env
        .contains(&("BW2_AGENT".to_string(), "127.0.0.1:28589".to_string())));

    // A stats sample produces a service heartbeat.
    let (_sub, mut hb_rx) = h
        .bus
        .subscribe(&h.bus.topics().service_heartbeat_signal("a"))
        .await
        .unwrap();
    wait_for(
        || h.backend.has_stats_stream(&svc.container_id).then_some(()),
        "stats stream attachment",
    )
    .await;
    h.backend.emit_stats(&svc.container_id, stats_sample()).await;
    let msg = timeout(Duration::from_secs(2), hb_rx.recv())
        .await
        .expect("no service heartbeat")
        .unwrap();
    let heartbeat = msg.payload.decode_service_heartbeat().unwrap();
    assert_eq!(heartbeat.name, "a");
    assert_eq!(heartbeat.mem_alloc, 256);
    assert_eq!(heartbeat.cpu_shares, 512);
    assert!((heartbeat.mem_usage_mib - 64.0).abs() < f64::EPSILON);

    // Death with auto_restart set restarts the container in place.
    h.backend.emit_die(&svc.container_id).await;
    wait_for(
        || {
            h.backend
                .restart_calls()
                .contains(&svc.container_id)
                .then_some(())
        },
        "auto-restart of a",
    )
    .await;

    assert!(h.daemon.registry().get("a").await.is_some());
    assert_eq!(h.daemon.ledger().available(), res(768, 1536));
}

#[tokio::test]
async fn same_size_redeploy_succeeds_at_zero_headroom() {
    let h = start_daemon(256, 512).await;
    submit(&h, &service_config("a", 256, 512, false)).await;
    let first = wait_for_registered(&h, "a").await;
    assert_eq!(h.daemon.ledger().available(), res(0, 0));

    submit(&h, &service_config("a", 256, 512, false)).await;
    wait_for(
        || (h.backend.start_specs().len() == 2).then_some(()),
        "replacement container start",
    )
    .await;

    let mut replacement = None;
    for _ in 0..400 {
        match h.daemon.registry().get("a").await {
            Some(svc) if svc.container_id != first.container_id => {
                replacement = Some(svc);
                break;
            }
            _ => sleep(Duration::from_millis(5)).await,
        }
    }
    let replacement = replacement.expect("replacement never registered");
    assert_ne!(replacement.container_id, first.container_id);
    assert!(h.backend.stop_calls().contains(&first.container_id));
    assert_eq!(h.daemon.ledger().available(), res(0, 0));

    // The old container's death releases nothing; its record is gone.
    h.backend.emit_die(&first.container_id).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.daemon.ledger().available(), res(0, 0));
    assert!(h.daemon.registry().get("a").await.is_some());
}

#[tokio::test]
async fn oversize_request_is_rejected_with_log() {
    let h = start_daemon(1024, 2048).await;
    let (_sub, mut log_rx) = h
        .bus
        .subscribe(&h.bus.topics().service_log_signal("b"))
        .await
        .unwrap();

    submit(&h, &service_config("b", 2048, 512, false)).await;

    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("no rejection log message")
        .unwrap();
    let log = msg.payload.decode_log().unwrap();
    assert!(
        log.contents.contains("insufficient memory"),
        "unexpected log: {}",
        log.contents
    );

    assert!(h.daemon.registry().get("b").await.is_none());
    assert_eq!(h.daemon.ledger().available(), res(1024, 2048));
    assert!(h.backend.start_specs().is_empty());
}

#[tokio::test]
async fn respawn_all_restarts_every_service() {
    let h = start_daemon(4096, 8192).await;
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        submit(&h, &service_config(name, 256, 512, false)).await;
        ids.push(wait_for_registered(&h, name).await.container_id);
    }

    h.bus
        .publish(
            &h.bus.topics().restart_slot(),
            PayloadObject::text(""),
            false,
        )
        .await
        .unwrap();

    wait_for(
        || (h.backend.restart_calls().len() == 3).then_some(()),
        "respawn of all services",
    )
    .await;
    let mut restarted = h.backend.restart_calls();
    restarted.sort();
    ids.sort();
    assert_eq!(restarted, ids);
}

#[tokio::test]
async fn respawn_all_survives_individual_failures() {
    let h = start_daemon(4096, 8192).await;
    for name in ["a", "b"] {
        submit(&h, &service_config(name, 256, 512, false)).await;
        wait_for_registered(&h, name).await;
    }

    h.backend.fail_next_restart("gone");
    h.bus
        .publish(
            &h.bus.topics().restart_slot(),
            PayloadObject::text(""),
            false,
        )
        .await
        .unwrap();

    // One restart fails, the other still happens.
    wait_for(
        || (h.backend.restart_calls().len() == 1).then_some(()),
        "surviving respawn",
    )
    .await;
}

#[tokio::test]
async fn stop_releases_exactly_once() {
    let h = start_daemon(1024, 2048).await;
    submit(&h, &service_config("a", 256, 512, true)).await;
    let svc = wait_for_registered(&h, "a").await;

    h.bus
        .publish(&h.bus.topics().stop_slot(), PayloadObject::text("a"), false)
        .await
        .unwrap();
    wait_for(
        || {
            h.backend
                .stop_calls()
                .contains(&svc.container_id)
                .then_some(())
        },
        "backend stop call",
    )
    .await;

    // The record survives until the death event is observed.
    assert!(h.daemon.registry().get("a").await.is_some());
    assert_eq!(h.daemon.ledger().available(), res(768, 1536));

    h.backend.emit_die(&svc.container_id).await;
    wait_for_removed(&h, "a").await;
    assert_eq!(h.daemon.ledger().available(), res(1024, 2048));
    // Stop cleared auto_restart, so the death did not trigger a restart.
    assert!(h.backend.restart_calls().is_empty());

    // A duplicate death event must not double-release.
    h.backend.emit_die(&svc.container_id).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.daemon.ledger().available(), res(1024, 2048));
}

#[tokio::test]
async fn failed_restart_after_death_releases_reservation() {
    let h = start_daemon(1024, 2048).await;
    submit(&h, &service_config("a", 256, 512, true)).await;
    let svc = wait_for_registered(&h, "a").await;

    h.backend.fail_next_restart("no such container");
    h.backend.emit_die(&svc.container_id).await;

    wait_for_removed(&h, "a").await;
    assert_eq!(h.daemon.ledger().available(), res(1024, 2048));
}

#[tokio::test]
async fn build_failure_releases_reservation_and_publishes() {
    let h = start_daemon(1024, 2048).await;
    let (_sub, mut log_rx) = h
        .bus
        .subscribe(&h.bus.topics().service_log_signal("a"))
        .await
        .unwrap();

    h.backend.fail_next_build("syntax error in dockerfile");
    submit(&h, &service_config("a", 256, 512, false)).await;

    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("no failure log message")
        .unwrap();
    let log = msg.payload.decode_log().unwrap();
    assert!(log.contents.contains("image build failed"));
    assert_eq!(h.daemon.ledger().available(), res(1024, 2048));
    assert!(h.daemon.registry().get("a").await.is_none());
}

#[tokio::test]
async fn concurrent_admission_is_atomic() {
    let h = start_daemon(1024, 2048).await;
    let supervisor = h.daemon.supervisor().clone();

    // Two configurations each requesting just over half the host.
    let a = service_config("a", 513, 512, false);
    let b = service_config("b", 513, 512, false);
    tokio::join!(supervisor.handle_config(a), supervisor.handle_config(b));

    let admitted = [
        h.daemon.registry().get("a").await,
        h.daemon.registry().get("b").await,
    ]
    .iter()
    .flatten()
    .count();
    assert_eq!(admitted, 1);
    assert_eq!(h.daemon.ledger().available().mem_mib, 1024 - 513);
}

#[tokio::test]
async fn ledger_balances_after_mixed_operations() {
    let h = start_daemon(2048, 4096).await;
    submit(&h, &service_config("a", 256, 512, true)).await;
    submit(&h, &service_config("b", 512, 1024, false)).await;
    let a = wait_for_registered(&h, "a").await;
    wait_for_registered(&h, "b").await;

    // Stop a and observe its death; replace b with a larger footprint.
    h.bus
        .publish(&h.bus.topics().stop_slot(), PayloadObject::text("a"), false)
        .await
        .unwrap();
    wait_for(
        || h.backend.stop_calls().contains(&a.container_id).then_some(()),
        "stop of a",
    )
    .await;
    h.backend.emit_die(&a.container_id).await;
    wait_for_removed(&h, "a").await;

    submit(&h, &service_config("b", 1024, 2048, false)).await;
    wait_for(
        || (h.backend.start_specs().len() == 3).then_some(()),
        "replacement of b",
    )
    .await;

    let total = h.daemon.ledger().total();
    let available = h.daemon.ledger().available();
    let reserved: (u64, u64) = {
        let mut mem = 0;
        let mut cpu = 0;
        for svc in h.daemon.registry().snapshot().await {
            mem += svc.reservation.mem_mib;
            cpu += svc.reservation.cpu_shares;
        }
        (mem, cpu)
    };
    assert_eq!(available.mem_mib + reserved.0, total.mem_mib);
    assert_eq!(available.cpu_shares + reserved.1, total.cpu_shares);
}

#[tokio::test(start_paused = true)]
async fn log_keep_alive_gates_publishing() {
    let h = start_daemon(1024, 2048).await;
    let (_sub, mut log_rx) = h
        .bus
        .subscribe(&h.bus.topics().service_log_signal("a"))
        .await
        .unwrap();

    submit(&h, &service_config("a", 256, 512, false)).await;
    let svc = wait_for_registered(&h, "a").await;

    // Drain the admission success message.
    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("no admission log")
        .unwrap();
    assert!(msg.payload.decode_log().unwrap().contents.contains("SUCCESS"));

    // Initially alive: lines flow.
    h.backend.emit_log(&svc.container_id, "first line").await;
    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("first line not published")
        .unwrap();
    assert_eq!(msg.payload.decode_log().unwrap().contents, "first line");

    // Past the keep-alive window, lines are dropped.
    tokio::time::sleep(Duration::from_secs(61)).await;
    h.backend.emit_log(&svc.container_id, "dropped line").await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // A keep-alive message revives publishing.
    h.bus
        .publish(
            &h.bus.topics().keep_log_alive_slot("a"),
            PayloadObject::text("ping"),
            false,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.backend.emit_log(&svc.container_id, "revived line").await;

    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("revived line not published")
        .unwrap();
    // The dropped line was never published; the next message is the
    // revived one.
    assert_eq!(msg.payload.decode_log().unwrap().contents, "revived line");
}

#[tokio::test]
async fn unknown_restart_target_publishes_log_only() {
    let h = start_daemon(1024, 2048).await;
    let (_sub, mut log_rx) = h
        .bus
        .subscribe(&h.bus.topics().service_log_signal("ghost"))
        .await
        .unwrap();

    h.bus
        .publish(
            &h.bus.topics().restart_slot(),
            PayloadObject::text("ghost"),
            false,
        )
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(2), log_rx.recv())
        .await
        .expect("no unknown-service log")
        .unwrap();
    assert!(msg
        .payload
        .decode_log()
        .unwrap()
        .contents
        .contains("unknown service"));
    assert!(h.backend.restart_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn host_heartbeat_reflects_ledger() {
    let h = start_daemon(1024, 2048).await;
    submit(&h, &service_config("a", 256, 512, false)).await;
    wait_for_registered(&h, "a").await;

    let (_sub, mut hb_rx) = h
        .bus
        .subscribe(&h.bus.topics().heartbeat_signal())
        .await
        .unwrap();
    let msg = timeout(Duration::from_secs(10), hb_rx.recv())
        .await
        .expect("no host heartbeat")
        .unwrap();
    let heartbeat = msg.payload.decode_host_heartbeat().unwrap();
    assert_eq!(heartbeat.alias, "alpha");
    assert_eq!(heartbeat.total_mem, 1024);
    assert_eq!(heartbeat.total_cpu_shares, 2048);
    assert_eq!(heartbeat.available_mem, 768);
    assert_eq!(heartbeat.available_cpu_shares, 1536);
}
