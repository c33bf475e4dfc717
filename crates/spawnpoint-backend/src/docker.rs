//! Docker adapter.
//!
//! Drives the local `docker` binary through `tokio::process`. Build
//! contexts are streamed over stdin; log, event, and stats streams are the
//! CLI's line output parsed into the channel contracts of
//! [`ContainerBackend`].

use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::backend::{
    BlkioEntry, ContainerBackend, ContainerEvent, EventAction, LaunchSpec, StatsSample,
    ERROR_BUFFER, STREAM_BUFFER,
};
use crate::context::DOCKERFILE_NAME;
use crate::error::BackendError;

/// The `docker stats` stream ticks roughly once a second; synthesized
/// system-cpu counters advance by this much per sample.
const STATS_TICK_NS: u64 = 1_000_000_000;

/// `ContainerBackend` implementation over the Docker CLI.
pub struct DockerCli {
    bin: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            bin: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_simple(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("No such container") {
                Err(BackendError::NotFound(stderr))
            } else {
                Err(BackendError::Stream(stderr))
            }
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerCli {
    async fn probe(&self) -> Result<(), BackendError> {
        let output = self
            .command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if output.status.success() {
            debug!(
                version = %String::from_utf8_lossy(&output.stdout).trim(),
                "docker daemon reachable"
            );
            Ok(())
        } else {
            Err(BackendError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn build(&self, tag: &str, context_tar: Vec<u8>) -> Result<(), BackendError> {
        let mut child = self
            .command()
            .args([
                "build",
                "-t",
                tag,
                "--no-cache",
                "--force-rm",
                "-f",
                DOCKERFILE_NAME,
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BackendError::Build("failed to open stdin for docker build".to_string())
        })?;
        stdin.write_all(&context_tar).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(BackendError::Build(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.container_name.clone(),
            "--network".to_string(),
            spec.network.as_str().to_string(),
            "-w".to_string(),
            spec.workdir.clone(),
            "-m".to_string(),
            format!("{}m", spec.memory_limit_mib),
            "--cpu-shares".to_string(),
            spec.cpu_shares.to_string(),
        ];
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let output = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(BackendError::Start(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn stop(&self, id: &str) -> Result<(), BackendError> {
        self.run_simple(&["stop", id]).await.map(|_| ())
    }

    async fn restart(&self, id: &str) -> Result<(), BackendError> {
        self.run_simple(&["restart", id]).await.map(|_| ())
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        self.run_simple(&["rm", id]).await.map(|_| ())
    }

    async fn attach_logs(
        &self,
        id: &str,
        include_history: bool,
    ) -> Result<(mpsc::Receiver<String>, mpsc::Receiver<BackendError>), BackendError> {
        let mut args = vec!["logs", "--follow"];
        if !include_history {
            args.push("--tail");
            args.push("0");
        }
        args.push(id);

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Stream("docker logs stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::Stream("docker logs stderr unavailable".to_string()))?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);

        let stderr_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            match child.wait().await {
                Ok(status) if !status.success() => {
                    let _ = err_tx
                        .send(BackendError::Stream(format!(
                            "docker logs exited with {status}"
                        )))
                        .await;
                }
                Err(e) => {
                    let _ = err_tx.send(BackendError::Io(e)).await;
                }
                _ => {}
            }
            // Closed-stream sentinel.
            let _ = tx.send(String::new()).await;
        });

        Ok((rx, err_rx))
    }

    async fn events(
        &self,
        filter_id: Option<&str>,
    ) -> Result<(mpsc::Receiver<ContainerEvent>, mpsc::Receiver<BackendError>), BackendError> {
        let mut args: Vec<String> = vec![
            "events".to_string(),
            "--filter".to_string(),
            "type=container".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];
        if let Some(id) = filter_id {
            args.push("--filter".to_string());
            args.push(format!("container={id}"));
        }

        let mut child = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Stream("docker events stdout unavailable".to_string()))?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(ERROR_BUFFER);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = match serde_json::from_str::<RawEvent>(&line) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "unparseable docker event, skipping");
                        continue;
                    }
                };
                if event.action() != "die" {
                    continue;
                }
                let Some(container_id) = event.container_id() else {
                    continue;
                };
                if tx
                    .send(ContainerEvent {
                        container_id,
                        action: EventAction::Die,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            if let Ok(status) = child.wait().await {
                if !status.success() {
                    let _ = err_tx
                        .send(BackendError::Stream(format!(
                            "docker events exited with {status}"
                        )))
                        .await;
                }
            }
        });

        Ok((rx, err_rx))
    }

    async fn stats(&self, id: &str) -> Result<mpsc::Receiver<StatsSample>, BackendError> {
        let mut child = self
            .command()
            .args(["stats", id, "--format", "{{json .}}"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Stream("docker stats stdout unavailable".to_string()))?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let num_cpus = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
            let mut synth = StatsSynth::new(num_cpus);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                // The CLI repaints with terminal control codes between
                // samples; strip everything before the JSON brace.
                let json = match line.find('{') {
                    Some(idx) => &line[idx..],
                    None => continue,
                };
                let raw = match serde_json::from_str::<RawStats>(json) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "unparseable docker stats line, skipping");
                        continue;
                    }
                };
                if tx.send(synth.sample(&raw)).await.is_err() {
                    break;
                }
            }
            let _ = child.wait().await;
        });

        Ok(rx)
    }
}

/// One line of `docker events --format '{{json .}}'`.
///
/// Newer daemons emit `Action`/`Actor`; older ones only the legacy
/// `status`/`id` pair.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Action")]
    action: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<RawActor>,
    status: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID")]
    id: Option<String>,
}

impl RawEvent {
    fn action(&self) -> &str {
        self.action
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or("")
    }

    fn container_id(&self) -> Option<String> {
        self.actor
            .as_ref()
            .and_then(|a| a.id.clone())
            .or_else(|| self.id.clone())
    }
}

/// One line of `docker stats --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct RawStats {
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "NetIO", default)]
    net_io: String,
    #[serde(rename = "BlockIO", default)]
    block_io: String,
}

/// Rebuilds cumulative cpu counters from the CLI's percentage stream.
///
/// The CLI reports a ready-made percentage rather than the raw counters the
/// stats contract carries. Each sample advances the synthesized system
/// counter by one tick and the container counter by the amount that makes
/// the delta formula reproduce the reported percentage.
struct StatsSynth {
    num_cpus: u32,
    cpu_total_ns: u64,
    system_cpu_total_ns: u64,
}

impl StatsSynth {
    fn new(num_cpus: u32) -> Self {
        Self {
            num_cpus: num_cpus.max(1),
            cpu_total_ns: 0,
            system_cpu_total_ns: 0,
        }
    }

    fn sample(&mut self, raw: &RawStats) -> StatsSample {
        let percent = parse_percent(&raw.cpu_perc);
        self.system_cpu_total_ns += STATS_TICK_NS;
        self.cpu_total_ns +=
            (percent / 100.0 * STATS_TICK_NS as f64 / self.num_cpus as f64) as u64;

        let (rx, tx) = parse_io_pair(&raw.net_io);
        let (read, written) = parse_io_pair(&raw.block_io);
        StatsSample {
            cpu_total_ns: self.cpu_total_ns,
            system_cpu_total_ns: self.system_cpu_total_ns,
            num_cpus: self.num_cpus,
            mem_usage_bytes: raw
                .mem_usage
                .split(" / ")
                .next()
                .map(parse_size)
                .unwrap_or(0),
            net_rx_bytes: rx,
            net_tx_bytes: tx,
            blkio: vec![
                BlkioEntry {
                    op: "Read".to_string(),
                    bytes: read,
                },
                BlkioEntry {
                    op: "Write".to_string(),
                    bytes: written,
                },
            ],
        }
    }
}

fn parse_percent(raw: &str) -> f64 {
    raw.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Parse an `"<in> / <out>"` pair of human-readable sizes.
fn parse_io_pair(raw: &str) -> (u64, u64) {
    let mut parts = raw.split(" / ");
    let first = parts.next().map(parse_size).unwrap_or(0);
    let second = parts.next().map(parse_size).unwrap_or(0);
    (first, second)
}

/// Parse a human-readable size like `"7.63MiB"` or `"648kB"` into bytes.
fn parse_size(raw: &str) -> u64 {
    const UNITS: &[(&str, f64)] = &[
        ("TiB", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("GiB", 1024.0 * 1024.0 * 1024.0),
        ("MiB", 1024.0 * 1024.0),
        ("KiB", 1024.0),
        ("TB", 1e12),
        ("GB", 1e9),
        ("MB", 1e6),
        ("kB", 1e3),
        ("KB", 1e3),
        ("B", 1.0),
    ];
    let raw = raw.trim();
    for (suffix, multiplier) in UNITS {
        if let Some(magnitude) = raw.strip_suffix(suffix) {
            return magnitude
                .trim()
                .parse::<f64>()
                .map(|v| (v * multiplier) as u64)
                .unwrap_or(0);
        }
    }
    0
}
