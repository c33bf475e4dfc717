//! Daemon configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use spawnpoint_core::{parse_mem_alloc, ConfigError};

use crate::ledger::Reservation;

/// Default bus router address, matching the stock agent port.
pub const DEFAULT_ROUTER: &str = "127.0.0.1:28589";

/// CPU shares granted per detected core when the config omits a total.
const CPU_SHARES_PER_CORE: u64 = 1024;

/// The daemon's own configuration, loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Host alias; prefixes container names and identifies heartbeats.
    pub alias: String,
    /// Base bus path all topics hang off.
    pub path: String,
    /// Router address handed to containers as `BW2_AGENT`.
    pub bw2_agent: String,
    /// Total schedulable memory, e.g. `"4G"`. Empty means detect.
    pub mem_alloc: String,
    /// Total schedulable CPU shares. Zero means `1024 × cores`.
    pub cpu_shares: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            alias: String::new(),
            path: String::new(),
            bw2_agent: DEFAULT_ROUTER.to_string(),
            mem_alloc: String::new(),
            cpu_shares: 0,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: DaemonConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// The host totals the ledger starts from, detecting whatever the
    /// config leaves unspecified.
    pub fn total_resources(&self) -> Result<Reservation, ConfigError> {
        let mem_mib = if self.mem_alloc.is_empty() {
            detect_total_memory_mib()
        } else {
            parse_mem_alloc(&self.mem_alloc)?
        };
        let cpu_shares = if self.cpu_shares == 0 {
            CPU_SHARES_PER_CORE * detect_cpu_count()
        } else {
            self.cpu_shares
        };
        Ok(Reservation {
            mem_mib,
            cpu_shares,
        })
    }
}

fn detect_cpu_count() -> u64 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u64)
        .unwrap_or(4)
}

/// Total physical memory in MiB via POSIX sysconf, 8 GiB on failure.
fn detect_total_memory_mib() -> u64 {
    detect_total_memory_bytes().unwrap_or(8 * 1024 * 1024 * 1024) / (1024 * 1024)
}

fn detect_total_memory_bytes() -> Option<u64> {
    unsafe {
        let pages = libc::sysconf(libc::_SC_PHYS_PAGES);
        let page_size = libc::sysconf(libc::_SC_PAGE_SIZE);
        if pages > 0 && page_size > 0 {
            Some(pages as u64 * page_size as u64)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_totals_are_parsed() {
        let config = DaemonConfig {
            mem_alloc: "4G".to_string(),
            cpu_shares: 2048,
            ..Default::default()
        };
        let totals = config.total_resources().unwrap();
        assert_eq!(totals.mem_mib, 4096);
        assert_eq!(totals.cpu_shares, 2048);
    }

    #[test]
    fn omitted_totals_are_detected() {
        let config = DaemonConfig::default();
        let totals = config.total_resources().unwrap();
        assert!(totals.mem_mib > 0);
        assert_eq!(totals.cpu_shares % CPU_SHARES_PER_CORE, 0);
    }

    #[test]
    fn bad_mem_alloc_is_rejected() {
        let config = DaemonConfig {
            mem_alloc: "lots".to_string(),
            ..Default::default()
        };
        assert!(config.total_resources().is_err());
    }

    #[test]
    fn yaml_config_round_trip() {
        let yaml = r#"
alias: alpha
path: example/spawnpoint/alpha
bw2Agent: 10.0.0.1:28589
memAlloc: 2G
cpuShares: 4096
"#;
        let config: DaemonConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.alias, "alpha");
        assert_eq!(config.path, "example/spawnpoint/alpha");
        assert_eq!(config.bw2_agent, "10.0.0.1:28589");
        assert_eq!(config.total_resources().unwrap().mem_mib, 2048);
    }
}
