//! Service configuration — the deployable unit submitted over the bus.
//!
//! The YAML field names (`memAlloc`, `cpuShares`, `bw2Entity`, …) are the
//! wire contract and must not change; clients submit configurations in
//! exactly this shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image used when a configuration leaves `baseImage` empty.
pub const DEFAULT_BASE_IMAGE: &str = "jhkolb/spawnpoint:amd64";

/// Errors raised while validating a submitted configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("service name must not be empty")]
    EmptyName,

    #[error("invalid memory allocation {0:?}: expected an integer with unit M or G")]
    BadMemAlloc(String),

    #[error("cpuShares must be greater than zero")]
    ZeroCpuShares,

    #[error("unknown source kind: {0}")]
    UnknownSourceKind(String),
}

/// A service deployment request.
///
/// Submitted by clients as a YAML payload on the config slot. `run` becomes
/// the container entrypoint arguments; `build` is executed during image
/// construction; `bw2_entity` is the base64-encoded credential baked into
/// the image at `/srv/spawnpoint/entity.key`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfiguration {
    pub name: String,
    pub base_image: String,
    /// Optional `"<kind>+<location>"`; only `git` is understood.
    pub source: Option<String>,
    /// Paths baked into the image. The final element is conventionally a
    /// base64-encoded tar of the referenced files' contents.
    pub included_files: Vec<String>,
    pub included_directories: Vec<String>,
    pub build: Vec<String>,
    pub run: Vec<String>,
    /// Base64-encoded credential blob.
    pub bw2_entity: String,
    /// Memory reservation, e.g. `"512M"` or `"2G"`.
    pub mem_alloc: String,
    /// CPU shares; 1024 per core by convention.
    pub cpu_shares: u64,
    pub auto_restart: bool,
    pub use_host_net: bool,
    /// Serialized to `/srv/spawnpoint/params.yml` inside the image.
    pub params: BTreeMap<String, String>,
    /// If non-empty, expanded into a package-install build step.
    pub apt_requires: String,
}

impl ServiceConfiguration {
    /// Check the admission invariants: non-empty name, parseable memory
    /// allocation, positive CPU shares, known source kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        parse_mem_alloc(&self.mem_alloc)?;
        if self.cpu_shares == 0 {
            return Err(ConfigError::ZeroCpuShares);
        }
        if let Some(raw) = &self.source {
            self.source_parts()
                .ok_or_else(|| ConfigError::UnknownSourceKind(raw.clone()))?;
        }
        Ok(())
    }

    /// Memory reservation in MiB.
    pub fn mem_alloc_mib(&self) -> Result<u64, ConfigError> {
        parse_mem_alloc(&self.mem_alloc)
    }

    /// Split `source` into `(kind, location)`. Returns `None` when the
    /// separator is missing or the kind is not recognized.
    pub fn source_parts(&self) -> Option<(&str, &str)> {
        let (kind, location) = self.source.as_deref()?.split_once('+')?;
        match kind {
            "git" => Some((kind, location)),
            _ => None,
        }
    }

    /// The base image, falling back to the stock Spawnpoint image.
    pub fn base_image_or_default(&self) -> &str {
        if self.base_image.is_empty() {
            DEFAULT_BASE_IMAGE
        } else {
            &self.base_image
        }
    }
}

/// Parse a memory allocation string like `"512M"` or `"2G"` into MiB.
///
/// Units `M`/`m` and `G`/`g` are accepted; a gigabyte is 1024 MiB. The
/// magnitude must be a plain unsigned integer.
pub fn parse_mem_alloc(raw: &str) -> Result<u64, ConfigError> {
    let bad = || ConfigError::BadMemAlloc(raw.to_string());
    let (magnitude, multiplier) = if let Some(m) = raw.strip_suffix(['M', 'm']) {
        (m, 1)
    } else if let Some(m) = raw.strip_suffix(['G', 'g']) {
        (m, 1024)
    } else {
        return Err(bad());
    };
    if magnitude.is_empty() {
        return Err(bad());
    }
    let value: u64 = magnitude.parse().map_err(|_| bad())?;
    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfiguration {
        ServiceConfiguration {
            name: "demosvc".to_string(),
            mem_alloc: "512M".to_string(),
            cpu_shares: 1024,
            run: vec!["python".to_string(), "main.py".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn mem_alloc_parsing() {
        assert_eq!(parse_mem_alloc("2G").unwrap(), 2048);
        assert_eq!(parse_mem_alloc("512M").unwrap(), 512);
        assert_eq!(parse_mem_alloc("1g").unwrap(), 1024);
        assert_eq!(parse_mem_alloc("16m").unwrap(), 16);
        assert!(parse_mem_alloc("").is_err());
        assert!(parse_mem_alloc("512K").is_err());
        assert!(parse_mem_alloc("1.5G").is_err());
        assert!(parse_mem_alloc("M").is_err());
        assert!(parse_mem_alloc("-4M").is_err());
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut cfg = test_config();
        cfg.name.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn validate_rejects_zero_cpu_shares() {
        let mut cfg = test_config();
        cfg.cpu_shares = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroCpuShares)));
    }

    #[test]
    fn validate_rejects_unknown_source_kind() {
        let mut cfg = test_config();
        cfg.source = Some("svn+https://example.com/repo".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownSourceKind(_))
        ));

        cfg.source = Some("no-separator".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownSourceKind(_))
        ));
    }

    #[test]
    fn source_parts_splits_git_source() {
        let mut cfg = test_config();
        cfg.source = Some("git+https://example.com/app.git".to_string());
        assert_eq!(
            cfg.source_parts(),
            Some(("git", "https://example.com/app.git"))
        );
    }

    #[test]
    fn base_image_falls_back_to_default() {
        let mut cfg = test_config();
        assert_eq!(cfg.base_image_or_default(), DEFAULT_BASE_IMAGE);
        cfg.base_image = "ubuntu:24.04".to_string();
        assert_eq!(cfg.base_image_or_default(), "ubuntu:24.04");
    }

    #[test]
    fn yaml_wire_names_are_camel_case() {
        let yaml = r#"
name: thermostat
baseImage: ubuntu:24.04
memAlloc: 256M
cpuShares: 512
autoRestart: true
useHostNet: true
includedFiles: ["main.py", "aGVsbG8="]
build: ["pip install -r requirements.txt"]
run: ["python", "main.py"]
aptRequires: python3-pip
params:
  poll_interval: "30"
"#;
        let cfg: ServiceConfiguration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.name, "thermostat");
        assert_eq!(cfg.base_image, "ubuntu:24.04");
        assert_eq!(cfg.mem_alloc_mib().unwrap(), 256);
        assert_eq!(cfg.cpu_shares, 512);
        assert!(cfg.auto_restart);
        assert!(cfg.use_host_net);
        assert_eq!(cfg.included_files.len(), 2);
        assert_eq!(cfg.apt_requires, "python3-pip");
        assert_eq!(cfg.params.get("poll_interval").unwrap(), "30");
    }
}
