//! Tagged wire payloads.
//!
//! The bus carries payload objects: a numeric kind plus an opaque byte
//! body. Kinds are stable wire values encoded as four dotted octets packed
//! big-endian into a `u32`. Service configurations travel as YAML; logs and
//! heartbeats travel as msgpack maps.

use serde::{de::DeserializeOwned, Serialize};
use spawnpoint_core::{HostHeartbeat, LogMessage, ServiceConfiguration, ServiceHeartbeat};

use crate::error::BusError;

/// The payload kinds Spawnpoint speaks, with their stable wire numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PayloadKind {
    /// Plain UTF-8 text (restart/stop service names).
    Text = pack(64, 0, 1, 0),
    /// YAML-serialized `ServiceConfiguration`.
    SpawnpointConfig = pack(2, 0, 7, 2),
    /// Msgpack `HostHeartbeat`.
    SpawnpointHeartbeat = pack(2, 0, 7, 0),
    /// Msgpack `ServiceHeartbeat`.
    SpawnpointSvcHb = pack(2, 0, 7, 1),
    /// Msgpack `LogMessage`.
    SpawnpointLog = pack(2, 0, 8, 0),
}

const fn pack(a: u32, b: u32, c: u32, d: u32) -> u32 {
    (a << 24) | (b << 16) | (c << 8) | d
}

impl PayloadKind {
    pub fn from_num(num: u32) -> Option<Self> {
        match num {
            n if n == PayloadKind::Text as u32 => Some(PayloadKind::Text),
            n if n == PayloadKind::SpawnpointConfig as u32 => Some(PayloadKind::SpawnpointConfig),
            n if n == PayloadKind::SpawnpointHeartbeat as u32 => {
                Some(PayloadKind::SpawnpointHeartbeat)
            }
            n if n == PayloadKind::SpawnpointSvcHb as u32 => Some(PayloadKind::SpawnpointSvcHb),
            n if n == PayloadKind::SpawnpointLog as u32 => Some(PayloadKind::SpawnpointLog),
            _ => None,
        }
    }
}

/// A wire message body: numeric kind plus opaque bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadObject {
    pub kind: u32,
    pub bytes: Vec<u8>,
}

impl PayloadObject {
    pub fn new(kind: PayloadKind, bytes: Vec<u8>) -> Self {
        Self {
            kind: kind as u32,
            bytes,
        }
    }

    fn expect_kind(&self, expected: PayloadKind) -> Result<(), BusError> {
        if self.kind == expected as u32 {
            Ok(())
        } else {
            Err(BusError::KindMismatch {
                expected,
                actual: self.kind,
            })
        }
    }

    // ── Text ────────────────────────────────────────────────────────

    pub fn text(contents: &str) -> Self {
        Self::new(PayloadKind::Text, contents.as_bytes().to_vec())
    }

    pub fn decode_text(&self) -> Result<String, BusError> {
        self.expect_kind(PayloadKind::Text)?;
        String::from_utf8(self.bytes.clone()).map_err(|e| BusError::Decode(e.to_string()))
    }

    // ── Service configuration (YAML) ────────────────────────────────

    pub fn config(cfg: &ServiceConfiguration) -> Result<Self, BusError> {
        let yaml = serde_yaml::to_string(cfg).map_err(|e| BusError::Encode(e.to_string()))?;
        Ok(Self::new(PayloadKind::SpawnpointConfig, yaml.into_bytes()))
    }

    pub fn decode_config(&self) -> Result<ServiceConfiguration, BusError> {
        self.expect_kind(PayloadKind::SpawnpointConfig)?;
        serde_yaml::from_slice(&self.bytes).map_err(|e| BusError::Decode(e.to_string()))
    }

    // ── Msgpack records ─────────────────────────────────────────────

    pub fn log(msg: &LogMessage) -> Result<Self, BusError> {
        Self::msgpack(PayloadKind::SpawnpointLog, msg)
    }

    pub fn decode_log(&self) -> Result<LogMessage, BusError> {
        self.decode_msgpack(PayloadKind::SpawnpointLog)
    }

    pub fn host_heartbeat(hb: &HostHeartbeat) -> Result<Self, BusError> {
        Self::msgpack(PayloadKind::SpawnpointHeartbeat, hb)
    }

    pub fn decode_host_heartbeat(&self) -> Result<HostHeartbeat, BusError> {
        self.decode_msgpack(PayloadKind::SpawnpointHeartbeat)
    }

    pub fn service_heartbeat(hb: &ServiceHeartbeat) -> Result<Self, BusError> {
        Self::msgpack(PayloadKind::SpawnpointSvcHb, hb)
    }

    pub fn decode_service_heartbeat(&self) -> Result<ServiceHeartbeat, BusError> {
        self.decode_msgpack(PayloadKind::SpawnpointSvcHb)
    }

    fn msgpack<T: Serialize>(kind: PayloadKind, value: &T) -> Result<Self, BusError> {
        // Named maps, so readers in other languages see field names.
        let bytes = rmp_serde::to_vec_named(value).map_err(|e| BusError::Encode(e.to_string()))?;
        Ok(Self::new(kind, bytes))
    }

    fn decode_msgpack<T: DeserializeOwned>(&self, kind: PayloadKind) -> Result<T, BusError> {
        self.expect_kind(kind)?;
        rmp_serde::from_slice(&self.bytes).map_err(|e| BusError::Decode(e.to_string()))
    }
}
