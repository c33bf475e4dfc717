//! Bus error types.

use thiserror::Error;

/// Errors raised by payload codecs and the bus transport.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("payload kind mismatch: expected {expected:?}, got {actual:#010x}")]
    KindMismatch {
        expected: crate::payload::PayloadKind,
        actual: u32,
    },

    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("unknown subscription id {0}")]
    UnknownSubscription(u64),
}
