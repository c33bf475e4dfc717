//! The transport seam.
//!
//! A concrete bus client implements `BusTransport`; everything above it
//! (the adapter, the daemon) is transport-agnostic.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::payload::PayloadObject;

/// Handle for a live subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A message delivered on a subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: PayloadObject,
}

/// Opaque pub/sub transport.
///
/// `persist` marks the published value as retained: the bus keeps the last
/// value and replays it to new subscribers.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: PayloadObject,
        persist: bool,
    ) -> Result<(), BusError>;

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(SubscriptionId, mpsc::Receiver<BusMessage>), BusError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;
}
