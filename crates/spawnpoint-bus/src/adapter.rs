//! The façade the daemon talks to.
//!
//! `BusAdapter` binds a transport to the daemon's topic space and exposes
//! the handful of operations the rest of the system needs. A
//! `ServiceInterface` scopes publishes and slot subscriptions to one
//! service's URI subtree.

use std::sync::Arc;

use tokio::sync::mpsc;

use spawnpoint_core::TopicSpace;

use crate::error::BusError;
use crate::payload::PayloadObject;
use crate::transport::{BusMessage, BusTransport, SubscriptionId};

/// Topic-aware handle on the bus, shared by every daemon task.
#[derive(Clone)]
pub struct BusAdapter {
    transport: Arc<dyn BusTransport>,
    topics: TopicSpace,
}

impl BusAdapter {
    pub fn new(transport: Arc<dyn BusTransport>, topics: TopicSpace) -> Self {
        Self { transport, topics }
    }

    pub fn topics(&self) -> &TopicSpace {
        &self.topics
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: PayloadObject,
        persist: bool,
    ) -> Result<(), BusError> {
        self.transport.publish(topic, payload, persist).await
    }

    pub async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(SubscriptionId, mpsc::Receiver<BusMessage>), BusError> {
        self.transport.subscribe(topic).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.transport.unsubscribe(id).await
    }

    /// Scope a handle to one service's signal/slot subtree.
    pub fn register_service_interface(&self, service: &str) -> ServiceInterface {
        ServiceInterface {
            bus: self.clone(),
            service: service.to_string(),
        }
    }
}

/// Per-service view of the bus.
#[derive(Clone)]
pub struct ServiceInterface {
    bus: BusAdapter,
    service: String,
}

impl ServiceInterface {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Publish to this service's log signal.
    pub async fn publish_log(&self, payload: PayloadObject) -> Result<(), BusError> {
        let topic = self.bus.topics.service_log_signal(&self.service);
        self.bus.publish(&topic, payload, false).await
    }

    /// Publish (persisted) to this service's heartbeat signal.
    pub async fn publish_heartbeat(&self, payload: PayloadObject) -> Result<(), BusError> {
        let topic = self.bus.topics.service_heartbeat_signal(&self.service);
        self.bus.publish(&topic, payload, true).await
    }

    /// Subscribe to this service's log keep-alive slot.
    pub async fn subscribe_keep_alive(
        &self,
    ) -> Result<(SubscriptionId, mpsc::Receiver<BusMessage>), BusError> {
        let topic = self.bus.topics.keep_log_alive_slot(&self.service);
        self.bus.subscribe(&topic).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        self.bus.unsubscribe(id).await
    }
}
