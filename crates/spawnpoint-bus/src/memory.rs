//! In-process transport.
//!
//! One broadcast channel per topic, with retained-value replay for
//! persisted publishes. Backs the test suite and local single-process
//! runs; a real deployment substitutes the external bus client behind
//! `BusTransport`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::BusError;
use crate::payload::PayloadObject;
use crate::transport::{BusMessage, BusTransport, SubscriptionId};

const TOPIC_CAPACITY: usize = 64;
const SUBSCRIPTION_BUFFER: usize = 20;

struct TopicState {
    tx: broadcast::Sender<BusMessage>,
    retained: Option<PayloadObject>,
}

/// In-memory pub/sub transport.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, TopicState>>,
    forwarders: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic_sender(&self, topic: &str) -> (broadcast::Sender<BusMessage>, Option<PayloadObject>) {
        let mut topics = self.inner.topics.lock().expect("topic map poisoned");
        let state = topics.entry(topic.to_string()).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(TOPIC_CAPACITY);
            TopicState { tx, retained: None }
        });
        (state.tx.clone(), state.retained.clone())
    }
}

#[async_trait]
impl BusTransport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: PayloadObject,
        persist: bool,
    ) -> Result<(), BusError> {
        let tx = {
            let mut topics = self.inner.topics.lock().expect("topic map poisoned");
            let state = topics.entry(topic.to_string()).or_insert_with(|| {
                let (tx, _rx) = broadcast::channel(TOPIC_CAPACITY);
                TopicState { tx, retained: None }
            });
            if persist {
                state.retained = Some(payload.clone());
            }
            state.tx.clone()
        };

        // No subscribers is fine; retained values still replay later.
        let _ = tx.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(SubscriptionId, mpsc::Receiver<BusMessage>), BusError> {
        let (broadcast_tx, retained) = self.topic_sender(topic);
        let mut broadcast_rx = broadcast_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        if let Some(payload) = retained {
            let _ = tx
                .send(BusMessage {
                    topic: topic.to_string(),
                    payload,
                })
                .await;
        }

        let forwarder = tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    // A lagged subscriber skips to the present.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .forwarders
            .lock()
            .expect("forwarder map poisoned")
            .insert(id, forwarder);

        Ok((SubscriptionId(id), rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let handle = self
            .inner
            .forwarders
            .lock()
            .expect("forwarder map poisoned")
            .remove(&id.0)
            .ok_or(BusError::UnknownSubscription(id.0))?;
        handle.abort();
        Ok(())
    }
}
