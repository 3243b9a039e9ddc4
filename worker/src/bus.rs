//! The broker boundary: a publish trait the node writes through, and the
//! pump that turns broker input into the node's inbound stream.
//!
//! Delivery assumptions consumed throughout: at-least-once per topic,
//! possibly reordered across topics. Publishing is fire-and-forget; a
//! publish that cannot be handed to the broker is dropped with a warning,
//! never buffered across reconnects.
use clipseek_common::{
    NodeId,
    metrics::{
        failures::{self, FailureKind},
        names::FAILURES,
    },
};
use metrics::counter;
use rdkafka::{
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::Message,
    producer::{FutureProducer, FutureRecord},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{trace, warn};

/// A message delivered from a subscribed topic.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// Outbound half of the broker connection.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;
}

/// [MessageBus] over a Kafka producer; records are keyed by the
/// publishing node's id.
pub struct KafkaBus {
    producer: FutureProducer,
    origin: NodeId,
}

impl KafkaBus {
    pub fn new(producer: FutureProducer, origin: NodeId) -> Self {
        Self { producer, origin }
    }
}

impl MessageBus for KafkaBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let record = FutureRecord::to(topic)
            .payload(payload)
            .key(self.origin.as_str());

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| BusError::Kafka(e))?;

        // Confirmation is observed off the caller's path; a failed delivery
        // is a counted warning, matching the at-least-once contract.
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => trace!("delivery confirmed"),
                Ok(Err((e, _))) => {
                    warn!("delivery failed: {e}");
                    counter!(
                        FAILURES,
                        &[failures::get_label(FailureKind::KafkaPublishFailed)]
                    )
                    .increment(1);
                }
                Err(_) => warn!("delivery cancelled"),
            }
        });
        Ok(())
    }
}

/// Pumps a Kafka consumer into an [Inbound] channel until the node hangs up.
pub fn spawn_consumer_pump(consumer: StreamConsumer) -> (UnboundedReceiver<Inbound>, JoinHandle<()>) {
    let (channel_send, channel_recv) = unbounded_channel();
    let handle = tokio::spawn(pump_consumer(consumer, channel_send));
    (channel_recv, handle)
}

async fn pump_consumer(consumer: StreamConsumer, channel_send: UnboundedSender<Inbound>) {
    loop {
        match consumer.recv().await {
            Err(e) => warn!("Kafka error: {}", e),
            Ok(msg) => {
                if let Some(payload) = msg.payload() {
                    let inbound = Inbound {
                        topic: msg.topic().to_owned(),
                        payload: payload.to_vec(),
                    };
                    if channel_send.send(inbound).is_err() {
                        return;
                    }
                }
                if let Err(e) = consumer.commit_message(&msg, CommitMode::Async) {
                    warn!("Failed to commit message: {e}");
                }
            }
        }
    }
}

/// In-memory loopback bus for tests and single-process fleets.
///
/// Every publish is delivered to all subscribers of the topic, the
/// publisher included if subscribed, in publish order per topic. This
/// mirrors what a node sees on the real broker when subscribed to a topic
/// it also publishes on.
#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<UnboundedSender<Inbound>>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for the given topics and returns its inbound
    /// stream.
    pub fn subscribe(&self, topics: &[String]) -> UnboundedReceiver<Inbound> {
        let (channel_send, channel_recv) = unbounded_channel();
        let mut subscribers = self.subscribers.lock().expect("subscriber map lock");
        for topic in topics {
            subscribers
                .entry(topic.clone())
                .or_default()
                .push(channel_send.clone());
        }
        channel_recv
    }
}

impl MessageBus for MemoryBus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let subscribers = self.subscribers.lock().expect("subscriber map lock");
        for subscriber in subscribers.get(topic).into_iter().flatten() {
            // A hung-up subscriber is a departed node, not an error.
            let _ = subscriber.send(Inbound {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}
