//! Asynchronous wrappers around the blocking `kafka` client.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use futures::Stream;
use kafka::consumer::{Consumer, FetchOffset, GroupOffsetStorage};
use kafka::producer::{Producer, Record, RequiredAcks};
use tokio::sync::oneshot::Sender;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, trace};

/// A fetched event from a Kafka topic partition.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    /// The topic the event was published to.
    pub topic: String,
    /// The record key, carrying the resource ID.
    pub key: Vec<u8>,
    /// The record value.
    pub value: Vec<u8>,
}

/// A [`kafka::consumer::Consumer`] usable from async code.
pub(crate) struct AsyncKafkaConsumer(Consumer);

impl AsyncKafkaConsumer {
    /// Connect a consumer for the given topics as part of the given group.
    pub async fn connect(
        hosts: Vec<String>,
        group: String,
        topics: Vec<String>,
    ) -> Result<Self> {
        let consumer = tokio::task::spawn_blocking(move || {
            let mut builder = Consumer::from_hosts(hosts)
                .with_group(group)
                .with_fallback_offset(FetchOffset::Earliest)
                .with_offset_storage(Some(GroupOffsetStorage::Kafka));
            for topic in topics {
                builder = builder.with_topic(topic);
            }
            builder.create().context("failed to create consumer")
        })
        .await
        .context("failed to perform spawn blocking")??;
        Ok(Self(consumer))
    }

    /// Produce an unending stream of events from the inner consumer, with a
    /// sender for stopping the consuming thread.
    pub async fn events(self) -> Result<(impl Stream<Item = ReceivedEvent>, Sender<()>)> {
        let mut consumer = self.0;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::task::spawn_blocking(move || loop {
            match consumer.poll() {
                Ok(message_sets) => {
                    for message_set in message_sets.iter() {
                        for message in message_set.messages() {
                            trace!(
                                topic = message_set.topic(),
                                partition = message_set.partition(),
                                offset = message.offset,
                                "received event",
                            );
                            let event = ReceivedEvent {
                                topic: message_set.topic().to_string(),
                                key: message.key.to_vec(),
                                value: message.value.to_vec(),
                            };
                            if event_tx.send(event).is_err() {
                                trace!("event receiver dropped, shutting down consuming thread");
                                return;
                            }
                        }
                        if let Err(e) = consumer.consume_messageset(message_set) {
                            error!("failed to consume message set: {e}");
                        }
                    }
                    if !consumer.group().is_empty() {
                        if let Err(e) = consumer.commit_consumed() {
                            error!("failed to commit consumed events: {e}");
                        }
                    }
                }
                Err(e) => {
                    error!("failed to poll: {e}");
                }
            }

            if stop_rx.try_recv().is_ok() {
                trace!("received stop, shutting down consuming thread");
                return;
            }
        });

        Ok((UnboundedReceiverStream::new(event_rx), stop_tx))
    }
}

/// Publishes events, used for the dead letter queue.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event with the given key and payload to the given topic.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// An [`EventPublisher`] backed by a Kafka producer.
pub struct KafkaEventPublisher {
    hosts: Vec<String>,
}

impl KafkaEventPublisher {
    pub fn new(hosts: Vec<String>) -> Self {
        KafkaEventPublisher { hosts }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let hosts = self.hosts.clone();
        let topic = topic.to_string();
        let key = key.to_string();
        let payload = payload.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut producer = Producer::from_hosts(hosts)
                .with_required_acks(RequiredAcks::One)
                .create()
                .context("failed to build kafka producer")?;
            producer
                .send(&Record::from_key_value(&topic, key.as_bytes(), payload))
                .context("failed to send record")
        })
        .await
        .context("failed to perform spawn blocking")?
    }
}
