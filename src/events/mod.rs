//! Event ingress: keeps the local dataset, upload box and accession map
//! projections in sync with the rest of the platform.
//!
//! One consumer subscribes to the dataset change topic, the two outbox
//! topics and the retry topic. Events that cannot be processed are published
//! to the dead letter queue; operators re-inject them through the retry
//! topic, which carries the original topic alongside the event.

mod kafka;

pub use self::kafka::{EventPublisher, KafkaEventPublisher, ReceivedEvent};

use std::sync::Arc;

use anyhow::Context as _;
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Dataset, DatasetFile, FileAccessionMap, ResearchDataUploadBox, WorkPackageType};
use crate::repository::{RepositoryError, WorkPackageRepository};

use self::kafka::AsyncKafkaConsumer;

/// Event type of outbox events announcing a new or changed resource.
pub const OUTBOX_UPSERTED: &str = "upserted";
/// Event type of outbox events announcing a deleted resource.
pub const OUTBOX_DELETED: &str = "deleted";

/// The wire format of consumed and dead-lettered events.
///
/// The record key carries the resource ID; the event type and, for events
/// on the retry topic, the original topic travel in the envelope.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventEnvelope {
    /// The type of the event.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The event payload.
    pub payload: Value,
    /// The topic an event was originally published to, set on retried
    /// events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_topic: Option<String>,
}

/// Errors while processing a single event. Raising one of these triggers
/// publication to the dead letter queue.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("retried event does not carry its original topic")]
    MissingOriginalTopic,
    #[error("event key is not a valid resource ID: {0}")]
    InvalidKey(#[from] uuid::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(serde::Deserialize)]
struct MetadataDatasetFile {
    accession: String,
    file_extension: String,
}

#[derive(serde::Deserialize)]
struct MetadataDatasetOverview {
    accession: String,
    stage: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    files: Vec<MetadataDatasetFile>,
}

#[derive(serde::Deserialize)]
struct MetadataDatasetId {
    accession: String,
}

/// Routes consumed events to the matching repository operation.
pub struct EventRouter {
    repository: Arc<WorkPackageRepository>,
    dataset_change_topic: String,
    dataset_upsertion_type: String,
    dataset_deletion_type: String,
    upload_box_topic: String,
    accession_map_topic: String,
    retry_topic: String,
}

impl EventRouter {
    pub fn new(config: &Config, repository: Arc<WorkPackageRepository>) -> Self {
        EventRouter {
            repository,
            dataset_change_topic: config.dataset_change_topic.clone(),
            dataset_upsertion_type: config.dataset_upsertion_type.clone(),
            dataset_deletion_type: config.dataset_deletion_type.clone(),
            upload_box_topic: config.upload_box_topic.clone(),
            accession_map_topic: config.accession_map_topic.clone(),
            retry_topic: config.retry_topic(),
        }
    }

    /// All topics this router consumes, including the retry topic.
    pub fn topics(&self) -> Vec<String> {
        vec![
            self.dataset_change_topic.clone(),
            self.upload_box_topic.clone(),
            self.accession_map_topic.clone(),
            self.retry_topic.clone(),
        ]
    }

    /// Process a single event. Errors must be handled by the caller, which
    /// either dead-letters or propagates them.
    pub async fn handle(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), EventError> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)?;
        if topic == self.retry_topic {
            let original_topic = envelope
                .original_topic
                .clone()
                .ok_or(EventError::MissingOriginalTopic)?;
            info!(%original_topic, key, "dispatching retried event");
            return self.dispatch(&original_topic, key, envelope).await;
        }
        self.dispatch(topic, key, envelope).await
    }

    async fn dispatch(
        &self,
        topic: &str,
        key: &str,
        envelope: EventEnvelope,
    ) -> Result<(), EventError> {
        if topic == self.dataset_change_topic {
            self.handle_dataset_change(envelope).await
        } else if topic == self.upload_box_topic {
            self.handle_upload_box_event(key, envelope).await
        } else if topic == self.accession_map_topic {
            self.handle_accession_map_event(key, envelope).await
        } else {
            warn!(topic, "received event on an unexpected topic, ignoring");
            Ok(())
        }
    }

    async fn handle_dataset_change(&self, envelope: EventEnvelope) -> Result<(), EventError> {
        if envelope.event_type == self.dataset_upsertion_type {
            let overview: MetadataDatasetOverview = serde_json::from_value(envelope.payload)?;
            let stage = match overview.stage.as_str() {
                "download" => WorkPackageType::Download,
                "upload" => WorkPackageType::Upload,
                stage => {
                    info!(stage, "ignoring dataset event with unmappable stage");
                    return Ok(());
                }
            };
            let dataset = Dataset {
                id: overview.accession,
                stage,
                title: overview.title,
                description: overview.description,
                files: overview
                    .files
                    .into_iter()
                    .map(|file| DatasetFile {
                        id: file.accession,
                        extension: file.file_extension,
                    })
                    .collect(),
            };
            self.repository.register_dataset(&dataset).await?;
        } else if envelope.event_type == self.dataset_deletion_type {
            let dataset_id: MetadataDatasetId = serde_json::from_value(envelope.payload)?;
            self.repository.delete_dataset(&dataset_id.accession).await?;
        } else {
            info!(
                event_type = %envelope.event_type,
                "ignoring dataset event of uninteresting type"
            );
        }
        Ok(())
    }

    async fn handle_upload_box_event(
        &self,
        key: &str,
        envelope: EventEnvelope,
    ) -> Result<(), EventError> {
        match envelope.event_type.as_str() {
            OUTBOX_UPSERTED => {
                let upload_box: ResearchDataUploadBox = serde_json::from_value(envelope.payload)?;
                self.repository.register_upload_box(&upload_box).await?;
            }
            OUTBOX_DELETED => {
                let box_id: Uuid = key.parse()?;
                self.repository.delete_upload_box(box_id).await?;
            }
            event_type => {
                info!(event_type, "ignoring upload box event of uninteresting type");
            }
        }
        Ok(())
    }

    async fn handle_accession_map_event(
        &self,
        key: &str,
        envelope: EventEnvelope,
    ) -> Result<(), EventError> {
        match envelope.event_type.as_str() {
            OUTBOX_UPSERTED => {
                let accession_map: FileAccessionMap = serde_json::from_value(envelope.payload)?;
                self.repository.register_accession_map(&accession_map).await?;
            }
            OUTBOX_DELETED => {
                self.repository.delete_accession_map(key).await?;
            }
            event_type => {
                info!(event_type, "ignoring accession map event of uninteresting type");
            }
        }
        Ok(())
    }
}

/// Consumes events from the broker, routing each through the [`EventRouter`]
/// and dead-lettering events whose processing fails.
pub struct EventConsumer {
    router: EventRouter,
    publisher: Arc<dyn EventPublisher>,
    hosts: Vec<String>,
    group: String,
    dlq_topic: String,
    enable_dlq: bool,
}

impl EventConsumer {
    pub fn new(
        config: &Config,
        router: EventRouter,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        EventConsumer {
            router,
            publisher,
            hosts: config.kafka_servers.clone(),
            group: config.consumer_group.clone(),
            dlq_topic: config.kafka_dlq_topic.clone(),
            enable_dlq: config.kafka_enable_dlq,
        }
    }

    /// Process one event, publishing it to the dead letter queue on failure.
    ///
    /// With the dead letter queue disabled, processing failures propagate
    /// and stop the consumer.
    pub async fn process(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        match self.router.handle(topic, key, payload).await {
            Ok(()) => Ok(()),
            Err(event_error) if self.enable_dlq => {
                error!(%event_error, topic, key, "failed to process event, publishing to DLQ");
                self.publisher
                    .publish(&self.dlq_topic, key, payload)
                    .await
                    .context("failed to publish to the dead letter queue")
            }
            Err(event_error) => Err(event_error.into()),
        }
    }

    /// Run the consumer until the stream ends, or until `limit` events have
    /// been processed if a limit is given.
    pub async fn run(&self, limit: Option<usize>) -> anyhow::Result<()> {
        let consumer = AsyncKafkaConsumer::connect(
            self.hosts.clone(),
            self.group.clone(),
            self.router.topics(),
        )
        .await?;
        let (mut events, stop_tx) = consumer.events().await?;
        info!(topics = ?self.router.topics(), "consuming events");

        let mut processed = 0usize;
        while let Some(event) = events.next().await {
            let key = String::from_utf8_lossy(&event.key).into_owned();
            self.process(&event.topic, &key, &event.value).await?;
            processed += 1;
            if limit.is_some_and(|limit| processed >= limit) {
                let _ = stop_tx.send(());
                break;
            }
        }
        info!(processed, "event consumer stopped");
        Ok(())
    }
}
