//! Event transports.

use crate::{ExcerptEvent, ExcerptId};
use async_trait::async_trait;
use core::time::Duration;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum PublishError {
    /// The transport answered but refused the event.
    #[error("Event rejected: {reason}")]
    Rejected { reason: String },

    /// The transport could not be reached.
    #[error("Event transport failed: {reason}")]
    Transport { reason: String },
}

/// Delivers one generation event to a topic, keyed by record id.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &ExcerptId,
        event: &ExcerptEvent,
    ) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a ExcerptId,
    value: &'a ExcerptEvent,
}

/// Publisher targeting a Kafka REST proxy: `POST {base}/topics/{topic}`.
#[derive(Clone, Debug)]
pub struct HttpEventPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventPublisher {
    const CONTENT_TYPE: &'static str = "application/vnd.kafka.json.v2+json";

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &ExcerptId,
        event: &ExcerptEvent,
    ) -> Result<(), PublishError> {
        let url = format!("{}/topics/{topic}", self.base_url);
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, Self::CONTENT_TYPE)
            .json(&ProduceRequest {
                records: [ProduceRecord { key, value: event }],
            })
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected {
                reason: format!("topic `{topic}` answered {status}"),
            })
        }
    }
}

/// An event handed over through [`ChannelEventPublisher`].
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: ExcerptId,
    pub event: ExcerptEvent,
}

/// In-process publisher backed by a bounded `mpsc` channel, for embedding a
/// worker in the same process.
#[derive(Clone, Debug)]
pub struct ChannelEventPublisher {
    tx: mpsc::Sender<PublishedEvent>,
}

impl ChannelEventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &ExcerptId,
        event: &ExcerptEvent,
    ) -> Result<(), PublishError> {
        self.tx
            .send(PublishedEvent {
                topic: topic.to_string(),
                key: *key,
                event: event.clone(),
            })
            .await
            .map_err(|_| PublishError::Transport {
                reason: "receiver dropped".to_string(),
            })
    }
}
