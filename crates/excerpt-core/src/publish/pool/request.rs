use crate::{ExcerptEvent, ExcerptId};
use tokio::sync::oneshot;

/// A generation event waiting to be published for a persisted record.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    pub record_id: ExcerptId,
    pub topic: String,
    pub event: ExcerptEvent,
}

/// Message accepted by an outbox worker.
#[derive(Debug)]
pub enum OutboxRequest {
    /// Publish one event, compensating the record on failure.
    Publish { entry: OutboxEntry },
    /// Stop after everything queued before this message; ack on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
