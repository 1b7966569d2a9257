use super::request::{OutboxEntry, OutboxRequest};
use crate::{
    ExcerptId,
    publish::EventPublisher,
    store::{RecordStore, StatusChange, Transition},
};
use chrono::Utc;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Diagnostic written on a record whose event could not be handed off.
pub const PUBLISH_FAILURE_DETAILS: &str = "Failed to send data for processing";

/// Collaborators shared by every outbox worker.
#[derive(Clone)]
pub struct OutboxWorker {
    pub publisher: Arc<dyn EventPublisher>,
    pub records: Arc<dyn RecordStore>,
    pub publish_timeout: Duration,
}

impl OutboxWorker {
    /// Makes exactly one publish attempt for `entry` and compensates the
    /// record if it fails or exceeds the publish timeout.
    #[tracing::instrument(skip_all, fields(record_id = %entry.record_id, topic = %entry.topic))]
    pub async fn deliver(&self, entry: OutboxEntry) {
        let attempt = self
            .publisher
            .publish(&entry.topic, &entry.record_id, &entry.event);

        let failure = match tokio::time::timeout(self.publish_timeout, attempt).await {
            Ok(Ok(())) => {
                tracing::debug!("Generation event published");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("publish exceeded {:?}", self.publish_timeout),
        };

        tracing::warn!(reason = %failure, "Generation event not published");
        compensate(self.records.as_ref(), &entry.record_id).await;
    }
}

/// Moves the record to `FAILED` unless it already left `IN_PROGRESS`.
pub async fn compensate(records: &dyn RecordStore, id: &ExcerptId) {
    let change = StatusChange::Failed {
        details: PUBLISH_FAILURE_DETAILS.to_string(),
    };
    match records.transition(id, change, Utc::now()).await {
        Ok(Transition::Applied) => {
            tracing::info!(record_id = %id, "Record marked as failed");
        }
        Ok(Transition::Skipped { current }) => {
            tracing::info!(record_id = %id, %current, "Compensation skipped, record already terminal");
        }
        Ok(Transition::Missing) => {
            tracing::error!(record_id = %id, "Compensation target does not exist");
        }
        Err(e) => {
            tracing::error!(record_id = %id, error = %e, "Compensation write failed");
        }
    }
}

/// Worker task draining one outbox queue until told to shut down.
///
/// Requests are handled strictly in arrival order, so a
/// [`OutboxRequest::Shutdown`] is only acknowledged once every publish queued
/// ahead of it has been attempted. Anything that reaches the queue after that,
/// or is still queued when `abandon` fires, is compensated instead of
/// published.
pub async fn outbox_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<OutboxRequest>,
    worker: OutboxWorker,
    abandon: CancellationToken,
) {
    tracing::trace!("Outbox worker {worker_id} started");

    loop {
        let request = tokio::select! {
            biased;
            () = abandon.cancelled() => break,
            request = rx.recv() => request,
        };
        match request {
            Some(OutboxRequest::Publish { entry }) => {
                let id = entry.record_id;
                tokio::select! {
                    biased;
                    () = worker.deliver(entry) => {}
                    () = abandon.cancelled() => {
                        tracing::warn!(record_id = %id, "Publish abandoned at shutdown");
                        compensate(worker.records.as_ref(), &id).await;
                    }
                }
            }
            Some(OutboxRequest::Shutdown { response }) => {
                tracing::debug!("Outbox worker {worker_id} received shutdown signal");
                if response.send(()).is_err() {
                    tracing::error!("Outbox worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
            None => break,
        }
    }

    // Outstanding slots may still deliver; recv yields None once they are spent.
    rx.close();
    while let Some(request) = rx.recv().await {
        match request {
            OutboxRequest::Publish { entry } => {
                tracing::warn!(record_id = %entry.record_id, "Entry drained unpublished at shutdown");
                compensate(worker.records.as_ref(), &entry.record_id).await;
            }
            OutboxRequest::Shutdown { response } => {
                let _ = response.send(());
            }
        }
    }

    tracing::trace!("Outbox worker {worker_id} stopped");
}
