//! Outbox pool manager.
//!
//! [`OutboxPool`] owns the sending halves of every worker queue. Queue places
//! are handed out round-robin as [`OutboxSlot`]s, and the pool supports a
//! coordinated shutdown via a shared [`CancellationToken`]: once cancelled, no
//! new slot is handed out and each worker drains what it already holds before
//! acknowledging. Workers that miss the acknowledgement deadline are told to
//! abandon their queues, and every abandoned entry is compensated.

use super::{
    request::{OutboxEntry, OutboxRequest},
    worker::{OutboxWorker, outbox_loop},
};
use crate::{Error, Result};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A reserved place on one worker queue.
///
/// Sending through the slot never waits and never fails, so whoever holds it
/// can hand an entry off without an await point in between. Dropping an
/// unused slot returns the place to the queue.
#[derive(Debug)]
pub struct OutboxSlot {
    permit: mpsc::OwnedPermit<OutboxRequest>,
}

impl OutboxSlot {
    pub fn send(self, entry: OutboxEntry) {
        self.permit.send(OutboxRequest::Publish { entry });
    }
}

pub struct OutboxPool {
    workers: Vec<mpsc::Sender<OutboxRequest>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    abandon_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl OutboxPool {
    /// Spawns `num_workers` outbox workers, each with a bounded queue of
    /// `queue_size` entries. Must be called inside a Tokio runtime.
    pub fn spawn(
        worker: &OutboxWorker,
        num_workers: usize,
        queue_size: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let abandon_token = CancellationToken::new();
        let mut workers = Vec::with_capacity(num_workers);
        let mut tasks = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(queue_size.max(1));
            workers.push(tx);
            tasks.push(tokio::spawn(outbox_loop(
                worker_id,
                rx,
                worker.clone(),
                abandon_token.clone(),
            )));
        }

        Self {
            workers,
            tasks: Mutex::new(tasks),
            next_worker: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
            abandon_token,
            shutdown_timeout,
        }
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    pub fn is_accepting(&self) -> bool {
        !self.shutdown_token.is_cancelled()
    }

    /// Reserves a place on the next worker's queue, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if the pool is shutting down or the
    /// selected worker has stopped.
    pub async fn reserve(&self) -> Result<OutboxSlot> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        self.workers[worker_idx]
            .clone()
            .reserve_owned()
            .await
            .map(|permit| OutboxSlot { permit })
            .map_err(|_| {
                tracing::error!("Outbox worker {worker_idx} channel closed");
                Error::ServiceShutdown
            })
    }

    /// Gracefully shuts down all workers.
    ///
    /// - Cancels the shared [`CancellationToken`] so no new slot is handed out.
    /// - Sends [`OutboxRequest::Shutdown`] behind whatever each worker has
    ///   queued and waits up to the shutdown timeout for acknowledgements.
    /// - If any worker misses the deadline, every worker abandons its queue
    ///   and compensates what it still holds.
    /// - Waits for the workers to finish draining.
    ///
    /// Calling it again after the first call is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        tracing::info!("Refusing new generation requests");
        self.shutdown_token.cancel();

        tracing::debug!("Notifying all outbox workers to shut down");
        let wait = self.shutdown_timeout;
        let acks = self.workers.iter().enumerate().map(|(i, worker)| async move {
            let (tx, rx) = oneshot::channel();
            let handshake = async move {
                worker
                    .send(OutboxRequest::Shutdown { response: tx })
                    .await
                    .map_err(|e| e.to_string())?;
                rx.await.map_err(|e| e.to_string())
            };
            match timeout(wait, handshake).await {
                Ok(Ok(())) => {
                    tracing::trace!("Outbox worker {i} shutdown acknowledged");
                    true
                }
                Ok(Err(e)) => {
                    tracing::error!("Outbox worker {i} did not acknowledge shutdown: {e}");
                    false
                }
                Err(_) => {
                    tracing::warn!("Outbox worker {i} shutdown timed out");
                    false
                }
            }
        });
        let acknowledged = futures::future::join_all(acks).await;

        if acknowledged.contains(&false) {
            tracing::warn!("Abandoning unpublished outbox entries");
            self.abandon_token.cancel();
        }

        let tasks = core::mem::take(&mut *self.tasks.lock());
        if timeout(wait, futures::future::join_all(tasks)).await.is_err() {
            tracing::error!("Outbox workers did not finish draining");
        }

        tracing::info!("Outbox pool shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ExcerptEvent, ExcerptId, ExcerptRecord, ExcerptStatus, SourceContext,
        publish::{ChannelEventPublisher, EventPublisher, PublishedEvent},
        store::{InMemoryRecordStore, RecordStore},
        testing::{Behavior, ScriptedPublisher},
    };
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(record_id: ExcerptId) -> OutboxEntry {
        OutboxEntry {
            record_id,
            topic: "generate-excerpt-pdf".into(),
            event: ExcerptEvent {
                record_id,
                excerpt_type: "lab-report".into(),
                excerpt_input_data: serde_json::Map::new(),
                requires_system_signature: false,
            },
        }
    }

    async fn persisted(records: &InMemoryRecordStore) -> ExcerptId {
        let record = ExcerptRecord::in_progress(
            "owner",
            "pdf",
            false,
            SourceContext::default(),
            None,
            Utc::now(),
        );
        records.insert(record.clone()).await.unwrap();
        record.id
    }

    fn spawn_with(
        publisher: Arc<dyn EventPublisher>,
        workers: usize,
        publish_timeout: Duration,
        shutdown_timeout: Duration,
    ) -> (OutboxPool, Arc<InMemoryRecordStore>) {
        let records = Arc::new(InMemoryRecordStore::new());
        let worker = OutboxWorker {
            publisher,
            records: records.clone(),
            publish_timeout,
        };
        (
            OutboxPool::spawn(&worker, workers, 8, shutdown_timeout),
            records,
        )
    }

    fn pool(
        workers: usize,
    ) -> (
        OutboxPool,
        Arc<InMemoryRecordStore>,
        mpsc::Receiver<PublishedEvent>,
    ) {
        let (publisher, rx) = ChannelEventPublisher::new(64);
        let (pool, records) = spawn_with(
            Arc::new(publisher),
            workers,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        (pool, records, rx)
    }

    #[tokio::test]
    async fn round_robin_wraps() {
        let (pool, _records, _rx) = pool(3);
        let picks: Vec<_> = (0..6).map(|_| pool.next_worker_index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn queued_entries_are_published_before_shutdown_ack() {
        let (pool, records, mut rx) = pool(2);
        let mut ids = Vec::new();
        for _ in 0..4 {
            let id = persisted(&records).await;
            ids.push(id);
            pool.reserve().await.unwrap().send(entry(id));
        }

        pool.shutdown().await;

        let mut published = Vec::new();
        while let Ok(event) = rx.try_recv() {
            published.push(event.key);
        }
        published.sort();
        ids.sort();
        assert_eq!(published, ids);

        for id in ids {
            let record = records.find(&id).await.unwrap().unwrap();
            assert_eq!(record.status, ExcerptStatus::InProgress);
        }
    }

    #[tokio::test]
    async fn refuses_slots_after_shutdown() {
        let (pool, _records, _rx) = pool(1);
        pool.shutdown().await;
        assert!(!pool.is_accepting());
        assert!(matches!(pool.reserve().await, Err(Error::ServiceShutdown)));
        // Second call returns immediately.
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn entry_landing_behind_shutdown_is_compensated() {
        let (pool, records, mut rx) = pool(1);
        let id = persisted(&records).await;
        let slot = pool.reserve().await.unwrap();

        // The slot was taken before shutdown but is only used afterwards.
        let late_send = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            slot.send(entry(id));
        };
        tokio::join!(pool.shutdown(), late_send);

        assert!(rx.try_recv().is_err());
        let record = records.find(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExcerptStatus::Failed);
    }

    #[tokio::test]
    async fn missed_shutdown_deadline_compensates_everything_held() {
        let publisher = ScriptedPublisher::new(Behavior::Hang);
        let (pool, records) = spawn_with(
            publisher.clone(),
            1,
            Duration::from_secs(5),
            Duration::from_millis(100),
        );
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = persisted(&records).await;
            ids.push(id);
            pool.reserve().await.unwrap().send(entry(id));
        }

        tokio::time::timeout(Duration::from_secs(2), pool.shutdown())
            .await
            .unwrap();

        // Only the first entry ever reached the publisher.
        assert_eq!(publisher.attempts(), 1);
        for id in ids {
            let record = records.find(&id).await.unwrap().unwrap();
            assert_eq!(record.status, ExcerptStatus::Failed);
        }
    }
}
