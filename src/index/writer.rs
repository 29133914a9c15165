use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use log::{error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, Notify},
    time::Instant,
};

use crate::{
    config::WriterSettings,
    index::{BulkOutcome, IndexOperation, SearchIndex, WriterMessage},
};

/// Counters shared between the writer handles and the ingestor task.
#[derive(Default)]
struct WriterShared {
    /// Operations enqueued but not yet submitted (successfully or not)
    pending: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    drained: Notify,
}

/// Snapshot of the writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub pending: usize,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Producer handle for the search index write path.
///
/// `enqueue` only waits for channel capacity, never for the search engine.
/// When the channel is full the caller waits; operations are never dropped
/// on the producer side.
#[derive(Clone)]
pub struct IndexWriter {
    sender: mpsc::Sender<WriterMessage>,
    shared: Arc<WriterShared>,
}

/// Thresholds and delivery policy for the ingestor.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    pub max_batch_ops: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl From<&WriterSettings> for IngestorConfig {
    fn from(settings: &WriterSettings) -> Self {
        Self {
            max_batch_ops: settings.max_batch_ops.max(1),
            flush_interval: Duration::from_millis(settings.flush_interval_ms.max(1)),
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

/// Background task that drains the writer channel into bulk requests.
pub struct BulkIngestor {
    pub label: &'static str,
    index: Arc<dyn SearchIndex>,
    receiver: mpsc::Receiver<WriterMessage>,
    buffer: Vec<IndexOperation>,
    config: IngestorConfig,
    shared: Arc<WriterShared>,
}

impl IndexWriter {
    /// Create a writer handle and the ingestor that serves it. The caller is
    /// responsible for spawning [`BulkIngestor::run`].
    pub fn new(index: Arc<dyn SearchIndex>, settings: &WriterSettings) -> (Self, BulkIngestor) {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let shared = Arc::new(WriterShared::default());
        let config = IngestorConfig::from(settings);

        info!(
            "Index writer: channel {}, {} ops/batch, {:?} flush interval, {} retries",
            settings.channel_capacity, config.max_batch_ops, config.flush_interval, config.max_retries
        );

        let ingestor = BulkIngestor {
            label: "BULK",
            index,
            receiver,
            buffer: Vec::with_capacity(config.max_batch_ops),
            config,
            shared: shared.clone(),
        };

        (
            Self {
                sender,
                shared,
            },
            ingestor,
        )
    }

    /// Queue an operation for delivery.
    pub async fn enqueue(&self, op: IndexOperation) -> anyhow::Result<()> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(WriterMessage::Operation(op)).await.is_err() {
            self.release(1);
            anyhow::bail!("Index writer is shut down");
        }
        Ok(())
    }

    /// Submit everything queued so far and wait until the ingestor has
    /// processed it. Delivery failures are counted, not returned.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Flush(ack_tx))
            .await
            .map_err(|_| anyhow::anyhow!("Index writer is shut down"))?;
        ack_rx.await.context("Index writer stopped before flushing")?;
        Ok(())
    }

    /// Resolves once no enqueued operation is waiting for submission.
    pub async fn drained(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            pending: self.pending(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            retried: self.shared.retried.load(Ordering::Relaxed),
        }
    }

    /// Ask the ingestor to flush and stop.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(WriterMessage::Shutdown).await;
    }

    fn release(&self, n: usize) {
        release_pending(&self.shared, n);
    }
}

fn release_pending(shared: &WriterShared, n: usize) {
    if shared.pending.fetch_sub(n, Ordering::AcqRel) == n {
        shared.drained.notify_waiters();
    }
}

impl BulkIngestor {
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut next_flush = Instant::now() + self.config.flush_interval;

        loop {
            tokio::select! {
                biased;

                msg = self.receiver.recv() => {
                    match msg {
                        Some(WriterMessage::Operation(op)) => {
                            self.buffer.push(op);
                            if self.buffer.len() >= self.config.max_batch_ops {
                                self.flush_buffer().await;
                                next_flush = Instant::now() + self.config.flush_interval;
                            }
                        }
                        Some(WriterMessage::Flush(ack)) => {
                            self.flush_buffer().await;
                            next_flush = Instant::now() + self.config.flush_interval;
                            let _ = ack.send(());
                        }
                        Some(WriterMessage::Shutdown) => {
                            info!("[{}] Ingestor received shutdown signal", self.label);
                            self.flush_buffer().await;
                            break;
                        }
                        None => {
                            info!("[{}] Ingestor channel closed", self.label);
                            self.flush_buffer().await;
                            break;
                        }
                    }
                }

                // Time-based flush for trickling input
                _ = tokio::time::sleep_until(next_flush) => {
                    self.flush_buffer().await;
                    next_flush = Instant::now() + self.config.flush_interval;
                }
            }
        }

        info!("[{}] Ingestor stopped", self.label);
        Ok(())
    }

    /// Submit the buffer as one bulk request, retrying failed operations per
    /// the configured policy. Failures never propagate.
    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut batch = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.max_batch_ops),
        );
        let total = batch.len();
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        let mut attempt = 0u32;

        loop {
            let result = self.index.bulk(&batch).await;
            let failures: Vec<(IndexOperation, String)> = match result {
                Ok(outcomes) => batch
                    .into_iter()
                    .zip(outcomes)
                    .filter_map(|(op, outcome)| match outcome {
                        BulkOutcome::Applied => {
                            delivered += 1;
                            None
                        },
                        BulkOutcome::Failed(reason) => Some((op, reason)),
                    })
                    .collect(),
                Err(e) => {
                    warn!(
                        "[{}] Bulk request of {} operations failed: {}",
                        self.label,
                        batch.len(),
                        e
                    );
                    let reason = e.to_string();
                    batch.into_iter().map(|op| (op, reason.clone())).collect()
                },
            };

            if failures.is_empty() {
                break;
            }

            if attempt >= self.config.max_retries {
                for (op, reason) in &failures {
                    error!(
                        "[{}] Failed to {} {}: {}",
                        self.label,
                        op.action(),
                        op.id(),
                        reason
                    );
                }
                dropped += failures.len();
                break;
            }

            attempt += 1;
            self.shared
                .retried
                .fetch_add(failures.len() as u64, Ordering::Relaxed);
            let delay = self.config.retry_backoff * attempt;
            warn!(
                "[{}] Retrying {} failed operations (attempt {}/{}) in {:?}",
                self.label,
                failures.len(),
                attempt,
                self.config.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
            batch = failures.into_iter().map(|(op, _)| op).collect();
        }

        self.shared
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.shared
            .failed
            .fetch_add(dropped as u64, Ordering::Relaxed);
        release_pending(&self.shared, total);

        info!(
            "[{}] Submitted {} operations ({} applied, {} failed)",
            self.label, total, delivered, dropped
        );
    }
}
