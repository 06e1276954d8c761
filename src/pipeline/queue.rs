use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::EnrichmentPipeline;
use crate::observability::Metrics;

/// One entry waiting for enrichment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichmentRequest {
    pub entry_id: String,
    pub feed_id: String,
    /// Re-enrich even if the entry was enriched before
    pub force: bool,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("worker {0} channel is closed")]
    WorkerClosed(usize),
}

/// EnrichmentQueue distributes enrichment requests to the worker pool
///
/// Architecture:
/// 1. API calls `queue.enqueue(request)`
/// 2. feed_id is hashed onto one of N worker channels
/// 3. Each channel is drained by exactly one task, so entries of one feed
///    are enriched one at a time while different feeds run concurrently
/// 4. Backpressure via bounded channels
pub struct EnrichmentQueue {
    worker_channels: Vec<mpsc::Sender<EnrichmentRequest>>,
    metrics: Arc<Metrics>,
}

impl EnrichmentQueue {
    /// Create the queue and one receiver per worker
    pub fn new(
        num_workers: usize,
        channel_size: usize,
        metrics: Arc<Metrics>,
    ) -> (Self, Vec<mpsc::Receiver<EnrichmentRequest>>) {
        info!(num_workers, channel_size, "Creating EnrichmentQueue with worker channels");

        let mut worker_channels = Vec::with_capacity(num_workers);
        let mut worker_receivers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(channel_size);
            worker_channels.push(tx);
            worker_receivers.push(rx);
            debug!(worker_id, "Created worker channel");
        }

        let queue = Self {
            worker_channels,
            metrics,
        };
        (queue, worker_receivers)
    }

    /// Worker index that owns `feed_id`
    pub fn worker_for(&self, feed_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        feed_id.hash(&mut hasher);
        (hasher.finish() % self.worker_channels.len() as u64) as usize
    }

    /// Hand a request to the worker owning its feed. Waits when that worker's
    /// channel is full.
    pub async fn enqueue(&self, request: EnrichmentRequest) -> Result<usize, QueueError> {
        let worker_idx = self.worker_for(&request.feed_id);
        let entry_id = request.entry_id.clone();

        match self.worker_channels[worker_idx].send(request).await {
            Ok(()) => {
                self.metrics.entry_enqueued();
                debug!(%entry_id, worker_idx, "Enrichment request sent to worker");
                Ok(worker_idx)
            }
            Err(_) => {
                warn!(%entry_id, worker_idx, "Worker channel closed, request not delivered");
                Err(QueueError::WorkerClosed(worker_idx))
            }
        }
    }

    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// Check if all worker channels are healthy (not closed)
    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
    }

    /// Spawn one draining task per receiver
    pub fn spawn_workers(
        pipeline: Arc<EnrichmentPipeline>,
        receivers: Vec<mpsc::Receiver<EnrichmentRequest>>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(worker_id, rx)| tokio::spawn(run_worker(worker_id, pipeline.clone(), rx)))
            .collect()
    }
}

async fn run_worker(
    worker_id: usize,
    pipeline: Arc<EnrichmentPipeline>,
    mut rx: mpsc::Receiver<EnrichmentRequest>,
) {
    info!(worker_id, "Enrichment worker started");

    while let Some(request) = rx.recv().await {
        // a run already holding the entry (e.g. from /read) finishes first
        match pipeline.enrich_when_idle(&request.entry_id, request.force).await {
            Ok(report) => {
                debug!(worker_id, entry_id = %report.entry_id, state = ?report.state, "Request processed")
            }
            Err(e) => warn!(worker_id, entry_id = %request.entry_id, error = %e, "Enrichment request failed"),
        }
    }

    info!(worker_id, "Enrichment worker stopped");
}
