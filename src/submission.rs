//! Bounded pool of submission workers.
//!
//! Each worker owns a bounded queue. Frames are routed by a hash of their
//! source callsign, so check results for one station are classified and
//! submitted in the order they were received, while different stations are
//! processed concurrently. A full queue blocks the caller, which pushes
//! back on the feed reader instead of growing without bound.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::aprs_packet::Frame;
use crate::callsign::Callsign;
use crate::classifier::{CheckResult, classify};
use crate::config::PoolConfig;
use crate::error::Result;

/// Destination for check results
#[async_trait]
pub trait CheckSink: Send + Sync + 'static {
    async fn submit(&self, result: &CheckResult) -> Result<()>;
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Submitted,
    /// Classification failed; nothing was sent
    Dropped,
    /// Submission was attempted and failed
    Failed,
}

/// Per-pool counters, summed over all workers on shutdown
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl PoolStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Submitted => self.submitted += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

impl AddAssign for PoolStats {
    fn add_assign(&mut self, other: Self) {
        self.submitted += other.submitted;
        self.dropped += other.dropped;
        self.failed += other.failed;
    }
}

/// Classify one frame and submit the result. Errors are logged, never returned.
pub async fn process_frame(sink: &dyn CheckSink, frame: &Frame) -> Outcome {
    let result = match classify(frame) {
        Ok(result) => {
            metrics::counter!("check.classified", "kind" => frame.payload.kind()).increment(1);
            result
        }
        Err(e) => {
            metrics::counter!("check.classify_failed").increment(1);
            warn!("Dropping {} frame from {}: {}", frame.payload.kind(), frame.source, e);
            return Outcome::Dropped;
        }
    };

    match sink.submit(&result).await {
        Ok(()) => Outcome::Submitted,
        Err(e) => {
            metrics::counter!("check.submit_failed").increment(1);
            error!("Failed to submit check result for {}: {}", result.callsign, e);
            Outcome::Failed
        }
    }
}

pub struct SubmissionPool {
    shards: Vec<flume::Sender<Frame>>,
    handles: Vec<JoinHandle<PoolStats>>,
}

impl SubmissionPool {
    /// Spawn `config.workers` workers (at least one) feeding `sink`
    pub fn start(sink: Arc<dyn CheckSink>, config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = flume::bounded::<Frame>(capacity);
            let sink = sink.clone();

            let handle = tokio::spawn(
                async move {
                    debug!("Submission worker {} started", worker_id);
                    let mut stats = PoolStats::default();
                    while let Ok(frame) = rx.recv_async().await {
                        stats.record(process_frame(sink.as_ref(), &frame).await);
                        metrics::gauge!("submission.queue.depth", "worker" => worker_id.to_string())
                            .set(rx.len() as f64);
                    }
                    debug!("Submission worker {} stopped", worker_id);
                    stats
                }
                .instrument(tracing::info_span!("submission_worker", worker_id)),
            );

            shards.push(tx);
            handles.push(handle);
        }

        info!(
            "Spawned {} submission workers (queue capacity {} each)",
            workers, capacity
        );

        Self { shards, handles }
    }

    pub fn workers(&self) -> usize {
        self.shards.len()
    }

    /// Worker index handling a station
    pub fn shard_for(&self, callsign: &Callsign) -> usize {
        let mut hasher = DefaultHasher::new();
        callsign.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Queue a frame for classification and submission.
    ///
    /// Waits while the station's worker queue is full. Returns `false` if the
    /// worker has gone away.
    pub async fn dispatch(&self, frame: Frame) -> bool {
        let shard = self.shard_for(&frame.source);
        let tx = &self.shards[shard];
        if tx.is_full() {
            metrics::counter!("submission.queue.blocked").increment(1);
            debug!("Submission queue {} full, waiting", shard);
        }
        match tx.send_async(frame).await {
            Ok(()) => true,
            Err(flume::SendError(frame)) => {
                error!(
                    "Submission worker {} is gone, dropping frame from {}",
                    shard, frame.source
                );
                false
            }
        }
    }

    /// Close the queues and let workers drain for up to `grace`.
    /// Workers still busy after that are aborted.
    pub async fn shutdown(self, grace: Duration) -> PoolStats {
        let Self { shards, handles } = self;
        let queued: usize = shards.iter().map(|tx| tx.len()).sum();
        drop(shards);

        info!(
            "Waiting up to {}s for {} queued submissions to finish",
            grace.as_secs(),
            queued
        );

        let deadline = tokio::time::Instant::now() + grace;
        let mut total = PoolStats::default();
        for (worker_id, mut handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(stats)) => total += stats,
                Ok(Err(e)) => error!("Submission worker {} panicked: {}", worker_id, e),
                Err(_) => {
                    warn!(
                        "Submission worker {} did not finish within grace period, aborting",
                        worker_id
                    );
                    handle.abort();
                }
            }
        }

        info!(
            "Submission pool stopped: {} submitted, {} dropped, {} failed",
            total.submitted, total.dropped, total.failed
        );
        total
    }
}
