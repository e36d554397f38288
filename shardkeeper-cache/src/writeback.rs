//! Non-blocking cache admission queue (spec §4.2, §9).
//!
//! Acknowledged `PutChunk`s never ride this path — they go through the synchronous
//! disk write and call `HybridCache::admit` directly. This queue exists for cache-line
//! admission on read-miss refill and speculative prefetch: the caller enqueues bytes
//! and returns immediately, a single background task drains the queue FIFO (per shard,
//! since the queue itself is FIFO overall and a shard is only ever enqueued once per
//! refill) and performs admission, optionally persisting the bytes first if they did
//! not already come from a durable write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shardkeeper_core::ShardId;
use tokio::sync::mpsc;

use crate::cache::HybridCache;

/// Invoked by the writeback worker before cache admission, for bytes that did not
/// already reach durable storage via the synchronous `PutChunk` path (e.g. a
/// speculative prefetch). Read-miss refills that already read the bytes from disk pass
/// `None` since there is nothing left to persist.
pub trait PersistHook: Send + Sync {
    fn persist(&self, shard_id: ShardId, bytes: &[u8]) -> anyhow::Result<()>;
}

struct Job {
    shard_id: ShardId,
    bytes: Arc<[u8]>,
    persist: Option<Arc<dyn PersistHook>>,
}

/// Handle held by callers wanting to enqueue a non-blocking admission.
#[derive(Clone)]
pub struct WritebackQueue {
    sender: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
    high_water_mark: usize,
}

impl WritebackQueue {
    /// Spawn the single background worker and return a handle to enqueue admissions.
    pub fn spawn(cache: Arc<HybridCache>, high_water_mark: usize) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let depth = Arc::new(AtomicUsize::new(0));
        let worker_depth = depth.clone();

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Some(hook) = &job.persist {
                    if let Err(err) = hook.persist(job.shard_id, &job.bytes) {
                        tracing::warn!(shard_id = %job.shard_id, error = %err, "writeback persist failed, admission skipped");
                        worker_depth.fetch_sub(1, Ordering::AcqRel);
                        continue;
                    }
                }
                cache.admit(job.shard_id, job.bytes.clone());
                worker_depth.fetch_sub(1, Ordering::AcqRel);
            }
        });

        Self {
            sender,
            depth,
            high_water_mark,
        }
    }

    /// Whether the queue is past its high-water mark (spec §5: "new read-miss
    /// admissions bypass the cache and are served directly from disk until the queue
    /// drains"). Callers should check this before enqueuing and skip admission on
    /// `true`, serving the already-fetched bytes straight to the requester instead.
    pub fn should_bypass(&self) -> bool {
        self.depth.load(Ordering::Acquire) >= self.high_water_mark
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Enqueue bytes for async admission. Never blocks; the unbounded channel drops
    /// nothing (spec §5: "the writeback queue drops nothing").
    pub fn enqueue(&self, shard_id: ShardId, bytes: Arc<[u8]>, persist: Option<Arc<dyn PersistHook>>) {
        self.depth.fetch_add(1, Ordering::AcqRel);
        // The receiver only disappears if the worker task panicked; there is nothing a
        // caller can usefully do but drop the job, so a send failure is silently
        // absorbed here rather than propagated as a cache-correctness error.
        let _ = self.sender.send(Job {
            shard_id,
            bytes,
            persist,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeeper_core::MetricsRegistry;

    #[tokio::test]
    async fn enqueued_bytes_eventually_become_visible_in_cache() {
        let cache = Arc::new(HybridCache::new(4, Arc::new(MetricsRegistry::new().unwrap())));
        let queue = WritebackQueue::spawn(cache.clone(), 1000);

        queue.enqueue(ShardId(1), Arc::from(vec![1u8, 2, 3]), None);

        for _ in 0..100 {
            if cache.contains(ShardId(1)) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(cache.contains(ShardId(1)));
    }

    #[tokio::test]
    async fn bypass_flips_once_depth_crosses_high_water_mark() {
        let cache = Arc::new(HybridCache::new(4, Arc::new(MetricsRegistry::new().unwrap())));
        let queue = WritebackQueue::spawn(cache, 1);
        assert!(!queue.should_bypass());
        queue.enqueue(ShardId(1), Arc::from(vec![1u8]), None);
        assert!(queue.should_bypass());
    }
}
