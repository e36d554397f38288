//! Bounded request-processing pool (spec §4.1, §5, §9).
//!
//! Sized by a required configuration value rather than a hidden default — the spec's
//! own lineage was bitten by a thread pool that started at 10 and was later bumped to
//! 200 under load. A `tokio::sync::Semaphore` gates concurrent in-flight requests;
//! acquiring a permit never blocks the async executor, only the calling task, so long
//! disk I/O inside a permit never holds up the dispatcher for unrelated requests.

use std::sync::Arc;

use shardkeeper_core::ClusterError;
use tokio::sync::Semaphore;

pub struct RequestPool {
    semaphore: Arc<Semaphore>,
}

impl RequestPool {
    /// `size` must be > 0; enforced by `ClusterConfig::validate` at load time, not here.
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    /// Runs `work` once a permit is available. Returns `Cancelled` if the semaphore is
    /// closed out from under a shutting-down process.
    pub async fn run<F, Fut, T>(&self, work: F) -> Result<T, ClusterError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ClusterError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ClusterError::Cancelled("request pool closed".into()))?;
        work().await
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bounds_concurrent_work() {
        let pool = Arc::new(RequestPool::new(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                pool.run(|| async {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ClusterError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
