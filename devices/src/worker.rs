//! Bounded worker pool for slow device work
//!
//! Poll cycles, image downloads and disk writes run here so they never
//! block an adapter's event pump. Concurrency is capped by a semaphore and
//! a panicking task is contained without affecting its neighbors.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default cap on concurrently running tasks
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_concurrent: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

struct PoolInner {
    semaphore: Arc<Semaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Shared handle onto one pool of workers
///
/// Clones submit into the same pool. Tasks acquire a permit before running,
/// so at most `max_concurrent` execute at once; the rest queue inside the
/// runtime until a permit frees up.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                handles: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Run `task` on the pool and hand its output to `on_result`.
    ///
    /// The callback is skipped when the task panics; the panic is logged and
    /// contained. After `close` new submissions are dropped.
    pub fn submit<T, F, C>(&self, task: F, on_result: C)
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!("Worker pool is closed, dropping submitted task");
            return;
        }

        let semaphore = self.inner.semaphore.clone();
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Worker pool closed while task was queued");
                    return;
                }
            };
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(value) => on_result(value),
                Err(panic) => {
                    let text = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!("Worker task panicked: {}", text);
                }
            }
        });

        if let Ok(mut handles) = self.inner.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }
    }

    /// Stop accepting work and abort everything still queued or running
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.semaphore.close();
        if let Ok(mut handles) = self.inner.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("closed", &self.is_closed())
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_submit_runs_task_and_callback() {
        let pool = WorkerPool::default();
        let (tx, rx) = oneshot::channel();

        pool.submit(async { 6 * 7 }, move |value| {
            let _ = tx.send(value);
        });

        assert_eq!(rx.await.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_pool() {
        let pool = WorkerPool::default();

        pool.submit(
            async {
                panic!("boom");
            },
            |_: ()| {},
        );

        // give the panicking task time to run and release its permit
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, rx) = oneshot::channel();
        pool.submit(async { "still alive" }, move |value| {
            let _ = tx.send(value);
        });
        assert_eq!(rx.await.ok(), Some("still alive"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(WorkerPoolConfig { max_concurrent: 2 });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            let done = done.clone();
            pool.submit(
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                },
                move |_| {
                    done.fetch_add(1, Ordering::SeqCst);
                },
            );
        }

        for _ in 0..100 {
            if done.load(Ordering::SeqCst) == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_drops_submissions() {
        let pool = WorkerPool::default();
        pool.close();
        assert!(pool.is_closed());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        pool.submit(
            async move {
                flag.store(true, Ordering::SeqCst);
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
