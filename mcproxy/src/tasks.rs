use crate::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    running: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

struct RunningGuard {
    inner: Arc<Inner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if self.inner.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Process-wide owner of background work that outlives the client request
/// starting it. Tasks are never cancelled by connection teardown; shutdown
/// stops admitting new ones and waits for the running ones.
#[derive(Debug, Clone, Default)]
pub struct TaskPool {
    inner: Arc<Inner>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the pool is shut down and `task` was dropped.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            warn!("task pool is shut down, {} task dropped", name);
            return false;
        }
        self.inner.running.fetch_add(1, Ordering::SeqCst);
        let guard = RunningGuard {
            inner: self.inner.clone(),
        };
        tokio::spawn(async move {
            let _guard = guard;
            task.await;
            trace!("{} task done", name);
        });
        true
    }

    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.running() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stops admitting tasks and waits up to `timeout` for running ones.
    /// Returns whether the pool drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.closed.store(true, Ordering::Release);
        let running = self.running();
        if running > 0 {
            info!("waiting for {} background tasks", running);
        }
        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();
        if !drained {
            warn!(
                "{} background tasks still running after {:?}",
                self.running(),
                timeout
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_wait_idle_waits_for_tasks() {
        let pool = TaskPool::new();
        let (tx, rx) = oneshot::channel::<()>();
        assert!(pool.spawn("blocked", async move {
            let _ = rx.await;
        }));
        assert_eq!(pool.running(), 1);
        let wait = tokio::time::timeout(Duration::from_millis(50), pool.wait_idle()).await;
        assert!(wait.is_err());

        tx.send(()).unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let pool = TaskPool::new();
        assert!(pool.shutdown(Duration::from_millis(10)).await);
        assert!(pool.is_closed());
        assert!(!pool.spawn("late", async {}));
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_times_out() {
        let pool = TaskPool::new();
        let (_tx, rx) = oneshot::channel::<()>();
        pool.spawn("stuck", async move {
            let _ = rx.await;
        });
        assert!(!pool.shutdown(Duration::from_millis(20)).await);
        assert_eq!(pool.running(), 1);
    }
}
