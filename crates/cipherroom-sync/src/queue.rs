use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// FIFO executor running at most one task at a time.
///
/// Tasks are fire-and-forget: failures and panics are logged and the next
/// task still runs. One queue belongs to one room session. Dropping the queue
/// lets the worker finish what is already queued and then exit.
pub struct SerialTaskQueue {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl SerialTaskQueue {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>) -> Self {
        let name: Arc<str> = name.into().into();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_worker(name.clone(), rx, pending.clone()));

        Self { name, tx, pending }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a task. It starts once every earlier task has finished.
    pub fn enqueue<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: Job = Box::new(move || task().boxed());
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(queue = %self.name, "task queue worker is gone, dropping task");
        }
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every task enqueued before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(move || async move {
            let _ = done_tx.send(());
            Ok(())
        });
        let _ = done_rx.await;
    }
}

async fn run_worker(name: Arc<str>, mut rx: mpsc::UnboundedReceiver<Job>, pending: Arc<AtomicUsize>) {
    let mut seq: u64 = 0;

    while let Some(job) = rx.recv().await {
        seq += 1;
        let outcome = AssertUnwindSafe(async move { job().await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => trace!(queue = %name, task = seq, "task finished"),
            Ok(Err(e)) => error!(queue = %name, task = seq, "queued task failed: {:#}", e),
            Err(panic) => error!(queue = %name, task = seq, "queued task panicked: {}", panic_message(&*panic)),
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(queue = %name, "task queue closed");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn runs_tasks_in_submission_order() {
        let queue = SerialTaskQueue::new("order");
        let log = Arc::new(Mutex::new(Vec::new()));

        for (i, delay) in [30u64, 1, 10, 0].into_iter().enumerate() {
            let log = log.clone();
            queue.enqueue(move || async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                log.lock().unwrap().push(i);
                Ok(())
            });
        }
        queue.flush().await;

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn never_runs_two_tasks_at_once() {
        let queue = SerialTaskQueue::new("exclusive");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            queue.enqueue(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        queue.flush().await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stall_the_queue() {
        let queue = SerialTaskQueue::new("resilient");
        let (tx, rx) = oneshot::channel();

        queue.enqueue(|| async { anyhow::bail!("fetch exploded") });
        queue.enqueue(|| async { panic!("decrypt exploded") });
        queue.enqueue(move || async move {
            let _ = tx.send("still running");
            Ok(())
        });

        assert_eq!(rx.await.unwrap(), "still running");
    }

    #[tokio::test]
    async fn tasks_enqueued_while_draining_are_appended() {
        let queue = Arc::new(SerialTaskQueue::new("append"));
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let queue_inner = queue.clone();
            let log = log.clone();
            queue.enqueue(move || async move {
                log.lock().unwrap().push("first");
                let log_later = log.clone();
                queue_inner.enqueue(move || async move {
                    log_later.lock().unwrap().push("nested");
                    Ok(())
                });
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push("first done");
                Ok(())
            });
        }
        {
            let log = log.clone();
            queue.enqueue(move || async move {
                log.lock().unwrap().push("second");
                Ok(())
            });
        }

        queue.flush().await;
        // The nested task lands behind the first flush marker.
        queue.flush().await;
        assert_eq!(*log.lock().unwrap(), vec!["first", "first done", "second", "nested"]);
    }
}
