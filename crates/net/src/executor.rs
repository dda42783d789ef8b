//! A strand is a serial executor: tasks posted to the same strand never run
//! concurrently and observe program order, the way a boost::asio strand
//! does atop a shared thread pool. Here the "thread pool" is simply the
//! tokio multi-thread runtime (`threads` in settings maps to
//! `Builder::worker_threads`); a strand is one mailbox task draining a
//! `flume` queue, which is the same serialize-through-a-task idiom the
//! session proxy's control loop already uses.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Task = Box<dyn FnOnce() -> BoxFuture + Send>;

tokio::task_local! {
    static CURRENT_STRAND: u64;
}

/// A serial executor bound to one logical id. Clone is cheap; all clones
/// share the same underlying mailbox and therefore the same ordering
/// guarantee.
#[derive(Clone)]
pub struct Strand {
    id: u64,
    tx: flume::Sender<Task>,
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strand").field("id", &self.id).finish()
    }
}

impl Strand {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::unbounded::<Task>();
        tokio::spawn(Self::drain(id, rx));
        Strand { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    async fn drain(id: u64, rx: flume::Receiver<Task>) {
        CURRENT_STRAND
            .scope(id, async move {
                while let Ok(task) = rx.recv_async().await {
                    task().await;
                }
            })
            .await
    }

    fn on_this_strand(&self) -> bool {
        CURRENT_STRAND.try_with(|&id| id == self.id).unwrap_or(false)
    }

    /// Schedules `f` on this strand. Always asynchronous: never runs
    /// inline, even when called from this same strand.
    pub fn post<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: Task = Box::new(move || Box::pin(f()) as BoxFuture);
        // The mailbox is unbounded and only dropped with the strand itself;
        // a send error means the strand's drain loop has already exited.
        let _ = self.tx.send(task);
    }

    /// Runs `f` inline if already executing on this strand, otherwise posts
    /// it. The returned future resolves once `f` has actually run when
    /// inline, or immediately once `f` has been enqueued otherwise — callers
    /// that need the result back use a reply channel inside `f`.
    pub fn dispatch<F, Fut>(&self, f: F) -> BoxFuture
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.on_this_strand() {
            Box::pin(f())
        } else {
            self.post(f);
            Box::pin(async {})
        }
    }
}

impl Default for Strand {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn posted_tasks_run_in_order() {
        let strand = Strand::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = order.clone();
            strand.post(move || async move {
                order.lock().await.push(i);
            });
        }
        // Drain: post one final task and wait for it to observe completion.
        let (tx, rx) = tokio::sync::oneshot::channel();
        strand.post(move || async move {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(*order.lock().await, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dispatch_runs_inline_on_same_strand() {
        let strand = Strand::new();
        let ran_inline = Arc::new(AtomicBool::new(false));
        let s2 = strand.clone();
        let flag = ran_inline.clone();
        strand.post(move || async move {
            // We are now executing on the strand; dispatch should run f
            // before this async block completes, i.e. inline.
            s2.dispatch(move || {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                }
            })
            .await;
            assert!(flag.load(Ordering::SeqCst));
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(ran_inline.load(Ordering::SeqCst));
    }
}
