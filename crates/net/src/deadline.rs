//! A cancellable one-shot timer bound to a strand (spec §4.2). Expiry and
//! cancellation race through a generation counter: starting a new timer
//! bumps the generation and invokes any still-pending handler with
//! `OperationCanceled`; a `stop()` bumps the generation too but — matching
//! "peer-cancel is observable only if the strand has already scheduled the
//! callback" — does not itself invoke the handler, it simply makes the
//! in-flight expiry a no-op if it hasn't fired yet.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Code;
use crate::executor::Strand;

type Handler = Box<dyn FnOnce(Code) + Send>;

struct Inner {
    generation: u64,
    pending: Option<Handler>,
    expires_at: Option<Instant>,
}

#[derive(Clone)]
pub struct Deadline {
    strand: Strand,
    default_duration: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl Deadline {
    pub fn new(strand: Strand, default_duration: Duration) -> Self {
        Deadline {
            strand,
            default_duration,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                pending: None,
                expires_at: None,
            })),
        }
    }

    /// Starts the timer using the configured default duration.
    pub fn start(&self, handler: impl FnOnce(Code) + Send + 'static) {
        self.start_for(self.default_duration, handler);
    }

    /// Starts the timer with an explicit duration, overriding the default
    /// for this one shot.
    pub fn start_for(&self, duration: Duration, handler: impl FnOnce(Code) + Send + 'static) {
        let superseded = {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            inner.pending.take()
        };
        if let Some(prev) = superseded {
            prev(Code::OperationCanceled);
        }

        if duration.is_zero() {
            // B3: a zero-duration timer is disabled and never fires.
            let mut inner = self.inner.lock().unwrap();
            inner.expires_at = None;
            return;
        }

        let generation = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending = Some(Box::new(handler));
            inner.expires_at = Some(Instant::now() + duration);
            inner.generation
        };

        let inner = self.inner.clone();
        let strand = self.strand.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            strand.post(move || async move {
                let handler = {
                    let mut guard = inner.lock().unwrap();
                    if guard.generation != generation {
                        // Stopped or superseded before firing: silently dropped.
                        return;
                    }
                    guard.expires_at = None;
                    guard.pending.take()
                };
                if let Some(handler) = handler {
                    handler(Code::Success);
                }
            });
        });
    }

    /// Cancels the pending timer, if any. Idempotent. Per spec, the
    /// superseded handler is *not* invoked here (only a subsequent `start`
    /// does that) unless the expiry has already been scheduled, in which
    /// case the posted task simply finds nothing to call.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.generation += 1;
        inner.expires_at = None;
        inner.pending = None;
    }

    pub fn remaining(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        match inner.expires_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn expiry_invokes_success() {
        let strand = Strand::new();
        let deadline = Deadline::new(strand, Duration::from_millis(20));
        let (tx, rx) = tokio::sync::oneshot::channel();
        deadline.start(move |code| {
            let _ = tx.send(code);
        });
        let code = rx.await.unwrap();
        assert_eq!(code, Code::Success);
    }

    #[tokio::test]
    async fn restart_cancels_prior_handler() {
        let strand = Strand::new();
        let deadline = Deadline::new(strand, Duration::from_millis(50));
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        deadline.start(move |code| {
            assert_eq!(code, Code::OperationCanceled);
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        deadline.start_for(Duration::from_millis(1), |_| {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_duration_is_disabled() {
        let strand = Strand::new();
        let deadline = Deadline::new(strand, Duration::ZERO);
        deadline.start(|_| panic!("should never fire"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
