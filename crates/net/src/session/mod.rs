//! Lifecycle of many channels (spec §4.11). A `Session` is attached to the
//! `Net` facade and runs its bookkeeping on the network strand; concrete
//! sessions (`outbound`, `inbound`, `manual`, `seed`) each drive their own
//! accept/connect loop atop the shared primitives here.

pub mod inbound;
pub mod manual;
pub mod outbound;
pub mod seed;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::error::Code;
use crate::executor::Strand;
use crate::net_io::{Acceptor, Connector};
use crate::subscriber::KeyedSubscriber;

pub type ObjectKey = u64;

pub struct Session {
    strand: Strand,
    stop_subscriber: KeyedSubscriber<ObjectKey, Code>,
    next_key: AtomicU64,
    stopped: AtomicBool,
    retry_timeout: Duration,
    acceptors: tokio::sync::Mutex<Vec<Arc<Acceptor>>>,
    connectors: tokio::sync::Mutex<Vec<Arc<Connector>>>,
}

impl Session {
    pub fn new(strand: Strand, retry_timeout: Duration) -> Arc<Self> {
        Arc::new(Session {
            strand,
            stop_subscriber: KeyedSubscriber::new(),
            next_key: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            retry_timeout,
            acceptors: tokio::sync::Mutex::new(Vec::new()),
            connectors: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Registers `handler` under a freshly minted key; returns the key so
    /// the caller may `unsubscribe_close` later.
    pub async fn subscribe_stop<F, Fut>(&self, handler: F) -> ObjectKey
    where
        F: FnMut(Code) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.stop_subscriber.subscribe(key, handler).await;
        key
    }

    pub async fn unsubscribe_close(&self, key: ObjectKey) {
        self.stop_subscriber.unsubscribe(&key, |c| c).await;
    }

    /// Schedules `cb` after `duration`, or a randomised retry timeout
    /// (uniform in `[retry_timeout/2, retry_timeout]`) when `duration` is
    /// `None`.
    pub fn defer(self: &Arc<Self>, duration: Option<Duration>, cb: impl FnOnce() + Send + 'static) {
        let delay = duration.unwrap_or_else(|| {
            let half = self.retry_timeout / 2;
            let jitter = rand::rng().random_range(0..=half.as_millis().max(1) as u64);
            half + Duration::from_millis(jitter)
        });
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_stopped() {
                cb();
            }
        });
    }

    /// Constructs an acceptor that is stopped automatically when the
    /// session stops.
    pub async fn create_acceptor(self: &Arc<Self>, suspended: Arc<AtomicBool>) -> Arc<Acceptor> {
        let acceptor = Arc::new(Acceptor::new(suspended));
        self.acceptors.lock().await.push(acceptor.clone());
        acceptor
    }

    /// Constructs a connector that is stopped automatically when the
    /// session stops. `seed` does not change behaviour here (no distinct
    /// connector type); it documents intent at the call site (spec
    /// `create_connector(seed_flag)`).
    pub async fn create_connector(self: &Arc<Self>, timeout: Duration, _seed: bool) -> Arc<Connector> {
        let connector = Arc::new(Connector::new(timeout));
        self.connectors.lock().await.push(connector.clone());
        connector
    }

    /// Posts the handshake to the channel strand; on success, attaches the
    /// session-specific protocols and resumes the read loop; on failure,
    /// stops the channel with the handshake's code (so the socket is
    /// always closed rather than left paused-but-open) and then invokes
    /// `on_start` with that same code. `on_stop` is registered on the
    /// channel's own stop subscriber regardless of handshake outcome, so
    /// it fires exactly once whether the channel died during handshake or
    /// later in its life.
    pub async fn start_channel<H, A>(
        &self,
        channel: Arc<Channel>,
        handshake: H,
        attach_protocols: A,
        on_start: impl FnOnce(Code) + Send + 'static,
        on_stop: impl FnMut(Code) -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>>
        + Send
        + 'static,
    ) where
        H: FnOnce(Arc<Channel>, Box<dyn FnOnce(Code) + Send>) + Send + 'static,
        A: FnOnce(Arc<Channel>) + Send + 'static,
    {
        channel.subscribe_stop(on_stop).await;
        let strand = channel.strand().clone();
        strand.post(move || async move {
            // The handshake protocol must see its own read loop running
            // (spec §4.7: "session calls handshake protocols, which call
            // resume()") — it subscribes to `version`/`verack` before it
            // can possibly receive them, so the channel is resumed here,
            // ahead of the handshake itself, rather than after it completes.
            channel.resume();
            let (tx, rx) = oneshot::channel();
            handshake(
                channel.clone(),
                Box::new(move |code| {
                    let _ = tx.send(code);
                }),
            );
            let code = rx.await.unwrap_or(Code::OperationCanceled);
            if code.is_success() {
                attach_protocols(channel.clone());
                on_start(Code::Success);
            } else {
                channel.stop(code).await;
                on_start(code);
            }
        });
    }

    pub async fn stop(&self, code: Code) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for acceptor in self.acceptors.lock().await.drain(..) {
            acceptor.stop();
        }
        // Connectors have no separate cancel hook (spec §4.8): each call
        // already races its own timeout, so dropping the list is enough to
        // stop new connects from being attributed to this session.
        self.connectors.lock().await.clear();
        self.stop_subscriber.stop(code, |c| c).await;
    }
}
