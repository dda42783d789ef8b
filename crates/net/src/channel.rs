//! Proxy + inactivity/expiration timers + negotiated protocol state (spec
//! §4.7). A `Channel` is the unit sessions hold in their registries and the
//! unit protocols attach to; it owns exactly one `Proxy`, a local
//! `Distributor`, and the handshake-writable fields protocols mutate.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::deadline::Deadline;
use crate::distributor::{Distributor, Message};
use crate::error::Code;
use crate::executor::Strand;
use crate::framing::{self, Heading};
use crate::proxy::{Proxy, ProxyConfig};
use crate::socket::Socket;

#[derive(Debug, Clone, Copy)]
pub struct ChannelTimeouts {
    pub inactivity: Duration,
    pub expiration: Duration,
}

pub struct Channel {
    identifier: u64,
    nonce: u64,
    negotiated_version: Arc<AtomicU32>,
    peer_version: Mutex<Option<Arc<dyn std::any::Any + Send + Sync>>>,
    start_height: AtomicU64,
    quiet: AtomicBool,
    paused: AtomicBool,
    strand: Strand,
    proxy: Arc<Proxy>,
    distributor: Arc<Distributor>,
    inactivity: Deadline,
    expiration: Deadline,
    config: ProxyConfig,
}

impl Channel {
    /// Builds the inactivity handler that stops `proxy` with
    /// `ChannelInactive` on a genuine expiry; shared by the handler
    /// installed after every frame and the one installed on `resume`, so
    /// resetting the deadline never supersedes it with a no-op.
    fn inactivity_expired(proxy: Arc<Proxy>) -> impl FnOnce(Code) + Send + 'static {
        move |code| {
            if code == Code::Success {
                tokio::spawn(async move {
                    proxy.stop(Code::ChannelInactive).await;
                });
            }
        }
    }

    pub fn new(
        identifier: u64,
        nonce: u64,
        socket: Arc<Socket>,
        config: ProxyConfig,
        timeouts: ChannelTimeouts,
    ) -> Arc<Self> {
        let strand = Strand::new();
        let proxy = Proxy::new(socket, strand.clone(), config);
        let distributor = Arc::new(Distributor::new());
        let negotiated_version = Arc::new(AtomicU32::new(0));
        let inactivity = Deadline::new(strand.clone(), timeouts.inactivity);
        let strand_for_expiration = strand.clone();

        let channel = Arc::new(Channel {
            identifier,
            nonce,
            negotiated_version: negotiated_version.clone(),
            peer_version: Mutex::new(None),
            start_height: AtomicU64::new(0),
            quiet: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            strand,
            proxy: proxy.clone(),
            distributor: distributor.clone(),
            inactivity: inactivity.clone(),
            expiration: Deadline::new(strand_for_expiration, timeouts.expiration),
            config,
        });

        let proxy_for_frames = proxy.clone();
        proxy.set_frame_handler(Arc::new(move |id, payload| {
            let distributor = distributor.clone();
            let inactivity = inactivity.clone();
            let proxy = proxy_for_frames.clone();
            let version = negotiated_version.load(Ordering::SeqCst);
            Box::pin(async move {
                inactivity.start(Channel::inactivity_expired(proxy));
                distributor.notify(id, version, &payload).await
            })
        }));

        channel
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn negotiated_version(&self) -> u32 {
        self.negotiated_version.load(Ordering::SeqCst)
    }

    /// Writable only during handshake (spec data model note).
    pub fn set_negotiated_version(&self, version: u32) {
        self.negotiated_version.store(version, Ordering::SeqCst);
    }

    pub async fn peer_version<M: Message>(&self) -> Option<Arc<M>> {
        self.peer_version
            .lock()
            .await
            .clone()
            .and_then(|any| any.downcast::<M>().ok())
    }

    pub async fn set_peer_version<M: Message>(&self, message: Arc<M>) {
        *self.peer_version.lock().await = Some(message);
    }

    pub fn start_height(&self) -> u64 {
        self.start_height.load(Ordering::SeqCst)
    }

    pub fn set_start_height(&self, height: u64) {
        self.start_height.store(height, Ordering::SeqCst);
    }

    pub fn quiet(&self) -> bool {
        self.quiet.load(Ordering::SeqCst)
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    pub async fn subscribe_stop<F, Fut>(&self, handler: F) -> Code
    where
        F: FnMut(Code) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        self.proxy.subscribe_stop(handler).await
    }

    /// Starts both timers and resumes the read loop.
    pub fn resume(self: &Arc<Self>) {
        self.paused.store(false, Ordering::SeqCst);
        self.inactivity
            .start(Channel::inactivity_expired(self.proxy.clone()));
        let proxy = self.proxy.clone();
        self.expiration.start(move |code| {
            if code == Code::Success {
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    proxy.stop(Code::ChannelExpired).await;
                });
            }
        });
        self.proxy.resume();
    }

    /// Stops both timers and pauses the read loop. Does not stop the proxy.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.inactivity.stop();
        self.expiration.stop();
        self.proxy.pause();
    }

    /// Stops both timers, stops the proxy (which releases attached
    /// protocols via its stop subscriber), and notifies the local
    /// distributor's subscribers.
    pub async fn stop(&self, code: Code) {
        self.inactivity.stop();
        self.expiration.stop();
        self.proxy.stop(code).await;
        self.distributor.stop(code).await;
    }

    pub fn stop_code(&self) -> Option<Code> {
        self.proxy.stop_code()
    }

    /// Serialises `msg` with the negotiated version and the configured
    /// magic, then enqueues it on the proxy's write queue. Invokes
    /// `handler` with `Code::Unknown` on a serialisation failure without
    /// touching the socket.
    pub async fn send<M: Message>(
        self: &Arc<Self>,
        msg: &M,
        handler: impl FnOnce(Code) + Send + 'static,
    ) {
        let version = self.negotiated_version();
        let payload = match msg.encode(version) {
            Ok(bytes) => bytes,
            Err(_) => {
                handler(Code::Unknown);
                return;
            }
        };
        let heading = Heading::new(self.config.magic, M::ID, &payload);
        let mut frame = Vec::with_capacity(framing::HEADING_SIZE + payload.len());
        frame.extend_from_slice(&heading.to_bytes());
        frame.extend_from_slice(&payload);
        self.proxy.write(frame, handler).await;
    }

    /// Registers `handler` with the channel's local distributor.
    pub async fn subscribe<M, F, Fut>(&self, handler: F) -> Code
    where
        M: Message,
        F: FnMut(Code, Option<Arc<M>>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        self.distributor.subscribe::<M, F, Fut>(handler).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::connected_tcp_pair;

    #[tokio::test]
    async fn zero_duration_timeouts_never_fire() {
        let (client, _server) = connected_tcp_pair().await;
        let socket = Arc::new(Socket::from_stream(client).unwrap());
        let channel = Channel::new(
            1,
            42,
            socket,
            ProxyConfig {
                magic: 1,
                witness_enabled: false,
                validate_checksum: false,
            },
            ChannelTimeouts {
                inactivity: Duration::ZERO,
                expiration: Duration::ZERO,
            },
        );
        channel.resume();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(channel.stop_code().is_none());
    }

    #[tokio::test]
    async fn stop_is_observable_through_proxy_stop_code() {
        let (client, _server) = connected_tcp_pair().await;
        let socket = Arc::new(Socket::from_stream(client).unwrap());
        let channel = Channel::new(
            2,
            7,
            socket,
            ProxyConfig {
                magic: 1,
                witness_enabled: false,
                validate_checksum: false,
            },
            ChannelTimeouts {
                inactivity: Duration::from_secs(60),
                expiration: Duration::from_secs(60),
            },
        );
        channel.stop(Code::ChannelStopped).await;
        assert_eq!(channel.stop_code(), Some(Code::ChannelStopped));
    }

    /// P7/§4.7: receiving a frame resets the inactivity deadline rather
    /// than disarming it — the channel must still stop with
    /// `ChannelInactive` once the (short) inactivity window next elapses.
    #[tokio::test]
    async fn inactivity_still_fires_after_a_frame_was_received() {
        use tokio::io::AsyncWriteExt;

        let (client, mut server) = connected_tcp_pair().await;
        let socket = Arc::new(Socket::from_stream(client).unwrap());
        let config = ProxyConfig {
            magic: 1,
            witness_enabled: false,
            validate_checksum: false,
        };
        let channel = Channel::new(
            3,
            99,
            socket,
            config,
            ChannelTimeouts {
                inactivity: Duration::from_millis(50),
                expiration: Duration::from_secs(60),
            },
        );
        channel.resume();

        let heading = Heading::new(config.magic, framing::MessageId::Ping, &[]);
        server.write_all(&heading.to_bytes()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.stop_code(), Some(Code::ChannelInactive));
    }
}
