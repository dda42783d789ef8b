//! One persistent connector per configured endpoint, retried indefinitely
//! on failure (spec §4.11 "SessionManual"). Each peer gets its own retry
//! loop so a dead endpoint does not block the others; the loop only stops
//! if the session stops or the caller-supplied `on_channel` callback
//! returns `false` ("drop the manual subscription" in spec terms).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::{Channel, ChannelTimeouts};
use crate::error::Code;
use crate::net_io::{Connector, Endpoint};
use crate::protocol::{self, HandshakeSettings, Protocol, ProtocolPing, ProtocolReject, ProtocolVersion, VersionMessage};
use crate::proxy::ProxyConfig;
use crate::session::Session;

#[derive(Clone)]
pub struct ManualSettings {
    pub peers: Vec<SocketAddr>,
    pub connect_timeout: Duration,
    pub proxy: ProxyConfig,
    pub channel_timeouts: ChannelTimeouts,
    pub handshake: HandshakeSettings,
    pub heartbeat: Duration,
    pub local_version: VersionMessage,
    pub enable_reject: bool,
    /// Consulted with the channel's terminal stop code once a manual
    /// channel ends; returning `false` drops that peer's retry loop
    /// instead of reconnecting (spec §4.11: "the handler passed to
    /// connect may return false to drop the manual subscription").
    /// Defaults to always retrying when unset.
    pub on_channel_stopped: Option<Arc<dyn Fn(Code) -> bool + Send + Sync>>,
}

pub struct SessionManual {
    session: Arc<Session>,
    settings: ManualSettings,
    next_identifier: AtomicU32,
}

impl SessionManual {
    pub fn new(session: Arc<Session>, settings: ManualSettings) -> Arc<Self> {
        Arc::new(SessionManual {
            session,
            settings,
            next_identifier: AtomicU32::new(1),
        })
    }

    pub fn start(self: &Arc<Self>) {
        for peer in self.settings.peers.clone() {
            let this = self.clone();
            tokio::spawn(async move { this.run_peer(peer).await });
        }
    }

    async fn run_peer(self: Arc<Self>, peer: SocketAddr) {
        while !self.session.is_stopped() {
            let keep_going = self.clone().connect_once(peer).await;
            if !keep_going {
                info!(%peer, "manual connection subscription dropped, not retrying");
                return;
            }
            if self.session.is_stopped() {
                return;
            }
            let (tx, rx) = tokio::sync::oneshot::channel();
            let session = self.session.clone();
            session.defer(None, move || {
                let _ = tx.send(());
            });
            let _ = rx.await;
        }
    }

    /// Connects, completes a handshake, and runs the channel to
    /// completion. Returns whether the caller should keep retrying this
    /// peer.
    async fn connect_once(self: Arc<Self>, peer: SocketAddr) -> bool {
        let connector = Connector::new(self.settings.connect_timeout);
        let (code, socket) = connector.connect(Endpoint::Resolved(vec![peer])).await;
        let Some(socket) = socket else {
            warn!(%peer, ?code, "manual connect failed");
            return true;
        };

        let identifier = self.next_identifier.fetch_add(1, Ordering::SeqCst) as u64;
        let nonce: u64 = rand::random();
        let channel = Channel::new(
            identifier,
            nonce,
            Arc::new(socket),
            self.settings.proxy,
            self.settings.channel_timeouts,
        );

        let local_version = VersionMessage {
            nonce,
            ..self.settings.local_version.clone()
        };
        let handshake_settings = self.settings.handshake;
        let heartbeat = self.settings.heartbeat;
        let enable_reject = self.settings.enable_reject;
        let (stopped_tx, stopped_rx) = tokio::sync::oneshot::channel();
        let stopped_tx = std::sync::Mutex::new(Some(stopped_tx));

        self.session
            .start_channel(
                channel.clone(),
                move |channel, completion| {
                    tokio::spawn(async move {
                        let version = protocol::attach(&channel, |channel| {
                            ProtocolVersion::new(channel, handshake_settings, local_version, move |code| {
                                completion(code)
                            })
                        })
                        .await;
                        version.start().await;
                    });
                },
                move |channel| {
                    tokio::spawn({
                        let channel = channel.clone();
                        async move {
                            let ping = protocol::attach(&channel, |channel| ProtocolPing::new(channel, heartbeat)).await;
                            ping.start().await;
                        }
                    });
                    if enable_reject {
                        tokio::spawn(async move {
                            let reject = protocol::attach(&channel, ProtocolReject::new).await;
                            reject.start().await;
                        });
                    }
                },
                |_code| {},
                move |code: Code| {
                    if let Some(tx) = stopped_tx.lock().unwrap().take() {
                        let _ = tx.send(code);
                    }
                    Box::pin(async { false })
                },
            )
            .await;

        match stopped_rx.await {
            Ok(code) => match &self.settings.on_channel_stopped {
                Some(handler) => handler(code),
                None => true,
            },
            Err(_) => true,
        }
    }
}
