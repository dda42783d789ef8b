//! Accepts connections on one or more configured binds, applying admission
//! control before any handshake is attempted (spec §4.11 "SessionInbound").
//! A socket that fails admission is stopped immediately, without ever
//! constructing a `Channel` — the spec is explicit that rejected sockets
//! never see a handshake.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::{Channel, ChannelTimeouts};
use crate::net_io::Acceptor;
use crate::protocol::{self, HandshakeSettings, Protocol, ProtocolPing, ProtocolReject, ProtocolVersion, VersionMessage};
use crate::proxy::ProxyConfig;
use crate::session::Session;
use crate::socket::Socket;

#[derive(Clone)]
pub struct InboundSettings {
    pub binds: Vec<SocketAddr>,
    pub inbound_connections: u32,
    pub enable_ipv6: bool,
    pub blacklist: Vec<IpAddr>,
    pub whitelist: Vec<IpAddr>,
    pub proxy: ProxyConfig,
    pub channel_timeouts: ChannelTimeouts,
    pub handshake: HandshakeSettings,
    pub heartbeat: Duration,
    pub local_version: VersionMessage,
    pub enable_reject: bool,
}

impl InboundSettings {
    fn admits(&self, addr: SocketAddr) -> bool {
        if addr.is_ipv6() && !self.enable_ipv6 {
            return false;
        }
        if self.blacklist.contains(&addr.ip()) {
            return false;
        }
        if !self.whitelist.is_empty() && !self.whitelist.contains(&addr.ip()) {
            return false;
        }
        true
    }
}

pub struct SessionInbound {
    session: Arc<Session>,
    settings: InboundSettings,
    suspended: Arc<AtomicBool>,
    active: Arc<AtomicU32>,
    next_identifier: AtomicU32,
}

impl SessionInbound {
    /// `suspended` is the network-wide flag (owned by `Net`) every
    /// acceptor consults before accepting (spec §5 "shared resources").
    pub fn new(session: Arc<Session>, settings: InboundSettings, suspended: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(SessionInbound {
            session,
            settings,
            suspended,
            active: Arc::new(AtomicU32::new(0)),
            next_identifier: AtomicU32::new(1),
        })
    }

    pub async fn start(self: &Arc<Self>) {
        for bind in self.settings.binds.clone() {
            let acceptor = self.session.create_acceptor(self.suspended.clone()).await;
            if acceptor.start(bind, self.settings.enable_ipv6).await.is_success() {
                info!(%bind, "inbound listener started");
            } else {
                warn!(%bind, "inbound listener failed to start");
                continue;
            }
            let this = self.clone();
            tokio::spawn(async move { this.accept_loop(acceptor).await });
        }
    }

    async fn accept_loop(self: Arc<Self>, acceptor: Arc<Acceptor>) {
        loop {
            if self.session.is_stopped() {
                return;
            }
            let (code, socket) = acceptor.accept().await;
            if !code.is_success() {
                if code == crate::error::Code::OperationCanceled {
                    return;
                }
                // ServiceSuspended or a transient accept failure: back off
                // briefly rather than spinning.
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
            let Some(socket) = socket else { continue };
            self.admit(socket).await;
        }
    }

    async fn admit(self: &Arc<Self>, socket: Socket) {
        let remote = socket.remote_authority();
        if self.active.load(Ordering::SeqCst) >= self.settings.inbound_connections {
            warn!(%remote, "inbound connection rejected: oversubscribed");
            socket.stop();
            return;
        }
        if !self.settings.admits(remote) {
            warn!(%remote, "inbound connection rejected by address policy");
            socket.stop();
            return;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
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
                // Bookkeeping lives entirely in `on_stop`, which fires
                // exactly once whether the channel died during handshake
                // or later in its life.
                |_code| {},
                {
                    let active = self.active.clone();
                    move |_code| {
                        active.fetch_sub(1, Ordering::SeqCst);
                        Box::pin(async { false })
                    }
                },
            )
            .await;
    }
}
