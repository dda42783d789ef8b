//! Maintains a fixed number of concurrent outbound channels (spec §4.11
//! "SessionOutbound"). Each slot runs `pool.take → connector.connect →
//! start_channel`, restoring the address on any failure and retrying after
//! a randomised backoff. Batches of `connect_batch_size` race in parallel;
//! the first success wins the slot and the rest are cancelled.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng as _;

use crate::address::Hosts;
use crate::channel::{Channel, ChannelTimeouts};
use crate::error::Code;
use crate::net_io::{Connector, Endpoint};
use crate::protocol::{
    self, HandshakeSettings, Protocol, ProtocolPing, ProtocolReject, ProtocolVersion, VersionMessage,
};
use crate::proxy::ProxyConfig;
use crate::session::Session;
use crate::socket::Socket;

#[derive(Clone)]
pub struct OutboundSettings {
    pub outbound_connections: u32,
    pub connect_batch_size: u32,
    pub connect_timeout: Duration,
    pub proxy: ProxyConfig,
    pub channel_timeouts: ChannelTimeouts,
    pub handshake: HandshakeSettings,
    pub heartbeat: Duration,
    pub local_version: VersionMessage,
    pub enable_reject: bool,
}

pub struct SessionOutbound {
    session: Arc<Session>,
    pool: Arc<Hosts>,
    settings: OutboundSettings,
    next_identifier: AtomicU32,
}

impl SessionOutbound {
    pub fn new(session: Arc<Session>, pool: Arc<Hosts>, settings: OutboundSettings) -> Arc<Self> {
        Arc::new(SessionOutbound {
            session,
            pool,
            settings,
            next_identifier: AtomicU32::new(1),
        })
    }

    pub fn start(self: &Arc<Self>) {
        for _ in 0..self.settings.outbound_connections {
            let this = self.clone();
            tokio::spawn(async move { this.run_slot().await });
        }
    }

    async fn run_slot(self: Arc<Self>) {
        while !self.session.is_stopped() {
            match self.clone().try_batch().await {
                Ok(()) => continue,
                Err(()) => {
                    let (tx, rx) = tokio::sync::oneshot::channel();
                    let session = self.session.clone();
                    session.defer(None, move || {
                        let _ = tx.send(());
                    });
                    let _ = rx.await;
                }
            }
        }
    }

    /// Attempts `connect_batch_size` addresses concurrently; the first
    /// success wins, the rest are stopped with `OperationCanceled`.
    async fn try_batch(self: Arc<Self>) -> Result<(), ()> {
        let mut items = Vec::new();
        for _ in 0..self.settings.connect_batch_size.max(1) {
            match self.pool.take().await {
                Ok(item) => {
                    self.pool.reserve(item.authority).await;
                    items.push(item);
                }
                Err(_) => break,
            }
        }
        if items.is_empty() {
            return Err(());
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel(items.len().max(1));
        let mut handles = Vec::new();
        for item in &items {
            let this = self.clone();
            let item = *item;
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let connector = Connector::new(this.settings.connect_timeout);
                let (code, socket) = connector
                    .connect(Endpoint::Resolved(vec![item.authority.socket_addr()]))
                    .await;
                let _ = tx.send((item, code, socket)).await;
            }));
        }
        drop(tx);

        let mut winner = None;
        let mut seen = 0u32;
        while let Some((item, code, socket)) = rx.recv().await {
            seen += 1;
            if code.is_success() && winner.is_none() {
                winner = Some((item, socket.unwrap()));
            } else {
                self.pool.unreserve(item.authority).await;
            }
            if seen as usize == handles.len() {
                break;
            }
        }
        for handle in handles {
            handle.abort();
        }

        let Some((item, socket)) = winner else {
            return Err(());
        };

        let identifier = self.next_identifier.fetch_add(1, Ordering::SeqCst) as u64;
        let nonce: u64 = rand::rng().random();
        let channel = Channel::new(identifier, nonce, Arc::new(socket), self.settings.proxy, self.settings.channel_timeouts);

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
                            ProtocolVersion::new(channel, handshake_settings, local_version, move |code| completion(code))
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
                // `on_start` only reports handshake completion upward; the
                // address-pool bookkeeping lives entirely in `on_stop`
                // below, which now fires exactly once for every channel
                // regardless of whether it died during handshake or later.
                |_code| {},
                {
                    let pool = self.pool.clone();
                    move |code| {
                        let pool = pool.clone();
                        Box::pin(async move {
                            pool.unreserve(item.authority).await;
                            pool.restore(item).await;
                            let _ = code;
                            false
                        })
                    }
                },
            )
            .await;

        Ok(())
    }
}
