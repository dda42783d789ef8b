//! Populates the address pool from well-known seed endpoints at process
//! start, then exits (spec §4.11 "SessionSeed"). Only runs at all when the
//! pool is already short of `minimum_address_count` and the pool has any
//! capacity; races "pool reached sufficiency" against "every seed channel
//! has stopped" and logs which one resolved first.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::address::{AddressItem, Hosts};
use crate::channel::{Channel, ChannelTimeouts};
use crate::error::Code;
use crate::net_io::{Connector, Endpoint};
use crate::protocol::{self, HandshakeSettings, Protocol, ProtocolReject, ProtocolSeed, ProtocolVersion, VersionMessage};
use crate::proxy::ProxyConfig;
use crate::session::Session;
use crate::trigger::Trigger;

#[derive(Clone)]
pub struct SeedSettings {
    pub seeds: Vec<SocketAddr>,
    pub minimum_address_count: usize,
    pub seeding_timeout: Duration,
    pub proxy: ProxyConfig,
    pub channel_timeouts: ChannelTimeouts,
    pub handshake: HandshakeSettings,
    pub advertise_self: Option<AddressItem>,
    pub local_version: VersionMessage,
    pub enable_reject: bool,
}

pub struct SessionSeed {
    session: Arc<Session>,
    pool: Arc<Hosts>,
    settings: SeedSettings,
    next_identifier: AtomicU32,
}

impl SessionSeed {
    pub fn new(session: Arc<Session>, pool: Arc<Hosts>, settings: SeedSettings) -> Arc<Self> {
        Arc::new(SessionSeed {
            session,
            pool,
            settings,
            next_identifier: AtomicU32::new(1),
        })
    }

    /// Runs to completion: either the pool becomes sufficient or every
    /// seed channel stops, whichever happens first.
    pub async fn run(self: Arc<Self>) -> Code {
        if self.pool.len().await >= self.settings.minimum_address_count {
            info!("address pool already sufficient, skipping seeding");
            return Code::SeedingComplete;
        }
        if self.settings.seeds.is_empty() {
            warn!("no seeds configured and pool is insufficient");
            return Code::SeedingUnsuccessful;
        }

        let sufficient = Trigger::new();
        let remaining = Arc::new(AtomicU32::new(self.settings.seeds.len() as u32));
        let mut handles = Vec::new();

        for seed in self.settings.seeds.clone() {
            let this = self.clone();
            let sufficient = sufficient.clone();
            let remaining = remaining.clone();
            handles.push(tokio::spawn(async move {
                this.run_seed_channel(seed).await;
                if this.pool.len().await >= this.settings.minimum_address_count {
                    sufficient.trigger();
                }
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                    sufficient.trigger();
                }
            }));
        }

        sufficient.wait_async().await;
        let final_count = self.pool.len().await;
        if final_count >= self.settings.minimum_address_count {
            info!(count = final_count, "seeding complete: pool sufficient");
            Code::SeedingComplete
        } else {
            warn!(count = final_count, "all seed channels stopped, pool still insufficient");
            Code::SeedingUnsuccessful
        }
    }

    async fn run_seed_channel(self: &Arc<Self>, seed: SocketAddr) {
        let connector = Connector::new(self.settings.seeding_timeout);
        let (code, socket) = connector.connect(Endpoint::Resolved(vec![seed])).await;
        let Some(socket) = socket else {
            warn!(%seed, ?code, "seed connect failed");
            return;
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
        let pool = self.pool.clone();
        let advertise_self = self.settings.advertise_self;
        let germination = self.settings.seeding_timeout;
        let enable_reject = self.settings.enable_reject;
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = std::sync::Mutex::new(Some(done_tx));

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
                            let seed = protocol::attach(&channel, |channel| {
                                ProtocolSeed::new(channel, pool, advertise_self, germination)
                            })
                            .await;
                            seed.start().await;
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
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(code);
                    }
                    Box::pin(async { false })
                },
            )
            .await;

        let _ = done_rx.await;
    }
}
