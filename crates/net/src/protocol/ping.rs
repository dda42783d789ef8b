//! Periodic keepalive (spec §4.10 "ProtocolPing"). Post-handshake, sends a
//! `ping` every `channel_heartbeat_minutes` and expects a matching `pong`
//! within the same interval; a mismatched nonce is a protocol violation, a
//! missing one is a channel timeout. Pre-BIP31 peers (negotiated version
//! below the ping-nonce threshold) get a bare `ping` with no expected
//! reply — the channel's own inactivity deadline is the only liveness
//! check in that case.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::channel::Channel;
use crate::deadline::Deadline;
use crate::error::Code;
use crate::protocol::{PingMessage, PongMessage, Protocol};

/// BIP31 introduced the ping nonce at protocol version 60001.
pub const BIP31_VERSION: u32 = 60001;

pub struct ProtocolPing {
    channel: Arc<Channel>,
    expected_nonce: AtomicU64,
    awaiting_pong: std::sync::atomic::AtomicBool,
    heartbeat: Deadline,
}

impl ProtocolPing {
    pub fn new(channel: Arc<Channel>, interval: Duration) -> Arc<Self> {
        let heartbeat = Deadline::new(channel.strand().clone(), interval);
        Arc::new(ProtocolPing {
            channel,
            expected_nonce: AtomicU64::new(0),
            awaiting_pong: std::sync::atomic::AtomicBool::new(false),
            heartbeat,
        })
    }

    fn bip31_active(&self) -> bool {
        self.channel.negotiated_version() >= BIP31_VERSION
    }

    fn schedule_next(self: &Arc<Self>) {
        let this = self.clone();
        self.heartbeat.start(move |code| {
            if code != Code::Success {
                return;
            }
            let this2 = this.clone();
            tokio::spawn(async move { this2.send_ping().await });
        });
    }

    async fn send_ping(self: &Arc<Self>) {
        if self.bip31_active() && self.awaiting_pong.load(Ordering::SeqCst) {
            // Previous ping never got a timely pong.
            self.channel.stop(Code::ChannelTimeout).await;
            return;
        }
        let nonce = if self.bip31_active() {
            let nonce: u64 = rand::rng().random();
            self.expected_nonce.store(nonce, Ordering::SeqCst);
            self.awaiting_pong.store(true, Ordering::SeqCst);
            Some(nonce)
        } else {
            None
        };
        let this = self.clone();
        self.channel
            .send(&PingMessage { nonce }, move |code| {
                if !code.is_success() {
                    let this = this.clone();
                    tokio::spawn(async move { this.channel.stop(code).await });
                }
            })
            .await;
        self.schedule_next();
    }

    async fn handle_pong(self: &Arc<Self>, pong: Arc<PongMessage>) {
        if !self.awaiting_pong.swap(false, Ordering::SeqCst) {
            return;
        }
        if pong.nonce != self.expected_nonce.load(Ordering::SeqCst) {
            self.channel.stop(Code::ProtocolViolation).await;
        }
    }
}

#[async_trait::async_trait]
impl Protocol for ProtocolPing {
    async fn start(self: Arc<Self>) {
        let this = self.clone();
        self.channel
            .subscribe::<PongMessage, _, _>(move |code, msg| {
                let this = this.clone();
                async move {
                    if code.is_success()
                        && let Some(pong) = msg
                    {
                        this.handle_pong(pong).await;
                    }
                    true
                }
            })
            .await;
        self.schedule_next();
    }

    async fn stopping(self: Arc<Self>, _code: Code) {
        self.heartbeat.stop();
    }
}
