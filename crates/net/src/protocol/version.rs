//! The version handshake (spec §4.10 "ProtocolVersion"). Negotiates
//! `negotiated_version`, validates the peer's nonce against loopback,
//! checks protocol/services/timestamp policy, and completes once both
//! sides have sent and received `verack` — all within
//! `handshake_timeout_seconds` or the channel is stopped with
//! `OperationTimeout`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::Channel;
use crate::deadline::Deadline;
use crate::error::Code;
use crate::protocol::{Protocol, SendAddressV2Message, VerackMessage, VersionMessage};

/// Protocol version at which BIP155's `sendaddrv2` was introduced; peers
/// below this never understand the message (spec §9).
pub const ADDRESS_V2_MINIMUM_VERSION: u32 = 70016;

#[derive(Debug, Clone, Copy)]
pub struct HandshakeSettings {
    pub protocol_minimum: u32,
    pub protocol_maximum: u32,
    pub services_minimum: u64,
    pub invalid_services: u64,
    pub maximum_skew: Duration,
    pub handshake_timeout: Duration,
    pub enable_address_v2: bool,
}

pub struct ProtocolVersion {
    channel: Arc<Channel>,
    settings: HandshakeSettings,
    local: VersionMessage,
    deadline: Deadline,
    sent_verack: AtomicBool,
    received_verack: AtomicBool,
    completion: std::sync::Mutex<Option<Box<dyn FnOnce(Code) + Send>>>,
}

impl ProtocolVersion {
    pub fn new(
        channel: Arc<Channel>,
        settings: HandshakeSettings,
        local: VersionMessage,
        on_complete: impl FnOnce(Code) + Send + 'static,
    ) -> Arc<Self> {
        let deadline = Deadline::new(channel.strand().clone(), settings.handshake_timeout);
        Arc::new(ProtocolVersion {
            channel,
            settings,
            local,
            deadline,
            sent_verack: AtomicBool::new(false),
            received_verack: AtomicBool::new(false),
            completion: std::sync::Mutex::new(Some(Box::new(on_complete))),
        })
    }

    fn complete(&self, code: Code) {
        self.deadline.stop();
        if let Some(handler) = self.completion.lock().unwrap().take() {
            handler(code);
        }
    }

    fn maybe_finish_handshake(self: &Arc<Self>) {
        if self.sent_verack.load(Ordering::SeqCst) && self.received_verack.load(Ordering::SeqCst) {
            self.complete(Code::Success);
        }
    }

    async fn handle_peer_version(self: &Arc<Self>, peer: Arc<VersionMessage>) -> bool {
        if peer.nonce == self.local.nonce {
            self.complete(Code::AddressInUse); // loopback
            return false;
        }
        self.channel.set_peer_version(peer.clone()).await;
        let negotiated = self.settings.protocol_maximum.min(peer.value);
        self.channel.set_negotiated_version(negotiated);
        if negotiated < self.settings.protocol_minimum {
            self.complete(Code::PeerUnsupported);
            return false;
        }
        if peer.services & self.settings.services_minimum != self.settings.services_minimum {
            self.complete(Code::PeerInsufficient);
            return false;
        }
        if peer.services & self.settings.invalid_services != 0 {
            self.complete(Code::PeerUnsupported);
            return false;
        }
        let skew = (peer.timestamp - self.local.timestamp).unsigned_abs();
        if skew > self.settings.maximum_skew.as_secs() {
            self.complete(Code::PeerTimestamp);
            return false;
        }
        if self.settings.enable_address_v2
            && negotiated >= ADDRESS_V2_MINIMUM_VERSION
            && peer.value >= ADDRESS_V2_MINIMUM_VERSION
        {
            self.channel.send(&SendAddressV2Message, |_| {}).await;
        }

        let this = self.clone();
        self.channel
            .send(&VerackMessage, move |code| {
                if code.is_success() {
                    this.sent_verack.store(true, Ordering::SeqCst);
                    this.maybe_finish_handshake();
                } else {
                    this.complete(code);
                }
            })
            .await;
        true
    }
}

#[async_trait::async_trait]
impl Protocol for ProtocolVersion {
    async fn start(self: Arc<Self>) {
        let this = self.clone();
        self.deadline.start(move |code| {
            if code == Code::Success {
                this.complete(Code::OperationTimeout);
            }
        });

        let this = self.clone();
        self.channel
            .subscribe::<VersionMessage, _, _>(move |code, msg| {
                let this = this.clone();
                async move {
                    if !code.is_success() {
                        return false;
                    }
                    if let Some(msg) = msg {
                        this.handle_peer_version(msg).await;
                    }
                    false
                }
            })
            .await;

        let this = self.clone();
        self.channel
            .subscribe::<VerackMessage, _, _>(move |code, _msg| {
                let this = this.clone();
                async move {
                    if code.is_success() {
                        this.received_verack.store(true, Ordering::SeqCst);
                        this.maybe_finish_handshake();
                    }
                    false
                }
            })
            .await;

        let local = self.local.clone();
        let this = self.clone();
        self.channel
            .send(&local, move |code| {
                if !code.is_success() {
                    this.complete(code);
                }
            })
            .await;
    }

    async fn stopping(self: Arc<Self>, code: Code) {
        self.complete(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelTimeouts;
    use crate::distributor::Message;
    use crate::framing::{self, Heading};
    use testing::connected_tcp_pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const MAGIC: u32 = 0xD9B4BEF9;

    fn settings(handshake_timeout: Duration) -> HandshakeSettings {
        HandshakeSettings {
            protocol_minimum: 31800,
            protocol_maximum: 70016,
            services_minimum: 0,
            invalid_services: 0,
            maximum_skew: Duration::from_secs(2 * 60 * 60),
            handshake_timeout,
            enable_address_v2: false,
        }
    }

    fn proxy_config() -> crate::proxy::ProxyConfig {
        crate::proxy::ProxyConfig {
            magic: MAGIC,
            witness_enabled: false,
            validate_checksum: false,
        }
    }

    /// S1: a peer `version` whose nonce matches the local channel's own
    /// nonce is treated as loopback and rejected with `AddressInUse`;
    /// no `verack` is ever sent in reply (checked by draining the peer
    /// side and observing nothing arrives before the socket closes).
    #[tokio::test]
    async fn loopback_nonce_is_rejected() {
        let (client, mut server) = connected_tcp_pair().await;
        let socket = Arc::new(crate::socket::Socket::from_stream(client).unwrap());
        let local_nonce = 4242u64;
        let channel = Channel::new(
            1,
            local_nonce,
            socket,
            proxy_config(),
            ChannelTimeouts {
                inactivity: Duration::ZERO,
                expiration: Duration::ZERO,
            },
        );

        let (tx, rx) = tokio::sync::oneshot::channel();
        let local = VersionMessage::local(70016, 0, local_nonce, "test:1.0".into(), 0, true);
        let hs = settings(Duration::from_secs(5));
        channel.resume();
        let protocol = crate::protocol::attach(&channel, |channel| {
            ProtocolVersion::new(channel, hs, local, move |code| {
                let _ = tx.send(code);
            })
        })
        .await;
        protocol.start().await;

        // Drain and discard whatever the channel sends us (its own
        // `version`) before replying with a loopback `version`.
        let mut discard = [0u8; framing::HEADING_SIZE];
        server.read_exact(&mut discard).await.unwrap();
        let heading = Heading::from_bytes(&discard);
        let mut payload = vec![0u8; heading.payload_size as usize];
        server.read_exact(&mut payload).await.unwrap();

        let peer_version = VersionMessage::local(70016, 0, local_nonce, "peer:1.0".into(), 0, true);
        let payload = peer_version.encode(0).unwrap();
        let heading = Heading::new(MAGIC, VersionMessage::ID, &payload);
        server.write_all(&heading.to_bytes()).await.unwrap();
        server.write_all(&payload).await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Code::AddressInUse);

        // No `verack` ever arrives: the only frame the peer receives is the
        // channel's original outbound `version`.
        let mut probe = [0u8; 1];
        let result = tokio::time::timeout(Duration::from_millis(100), server.read(&mut probe)).await;
        assert!(result.is_err() || matches!(result.unwrap(), Ok(0)));
    }

    /// S2: with no peer response at all, the handshake must time out and
    /// report `OperationTimeout` within (approximately) the configured
    /// `handshake_timeout`.
    #[tokio::test]
    async fn handshake_times_out_without_peer_response() {
        let (client, _server) = connected_tcp_pair().await;
        let socket = Arc::new(crate::socket::Socket::from_stream(client).unwrap());
        let channel = Channel::new(
            2,
            1,
            socket,
            proxy_config(),
            ChannelTimeouts {
                inactivity: Duration::ZERO,
                expiration: Duration::ZERO,
            },
        );

        let (tx, rx) = tokio::sync::oneshot::channel();
        let local = VersionMessage::local(70016, 0, 1, "test:1.0".into(), 0, true);
        let hs = settings(Duration::from_millis(50));
        channel.resume();
        let protocol = crate::protocol::attach(&channel, |channel| {
            ProtocolVersion::new(channel, hs, local, move |code| {
                let _ = tx.send(code);
            })
        })
        .await;
        protocol.start().await;

        let code = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, Code::OperationTimeout);
    }

    /// spec §9: `sendaddrv2` is sent once both sides clear protocol version
    /// 70016 and the feature is enabled in settings, ahead of `verack`.
    #[tokio::test]
    async fn sendaddrv2_is_sent_when_both_sides_clear_the_threshold() {
        let (client, mut server) = connected_tcp_pair().await;
        let socket = Arc::new(crate::socket::Socket::from_stream(client).unwrap());
        let local_nonce = 11u64;
        let channel = Channel::new(
            4,
            local_nonce,
            socket,
            proxy_config(),
            ChannelTimeouts {
                inactivity: Duration::ZERO,
                expiration: Duration::ZERO,
            },
        );

        let (tx, _rx) = tokio::sync::oneshot::channel();
        let local = VersionMessage::local(70016, 0, local_nonce, "test:1.0".into(), 0, true);
        let mut hs = settings(Duration::from_secs(5));
        hs.enable_address_v2 = true;
        channel.resume();
        let protocol = crate::protocol::attach(&channel, |channel| {
            ProtocolVersion::new(channel, hs, local, move |code| {
                let _ = tx.send(code);
            })
        })
        .await;
        protocol.start().await;

        // Drain our own outbound `version`.
        let mut discard = [0u8; framing::HEADING_SIZE];
        server.read_exact(&mut discard).await.unwrap();
        let heading = Heading::from_bytes(&discard);
        let mut payload = vec![0u8; heading.payload_size as usize];
        server.read_exact(&mut payload).await.unwrap();

        let peer_version = VersionMessage::local(70016, 0, local_nonce + 1, "peer:1.0".into(), 0, true);
        let payload = peer_version.encode(0).unwrap();
        let heading = Heading::new(MAGIC, VersionMessage::ID, &payload);
        server.write_all(&heading.to_bytes()).await.unwrap();
        server.write_all(&payload).await.unwrap();

        let mut next = [0u8; framing::HEADING_SIZE];
        server.read_exact(&mut next).await.unwrap();
        let heading = Heading::from_bytes(&next);
        assert_eq!(heading.command, crate::framing::MessageId::SendAddressV2);
    }
}
