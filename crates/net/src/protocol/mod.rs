//! Per-channel sub-state-machines attached to a channel (spec §4.10). A
//! `Protocol` owns no thread: it is constructed with a reference to the
//! `Channel` it runs on, subscribes to message types via
//! `Channel::subscribe`, and sends via `Channel::send`; its only two
//! lifecycle hooks are `start()` (posted to the channel strand right after
//! `Channel::resume`) and `stopping(code)` (invoked once, from the
//! channel's stop subscriber).

pub mod messages;
pub mod ping;
pub mod reject;
pub mod seed;
pub mod version;

use std::sync::Arc;

use crate::channel::Channel;
use crate::error::Code;

#[async_trait::async_trait]
pub trait Protocol: Send + Sync + 'static {
    async fn start(self: Arc<Self>);
    async fn stopping(self: Arc<Self>, code: Code);
}

pub use messages::{
    AddressMessage, GetAddressMessage, PingMessage, PongMessage, RejectMessage,
    SendAddressV2Message, VerackMessage, VersionMessage,
};

pub use ping::ProtocolPing;
pub use reject::ProtocolReject;
pub use seed::ProtocolSeed;
pub use version::{HandshakeSettings, ProtocolVersion};

/// Constructs `P` via `constructor` (closing over whatever session/args the
/// concrete protocol needs — Rust has no variadic generics, so the
/// "construct with (session, channel, args...)" contract from the source
/// becomes "caller supplies a closure that only needs `channel`") and
/// registers its `stopping` hook on the channel's proxy stop subscriber.
/// Must be called on the channel strand.
pub async fn attach<P, F>(channel: &Arc<Channel>, constructor: F) -> Arc<P>
where
    P: Protocol,
    F: FnOnce(Arc<Channel>) -> Arc<P>,
{
    let protocol = constructor(channel.clone());
    let stopping = protocol.clone();
    channel
        .subscribe_stop(move |code| {
            let stopping = stopping.clone();
            async move {
                stopping.stopping(code).await;
                false
            }
        })
        .await;
    protocol
}
