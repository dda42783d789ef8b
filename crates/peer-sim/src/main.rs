//! Drives the client side of the version handshake against a single peer
//! and reports the outcome, reusing the same `Session::start_channel` +
//! `ProtocolVersion` wiring `net::session` uses internally — this binary
//! exists only to exercise that wiring from outside the crate, the way a
//! hand run of `nc`/`bitcoin-cli -regtest` would against a real node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use net::channel::{Channel, ChannelTimeouts};
use net::error::Code;
use net::net_io::Endpoint;
use net::protocol::{self, HandshakeSettings, Protocol, ProtocolVersion, VersionMessage};
use net::proxy::ProxyConfig;
use net::session::Session;
use net::settings::MAINNET_MAGIC;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(true).init();

    let target: SocketAddr = std::env::args()
        .nth(1)
        .context("usage: peer-sim <host:port>")?
        .parse()
        .context("target must be a socket address, e.g. 127.0.0.1:8333")?;

    let connect_timeout = Duration::from_secs(5);
    let handshake_settings = HandshakeSettings {
        protocol_minimum: 31402,
        protocol_maximum: 70016,
        services_minimum: 0,
        invalid_services: 0,
        maximum_skew: Duration::from_secs(120),
        handshake_timeout: Duration::from_secs(10),
    };
    let local_version = VersionMessage::local(
        handshake_settings.protocol_maximum,
        0,
        rand::random(),
        "/peer-sim:0.1.0/".to_string(),
        0,
        true,
    );

    let session = Session::new(net::executor::Strand::new(), Duration::from_secs(60));
    let connector = session.create_connector(connect_timeout, false).await;
    let (code, socket) = connector.connect(Endpoint::Resolved(vec![target])).await;
    let Some(socket) = socket else {
        bail!("connect to {target} failed: {code:?}");
    };
    tracing::info!(%target, "tcp connected");

    let channel = Channel::new(
        1,
        local_version.nonce,
        Arc::new(socket),
        ProxyConfig {
            magic: MAINNET_MAGIC,
            witness_enabled: true,
            validate_checksum: true,
        },
        ChannelTimeouts {
            inactivity: Duration::from_secs(600),
            expiration: Duration::ZERO,
        },
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let stop_tx = std::sync::Mutex::new(Some(stop_tx));

    session
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
            |_channel| {},
            move |code| {
                if code == Code::Success {
                    tracing::info!(%target, "handshake complete");
                } else {
                    tracing::warn!(%target, ?code, "handshake failed");
                }
            },
            move |code| {
                if let Some(tx) = stop_tx.lock().unwrap().take() {
                    let _ = tx.send(code);
                }
                Box::pin(async { false })
            },
        )
        .await;

    let outcome = stop_rx.await.unwrap_or(Code::OperationCanceled);
    session.stop(Code::ServiceStopped).await;
    if outcome == Code::Success {
        println!("{target}: handshake ok");
        Ok(())
    } else {
        bail!("{target}: channel stopped with {outcome:?}");
    }
}
