//! One TCP endpoint (spec §4.3). Read/write are exact-length by default
//! (`read_exact`/`write_all`); `read_some` returns whatever is available up
//! to the buffer length. `stop()` is idempotent and cancels any in-flight
//! operation via the socket's `Trigger`, the same pattern the proxy and
//! channel use for their own shutdown.
//!
//! Callers are expected to only touch a `Socket` from the strand of the
//! `Proxy`/`Channel` that owns it — the type itself does not re-dispatch
//! onto a strand because, by construction, the proxy's read loop and write
//! queue already execute as tasks posted to that strand.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::error::Code;
use crate::trigger::Trigger;

/// A socket's transport is plain TCP or, once upgraded, TLS over the same
/// stream (spec §4.3 "optional TLS wrapper"). Upgrading happens after
/// `connect`/`accept` succeeds, mirroring how a `TlsAcceptor`/`TlsConnector`
/// wraps an already-established `TcpStream` rather than owning the listen
/// or dial step itself.
enum ReadSide {
    Plain(OwnedReadHalf),
    Tls(ReadHalf<TlsStream<TcpStream>>),
}

enum WriteSide {
    Plain(OwnedWriteHalf),
    Tls(WriteHalf<TlsStream<TcpStream>>),
}

impl ReadSide {
    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadSide::Plain(h) => h.read_exact(buf).await,
            ReadSide::Tls(h) => h.read_exact(buf).await,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadSide::Plain(h) => h.read(buf).await,
            ReadSide::Tls(h) => h.read(buf).await,
        }
    }
}

impl WriteSide {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            WriteSide::Plain(h) => h.write_all(buf).await,
            WriteSide::Tls(h) => h.write_all(buf).await,
        }
    }
}

pub struct Socket {
    trigger: Trigger,
    read_half: Mutex<Option<ReadSide>>,
    write_half: Mutex<Option<WriteSide>>,
    remote: SocketAddr,
}

impl Socket {
    pub fn from_stream(stream: TcpStream) -> Result<Self, Code> {
        let remote = stream.peer_addr().map_err(Code::from)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Socket {
            trigger: Trigger::new(),
            read_half: Mutex::new(Some(ReadSide::Plain(read_half))),
            write_half: Mutex::new(Some(WriteSide::Plain(write_half))),
            remote,
        })
    }

    /// Upgrades an already-connected outbound socket to TLS. Must be called
    /// before the first `read`/`write`; it consumes the plain halves and
    /// replaces them with the TLS-wrapped pair.
    pub async fn upgrade_client_tls(
        self,
        connector: &TlsConnector,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> Result<Self, Code> {
        let remote = self.remote;
        let stream = self.into_tcp_stream().await?;
        let tls = connector
            .connect(server_name, stream)
            .await
            .map_err(|_| Code::ConnectFailed)?;
        let (read_half, write_half) = tokio::io::split(TlsStream::Client(tls));
        Ok(Socket {
            trigger: Trigger::new(),
            read_half: Mutex::new(Some(ReadSide::Tls(read_half))),
            write_half: Mutex::new(Some(WriteSide::Tls(write_half))),
            remote,
        })
    }

    /// Upgrades an already-accepted inbound socket to TLS.
    pub async fn upgrade_server_tls(self, acceptor: &TlsAcceptor) -> Result<Self, Code> {
        let remote = self.remote;
        let stream = self.into_tcp_stream().await?;
        let tls = acceptor.accept(stream).await.map_err(|_| Code::AcceptFailed)?;
        let (read_half, write_half) = tokio::io::split(TlsStream::Server(tls));
        Ok(Socket {
            trigger: Trigger::new(),
            read_half: Mutex::new(Some(ReadSide::Tls(read_half))),
            write_half: Mutex::new(Some(WriteSide::Tls(write_half))),
            remote,
        })
    }

    /// Reassembles the owned `TcpStream` out of the split plain halves so it
    /// can be handed to a `TlsConnector`/`TlsAcceptor`. Only valid while the
    /// socket is still in its `Plain` state (enforced by the `self` move).
    async fn into_tcp_stream(self) -> Result<TcpStream, Code> {
        let read_half = self.read_half.into_inner().ok_or(Code::BadStream)?;
        let write_half = self.write_half.into_inner().ok_or(Code::BadStream)?;
        match (read_half, write_half) {
            (ReadSide::Plain(r), WriteSide::Plain(w)) => {
                r.reunite(w).map_err(|_| Code::BadStream)
            }
            _ => Err(Code::BadStream),
        }
    }

    /// Tries each endpoint in sequence, stopping at the first success
    /// (spec §4.3 `connect`).
    pub async fn connect(endpoints: &[SocketAddr]) -> Result<Self, Code> {
        let mut last = Code::ConnectFailed;
        for addr in endpoints {
            match TcpStream::connect(addr).await {
                Ok(stream) => return Socket::from_stream(stream),
                Err(e) => last = Code::from(e),
            }
        }
        Err(last)
    }

    pub fn remote_authority(&self) -> SocketAddr {
        self.remote
    }

    /// Reads exactly `buf.len()` bytes.
    pub async fn read(&self, buf: &mut [u8]) -> Result<(), Code> {
        let mut guard = self.read_half.lock().await;
        let half = guard.as_mut().ok_or(Code::BadStream)?;
        tokio::select! {
            biased;
            _ = self.trigger.wait_async() => Err(Code::OperationCanceled),
            res = half.read_exact(buf) => res.map(|_| ()).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Code::PeerDisconnect
                } else {
                    Code::from(e)
                }
            }),
        }
    }

    /// Reads at most `buf.len()` bytes, returning the actual count.
    pub async fn read_some(&self, buf: &mut [u8]) -> Result<usize, Code> {
        let mut guard = self.read_half.lock().await;
        let half = guard.as_mut().ok_or(Code::BadStream)?;
        tokio::select! {
            biased;
            _ = self.trigger.wait_async() => Err(Code::OperationCanceled),
            res = half.read(buf) => res.map_err(Code::from),
        }
    }

    /// Writes exactly `buf.len()` bytes.
    pub async fn write(&self, buf: &[u8]) -> Result<(), Code> {
        let mut guard = self.write_half.lock().await;
        let half = guard.as_mut().ok_or(Code::BadStream)?;
        tokio::select! {
            biased;
            _ = self.trigger.wait_async() => Err(Code::OperationCanceled),
            res = half.write_all(buf) => res.map_err(Code::from),
        }
    }

    /// Cancels any outstanding read/write. Idempotent.
    pub fn stop(&self) {
        self.trigger.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.trigger.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::connected_tcp_pair;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_tries_endpoints_in_sequence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = listener.local_addr().unwrap();
        let bad: SocketAddr = "127.0.0.1:1".parse().unwrap(); // reserved, refuses

        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let socket = Socket::connect(&[bad, good]).await.unwrap();
        assert_eq!(socket.remote_authority().port(), good.port());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_pending_read() {
        let (client_stream, _server_stream) = connected_tcp_pair().await;
        let socket = Socket::from_stream(client_stream).unwrap();

        let mut buf = [0u8; 4];
        let stop_trigger = socket.trigger.clone();
        let socket = std::sync::Arc::new(socket);
        let read = tokio::spawn({
            let socket = socket.clone();
            async move {
                tokio::time::timeout(std::time::Duration::from_millis(100), socket.read(&mut buf))
                    .await
            }
        });
        stop_trigger.trigger();
        let result = read.await.unwrap();
        // Either canceled via the trigger, or the timeout raced it — both
        // demonstrate no silent hang.
        assert!(result.is_ok());
    }
}
