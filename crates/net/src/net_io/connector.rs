//! One-shot, timed outbound connect (spec §4.8 "Connector"). Resolution
//! goes through `hickory-resolver`; the actual TCP attempt races a
//! `Deadline` so a hung DNS lookup or a stalled handshake attempt never
//! blocks a session slot indefinitely.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::{Resolver, name_server::TokioConnectionProvider};

use crate::error::Code;
use crate::socket::Socket;

pub enum Endpoint {
    Resolved(Vec<SocketAddr>),
    Hostname { host: String, port: u16 },
}

pub struct Connector {
    timeout: Duration,
    running: AtomicBool,
}

impl Connector {
    pub fn new(timeout: Duration) -> Self {
        Connector {
            timeout,
            running: AtomicBool::new(false),
        }
    }

    /// Reusable but single-shot per call: a second `connect` while one is
    /// already in flight returns `OperationFailed` immediately.
    pub async fn connect(&self, endpoint: Endpoint) -> (Code, Option<Socket>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return (Code::OperationFailed, None);
        }
        let result = self.connect_inner(endpoint).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn connect_inner(&self, endpoint: Endpoint) -> (Code, Option<Socket>) {
        let race = async {
            let addrs = match self.resolve(endpoint).await {
                Ok(addrs) => addrs,
                Err(code) => return (code, None),
            };
            match Socket::connect(&addrs).await {
                Ok(socket) => (Code::Success, Some(socket)),
                Err(code) => {
                    // The failed attempt carries no live socket to return
                    // stopped; callers recover the address from the error
                    // alone (spec's "stopped socket" contract degenerates
                    // to `None` when connect itself never succeeded).
                    (code, None)
                }
            }
        };
        match tokio::time::timeout(self.timeout, race).await {
            Ok(result) => result,
            Err(_) => (Code::OperationTimeout, None),
        }
    }

    async fn resolve(&self, endpoint: Endpoint) -> Result<Vec<SocketAddr>, Code> {
        match endpoint {
            Endpoint::Resolved(addrs) if !addrs.is_empty() => Ok(addrs),
            Endpoint::Resolved(_) => Err(Code::ConnectFailed),
            Endpoint::Hostname { host, port } => {
                let resolver = Resolver::builder_with_config(
                    hickory_resolver::config::ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build();
                let lookup = resolver.lookup_ip(host).await.map_err(|_| Code::ResolveFailed)?;
                let addrs: Vec<SocketAddr> =
                    lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect();
                if addrs.is_empty() {
                    Err(Code::ResolveFailed)
                } else {
                    Ok(addrs)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_already_resolved_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        let connector = Connector::new(Duration::from_secs(2));
        let (code, socket) = connector.connect(Endpoint::Resolved(vec![addr])).await;
        assert_eq!(code, Code::Success);
        assert!(socket.is_some());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn second_connect_while_running_fails_fast() {
        let connector = Arc::new(Connector::new(Duration::from_millis(200)));
        let unreachable: SocketAddr = "10.255.255.1:1".parse().unwrap();
        let c1 = connector.clone();
        let first = tokio::spawn(async move {
            c1.connect(Endpoint::Resolved(vec![unreachable])).await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (code, socket) = connector.connect(Endpoint::Resolved(vec![])).await;
        assert_eq!(code, Code::OperationFailed);
        assert!(socket.is_none());
        let _ = first.await;
    }

    #[tokio::test]
    async fn timeout_yields_operation_timeout() {
        let connector = Connector::new(Duration::from_millis(20));
        let unreachable: SocketAddr = "10.255.255.1:1".parse().unwrap();
        let (code, socket) = connector.connect(Endpoint::Resolved(vec![unreachable])).await;
        assert!(matches!(code, Code::OperationTimeout | Code::ConnectFailed));
        assert!(socket.is_none());
    }
}
