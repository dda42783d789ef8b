//! Shared test support: connected loopback socket pairs and deterministic
//! address generators, used by `net`'s own test suites so `socket.rs`,
//! `proxy.rs`, and `channel.rs` stop each carrying their own copy of the
//! same "bind on 127.0.0.1:0, connect, accept" boilerplate.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use net::address::{Authority, AddressItem};
use tokio::net::{TcpListener, TcpStream};

/// Binds an ephemeral loopback listener, connects to it, and returns both
/// ends — `Socket` is TCP-only (it splits a `TcpStream`), so this stands in
/// for the real listener/dialer pair every `net` test otherwise has to set
/// up by hand.
pub async fn connected_tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client = TcpStream::connect(addr).await.unwrap();
    let server = accept.await.unwrap();
    (client, server)
}

/// Deterministic (non-random) address generator for pool tests: the n-th
/// address is `10.0.(n/256).(n%256):8333`, timestamp `n`, services `1`.
pub fn nth_address_item(n: u32) -> AddressItem {
    let b2 = ((n / 256) % 256) as u8;
    let b3 = (n % 256) as u8;
    let ip = IpAddr::V4(Ipv4Addr::new(10, 0, b2, b3));
    AddressItem {
        authority: Authority::new(SocketAddr::new(ip, 8333)),
        timestamp: n,
        services: 1,
    }
}

pub fn nth_authority(n: u32) -> Authority {
    nth_address_item(n).authority
}
