//! Strand-guarded socket factories (spec §4.8): `Acceptor` for inbound
//! listen/accept, `Connector` for timed outbound connect.

mod acceptor;
mod connector;

pub use acceptor::Acceptor;
pub use connector::{Connector, Endpoint};
