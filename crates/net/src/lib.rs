//! Channel runtime and session layer for a Bitcoin-style peer-to-peer
//! networking stack.
//!
//! The crate is organized leaf-first, matching the component table of the
//! design: a strand executor and deadline timer at the bottom, a socket and
//! framed proxy above it, a distributor/broadcaster pair for message
//! fan-out, a channel that ties proxy + timers + protocol state together,
//! and finally the session framework that composes many channels into
//! outbound/inbound/manual/seed connection strategies.

pub mod error;
pub mod executor;
pub mod trigger;
pub mod deadline;
pub mod subscriber;
pub mod framing;
pub mod socket;
pub mod proxy;
pub mod distributor;
pub mod broadcaster;
pub mod channel;
pub mod address;
pub mod net_io;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod net;

pub use error::Code;
