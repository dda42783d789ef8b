//! The observable terminal-code taxonomy (spec §7). `Code` is the single
//! enum space shared by "everything went fine" and every closed failure
//! kind the channel runtime can report, mirroring the boost `error_code`
//! pattern the source is built on: subscribers are notified with a `Code`
//! whether or not anything went wrong, so `Success` lives in the same
//! space as `ChannelStopped` rather than behind a `Result`.

use std::io;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    #[error("success")]
    Success,

    // Transport
    #[error("dns resolution failed")]
    ResolveFailed,
    #[error("connect failed")]
    ConnectFailed,
    #[error("accept failed")]
    AcceptFailed,
    #[error("listen failed")]
    ListenFailed,
    #[error("address in use (or loopback detected)")]
    AddressInUse,
    #[error("bad stream")]
    BadStream,
    #[error("peer disconnected")]
    PeerDisconnect,

    // Framing
    #[error("invalid heading")]
    InvalidHeading,
    #[error("invalid magic")]
    InvalidMagic,
    #[error("oversized payload")]
    OversizedPayload,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("invalid message")]
    InvalidMessage,
    #[error("unknown message")]
    UnknownMessage,

    // Policy
    #[error("address blocked")]
    AddressBlocked,
    #[error("address disabled")]
    AddressDisabled,
    #[error("address unsupported")]
    AddressUnsupported,
    #[error("address insufficient services")]
    AddressInsufficient,
    #[error("address invalid")]
    AddressInvalid,
    #[error("address not found")]
    AddressNotFound,
    #[error("peer unsupported protocol version")]
    PeerUnsupported,
    #[error("peer insufficient services")]
    PeerInsufficient,
    #[error("peer timestamp out of skew")]
    PeerTimestamp,
    #[error("protocol violation")]
    ProtocolViolation,

    // Lifecycle
    #[error("channel stopped")]
    ChannelStopped,
    #[error("channel timeout")]
    ChannelTimeout,
    #[error("channel inactive")]
    ChannelInactive,
    #[error("channel expired")]
    ChannelExpired,
    #[error("channel conflict")]
    ChannelConflict,
    #[error("channel dropped")]
    ChannelDropped,
    #[error("service stopped")]
    ServiceStopped,
    #[error("service suspended")]
    ServiceSuspended,
    #[error("oversubscribed")]
    Oversubscribed,

    // Subscription
    #[error("subscriber stopped")]
    SubscriberStopped,
    #[error("subscriber exists")]
    SubscriberExists,
    #[error("desubscribed")]
    Desubscribed,

    // Operation
    #[error("operation timed out")]
    OperationTimeout,
    #[error("operation canceled")]
    OperationCanceled,
    #[error("operation failed")]
    OperationFailed,
    #[error("not allowed")]
    NotAllowed,
    #[error("allocation failed")]
    BadAlloc,
    #[error("unknown error")]
    Unknown,

    // Seeding
    #[error("seeding unsuccessful")]
    SeedingUnsuccessful,
    #[error("seeding complete")]
    SeedingComplete,
}

impl Code {
    pub fn is_success(self) -> bool {
        matches!(self, Code::Success)
    }

    pub fn ok(self) -> Result<(), Code> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl Default for Code {
    fn default() -> Self {
        Code::Success
    }
}

impl From<io::Error> for Code {
    fn from(e: io::Error) -> Self {
        use io::ErrorKind::*;
        match e.kind() {
            TimedOut => Code::OperationTimeout,
            ConnectionRefused | ConnectionReset | ConnectionAborted => Code::ConnectFailed,
            NotConnected | BrokenPipe => Code::BadStream,
            AddrInUse | AddrNotAvailable => Code::AddressInUse,
            _ => Code::BadStream,
        }
    }
}

impl From<tokio::time::error::Elapsed> for Code {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Code::OperationTimeout
    }
}
