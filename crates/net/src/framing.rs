//! Wire framing (spec §3 "Heading", §6 "Wire framing"). The 24-byte,
//! little-endian frame header precedes every payload; everything after the
//! header is an opaque `Payload` blob, codec'd by message type elsewhere.

use sha2::{Digest, Sha256};

pub const HEADING_SIZE: usize = 24;
const COMMAND_SIZE: usize = 12;

/// Pre-witness payload ceiling (spec §6, §8 B1/B2).
pub const MAX_PAYLOAD_PRE_WITNESS: u32 = 1_800_003;
/// Witness-enabled payload ceiling.
pub const MAX_PAYLOAD_WITNESS: u32 = 4_000_000;

pub fn maximum_payload(witness_enabled: bool) -> u32 {
    if witness_enabled {
        MAX_PAYLOAD_WITNESS
    } else {
        MAX_PAYLOAD_PRE_WITNESS
    }
}

/// Message identifier derived from the heading's `command` field. Unknown
/// commands decode to `Unknown` rather than failing heading parse — only
/// framing-level problems (bad magic, oversize) abort the read loop before
/// a command is even considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Version,
    Verack,
    Ping,
    Pong,
    GetAddress,
    Address,
    AddressV2,
    SendAddressV2,
    Reject,
    Unknown,
}

impl MessageId {
    pub fn command_bytes(self) -> &'static [u8] {
        match self {
            MessageId::Version => b"version",
            MessageId::Verack => b"verack",
            MessageId::Ping => b"ping",
            MessageId::Pong => b"pong",
            MessageId::GetAddress => b"getaddr",
            MessageId::Address => b"addr",
            MessageId::AddressV2 => b"addrv2",
            MessageId::SendAddressV2 => b"sendaddrv2",
            MessageId::Reject => b"reject",
            MessageId::Unknown => b"",
        }
    }

    pub fn all() -> [MessageId; 9] {
        [
            MessageId::Version,
            MessageId::Verack,
            MessageId::Ping,
            MessageId::Pong,
            MessageId::GetAddress,
            MessageId::Address,
            MessageId::AddressV2,
            MessageId::SendAddressV2,
            MessageId::Reject,
        ]
    }

    fn from_command(command: &[u8; COMMAND_SIZE]) -> MessageId {
        let len = command.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        let text = &command[..len];
        for id in Self::all() {
            if id.command_bytes() == text {
                return id;
            }
        }
        MessageId::Unknown
    }

    fn to_command(self) -> [u8; COMMAND_SIZE] {
        let mut buf = [0u8; COMMAND_SIZE];
        let bytes = self.command_bytes();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Heading {
    pub magic: u32,
    pub command: MessageId,
    pub payload_size: u32,
    pub checksum: u32,
}

impl Heading {
    pub fn new(magic: u32, command: MessageId, payload: &[u8]) -> Self {
        Heading {
            magic,
            command,
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADING_SIZE] {
        let mut buf = [0u8; HEADING_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..16].copy_from_slice(&self.command.to_command());
        buf[16..20].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADING_SIZE]) -> Self {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut command = [0u8; COMMAND_SIZE];
        command.copy_from_slice(&buf[4..16]);
        let payload_size = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        Heading {
            magic,
            command: MessageId::from_command(&command),
            payload_size,
            checksum,
        }
    }
}

/// First 4 bytes of the double-SHA256 of `payload` (spec §6).
pub fn checksum(payload: &[u8]) -> u32 {
    let once = Sha256::digest(payload);
    let twice = Sha256::digest(once);
    u32::from_le_bytes(twice[0..4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_round_trips() {
        let payload = b"hello world";
        let heading = Heading::new(0xD9B4BEF9, MessageId::Ping, payload);
        let bytes = heading.to_bytes();
        let parsed = Heading::from_bytes(&bytes);
        assert_eq!(parsed.magic, heading.magic);
        assert_eq!(parsed.command, MessageId::Ping);
        assert_eq!(parsed.payload_size, payload.len() as u32);
        assert_eq!(parsed.checksum, heading.checksum);
    }

    #[test]
    fn unknown_command_decodes_without_error() {
        let heading = Heading::new(1, MessageId::Unknown, &[]);
        // MessageId::Unknown has empty command bytes, so a heading built
        // from an actually-unrecognized 12-byte command also round-trips
        // to Unknown.
        let mut buf = heading.to_bytes();
        buf[4..16].copy_from_slice(b"notarealcmd\0");
        let parsed = Heading::from_bytes(&buf[0..24].try_into().unwrap());
        assert_eq!(parsed.command, MessageId::Unknown);
    }

    #[test]
    fn boundary_payload_sizes() {
        assert_eq!(maximum_payload(false), 1_800_003);
        assert_eq!(maximum_payload(true), 4_000_000);
    }
}
