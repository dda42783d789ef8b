//! Concrete wire messages (spec's "opaque `Payload` codec trait" made
//! concrete for the handful of messages the channel runtime itself needs to
//! understand: the handshake, the ping/pong keepalive, and address
//! exchange). Bitcoin-specific message bodies beyond these are explicitly
//! out of scope (spec §1) and are left to a downstream codec crate.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::address::AddressItem;
use crate::distributor::Message;
use crate::error::Code;
use crate::framing::MessageId;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, Code> {
    bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(Code::InvalidMessage)
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, Code> {
    bytes
        .get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or(Code::InvalidMessage)
}

fn read_i64(bytes: &[u8], at: usize) -> Result<i64, Code> {
    read_u64(bytes, at).map(|v| v as i64)
}

#[derive(Debug, Clone)]
pub struct VersionMessage {
    pub value: u32,
    pub services: u64,
    pub timestamp: i64,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
    pub relay: bool,
}

impl Message for VersionMessage {
    const ID: MessageId = MessageId::Version;

    fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
        if bytes.len() < 4 + 8 + 8 + 8 {
            return Err(Code::InvalidMessage);
        }
        let value = read_u32(bytes, 0)?;
        let services = read_u64(bytes, 4)?;
        let timestamp = read_i64(bytes, 12)?;
        let nonce = read_u64(bytes, 20)?;
        let agent_len = *bytes.get(28).ok_or(Code::InvalidMessage)? as usize;
        let agent_start = 29;
        let agent_end = agent_start + agent_len;
        let user_agent = bytes
            .get(agent_start..agent_end)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(Code::InvalidMessage)?;
        let start_height = read_u32(bytes, agent_end)?;
        let relay = bytes.get(agent_end + 4).copied().unwrap_or(1) != 0;
        Ok(VersionMessage {
            value,
            services,
            timestamp,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        if self.user_agent.len() > u8::MAX as usize {
            return Err(Code::InvalidMessage);
        }
        let mut out = Vec::with_capacity(33 + self.user_agent.len());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.services.to_le_bytes());
        out.extend_from_slice(&(self.timestamp as u64).to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.push(self.user_agent.len() as u8);
        out.extend_from_slice(self.user_agent.as_bytes());
        out.extend_from_slice(&self.start_height.to_le_bytes());
        out.push(self.relay as u8);
        Ok(out)
    }
}

impl VersionMessage {
    pub fn local(
        protocol_maximum: u32,
        services: u64,
        nonce: u64,
        user_agent: String,
        start_height: u32,
        relay: bool,
    ) -> Self {
        VersionMessage {
            value: protocol_maximum,
            services,
            timestamp: now_unix(),
            nonce,
            user_agent,
            start_height,
            relay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerackMessage;

impl Message for VerackMessage {
    const ID: MessageId = MessageId::Verack;

    fn decode(_bytes: &[u8], _version: u32) -> Result<Self, Code> {
        Ok(VerackMessage)
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PingMessage {
    pub nonce: Option<u64>,
}

impl Message for PingMessage {
    const ID: MessageId = MessageId::Ping;

    fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
        if bytes.is_empty() {
            Ok(PingMessage { nonce: None })
        } else {
            Ok(PingMessage {
                nonce: Some(read_u64(bytes, 0)?),
            })
        }
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        match self.nonce {
            Some(nonce) => Ok(nonce.to_le_bytes().to_vec()),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PongMessage {
    pub nonce: u64,
}

impl Message for PongMessage {
    const ID: MessageId = MessageId::Pong;

    fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
        Ok(PongMessage {
            nonce: read_u64(bytes, 0)?,
        })
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        Ok(self.nonce.to_le_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetAddressMessage;

impl Message for GetAddressMessage {
    const ID: MessageId = MessageId::GetAddress;

    fn decode(_bytes: &[u8], _version: u32) -> Result<Self, Code> {
        Ok(GetAddressMessage)
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct AddressMessage {
    pub items: Vec<AddressItem>,
}

impl Message for AddressMessage {
    const ID: MessageId = MessageId::Address;

    fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
        const ENTRY: usize = 4 + 8 + 18; // timestamp, services, ipv6, port
        if bytes.len() % ENTRY != 0 {
            return Err(Code::InvalidMessage);
        }
        let mut items = Vec::with_capacity(bytes.len() / ENTRY);
        for chunk in bytes.chunks_exact(ENTRY) {
            let timestamp = read_u32(chunk, 0)?;
            let services = read_u64(chunk, 4)?;
            let ip_bytes: [u8; 16] = chunk[12..28].try_into().map_err(|_| Code::InvalidMessage)?;
            let port = u16::from_be_bytes(chunk[28..30].try_into().unwrap());
            let ip = std::net::Ipv6Addr::from(ip_bytes);
            let socket_addr = std::net::SocketAddr::new(std::net::IpAddr::V6(ip), port);
            items.push(AddressItem::new(socket_addr.into(), timestamp, services));
        }
        Ok(AddressMessage { items })
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        let mut out = Vec::with_capacity(self.items.len() * 30);
        for item in &self.items {
            out.extend_from_slice(&item.timestamp.to_le_bytes());
            out.extend_from_slice(&item.services.to_le_bytes());
            let ip = match item.authority.ip() {
                std::net::IpAddr::V6(v6) => v6,
                std::net::IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            };
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&item.authority.port().to_be_bytes());
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SendAddressV2Message;

impl Message for SendAddressV2Message {
    const ID: MessageId = MessageId::SendAddressV2;

    fn decode(_bytes: &[u8], _version: u32) -> Result<Self, Code> {
        Ok(SendAddressV2Message)
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        Ok(Vec::new())
    }
}

/// Minimal diagnostic `reject` message (supplemented from
/// `libbitcoin-network`, gated by `settings.enable_reject`; see
/// `protocol::reject`).
#[derive(Debug, Clone)]
pub struct RejectMessage {
    pub rejected_command: String,
    pub code: u8,
    pub reason: String,
}

impl Message for RejectMessage {
    const ID: MessageId = MessageId::Reject;

    fn decode(bytes: &[u8], _version: u32) -> Result<Self, Code> {
        let mut pos = 0usize;
        let cmd_len = *bytes.get(pos).ok_or(Code::InvalidMessage)? as usize;
        pos += 1;
        let rejected_command = bytes
            .get(pos..pos + cmd_len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(Code::InvalidMessage)?;
        pos += cmd_len;
        let code = *bytes.get(pos).ok_or(Code::InvalidMessage)?;
        pos += 1;
        let reason_len = *bytes.get(pos).ok_or(Code::InvalidMessage)? as usize;
        pos += 1;
        let reason = bytes
            .get(pos..pos + reason_len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(Code::InvalidMessage)?;
        Ok(RejectMessage {
            rejected_command,
            code,
            reason,
        })
    }

    fn encode(&self, _version: u32) -> Result<Vec<u8>, Code> {
        if self.rejected_command.len() > u8::MAX as usize || self.reason.len() > u8::MAX as usize {
            return Err(Code::InvalidMessage);
        }
        let mut out = Vec::new();
        out.push(self.rejected_command.len() as u8);
        out.extend_from_slice(self.rejected_command.as_bytes());
        out.push(self.code);
        out.push(self.reason.len() as u8);
        out.extend_from_slice(self.reason.as_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_round_trips() {
        let msg = VersionMessage::local(70016, 1, 1234, "test:1.0".into(), 800_000, true);
        let bytes = msg.encode(0).unwrap();
        let parsed = VersionMessage::decode(&bytes, 0).unwrap();
        assert_eq!(parsed.value, 70016);
        assert_eq!(parsed.nonce, 1234);
        assert_eq!(parsed.user_agent, "test:1.0");
        assert_eq!(parsed.start_height, 800_000);
        assert!(parsed.relay);
    }

    #[test]
    fn pre_bip31_ping_has_no_nonce() {
        let msg = PingMessage { nonce: None };
        let bytes = msg.encode(0).unwrap();
        assert!(bytes.is_empty());
        let parsed = PingMessage::decode(&bytes, 0).unwrap();
        assert!(parsed.nonce.is_none());
    }

    #[test]
    fn address_message_round_trips() {
        let item = AddressItem::new("10.0.0.1:8333".parse().unwrap(), 111, 1);
        let msg = AddressMessage { items: vec![item] };
        let bytes = msg.encode(0).unwrap();
        let parsed = AddressMessage::decode(&bytes, 0).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].timestamp, 111);
    }
}
