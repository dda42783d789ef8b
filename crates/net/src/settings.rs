//! The settings enumerated in spec §6, deserialised from the host
//! application's TOML configuration the same way the teacher's
//! `ServerConfig::from_toml_str` works: a flat `serde::Deserialize` struct
//! with `#[serde(default)]` so a partial TOML document still produces a
//! usable (if permissive) value. `crates/node` owns the TOML file; this
//! crate only owns the shape and the conversions into the narrower structs
//! each component actually wants (`ProxyConfig`, `ChannelTimeouts`,
//! `HandshakeSettings`, `FilterPolicy`, ...).

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::address::FilterPolicy;
use crate::channel::ChannelTimeouts;
use crate::protocol::{HandshakeSettings, VersionMessage};
use crate::proxy::ProxyConfig;

/// Mainnet magic, matching the source's default network.
pub const MAINNET_MAGIC: u32 = 0xD9B4BEF9;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Connection counts
    pub outbound_connections: u32,
    pub inbound_connections: u32,
    pub connect_batch_size: u32,

    // Timeouts (seconds unless noted)
    pub connect_timeout_seconds: u64,
    pub handshake_timeout_seconds: u64,
    pub seeding_timeout_seconds: u64,
    pub retry_timeout_seconds: u64,
    pub channel_heartbeat_minutes: u64,
    pub channel_inactivity_minutes: u64,
    pub channel_expiration_minutes: u64,
    pub maximum_skew_minutes: u64,

    // Protocol policy
    pub protocol_minimum: u32,
    pub protocol_maximum: u32,
    pub services_minimum: u64,
    pub services_maximum: u64,
    pub invalid_services: u64,
    pub enable_address: bool,
    pub enable_address_v2: bool,
    pub enable_witness_tx: bool,
    pub enable_compact: bool,
    pub enable_alert: bool,
    pub enable_reject: bool,
    pub enable_relay: bool,
    pub enable_ipv6: bool,
    pub enable_loopback: bool,
    pub validate_checksum: bool,

    // Address policy
    pub host_pool_capacity: usize,
    pub address_lower: u32,
    pub address_upper: u32,
    pub minimum_buffer: usize,
    /// Not named in spec §6's settings list directly, but required by
    /// `SessionSeed`'s "`address_count < minimum_address_count`" gate
    /// (spec §4.11); supplemented here rather than hard-coded.
    pub minimum_address_count: usize,
    pub rate_limit: u64,

    // Identity
    pub identifier: u32,
    pub user_agent: String,
    /// Services bits this node advertises in its own `version` message;
    /// distinct from `services_minimum`/`services_maximum`, which instead
    /// filter what is accepted *from* peers.
    pub services: u64,

    // Lists
    pub peers: Vec<String>,
    pub seeds: Vec<String>,
    pub selfs: Vec<SocketAddr>,
    pub binds: Vec<SocketAddr>,
    pub blacklists: Vec<IpAddr>,
    pub whitelists: Vec<IpAddr>,

    /// Worker-pool size backing every strand (spec §4.1 `threads`).
    pub threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            outbound_connections: 8,
            inbound_connections: 128,
            connect_batch_size: 5,

            connect_timeout_seconds: 5,
            handshake_timeout_seconds: 30,
            seeding_timeout_seconds: 30,
            retry_timeout_seconds: 60,
            channel_heartbeat_minutes: 5,
            channel_inactivity_minutes: 10,
            channel_expiration_minutes: 0,
            maximum_skew_minutes: 2,

            protocol_minimum: 31402,
            protocol_maximum: 70016,
            services_minimum: 0,
            services_maximum: u64::MAX,
            invalid_services: 0,
            enable_address: true,
            enable_address_v2: false,
            enable_witness_tx: true,
            enable_compact: false,
            enable_alert: false,
            enable_reject: false,
            enable_relay: true,
            enable_ipv6: true,
            enable_loopback: false,
            validate_checksum: false,

            host_pool_capacity: 1000,
            address_lower: 0,
            address_upper: 0,
            minimum_buffer: 0,
            minimum_address_count: 1000,
            rate_limit: 0,

            identifier: MAINNET_MAGIC,
            user_agent: "/rust-net:0.1.0/".to_string(),
            services: crate::address::services::NODE_NETWORK | crate::address::services::NODE_WITNESS,

            peers: Vec::new(),
            seeds: Vec::new(),
            selfs: Vec::new(),
            binds: Vec::new(),
            blacklists: Vec::new(),
            whitelists: Vec::new(),

            threads: num_cpus_fallback(),
        }
    }
}

/// `num_cpus` is not in the dependency table (the teacher doesn't carry
/// it either); `available_parallelism` is the stdlib equivalent already
/// used for this exact purpose elsewhere in the ecosystem.
fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Settings {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig {
            magic: self.identifier,
            witness_enabled: self.enable_witness_tx,
            validate_checksum: self.validate_checksum,
        }
    }

    pub fn channel_timeouts(&self) -> ChannelTimeouts {
        ChannelTimeouts {
            inactivity: Duration::from_secs(self.channel_inactivity_minutes * 60),
            expiration: Duration::from_secs(self.channel_expiration_minutes * 60),
        }
    }

    pub fn handshake_settings(&self) -> HandshakeSettings {
        HandshakeSettings {
            protocol_minimum: self.protocol_minimum,
            protocol_maximum: self.protocol_maximum,
            services_minimum: self.services_minimum,
            invalid_services: self.invalid_services,
            maximum_skew: Duration::from_secs(self.maximum_skew_minutes * 60),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_seconds),
            enable_address_v2: self.enable_address_v2,
        }
    }

    /// Manual peers are exempt from the pool's own filtering (spec §4.9):
    /// they are parsed here only so `filter_policy` can exclude them from
    /// ever being treated as a pool candidate, matching "peered (manual)"
    /// in the §4.9 rejection list.
    pub fn manual_authorities(&self) -> Vec<crate::address::Authority> {
        self.peers
            .iter()
            .filter_map(|p| p.parse::<SocketAddr>().ok())
            .map(crate::address::Authority::from)
            .collect()
    }

    pub fn filter_policy(&self) -> FilterPolicy {
        FilterPolicy {
            enable_ipv6: self.enable_ipv6,
            enable_loopback: self.enable_loopback,
            services_minimum: self.services_minimum,
            services_maximum: self.services_maximum,
            invalid_services: self.invalid_services,
            manual: self.manual_authorities(),
            blacklist: self.blacklists.clone(),
            whitelist: self.whitelists.clone(),
        }
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.retry_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn seeding_timeout(&self) -> Duration {
        Duration::from_secs(self.seeding_timeout_seconds)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.channel_heartbeat_minutes * 60)
    }

    /// Builds the local handshake `version` message; the nonce is supplied
    /// per-channel by the session (spec §3: nonce is per-channel, not
    /// per-node), so it is zeroed here and overwritten at attach time.
    pub fn local_version(&self, start_height: u64) -> VersionMessage {
        VersionMessage::local(
            self.protocol_maximum,
            self.services,
            0,
            self.user_agent.clone(),
            start_height as u32,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            identifier = 3652501241
            outbound_connections = 4
            peers = ["10.0.0.5:8333"]
        "#;
        let settings = Settings::from_toml_str(toml_str).unwrap();
        assert_eq!(settings.identifier, 3_652_501_241);
        assert_eq!(settings.outbound_connections, 4);
        assert_eq!(settings.peers, vec!["10.0.0.5:8333".to_string()]);
        // Untouched fields fall back to Default.
        assert_eq!(settings.inbound_connections, 128);
        assert!(settings.enable_relay);
    }

    #[test]
    fn empty_toml_is_fully_defaulted() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.identifier, MAINNET_MAGIC);
        assert_eq!(settings.protocol_maximum, 70016);
    }
}
