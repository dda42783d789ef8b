pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";
#[cfg(debug_assertions)]
pub const CONFIGFILE_PATH: &str = "p2p-node.toml";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";
#[cfg(not(debug_assertions))]
pub const CONFIGFILE_PATH: &str = "/etc/p2p-node.toml";
