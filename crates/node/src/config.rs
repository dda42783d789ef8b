//! Loads `net::settings::Settings` from the configured TOML file, the same
//! way the teacher's `config::get()` loads `ServerConfig` — except a
//! missing or malformed file is surfaced to `main` as an `Err` instead of
//! `expect`-panicking inside lazy global initialization.

use std::path::Path;

use anyhow::{Context, Result};
use net::settings::Settings;

use crate::consts::CONFIGFILE_PATH;

/// Reads `path` and parses it as `Settings`. A missing file falls back to
/// `Settings::default()` (not usable for a real deployment, but enough to
/// start the node and let a human notice the defaults in the logs), matching
/// the teacher's "default config is not usable, but allow the server to
/// start without a config file" stance. A present-but-malformed file is an
/// error, never silently ignored.
pub fn load(path: &Path) -> Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Settings::from_toml_str(&contents)
            .with_context(|| format!("failed to parse configuration file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e).with_context(|| format!("failed to read configuration file {}", path.display())),
    }
}

pub fn load_default() -> Result<Settings> {
    load(Path::new(CONFIGFILE_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_default() {
        let settings = load(Path::new("/nonexistent/path/p2p-node.toml")).unwrap();
        assert_eq!(settings.outbound_connections, Settings::default().outbound_connections);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = std::env::temp_dir().join("p2p-node-config-test-malformed.toml");
        std::fs::write(&dir, "outbound_connections = \"not a number\"").unwrap();
        let result = load(&dir);
        let _ = std::fs::remove_file(&dir);
        assert!(result.is_err());
    }

    #[test]
    fn well_formed_file_overrides_defaults() {
        let dir = std::env::temp_dir().join("p2p-node-config-test-ok.toml");
        std::fs::write(&dir, "outbound_connections = 3\npeers = [\"10.0.0.5:8333\"]\n").unwrap();
        let settings = load(&dir).unwrap();
        let _ = std::fs::remove_file(&dir);
        assert_eq!(settings.outbound_connections, 3);
        assert_eq!(settings.peers, vec!["10.0.0.5:8333".to_string()]);
    }
}
