//! Configuration management for the PeerCall console client

use anyhow::Context;
use peercall_core::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub show_timestamps: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            show_timestamps: true,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("peercall")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Self = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override the relay address with `host:port`.
    pub fn set_server(&mut self, address: &str) -> anyhow::Result<()> {
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("expected host:port, got {:?}", address))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in {:?}", address))?;
        if host.is_empty() {
            anyhow::bail!("empty host in {:?}", address);
        }

        self.client.server.host = host.to_string();
        self.client.server.port = port;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.client.server.host, ClientConfig::default().server.host);
        assert!(config.console.show_timestamps);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.set_server("relay.local:7000").unwrap();
        config.console.show_timestamps = false;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.client.server.host, "relay.local");
        assert_eq!(loaded.client.server.port, 7000);
        assert!(!loaded.console.show_timestamps);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"client":{"info_dialog_ms":500}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.client.info_dialog_ms, 500);
        assert_eq!(config.client.data_channel_label, "chat");
        assert!(config.console.show_timestamps);
    }

    #[test]
    fn test_bad_server_override() {
        let mut config = AppConfig::default();
        assert!(config.set_server("no-port").is_err());
        assert!(config.set_server("host:notaport").is_err());
        assert!(config.set_server(":5000").is_err());
    }
}
