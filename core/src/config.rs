//! Client configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub ice_servers: Vec<IceServer>,
    pub data_channel_label: String,
    pub message_queue_capacity: usize,
    pub info_dialog_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    #[serde(default = "default_ws_path")]
    pub path: String,
}

/// Discovery/relay server handed to every peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 5000,
                use_tls: false,
                path: default_ws_path(),
            },
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            data_channel_label: "chat".to_string(),
            message_queue_capacity: 256,
            info_dialog_ms: 3000,
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: u16, use_tls: bool) -> Self {
        let mut config = Self::default();
        config.server.host = host.to_string();
        config.server.port = port;
        config.server.use_tls = use_tls;
        config
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.server.use_tls { "wss" } else { "ws" };
        let path = if self.server.path.starts_with('/') {
            self.server.path.clone()
        } else {
            format!("/{}", self.server.path)
        };
        format!("{}://{}:{}{}", scheme, self.server.host, self.server.port, path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server host is empty".to_string()));
        }
        if self.ice_servers.iter().all(|s| s.urls.is_empty()) {
            return Err(Error::Config("no ICE server configured".to_string()));
        }
        if self.message_queue_capacity == 0 {
            return Err(Error::Config(
                "message_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.data_channel_label.is_empty() {
            return Err(Error::Config("data_channel_label is empty".to_string()));
        }
        Url::parse(&self.ws_url())?;
        Ok(())
    }
}
