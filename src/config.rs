// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones

use crate::paths;
use crate::session::Session;
use crate::transport::ConnectOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub transport: TransportConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Phone number used for the pairing exchange. When unset, the agent
    /// prompts on stdin the first time it needs to pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Client identity string presented to the network.
    pub client_name: String,
    /// Protocol version triple advertised on connect.
    pub protocol_version: [u32; 3],
    pub connect_timeout_secs: u64,
    pub sync_full_history: bool,
    pub mark_online_on_connect: bool,
    /// Broadcast channels to subscribe to after each successful open.
    pub subscribe_channels: Vec<String>,
}

// Custom Debug impl to redact the phone number
impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("phone_number", &self.phone_number.as_ref().map(|_| "[REDACTED]"))
            .field("client_name", &self.client_name)
            .field("protocol_version", &self.protocol_version)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("sync_full_history", &self.sync_full_history)
            .field("mark_online_on_connect", &self.mark_online_on_connect)
            .field("subscribe_channels", &self.subscribe_channels)
            .finish()
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            phone_number: None,
            client_name: default_client_name(),
            protocol_version: default_protocol_version(),
            connect_timeout_secs: default_connect_timeout_secs(),
            sync_full_history: false,
            mark_online_on_connect: false,
            subscribe_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport type: "mock" is the only built-in; real protocol backends
    /// register under their own names.
    #[serde(rename = "type")]
    pub transport_type: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: default_transport_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the cache store document and the session.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: paths::data_dir().display().to_string(),
        }
    }
}

fn default_client_name() -> String {
    "warble (Chrome)".to_string()
}

fn default_protocol_version() -> [u32; 3] {
    [2, 3000, 1023223821]
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_transport_type() -> String {
    "mock".to_string()
}

impl Config {
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("WARBLE_CONFIG_PATH") {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Some(path);
            }
        }
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Some(local);
        }
        let xdg = paths::config_file();
        if xdg.exists() {
            return Some(xdg);
        }
        None
    }

    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("WARBLE_PHONE_NUMBER") {
            config.agent.phone_number = Some(val);
        }
        if let Ok(val) = std::env::var("WARBLE_CLIENT_NAME") {
            config.agent.client_name = val;
        }
        if let Ok(val) = std::env::var("WARBLE_SUBSCRIBE_CHANNELS") {
            config.agent.subscribe_channels = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("WARBLE_TRANSPORT") {
            config.transport.transport_type = val;
        }
        if let Ok(val) = std::env::var("WARBLE_DATA_DIR") {
            config.storage.data_dir = val;
        }

        Ok(config)
    }

    /// Connection options for one connect cycle with the given session.
    pub fn connect_options(&self, auth: Session) -> ConnectOptions {
        ConnectOptions {
            auth,
            protocol_version: self.agent.protocol_version,
            client_name: self.agent.client_name.clone(),
            connect_timeout: Duration::from_secs(self.agent.connect_timeout_secs),
            sync_full_history: self.agent.sync_full_history,
            mark_online_on_connect: self.agent.mark_online_on_connect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.agent.connect_timeout_secs, 60);
        assert!(!config.agent.sync_full_history);
        assert!(!config.agent.mark_online_on_connect);
        assert_eq!(config.transport.transport_type, "mock");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            phone_number = "628123456789"
            subscribe_channels = ["a@newsletter", "b@newsletter"]

            [transport]
            type = "mock"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.phone_number.as_deref(), Some("628123456789"));
        assert_eq!(config.agent.subscribe_channels.len(), 2);
        assert_eq!(config.agent.protocol_version, [2, 3000, 1023223821]);
    }

    #[test]
    fn debug_redacts_phone_number() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            phone_number = "628123456789"
            "#,
        )
        .unwrap();
        let debug = format!("{:?}", config.agent);
        assert!(!debug.contains("628123456789"));
        assert!(debug.contains("REDACTED"));
    }
}
