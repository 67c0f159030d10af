//! Configuration file support for bTCP CLI tools

use btcp::protocol::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_WINDOW};
use btcp::{Impairment, SocketConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_client_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 20000))
}

fn default_server_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 30000))
}

fn default_window() -> u8 {
    DEFAULT_WINDOW
}

fn default_timeout_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Input file, "-" for stdin
    pub input: Option<PathBuf>,
    /// Local bind address
    #[serde(default = "default_client_addr")]
    pub local: SocketAddr,
    /// Server address
    #[serde(default = "default_server_addr")]
    pub remote: SocketAddr,
    /// Advertised window in segments
    #[serde(default = "default_window")]
    pub window: u8,
    /// Retransmission timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Handshake, teardown and retransmission attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Faults applied to outgoing segments
    #[serde(default)]
    pub impairment: Impairment,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            input: None,
            local: default_client_addr(),
            remote: default_server_addr(),
            window: default_window(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            impairment: Impairment::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Output file, "-" for stdout
    pub output: Option<PathBuf>,
    /// Local bind address
    #[serde(default = "default_server_addr")]
    pub local: SocketAddr,
    /// Client address
    #[serde(default = "default_client_addr")]
    pub remote: SocketAddr,
    /// Advertised window in segments
    #[serde(default = "default_window")]
    pub window: u8,
    /// Timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Faults applied to outgoing segments
    #[serde(default)]
    pub impairment: Impairment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            output: None,
            local: default_server_addr(),
            remote: default_client_addr(),
            window: default_window(),
            timeout_ms: default_timeout_ms(),
            impairment: Impairment::default(),
        }
    }
}

impl ClientConfig {
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig::new(self.window, Duration::from_millis(self.timeout_ms))
            .with_max_attempts(self.max_attempts)
    }
}

impl ServerConfig {
    pub fn socket_config(&self) -> SocketConfig {
        SocketConfig::new(self.window, Duration::from_millis(self.timeout_ms))
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Client configuration
    pub client: Option<ClientConfig>,
    /// Server configuration
    pub server: Option<ServerConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Load `path` if given, otherwise start from an empty configuration
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Config::default()),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let client = ClientConfig::default();
        assert_eq!(client.local, "127.0.0.1:20000".parse().unwrap());
        assert_eq!(client.remote, "127.0.0.1:30000".parse().unwrap());
        assert_eq!(client.socket_config(), SocketConfig::default());

        let server = ServerConfig::default();
        assert_eq!(server.local, client.remote);
        assert_eq!(server.remote, client.local);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [client]
            input = "payload.bin"
            window = 20

            [client.impairment]
            loss = 0.1
            seed = 3
            "#,
        )
        .unwrap();

        let client = config.client.unwrap();
        assert_eq!(client.input, Some(PathBuf::from("payload.bin")));
        assert_eq!(client.window, 20);
        assert_eq!(client.timeout_ms, 100);
        assert_eq!(client.impairment.loss, 0.1);
        assert_eq!(client.impairment.duplicate, 0.0);
        assert_eq!(client.impairment.seed, Some(3));
        assert!(config.server.is_none());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config {
            client: Some(ClientConfig::default()),
            server: Some(ServerConfig {
                output: Some(PathBuf::from("out.bin")),
                ..Default::default()
            }),
        };
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, config);
    }
}
