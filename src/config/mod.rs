//! Configuration management

use crate::crypto::Method;
use crate::protocol::CONNECT_TIMEOUT;
use crate::proxy::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local listener configuration
    #[serde(default)]
    pub local: LocalConfig,
    /// Upstream proxy configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Check that the configuration can start a local server
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.local.listen.is_empty() {
            return Err(crate::Error::Config("local.listen is empty".into()));
        }
        self.server.method()?;
        if self.server.host.is_empty() {
            return Err(crate::Error::Config("server.host is empty".into()));
        }
        if self.server.port == 0 {
            return Err(crate::Error::Config("server.port must not be 0".into()));
        }
        if self.server.password.is_empty() {
            return Err(crate::Error::Config("server.password is empty".into()));
        }
        if self.server.timeout == 0 {
            return Err(crate::Error::Config("server.timeout must not be 0".into()));
        }
        Ok(())
    }

    /// Validated settings for the sessions of a local server
    pub fn session_config(&self) -> Result<SessionConfig, crate::Error> {
        self.validate()?;

        Ok(SessionConfig::new(
            self.server.host.clone(),
            self.server.port,
            self.server.method()?,
            self.server.password.clone(),
        )
        .with_one_time_auth(self.server.one_time_auth)
        .with_connect_timeout(Duration::from_secs(self.server.timeout)))
    }
}

/// Local listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// SOCKS5 listen address
    pub listen: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1080".to_string(),
        }
    }
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upstream host name or address
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Cipher method name (e.g. "aes-256-cfb")
    pub method: String,
    /// Shared password
    pub password: String,
    /// Authenticate the header and every chunk
    pub one_time_auth: bool,
    /// Connect timeout in seconds
    pub timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8388,
            method: Method::Aes256Cfb.to_string(),
            password: String::new(),
            one_time_auth: false,
            timeout: CONNECT_TIMEOUT.as_secs(),
        }
    }
}

impl ServerConfig {
    /// Parsed cipher method
    pub fn method(&self) -> Result<Method, crate::Error> {
        self.method
            .parse()
            .map_err(|e| crate::Error::Config(format!("server.method: {}", e)))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Generate example configuration
pub fn generate_example_config() -> Config {
    let mut config = Config::default();
    config.server.password = "change-me".to_string();
    config
}
