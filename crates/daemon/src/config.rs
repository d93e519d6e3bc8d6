//! Configuration management for the Termbook daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbook/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionDefaults;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid socket address: {0}")]
    InvalidBindAddr(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("default terminal geometry must be positive, got {0}x{1}")]
    InvalidGeometry(u16, u16),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Termbook daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Server socket configuration.
    pub server: ServerConfig,

    /// Access control settings.
    pub auth: AuthConfig,

    /// Session defaults.
    pub session: SessionConfig,
}

/// Server socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway listens on.
    pub bind_addr: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Access control settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Access token required on every connection. Generated at startup
    /// when empty.
    pub token: String,
}

/// Session defaults applied when a create request omits a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell command for new sessions. Empty resolves $SHELL or /bin/sh.
    pub default_shell: String,

    /// Terminal columns for sessions created without geometry.
    pub default_cols: u16,

    /// Terminal rows for sessions created without geometry.
    pub default_rows: u16,

    /// Maximum number of concurrent sessions per connection.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: String::new(),
            default_cols: 80,
            default_rows: 24,
            max_sessions: 10,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbook")
        .join("config.toml")
}

impl Config {
    /// Applies environment variable overrides.
    ///
    /// Recognized variables: `TERMBOOK_BIND_ADDR`, `TERMBOOK_TOKEN`,
    /// `TERMBOOK_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("TERMBOOK_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Ok(token) = std::env::var("TERMBOOK_TOKEN") {
            self.auth.token = token;
        }
        if let Ok(level) = std::env::var("TERMBOOK_LOG_LEVEL") {
            self.server.log_level = level;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        if !VALID_LOG_LEVELS.contains(&self.server.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        if self.session.max_sessions == 0 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.default_cols == 0 || self.session.default_rows == 0 {
            return Err(ConfigError::InvalidGeometry(
                self.session.default_cols,
                self.session.default_rows,
            ));
        }

        Ok(())
    }

    /// Generates an access token if none is configured.
    ///
    /// Returns true if a token was generated.
    pub fn ensure_token(&mut self) -> bool {
        if !self.auth.token.is_empty() {
            return false;
        }
        self.auth.token = generate_token();
        true
    }

    /// Returns the bind address as a socket address.
    ///
    /// Call [`validate`](Config::validate) first; this fails on an
    /// unparseable address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind address: {}", self.server.bind_addr))
    }

    /// Converts the session section into registry defaults.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            shell: if self.session.default_shell.is_empty() {
                None
            } else {
                Some(self.session.default_shell.clone())
            },
            cols: self.session.default_cols,
            rows: self.session.default_rows,
            max_sessions: self.session.max_sessions,
        }
    }

    /// Loads configuration from the given path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Loads configuration from the default path, falling back to
    /// defaults when the file does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Saves the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let content = self.to_toml()?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

/// Generates a random 32-character hex access token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}
