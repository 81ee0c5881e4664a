//! TOML configuration for the line protocol and the transports.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! [line]
//! upper_name = true
//! default_command = "GET"
//!
//! [listener]
//! addr = "127.0.0.1:9000"
//!
//! [http]
//! addr = "127.0.0.1:8080"
//! prefix = "/_"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, VarexError};

/// Maximum bytes in a single protocol line.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

/// Maximum simultaneous line-protocol clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Idle connection timeout (seconds).
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Maximum accepted HTTP request body (1 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Line protocol behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Case-fold command names to uppercase before lookup.
    pub upper_name: bool,
    /// Append a newline to every successful reply.
    pub add_return: bool,
    /// Command used when the first word matches no command.
    pub default_command: Option<String>,
    /// Longer lines are answered with `INVALID LINE`.
    pub max_line_len: usize,
    /// `SET` replies with the previous value instead of `OK`.
    pub echo_previous: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            upper_name: true,
            add_return: true,
            default_command: Some("GET".to_string()),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            echo_previous: false,
        }
    }
}

/// TCP line listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Socket address to bind.
    pub addr: String,
    /// Maximum simultaneous connections.
    pub max_connections: usize,
    /// Idle connection timeout in seconds (0 = no timeout).
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9000".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

/// HTTP adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Socket address to bind.
    pub addr: String,
    /// Path prefix for the `/vars` and `/var/{name}` routes.
    pub prefix: String,
    /// Larger request bodies are rejected with 413.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            prefix: "/_".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VarexConfig {
    pub line: LineConfig,
    pub listener: ListenerConfig,
    pub http: HttpConfig,
}

impl VarexConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VarexError::Config(format!("{}: {e}", path.display())))?;
        log::debug!("loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.line.max_line_len == 0 {
            return Err(VarexError::Config("line.max_line_len must be > 0".into()));
        }
        if self.listener.max_connections == 0 {
            return Err(VarexError::Config(
                "listener.max_connections must be > 0".into(),
            ));
        }
        if !self.http.prefix.is_empty() && !self.http.prefix.starts_with('/') {
            return Err(VarexError::Config(format!(
                "http.prefix must start with '/': {}",
                self.http.prefix
            )));
        }
        Ok(())
    }
}
