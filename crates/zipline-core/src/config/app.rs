//! Server and core URL configuration.

use serde::{Deserialize, Serialize};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

/// Settings shared by the upload path and the URL builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Domain used in returned URLs when the request carries no override.
    /// Falls back to the request's `Host` header when unset.
    #[serde(default)]
    pub default_domain: Option<String>,
    /// Whether returned URLs use `https://`.
    #[serde(default)]
    pub return_https_urls: bool,
    /// Directory holding chunk fragments between requests.
    #[serde(default = "default_temp_directory")]
    pub temp_directory: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_domain: None,
            return_https_urls: false,
            temp_directory: default_temp_directory(),
        }
    }
}

impl CoreConfig {
    /// URL scheme for returned links.
    pub fn scheme(&self) -> &'static str {
        if self.return_https_urls { "https" } else { "http" }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_temp_directory() -> String {
    std::env::temp_dir()
        .join("zipline")
        .to_string_lossy()
        .into_owned()
}
