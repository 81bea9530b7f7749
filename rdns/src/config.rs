use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("at least one transport (UDP or TCP) must be enabled")]
    NoTransportEnabled,
    #[error("max UDP size must be at least 512 bytes, got {0}")]
    UdpSizeTooSmall(usize),
    #[error("max connections must be at least 1")]
    NoConnectionsAllowed,
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub udp_port: u16,
    #[serde(default = "default_port")]
    pub tcp_port: u16,
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_udp_size")]
    pub max_udp_size: usize,

    #[serde(default = "default_true")]
    pub enable_udp: bool,
    #[serde(default = "default_true")]
    pub enable_tcp: bool,
    #[serde(default = "default_true")]
    pub enable_recursion: bool,
    #[serde(default = "default_true")]
    pub enable_caching: bool,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Fallback TTL for answers whose upstream TTL is zero.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_cleanup_interval")]
    pub cache_cleanup_interval_secs: u64,

    #[serde(default)]
    pub query_log_path: String,
}

fn default_port() -> u16 {
    53
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_io_timeout() -> u64 {
    5
}
fn default_idle_timeout() -> u64 {
    30
}
fn default_max_connections() -> usize {
    100
}
fn default_max_udp_size() -> usize {
    512
}
fn default_true() -> bool {
    true
}
fn default_cache_max_entries() -> usize {
    1000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        serde_json::from_str("{}").unwrap()
    }
}

impl ServerConfig {
    /// Load from a JSON file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            info!("no config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enable_udp && !self.enable_tcp {
            return Err(ConfigError::NoTransportEnabled);
        }
        if self.max_udp_size < 512 {
            return Err(ConfigError::UdpSizeTooSmall(self.max_udp_size));
        }
        if self.max_connections < 1 {
            return Err(ConfigError::NoConnectionsAllowed);
        }
        Ok(())
    }

    pub fn udp_addr(&self) -> String {
        format_addr(&self.host, self.udp_port)
    }

    pub fn tcp_addr(&self) -> String {
        format_addr(&self.host, self.tcp_port)
    }
}

fn format_addr(host: &str, port: u16) -> String {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    // IPv6 bind addresses need brackets
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.udp_port, 53);
        assert_eq!(config.tcp_port, 53);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.read_timeout_secs, 5);
        assert_eq!(config.write_timeout_secs, 5);
        assert_eq!(config.idle_timeout_secs, 30);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.max_udp_size, 512);
        assert!(config.enable_udp);
        assert!(config.enable_tcp);
        assert!(config.enable_recursion);
        assert!(config.enable_caching);
        assert_eq!(config.cache_max_entries, 1000);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.cache_cleanup_interval_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_all_transports_disabled_rejected() {
        let config = ServerConfig {
            enable_udp: false,
            enable_tcp: false,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoTransportEnabled)
        ));
    }

    #[test]
    fn test_udp_size_floor() {
        let config = ServerConfig {
            max_udp_size: 256,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UdpSizeTooSmall(256))
        ));
    }

    #[test]
    fn test_max_connections_floor() {
        let config = ServerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoConnectionsAllowed)
        ));
    }

    #[test]
    fn test_port_out_of_range_fails_deserialization() {
        assert!(serde_json::from_str::<ServerConfig>(r#"{"udp_port": 70000}"#).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let json = r#"{
            "udp_port": 5353,
            "host": "127.0.0.1",
            "enable_tcp": false
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.udp_port, 5353);
        assert_eq!(config.udp_addr(), "127.0.0.1:5353");
        assert!(config.validate().is_ok());

        let serialized = serde_json::to_string(&config).unwrap();
        let config2: ServerConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config2.udp_port, 5353);
        assert!(!config2.enable_tcp);
    }

    #[test]
    fn test_ipv6_bind_address() {
        let config = ServerConfig {
            host: "::".to_string(),
            tcp_port: 5353,
            ..Default::default()
        };
        assert_eq!(config.tcp_addr(), "[::]:5353");
    }
}
