//! Listener binding and dispatcher options.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Default cap on a buffered request body, large enough for a snapshot image.
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Host and port one listener instance binds to.
///
/// Immutable for the life of a listener; listening on a different port means
/// stopping and starting again with a new config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    host: String,
    port: u16,
}

impl ListenerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Listen on every IPv4 interface.
    pub fn all_interfaces(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }

    /// Parse a binding string.
    ///
    /// Accepts `host:port`, `[v6]:port`, the wildcards `+`, `*` or an empty
    /// host for all interfaces, and URL prefixes such as `http://+:8080/`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBinding {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let without_scheme = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .unwrap_or(trimmed);
        let authority = without_scheme
            .split('/')
            .next()
            .unwrap_or_default();

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| invalid("expected [address]:port"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?
        };

        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
        let host = match host {
            "" | "+" | "*" => "0.0.0.0",
            other if other.contains(':') && !authority.starts_with('[') => {
                return Err(invalid("IPv6 addresses must be bracketed"))
            }
            other => other,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ListenerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Options applied to every request the dispatcher handles.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bodies larger than this are drained and acknowledged without decoding
    /// Default: 32 MiB
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let config = ListenerConfig::parse("192.168.31.10:8080").unwrap();
        assert_eq!(config.host(), "192.168.31.10");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.to_string(), "192.168.31.10:8080");
    }

    #[test]
    fn test_parse_wildcards() {
        for input in ["+:8080", "*:8080", ":8080", "http://+:8080/", "http://*:8080/alarm"] {
            let config = ListenerConfig::parse(input).unwrap();
            assert_eq!(config, ListenerConfig::all_interfaces(8080), "input {input}");
        }
    }

    #[test]
    fn test_parse_ipv6() {
        let config: ListenerConfig = "[::1]:9000".parse().unwrap();
        assert_eq!(config.host(), "::1");
        assert_eq!(config.port(), 9000);
        assert_eq!(config.to_string(), "[::1]:9000");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for input in ["8080", "host:", "host:99999", "host:abc", "::1:80", "[::1]"] {
            assert!(ListenerConfig::parse(input).is_err(), "input {input}");
        }
    }

    #[test]
    fn test_server_options_default() {
        let options = ServerOptions::default();
        assert_eq!(options.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(ServerOptions::new().with_max_body_bytes(10).max_body_bytes, 10);
    }
}
