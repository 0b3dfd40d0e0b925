//! Address models for network configuration.
//!
//! Every node is reachable at one `host:port`; its RPC listener and datagram socket
//! share the port.

use crate::error::NodeError;
use fxnode::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::net::lookup_host;

/// Represents a network endpoint as `(host, port)`.
///
/// The host may be an IP literal or a name; names are resolved when the address is
/// used, not when it is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// Creates a new address.
    ///
    /// # Arguments
    ///
    /// * `host` - Host name or IP literal (e.g., "127.0.0.1").
    /// * `port` - The port. `0` on bind requests an ephemeral port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback address with an ephemeral port, for tests and local tools.
    pub fn localhost() -> Self {
        Self::new("127.0.0.1", 0)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the host, picking the first address of the wanted family.
    ///
    /// # Arguments
    ///
    /// * `ipv6` - Whether the local socket that will use the address is IPv6.
    ///
    /// # Returns
    ///
    /// * `Ok(SocketAddr)` for the preferred resolved address, or the first one if no
    ///   address of that family exists.
    /// * `Err(NodeError::Unresolved)` if the host resolves to nothing.
    pub async fn resolve(&self, ipv6: bool) -> Result<SocketAddr, NodeError> {
        let candidates: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await?
            .collect();
        candidates
            .iter()
            .find(|addr| addr.is_ipv6() == ipv6)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| NodeError::Unresolved(self.to_string()))
    }

    /// Wire form: `[host, port]`.
    pub fn to_value(&self) -> Value {
        Value::List(vec![Value::from(self.host.as_str()), Value::from(self.port)])
    }

    /// Accepts `[host, port]` lists and `"host:port"` strings.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::List(items) => match items.as_slice() {
                [host, port] => {
                    let host = host
                        .as_str()
                        .ok_or_else(|| format!("address host must be a string, got {}", host))?;
                    let port = port
                        .as_i64()
                        .and_then(|p| u16::try_from(p).ok())
                        .ok_or_else(|| format!("address port out of range: {}", port))?;
                    Ok(Self::new(host, port))
                }
                _ => Err(format!("address must be [host, port], got {}", value)),
            },
            Value::Str(text) => text.parse(),
            other => Err(format!("address must be [host, port], got {}", other)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Unknown address format: {}", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("Missing host in address: {}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid port in address: {}", s))?;
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl From<Address> for Value {
    fn from(addr: Address) -> Self {
        addr.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: Address = "127.0.0.1:10000".parse().unwrap();
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 10000);
        assert_eq!(addr.to_string(), "127.0.0.1:10000");

        let v6: Address = "[::1]:80".parse().unwrap();
        assert_eq!(v6.host(), "::1");
        assert_eq!(v6.to_string(), "[::1]:80");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("host:99999".parse::<Address>().is_err());
    }

    #[test]
    fn test_value_forms() {
        let addr = Address::new("localhost", 5000);
        assert_eq!(Address::from_value(&addr.to_value()).unwrap(), addr);
        assert_eq!(Address::from_value(&Value::from("localhost:5000")).unwrap(), addr);
        assert!(Address::from_value(&Value::List(vec![Value::from("h"), Value::from(-1)])).is_err());
        assert!(Address::from_value(&Value::from(5)).is_err());
    }

    #[tokio::test]
    async fn test_resolve_prefers_family() {
        let addr = Address::new("127.0.0.1", 5000);
        let resolved = addr.resolve(false).await.unwrap();
        assert!(resolved.is_ipv4());
        assert_eq!(resolved.port(), 5000);
        // No IPv6 candidate, falls back to the first one.
        assert!(addr.resolve(true).await.unwrap().is_ipv4());
    }
}
