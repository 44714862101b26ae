//! Store endpoint addresses.
//!
//! An endpoint is `<host:port | filesystem-path>[/<database-index>]`. The
//! transport is inferred from the address: an existing filesystem path is a
//! local socket, anything else is dialed over TCP.

use crate::error::StoreError;
use std::path::Path;

/// How a session to an endpoint is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Unix,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Tcp => write!(f, "tcp"),
            TransportKind::Unix => write!(f, "unix"),
        }
    }
}

/// One candidate address for the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    target: String,
    transport: TransportKind,
    database: u32,
}

impl Endpoint {
    /// Parse an address, probing the local filesystem to pick the transport.
    pub fn parse(address: &str) -> Result<Self, StoreError> {
        Self::parse_with(address, |path| Path::new(path).exists())
    }

    /// Parse an address with a caller-supplied filesystem probe.
    pub fn parse_with(
        address: &str,
        path_exists: impl Fn(&str) -> bool,
    ) -> Result<Self, StoreError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(invalid(address, "address is empty"));
        }

        if path_exists(address) {
            return Ok(Self {
                target: address.to_string(),
                transport: TransportKind::Unix,
                database: 0,
            });
        }

        let (target, database) = match address.rsplit_once('/') {
            Some((head, tail))
                if !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
            {
                let database = tail
                    .parse::<u32>()
                    .map_err(|e| invalid(address, &format!("database index: {e}")))?;
                (head, database)
            }
            // host:port/<something> where <something> is not an index
            Some((head, _)) if !head.is_empty() && !head.contains('/') => {
                return Err(invalid(
                    address,
                    "database index must be a non-negative integer",
                ));
            }
            _ => (address, 0),
        };

        let transport = if path_exists(target) {
            TransportKind::Unix
        } else {
            TransportKind::Tcp
        };

        Ok(Self {
            target: target.to_string(),
            transport,
            database,
        })
    }

    /// `host:port` for TCP endpoints, the socket path for local ones.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn database(&self) -> u32 {
        self.database
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.transport, self.target, self.database)
    }
}

/// Parse an ordered endpoint list. Each entry may itself be a comma-separated
/// list; order is preserved.
pub fn parse_endpoints<S: AsRef<str>>(nodes: &[S]) -> Result<Vec<Endpoint>, StoreError> {
    nodes
        .iter()
        .flat_map(|node| node.as_ref().split(','))
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .map(Endpoint::parse)
        .collect()
}

fn invalid(address: &str, reason: &str) -> StoreError {
    StoreError::InvalidEndpoint {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_paths(_: &str) -> bool {
        false
    }

    #[test]
    fn test_tcp_with_database_index() {
        let ep = Endpoint::parse_with("127.0.0.1:6399/2", no_paths).unwrap();
        assert_eq!(ep.transport(), TransportKind::Tcp);
        assert_eq!(ep.target(), "127.0.0.1:6399");
        assert_eq!(ep.database(), 2);
    }

    #[test]
    fn test_tcp_default_database() {
        let ep = Endpoint::parse_with("redis.internal:6379", no_paths).unwrap();
        assert_eq!(ep.transport(), TransportKind::Tcp);
        assert_eq!(ep.database(), 0);
    }

    #[test]
    fn test_existing_socket_path_is_unix() {
        let ep = Endpoint::parse_with("/var/run/store.sock", |p| p == "/var/run/store.sock")
            .unwrap();
        assert_eq!(ep.transport(), TransportKind::Unix);
        assert_eq!(ep.target(), "/var/run/store.sock");
        assert_eq!(ep.database(), 0);
    }

    #[test]
    fn test_socket_path_with_database_index() {
        let ep = Endpoint::parse_with("/var/run/store.sock/5", |p| p == "/var/run/store.sock")
            .unwrap();
        assert_eq!(ep.transport(), TransportKind::Unix);
        assert_eq!(ep.target(), "/var/run/store.sock");
        assert_eq!(ep.database(), 5);
    }

    #[test]
    fn test_real_filesystem_probe() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("store.sock");
        std::fs::write(&sock, b"").unwrap();
        let ep = Endpoint::parse(sock.to_str().unwrap()).unwrap();
        assert_eq!(ep.transport(), TransportKind::Unix);
        assert_eq!(ep.database(), 0);
    }

    #[test]
    fn test_non_numeric_database_rejected() {
        let err = Endpoint::parse_with("127.0.0.1:6379/abc", no_paths).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEndpoint { .. }));
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(Endpoint::parse_with("  ", no_paths).is_err());
    }

    #[test]
    fn test_parse_endpoints_preserves_order() {
        let eps = parse_endpoints(&["10.0.0.1:6379, 10.0.0.2:6379/1", "10.0.0.3:6379"]).unwrap();
        let targets: Vec<_> = eps.iter().map(|e| e.target()).collect();
        assert_eq!(targets, vec!["10.0.0.1:6379", "10.0.0.2:6379", "10.0.0.3:6379"]);
        assert_eq!(eps[1].database(), 1);
    }

    #[test]
    fn test_display() {
        let ep = Endpoint::parse_with("127.0.0.1:6399/2", no_paths).unwrap();
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:6399/2");
    }
}
