//! Client configuration.
//!
//! ```
//! use flashbloom::ClientConfig;
//! use std::time::Duration;
//!
//! let config = ClientConfig::new(["bloom-a", "bloom-b:8674"])
//!     .unwrap()
//!     .with_timeout(Duration::from_secs(2));
//! assert_eq!(config.servers[0].port(), 8673);
//! assert_eq!(config.servers[1].to_string(), "bloom-b:8674");
//! ```

use crate::error::{ClientError, ClientResult};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The port bloomd listens on by default
pub const DEFAULT_PORT: u16 = 8673;

/// How long discovered routes are trusted before the next resolution
/// re-lists every server
pub const DEFAULT_ROUTING_TTL: Duration = Duration::from_secs(300);

/// Network address of one filter server.
///
/// Ordering is by host, then port; placement uses it to break ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddr {
    host: String,
    port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for ServerAddr {
    type Err = ClientError;

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ClientError::Config(format!("invalid server address '{}'", s));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match s.rsplit_once(':') {
                // a bare IPv6 literal has more than one colon
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Servers in discovery order; the first server to report a collection
    /// owns it
    pub servers: Vec<ServerAddr>,
    /// Per-connection I/O timeout (None = wait forever)
    pub timeout: Option<Duration>,
    /// Age after which the routing table is re-listed (None = never)
    pub routing_ttl: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerAddr::new("localhost", DEFAULT_PORT)],
            timeout: None,
            routing_ttl: Some(DEFAULT_ROUTING_TTL),
        }
    }
}

impl ClientConfig {
    /// Builds a configuration from `host[:port]` strings.
    pub fn new<I, S>(servers: I) -> ClientResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let servers = servers
            .into_iter()
            .map(|s| s.as_ref().parse())
            .collect::<ClientResult<Vec<ServerAddr>>>()?;
        let config = Self {
            servers,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_routing_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.routing_ttl = ttl;
        self
    }

    /// Requires at least one server and no duplicates.
    pub fn validate(&self) -> ClientResult<()> {
        if self.servers.is_empty() {
            return Err(ClientError::Config(
                "at least one server is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server) {
                return Err(ClientError::Config(format!(
                    "server {} is listed twice",
                    server
                )));
            }
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ClientError::Config("timeout must be positive".to_string()));
        }
        Ok(())
    }
}
