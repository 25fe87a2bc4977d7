use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::config::{LaunchConfig, Transport};

/// Where a launched server is expected to listen.
///
/// Snapshotted from the [`LaunchConfig`] at start so later configuration
/// changes cannot affect a session that is already being probed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Socket addresses of `host`, looked up once per session; empty for stdio.
    pub addrs: Vec<SocketAddr>,
}

impl Endpoint {
    /// Snapshots `config` and resolves its host.
    ///
    /// Resolution happens here, at start, so that probing never has to wait
    /// on name lookup.
    pub fn resolve(config: &LaunchConfig) -> io::Result<Self> {
        let mut endpoint = Self::from(config);
        if !endpoint.transport.has_endpoint() {
            return Ok(endpoint);
        }

        endpoint.addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .collect();
        if endpoint.addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no resolved address",
            ));
        }

        Ok(endpoint)
    }

    /// URL clients connect to; empty for stdio.
    pub fn url(&self) -> String {
        match self.transport {
            Transport::Stdio => String::new(),
            Transport::Http => format!("http://{}:{}{}", self.host, self.port, self.path),
            Transport::Sse => format!("http://{}:{}", self.host, self.port),
        }
    }
}

/// An unresolved snapshot; see [`Endpoint::resolve`].
impl From<&LaunchConfig> for Endpoint {
    fn from(config: &LaunchConfig) -> Self {
        Self {
            transport: config.transport,
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            addrs: Vec::new(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.transport {
            Transport::Stdio => f.write_str("stdio"),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}
