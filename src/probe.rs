//! Listener reachability checks.
//!
//! A probe only establishes whether something accepts connections at the
//! endpoint; it never speaks MCP.

use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_PROBE_TIMEOUT;
use crate::endpoint::Endpoint;

/// Observes whether an endpoint is accepting connections.
pub trait Probe {
    fn is_reachable(&self, endpoint: &Endpoint) -> bool;
}

/// Connect-then-close TCP probe.
///
/// One call never takes longer than its timeout, however many addresses the
/// endpoint resolved to. Addresses are tried in order, each with whatever is
/// left of that budget.
#[derive(Clone, Copy, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl Probe for TcpProbe {
    fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        if endpoint.port == 0 {
            return false;
        }

        let deadline = Instant::now() + self.timeout;
        for addr in &endpoint.addrs {
            let left = deadline.saturating_duration_since(Instant::now());
            if left == Duration::from_secs(0) {
                debug!("Probe of {} ran out of time", endpoint);
                break;
            }

            match TcpStream::connect_timeout(addr, left) {
                Ok(_) => return true,
                Err(err) => trace!("Probe of {} failed: {}", addr, err),
            }
        }

        false
    }
}
