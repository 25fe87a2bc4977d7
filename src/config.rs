//! Configuration for the supervisor.
//!
//! [`LaunchConfig`] describes the server process to launch and
//! [`SupervisorConfig`] the timing of the readiness state machine. Neither is
//! constructable directly, use [`LaunchConfigBuilder`] and
//! [`SupervisorConfigBuilder`]. Every field left unset falls back to its
//! documented default.
//!
//! # Examples
//!
//! ```
//! # use mcp_supervisor::config::{LaunchConfigBuilder, Transport};
//! let config = LaunchConfigBuilder::default()
//!     .transport(Transport::Http)
//!     .port(8765u16)
//!     .build()
//!     .expect("mission failed");
//!
//! assert_eq!(config.host, "127.0.0.1");
//! assert_eq!(config.path, "/mcp");
//! ```

use std::{
    env, fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Wire mechanism the server uses to expose MCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Stdio,
    Http,
    Sse,
}

impl Transport {
    /// Value passed to the server's `--transport` flag.
    pub const fn as_arg(self) -> &'static str {
        match self {
            Transport::Stdio => "stdio",
            Transport::Http => "http",
            Transport::Sse => "sse",
        }
    }

    /// Whether the server exposes a TCP listener that can be probed.
    pub const fn has_endpoint(self) -> bool {
        !matches!(self, Transport::Stdio)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Http
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            "sse" => Ok(Transport::Sse),
            other => Err(format!(
                "unknown transport '{}', expected one of stdio, http, sse",
                other
            )),
        }
    }
}

/// The server process to launch.
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(setter(into, strip_option))]
#[builder(build_fn(validate = "Self::validate"))]
#[non_exhaustive]
pub struct LaunchConfig {
    /// Package runner used to start the server.
    #[builder(default = "PathBuf::from(\"uv\")")]
    pub executable_path: PathBuf,
    /// Directory the server is spawned in and run from. Defaults to the
    /// current directory.
    #[builder(default = "default_working_directory()")]
    pub working_directory: PathBuf,
    /// Entry point the runner invokes.
    #[builder(default = "\"ue5-analyzer\".into()")]
    pub server_target: String,
    #[builder(default)]
    pub transport: Transport,
    /// Listen address, ignored for stdio.
    #[builder(default = "\"127.0.0.1\".into()")]
    pub host: String,
    /// Listen port, ignored for stdio.
    #[builder(default = "8000")]
    pub port: u16,
    /// Route prefix, only passed on for http.
    #[builder(default = "\"/mcp\".into()")]
    pub path: String,
    /// C++ source root handed to the server. Defaults to `Source` under the
    /// working directory.
    #[builder(default)]
    pub cpp_source_path: Option<PathBuf>,
    /// Address of the editor plugin's HTTP API the server calls back into.
    #[builder(default = "\"127.0.0.1\".into()")]
    pub plugin_host: String,
    #[builder(default = "8080")]
    pub plugin_port: u16,
    /// Appended verbatim after every generated argument.
    #[builder(default)]
    pub extra_args: Vec<String>,
}

fn default_working_directory() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

impl LaunchConfig {
    /// C++ source root, falling back to `<working_directory>/Source`.
    pub fn cpp_source_path(&self) -> PathBuf {
        self.cpp_source_path
            .clone()
            .unwrap_or_else(|| self.working_directory.join("Source"))
    }

    /// Checks the invariants a launch depends on.
    pub fn validate(&self) -> Result<(), String> {
        check_executable(&self.executable_path)?;
        if self.transport.has_endpoint() {
            check_endpoint(self.transport, &self.host, self.port)?;
        }

        Ok(())
    }
}

fn check_executable(path: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("executable path must not be empty".into());
    }

    Ok(())
}

fn check_endpoint(transport: Transport, host: &str, port: u16) -> Result<(), String> {
    if host.trim().is_empty() {
        return Err(format!("host must be set for {} transport", transport));
    }

    if port == 0 {
        return Err(format!("port must be set for {} transport", transport));
    }

    Ok(())
}

impl LaunchConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.executable_path {
            check_executable(path)?;
        }

        let transport = self.transport.unwrap_or_default();
        if transport.has_endpoint() {
            if let Some(host) = &self.host {
                check_endpoint(transport, host, 1)?;
            }

            if self.port == Some(0) {
                return Err(format!("port must be set for {} transport", transport));
            }
        }

        Ok(())
    }
}

/// Timing of the readiness state machine.
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(setter(into))]
#[builder(build_fn(validate = "Self::validate"))]
#[non_exhaustive]
pub struct SupervisorConfig {
    /// How long a network transport may take to start listening.
    #[builder(default = "DEFAULT_START_TIMEOUT")]
    pub start_timeout: Duration,
    /// How long the port may stay open after a stop before warning.
    #[builder(default = "DEFAULT_STOP_TIMEOUT")]
    pub stop_timeout: Duration,
    /// Upper bound for a single TCP probe.
    #[builder(default = "DEFAULT_PROBE_TIMEOUT")]
    pub probe_timeout: Duration,
    /// Tick cadence used by [`run`](crate::run::run).
    #[builder(default = "DEFAULT_POLL_INTERVAL")]
    pub poll_interval: Duration,
    /// Kill the server's whole process tree rather than just the runner.
    #[builder(default = "true")]
    pub kill_descendants: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_descendants: true,
        }
    }
}

impl SupervisorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.probe_timeout == Some(Duration::from_secs(0)) {
            return Err("probe timeout must be greater than zero".into());
        }

        if self.poll_interval == Some(Duration::from_secs(0)) {
            return Err("poll interval must be greater than zero".into());
        }

        Ok(())
    }
}
