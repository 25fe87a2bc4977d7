//! Readiness state machine for one supervised server.
//!
//! The supervisor owns no thread. A scheduler calls [`Supervisor::tick`] at a
//! fixed cadence; every tick makes one observation of the server and advances
//! the phase:
//!
//! ```text
//!  Idle --start--> Starting --listening--> Running
//!    ^               |  \                     |
//!    |  timeout/exit-+   +-------stop---------+--stop--> StopRequested
//!    |                                                    |        |
//!    +----------------------- port closed ----------------+   deadline passed
//!    |                                                             v
//!    +----------------------- port closed ------------------- StopWarned
//! ```
//!
//! Readiness and shutdown are confirmed by observation only. For network
//! transports that is a TCP connect to the snapshotted endpoint; stdio has
//! nothing to connect to, so the process handle itself is observed.

use std::fmt;
use std::time::Instant;

use crate::command::CommandLine;
use crate::config::{LaunchConfig, SupervisorConfig};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::notification::{LogSink, Notification, Sink};
use crate::probe::{Probe, TcpProbe};
use crate::process::{Launcher, ProcessLauncher};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    StopRequested,
    /// Stop deadline passed with the port still open; warned once.
    StopWarned,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::StopRequested | Phase::StopWarned => "stopping",
        })
    }
}

pub struct Supervisor<L: Launcher = ProcessLauncher, P: Probe = TcpProbe> {
    launcher: L,
    probe: P,
    sink: Box<dyn Sink>,
    config: SupervisorConfig,
    phase: Phase,
    process: Option<L::Handle>,
    endpoint: Option<Endpoint>,
    start_deadline: Option<Instant>,
    stop_deadline: Option<Instant>,
    last_command_line: Option<String>,
}

impl Supervisor {
    /// A supervisor launching real processes and probing over TCP.
    pub fn new(config: SupervisorConfig) -> Self {
        let probe = TcpProbe::new(config.probe_timeout);
        Self::with_parts(config, ProcessLauncher, probe)
    }
}

impl<L: Launcher, P: Probe> Supervisor<L, P> {
    pub fn with_parts(config: SupervisorConfig, launcher: L, probe: P) -> Self {
        Self {
            launcher,
            probe,
            sink: Box::new(LogSink),
            config,
            phase: Phase::Idle,
            process: None,
            endpoint: None,
            start_deadline: None,
            stop_deadline: None,
            last_command_line: None,
        }
    }

    /// Replaces the default logging sink.
    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Launches the server and returns without waiting for it.
    ///
    /// While a session is active this is a no-op. Invalid configuration and
    /// spawn failures are returned; the phase then stays `Idle`.
    pub fn start(&mut self, config: &LaunchConfig) -> Result<()> {
        if self.phase != Phase::Idle {
            warn!("Start ignored, server is {}", self.phase);
            self.emit(Notification::AlreadyActive { phase: self.phase });
            return Ok(());
        }

        config.validate().map_err(Error::Config)?;
        let endpoint = Endpoint::resolve(config).map_err(|err| {
            Error::Config(format!(
                "cannot resolve {}:{}: {}",
                config.host, config.port, err
            ))
        })?;

        let command = CommandLine::build(config);
        let rendered = command.to_string();
        self.last_command_line = Some(rendered.clone());

        debug!("Launching {}", rendered);
        let handle = self
            .launcher
            .spawn(&command, &config.working_directory)
            .map_err(|err| Error::Spawn {
                command: rendered.clone(),
                err,
            })?;

        let now = Instant::now();
        self.process = Some(handle);
        self.start_deadline = Some(now + self.config.start_timeout);
        self.stop_deadline = None;

        if endpoint.transport.has_endpoint() {
            self.phase = Phase::Starting;
            self.endpoint = Some(endpoint);
            self.emit(Notification::Starting { command: rendered });
        } else {
            // Nothing to probe: trust the spawn.
            self.phase = Phase::Running;
            self.endpoint = Some(endpoint);
            self.emit(Notification::Ready { url: String::new() });
        }

        Ok(())
    }

    /// Terminates the server and waits, via later ticks, for confirmation.
    ///
    /// Cancels a start that has not become ready yet. Does nothing when idle
    /// or when a stop is already pending.
    pub fn stop(&mut self) {
        match self.phase {
            Phase::Idle => {
                debug!("Stop ignored, no server running");
            }
            Phase::StopRequested | Phase::StopWarned => {
                debug!("Stop already requested");
            }
            Phase::Starting | Phase::Running => {
                let recursive = self.config.kill_descendants;
                if let Some(handle) = self.process.as_mut() {
                    self.launcher.terminate(handle, recursive);
                }

                self.phase = Phase::StopRequested;
                self.stop_deadline = Some(Instant::now() + self.config.stop_timeout);
                self.emit(Notification::StopRequested);
            }
        }
    }

    /// Makes one observation and advances the state machine.
    ///
    /// Returns whether further ticks are needed; `false` once idle.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.phase == Phase::Idle {
            return false;
        }

        let up = self.observe();
        trace!("Tick in {:?}: server {}", self.phase, if up { "up" } else { "down" });

        match (self.phase, up) {
            (Phase::Starting, true) => {
                let url = self.endpoint_url();
                info!("MCP server is now listening on {}", self.endpoint_name());
                self.phase = Phase::Running;
                self.emit(Notification::Ready { url });
            }
            (Phase::Starting, false) => {
                if !self.process_alive() {
                    let endpoint = self.endpoint_name();
                    self.finish(true);
                    self.emit(Notification::ExitedDuringStartup { endpoint });
                } else if self.start_deadline.map_or(false, |deadline| now > deadline) {
                    let endpoint = self.endpoint_name();
                    self.finish(true);
                    self.emit(Notification::StartTimedOut {
                        endpoint,
                        after: self.config.start_timeout,
                    });
                }
            }
            (Phase::Running, true) | (Phase::StopWarned, true) => {}
            (Phase::Running, false) => {
                let endpoint = self.endpoint_name();
                self.finish(true);
                self.emit(Notification::UnexpectedExit { endpoint });
            }
            (Phase::StopRequested, true) => {
                if self.stop_deadline.map_or(false, |deadline| now > deadline) {
                    self.phase = Phase::StopWarned;
                    let endpoint = self.endpoint_name();
                    self.emit(Notification::ShutdownStalled { endpoint });
                }
            }
            (Phase::StopRequested, false) | (Phase::StopWarned, false) => {
                self.finish(false);
                self.emit(Notification::Stopped);
            }
            (Phase::Idle, _) => {}
        }

        self.phase != Phase::Idle
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_starting(&self) -> bool {
        self.phase == Phase::Starting
    }

    /// URL of the tracked server; empty for stdio or when idle.
    pub fn endpoint_url(&self) -> String {
        match (&self.endpoint, self.phase) {
            (_, Phase::Idle) | (None, _) => String::new(),
            (Some(endpoint), _) => endpoint.url(),
        }
    }

    /// Rendered command line of the most recent launch attempt, including
    /// failed ones.
    pub fn last_command_line(&self) -> Option<&str> {
        self.last_command_line.as_deref()
    }

    /// Probe policy: network transports are observed through their listener,
    /// stdio through the process itself.
    fn observe(&mut self) -> bool {
        // Also reaps a runner that already exited.
        let alive = self.process_alive();
        match &self.endpoint {
            Some(endpoint) if endpoint.transport.has_endpoint() => {
                self.probe.is_reachable(endpoint)
            }
            _ => alive,
        }
    }

    fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(handle) => self.launcher.is_alive(handle),
            None => false,
        }
    }

    /// Returns to `Idle`, releasing the process handle. Releasing a real
    /// process reaps it.
    fn finish(&mut self, kill: bool) {
        if let Some(mut handle) = self.process.take() {
            if kill {
                self.launcher.terminate(&mut handle, self.config.kill_descendants);
            }
        }

        self.phase = Phase::Idle;
        self.start_deadline = None;
        self.stop_deadline = None;
    }

    fn endpoint_name(&self) -> String {
        self.endpoint
            .as_ref()
            .map_or_else(String::new, ToString::to_string)
    }

    fn emit(&mut self, notification: Notification) {
        self.sink.notify(&notification);
    }
}

impl<L: Launcher, P: Probe> Drop for Supervisor<L, P> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.process.take() {
            debug!("Supervisor dropped while {}, terminating server", self.phase);
            self.launcher.terminate(&mut handle, self.config.kill_descendants);
        }
    }
}
