//! Status reports emitted on every supervisor transition.
//!
//! Delivery is fire-and-forget: sinks must not block, and nothing they do
//! feeds back into the state machine.

use std::fmt;
use std::time::Duration;

use log::Level;

use crate::supervisor::Phase;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Process spawned, waiting for the listener.
    Starting { command: String },
    /// The server is reachable (or, for stdio, spawned).
    Ready { url: String },
    /// `start` was called while a session was active.
    AlreadyActive { phase: Phase },
    /// The process exited before it started listening.
    ExitedDuringStartup { endpoint: String },
    StartTimedOut { endpoint: String, after: Duration },
    /// A running server stopped answering without being asked to stop.
    UnexpectedExit { endpoint: String },
    StopRequested,
    /// Emitted once per stop when the port outlives the stop deadline.
    ShutdownStalled { endpoint: String },
    Stopped,
}

impl Notification {
    /// Severity used when the notification is logged.
    pub const fn level(&self) -> Level {
        match self {
            Notification::Starting { .. }
            | Notification::Ready { .. }
            | Notification::StopRequested
            | Notification::Stopped => Level::Info,
            Notification::AlreadyActive { .. }
            | Notification::UnexpectedExit { .. }
            | Notification::ShutdownStalled { .. } => Level::Warn,
            Notification::ExitedDuringStartup { .. } | Notification::StartTimedOut { .. } => {
                Level::Error
            }
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Notification::Starting { command } => {
                write!(f, "MCP server starting: {}", command)
            }
            Notification::Ready { url } if url.is_empty() => f.write_str("MCP server is running"),
            Notification::Ready { url } => write!(f, "MCP server ready at {}", url),
            Notification::AlreadyActive { phase } => {
                write!(f, "MCP server is already {}", phase)
            }
            Notification::ExitedDuringStartup { endpoint } => write!(
                f,
                "MCP server exited before listening on {}. Check its output",
                endpoint
            ),
            Notification::StartTimedOut { endpoint, after } => write!(
                f,
                "MCP server start timed out after {}s (no listener on {})",
                after.as_secs(),
                endpoint
            ),
            Notification::UnexpectedExit { endpoint } => {
                write!(f, "MCP server no longer listening on {}", endpoint)
            }
            Notification::StopRequested => f.write_str("MCP server stop requested"),
            Notification::ShutdownStalled { endpoint } => write!(
                f,
                "Stop requested but MCP port still open ({}). Server may not support graceful shutdown",
                endpoint
            ),
            Notification::Stopped => f.write_str("MCP server stopped"),
        }
    }
}

/// Receives notifications from the supervisor.
pub trait Sink {
    fn notify(&mut self, notification: &Notification);
}

impl<F> Sink for F
where
    F: FnMut(&Notification),
{
    fn notify(&mut self, notification: &Notification) {
        self(notification)
    }
}

/// Writes every notification to the log at its own level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl Sink for LogSink {
    fn notify(&mut self, notification: &Notification) {
        log!(notification.level(), "{}", notification);
    }
}
