//! mcp-supervisor: the library
//!
//! Launches a local MCP server through a package runner and tracks whether
//! it is reachable, without ever blocking the caller. The host owns the
//! scheduling: it calls [`Supervisor::start`], [`Supervisor::stop`] and,
//! at a fixed cadence, [`Supervisor::tick`]. The `mcp-supervisor` binary is
//! one such host, driving the supervisor from [`run`].
//!
//! [`Supervisor::start`]: supervisor::Supervisor::start
//! [`Supervisor::stop`]: supervisor::Supervisor::stop
//! [`Supervisor::tick`]: supervisor::Supervisor::tick

#![warn(clippy::pedantic, clippy::nursery)]
#![deny(unsafe_code)]
#![allow(
    clippy::default_trait_access,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

#[macro_use]
extern crate clap;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod cli;
pub mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod notification;
pub mod probe;
pub mod process;
pub mod run;
mod signal;
pub mod supervisor;

pub use run::run;
pub use supervisor::{Phase, Supervisor};
