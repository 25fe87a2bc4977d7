use std::time::Duration;

use clap::{App, Arg, ArgMatches};

use crate::config::{
    LaunchConfig, LaunchConfigBuilder, SupervisorConfig, SupervisorConfigBuilder, Transport,
};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Args {
    pub launch: LaunchConfig,
    pub supervisor: SupervisorConfig,
    pub debug: bool,
    pub print_command: bool,
}

fn app() -> App<'static, 'static> {
    App::new("mcp-supervisor")
        .version(crate_version!())
        .about("Launch a local MCP server and watch it until it stops")
        .arg(Arg::with_name("runner")
                 .help("Package runner used to launch the server [default: uv]")
                 .long("runner")
                 .takes_value(true)
                 .value_name("path"))
        .arg(Arg::with_name("directory")
                 .help("Directory the server runs from [default: current directory]")
                 .short("C")
                 .long("directory")
                 .takes_value(true)
                 .value_name("dir"))
        .arg(Arg::with_name("server")
                 .help("Entry point the runner invokes [default: ue5-analyzer]")
                 .long("server")
                 .takes_value(true)
                 .value_name("target"))
        .arg(Arg::with_name("transport")
                 .help("MCP transport the server exposes")
                 .short("t")
                 .long("transport")
                 .takes_value(true)
                 .possible_values(&["stdio", "http", "sse"])
                 .default_value("http"))
        .arg(Arg::with_name("host")
                 .help("Host the server listens on [default: 127.0.0.1]")
                 .long("host")
                 .takes_value(true))
        .arg(Arg::with_name("port")
                 .help("Port the server listens on [default: 8000]")
                 .short("p")
                 .long("port")
                 .takes_value(true))
        .arg(Arg::with_name("path")
                 .help("HTTP route prefix [default: /mcp]")
                 .long("path")
                 .takes_value(true))
        .arg(Arg::with_name("cpp-source-path")
                 .help("C++ source root passed to the server [default: <directory>/Source]")
                 .long("cpp-source-path")
                 .takes_value(true)
                 .value_name("path"))
        .arg(Arg::with_name("plugin-host")
                 .help("Host of the editor plugin API [default: 127.0.0.1]")
                 .long("plugin-host")
                 .takes_value(true))
        .arg(Arg::with_name("plugin-port")
                 .help("Port of the editor plugin API [default: 8080]")
                 .long("plugin-port")
                 .takes_value(true))
        .arg(Arg::with_name("start-timeout")
                 .help("Seconds to wait for the server to listen, defaults to 30")
                 .long("start-timeout")
                 .takes_value(true)
                 .value_name("seconds"))
        .arg(Arg::with_name("stop-timeout")
                 .help("Seconds to wait for the port to close before warning, defaults to 5")
                 .long("stop-timeout")
                 .takes_value(true)
                 .value_name("seconds"))
        .arg(Arg::with_name("probe-timeout")
                 .help("Connect timeout of a single readiness probe, defaults to 2000ms")
                 .long("probe-timeout")
                 .takes_value(true)
                 .value_name("milliseconds"))
        .arg(Arg::with_name("interval")
                 .help("Time between readiness probes, defaults to 250ms")
                 .short("i")
                 .long("interval")
                 .takes_value(true)
                 .value_name("milliseconds"))
        .arg(Arg::with_name("no-kill-tree")
                 .help("Only kill the runner on stop, not the processes it started")
                 .long("no-kill-tree"))
        .arg(Arg::with_name("print-command")
                 .help("Print the command line that would be launched and exit")
                 .long("print-command"))
        .arg(Arg::with_name("verbose")
                 .help("Print debugging messages to stderr")
                 .short("v")
                 .long("verbose"))
        .arg(Arg::with_name("extra")
                 .help("Extra arguments appended verbatim to the server command line")
                 .multiple(true)
                 .last(true))
}

pub fn get_args() -> Result<Args> {
    args_from_matches(&app().get_matches())
}

fn invalid(err: clap::Error) -> Error {
    Error::Config(err.message)
}

fn args_from_matches(args: &ArgMatches) -> Result<Args> {
    let mut launch = LaunchConfigBuilder::default();

    if let Some(runner) = args.value_of("runner") {
        launch.executable_path(runner);
    }
    if let Some(dir) = args.value_of("directory") {
        launch.working_directory(dir);
    }
    if let Some(target) = args.value_of("server") {
        launch.server_target(target);
    }
    if let Some(transport) = args.value_of("transport") {
        launch.transport(transport.parse::<Transport>().map_err(Error::Config)?);
    }
    if let Some(host) = args.value_of("host") {
        launch.host(host);
    }
    if args.is_present("port") {
        launch.port(value_t!(args, "port", u16).map_err(invalid)?);
    }
    if let Some(path) = args.value_of("path") {
        launch.path(path);
    }
    if let Some(path) = args.value_of("cpp-source-path") {
        launch.cpp_source_path(path);
    }
    if let Some(host) = args.value_of("plugin-host") {
        launch.plugin_host(host);
    }
    if args.is_present("plugin-port") {
        launch.plugin_port(value_t!(args, "plugin-port", u16).map_err(invalid)?);
    }
    if let Some(extra) = args.values_of("extra") {
        launch.extra_args(extra.map(str::to_string).collect::<Vec<_>>());
    }

    let mut supervisor = SupervisorConfigBuilder::default();

    if args.is_present("start-timeout") {
        let secs = value_t!(args, "start-timeout", u64).map_err(invalid)?;
        supervisor.start_timeout(Duration::from_secs(secs));
    }
    if args.is_present("stop-timeout") {
        let secs = value_t!(args, "stop-timeout", u64).map_err(invalid)?;
        supervisor.stop_timeout(Duration::from_secs(secs));
    }
    if args.is_present("probe-timeout") {
        let ms = value_t!(args, "probe-timeout", u64).map_err(invalid)?;
        supervisor.probe_timeout(Duration::from_millis(ms));
    }
    if args.is_present("interval") {
        let ms = value_t!(args, "interval", u64).map_err(invalid)?;
        supervisor.poll_interval(Duration::from_millis(ms));
    }
    supervisor.kill_descendants(!args.is_present("no-kill-tree"));

    Ok(Args {
        launch: launch.build().map_err(Error::Config)?,
        supervisor: supervisor.build().map_err(Error::Config)?,
        debug: args.is_present("verbose"),
        print_command: args.is_present("print-command"),
    })
}
