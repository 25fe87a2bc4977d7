use std::io::Write;

use log::LevelFilter;
use mcp_supervisor::{cli, command::CommandLine, error::Result, run};

fn init_logger(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .format(|buf, r| writeln!(buf, "*** {}", r.args()))
        .filter(None, level)
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_default())
        .init();
}

fn main() -> Result<()> {
    let args = cli::get_args()?;

    if args.print_command {
        println!("{}", CommandLine::build(&args.launch));
        return Ok(());
    }

    init_logger(args.debug);
    run(&args.launch, args.supervisor)
}
