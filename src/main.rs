use anyhow::Result;
use clap::Parser;

mod cli;
mod dump;
mod firmware;
mod port;
mod rx;
mod tx;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.verbose);
    match args.cmd {
        cli::Cmd::Monitor(opts) => rx::run(opts),
        cli::Cmd::Info(opts) => rx::info(opts),
        cli::Cmd::Sweep(opts) => tx::sweep(opts),
        cli::Cmd::Reference(opts) => tx::reference(opts),
        cli::Cmd::Manual(opts) => tx::manual(opts),
        cli::Cmd::Firmware(opts) => firmware::run(opts),
        cli::Cmd::Dump(opts) => dump::run(opts),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}
