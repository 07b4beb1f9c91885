use simplelog::*;

use clap::Parser;
use log::error;
use poolsrv::Config;
use std::{net::IpAddr, process::ExitCode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    port: u16,
    /// Number of worker threads
    threads: usize,
    /// Capacity of the request queue
    queue_size: usize,
    #[arg(long, value_name = "IP", default_value = "0.0.0.0")]
    bind: IpAddr,
    #[arg(long, value_name = "LEVEL", default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = TermLogger::init(
        cli.log_level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("failed to initialize logging: {err}");
    }

    let config = Config {
        bind: cli.bind,
        port: cli.port,
        threads: cli.threads,
        queue_size: cli.queue_size,
    };
    match poolsrv::run(&config) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
