use std::process::ExitCode;

use clap::Parser;

use enhance::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "enhance starting");

    // Single-threaded runtime: animations, service calls and history all
    // share one cooperative scheduler.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: could not start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(cli::run(args))
}
