//! Corten VM launcher
//!
//! Entry point for the VM. Parses CLI arguments, installs logging and
//! delegates to the Runtime for execution.

use std::process::ExitCode;

use clap::Parser;
use log::debug;
use vm_cli::{Cli, CliResult, Runtime};

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("{} exited with status {}", cli.main_class, e.exit_code());
            eprintln!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> CliResult<()> {
    let runtime = Runtime::from_cli(cli)?;
    let outcome = runtime.run(&cli.main_class, &cli.args);
    if let Some(summary) = runtime.gc_summary() {
        eprintln!("{}", summary);
    }
    outcome
}
