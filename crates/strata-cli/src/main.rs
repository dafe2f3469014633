#![doc = include_str!("../README.md")]

mod command;
mod telemetry;

use clap::Parser;
use command::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Load from .env
    let _ = dotenvy::dotenv();
    telemetry::init();

    let cli = Cli::parse();
    match command::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
