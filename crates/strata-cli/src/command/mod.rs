//! `strata` subcommands.

mod exec;
mod proto;
mod upgrade;

use clap::{Parser, Subcommand};
use exec::{PathLocator, SystemRunner};

pub use proto::ProtoCommand;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Tooling for strata gRPC and HTTP services"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Protobuf code generation.
    Proto {
        #[command(subcommand)]
        command: ProtoCommand,
    },
    /// Install or update the protoc plugins used by `proto client`.
    Upgrade,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let runner = SystemRunner;
    match cli.command {
        Command::Proto {
            command: ProtoCommand::Client(args),
        } => proto::client::run(&args, &runner, &PathLocator::from_env()),
        Command::Upgrade => upgrade::run(&runner),
    }
}
