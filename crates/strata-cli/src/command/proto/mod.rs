pub mod client;

use clap::Subcommand;

pub use client::ClientArgs;

/// protoc plugins `proto client` drives, in output order.
pub const PLUGINS: [&str; 3] = ["protoc-gen-prost", "protoc-gen-tonic", "protoc-gen-strata-http"];

#[derive(Subcommand, Debug)]
pub enum ProtoCommand {
    /// Generate message, gRPC and HTTP code for a .proto file or directory.
    ///
    /// Example: strata proto client helloworld.proto
    Client(ClientArgs),
}
