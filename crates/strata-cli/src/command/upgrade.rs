use super::exec::{CommandRunner, Invocation};
use super::proto::PLUGINS;

/// `cargo install` for every protoc plugin.
pub fn run(runner: &dyn CommandRunner) -> anyhow::Result<()> {
    tracing::info!(plugins = ?PLUGINS, "installing protoc plugins");
    runner.run(&Invocation::new("cargo").arg("install").args(PLUGINS))?;
    tracing::info!("protoc plugins are up to date");
    Ok(())
}
