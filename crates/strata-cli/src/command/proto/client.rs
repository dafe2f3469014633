//! `strata proto client`: drives `protoc` with the prost, tonic and strata-http
//! plugins for one `.proto` file or every file under a directory.

use super::PLUGINS;
use crate::command::exec::{CommandRunner, Invocation, PluginLocator};
use anyhow::{Context, bail};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const STAGING_PREFIX: &str = ".strata-gen-";

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Extra import path handed to protoc as `--proto_path`.
    ///
    /// Environment variable: `STRATA_PROTO_INCLUDE`
    #[arg(long, env = "STRATA_PROTO_INCLUDE")]
    pub include: Option<PathBuf>,

    /// A .proto file, or a directory searched recursively for .proto files.
    pub proto: PathBuf,

    /// Flags passed through to protoc. Only values starting with `-` are kept.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub flags: Vec<String>,
}

pub fn run(
    args: &ClientArgs,
    runner: &dyn CommandRunner,
    locator: &dyn PluginLocator,
) -> anyhow::Result<()> {
    ensure_plugins(runner, locator)?;

    let files = proto_files(&args.proto)?;
    if files.is_empty() {
        bail!("no .proto files found in {}", args.proto.display());
    }

    let include = args
        .include
        .as_deref()
        .map(std::path::absolute)
        .transpose()
        .context("invalid include path")?;

    for file in &files {
        generate(file, include.as_deref(), &args.flags, runner)?;
        println!("proto: {}", file.display());
    }
    Ok(())
}

fn missing_plugins(locator: &dyn PluginLocator) -> Vec<&'static str> {
    PLUGINS
        .into_iter()
        .filter(|plugin| locator.locate(plugin).is_none())
        .collect()
}

/// Runs `strata upgrade` once when a plugin cannot be found.
fn ensure_plugins(runner: &dyn CommandRunner, locator: &dyn PluginLocator) -> anyhow::Result<()> {
    let missing = missing_plugins(locator);
    if missing.is_empty() {
        return Ok(());
    }

    tracing::warn!(?missing, "protoc plugins not found, running `strata upgrade`");
    let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("strata"));
    runner
        .run(&Invocation::new(program).arg("upgrade"))
        .context("failed to upgrade protoc plugins")?;

    let missing = missing_plugins(locator);
    if !missing.is_empty() {
        bail!(
            "protoc plugins still missing after upgrade: {}",
            missing.join(", ")
        );
    }
    Ok(())
}

fn is_proto(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "proto")
}

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(STAGING_PREFIX))
}

fn proto_files(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if is_proto(root) {
        return Ok(vec![root.to_path_buf()]);
    }

    let root = if root.as_os_str().is_empty() {
        Path::new(".")
    } else {
        root
    };
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_staging(entry.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.file_type().is_file() && is_proto(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn generate(
    file: &Path,
    include: Option<&Path>,
    flags: &[String],
    runner: &dyn CommandRunner,
) -> anyhow::Result<()> {
    let name = file
        .file_name()
        .with_context(|| format!("not a file: {}", file.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let staging = Staging::create(&dir)?;
    let out = staging.name();

    let mut invocation = Invocation::new("protoc")
        .current_dir(&dir)
        .arg("--proto_path=.");
    if let Some(include) = include {
        invocation = invocation.arg(format!("--proto_path={}", include.display()));
    }
    let invocation = invocation
        .args([
            format!("--prost_out={out}"),
            format!("--tonic_out={out}"),
            format!("--strata-http_out={out}"),
            name,
        ])
        .args(flags.iter().filter(|flag| flag.starts_with('-')).cloned());

    runner
        .run(&invocation)
        .with_context(|| format!("protoc failed for {}", file.display()))?;

    for written in staging.commit()? {
        tracing::debug!(path = %written.display(), "generated");
    }
    Ok(())
}

/// Scratch output directory next to the `.proto` file. Removed on drop, so
/// only a successful [`Staging::commit`] leaves generated files behind.
struct Staging {
    dir: PathBuf,
    name: String,
}

impl Staging {
    fn create(dir: &Path) -> anyhow::Result<Self> {
        let name = format!("{STAGING_PREFIX}{}", std::process::id());
        let path = dir.join(&name);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name,
        })
    }

    /// Relative to the directory protoc runs in.
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Moves every staged file into place, keeping its relative path.
    fn commit(self) -> anyhow::Result<Vec<PathBuf>> {
        let staged = self.path();
        let mut written = Vec::new();
        for entry in WalkDir::new(&staged).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", staged.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&staged)?;
            let dest = self.dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::rename(entry.path(), &dest)
                .with_context(|| format!("failed to write {}", dest.display()))?;
            written.push(dest);
        }
        Ok(written)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(self.path());
    }
}
