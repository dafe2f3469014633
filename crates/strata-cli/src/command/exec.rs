//! Process and `PATH` access behind traits so commands can be driven by fakes.

use anyhow::{Context, bail};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One external program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory; the current one when `None`.
    pub dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

pub trait CommandRunner {
    /// Runs to completion. A non-zero exit status is an error.
    fn run(&self, invocation: &Invocation) -> anyhow::Result<()>;
}

/// Runs programs with inherited stdio.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> anyhow::Result<()> {
        let program = invocation.program.display();
        tracing::debug!(%program, args = ?invocation.args, dir = ?invocation.dir, "running");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.dir {
            cmd.current_dir(dir);
        }
        let status = cmd
            .status()
            .with_context(|| format!("failed to execute `{program}`"))?;
        if !status.success() {
            bail!("`{program}` exited with {status}");
        }
        Ok(())
    }
}

pub trait PluginLocator {
    /// Full path of an executable named `name`, if one can be found.
    fn locate(&self, name: &str) -> Option<PathBuf>;
}

/// Searches the directories of a `PATH`-style variable.
pub struct PathLocator {
    path: Option<OsString>,
}

impl PathLocator {
    pub fn from_env() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }
}

impl PluginLocator for PathLocator {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        std::env::split_paths(path)
            .flat_map(|dir| candidates(&dir, name))
            .find(|candidate| is_executable(candidate))
    }
}

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut found = vec![dir.join(name)];
    if cfg!(windows) {
        found.push(dir.join(format!("{name}.exe")));
    }
    found
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
