//! Per-host directory operations, run locally or over ssh.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::core::config::ClusterConfig;
use crate::core::errors::{Result, TcfError};

/// Operation applied to one path on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    /// `mkdir -p`
    CreateDir,
    /// `rm -rf`; a missing directory is success.
    RemoveDir,
}

impl HostOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateDir => "materialize",
            Self::RemoveDir => "teardown",
        }
    }

    fn shell_command(self, path: &Path) -> String {
        let quoted = shell_quote(&path.to_string_lossy());
        match self {
            Self::CreateDir => format!("mkdir -p -- {quoted}"),
            Self::RemoveDir => format!("rm -rf -- {quoted}"),
        }
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs directory operations on named hosts.
pub trait HostExecutor: Send + Sync {
    fn run(&self, host: &str, op: HostOp, path: &Path) -> Result<()>;
}

/// Local filesystem calls for this machine, `ssh` for everything else.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    ssh_program: String,
    ssh_args: Vec<String>,
    local_names: Vec<String>,
}

impl ShellExecutor {
    #[must_use]
    pub fn new(ssh_program: impl Into<String>, ssh_args: Vec<String>) -> Self {
        let mut local_names = vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            "::1".to_string(),
        ];
        if let Some(name) = local_hostname() {
            local_names.push(name);
        }
        Self {
            ssh_program: ssh_program.into(),
            ssh_args,
            local_names,
        }
    }

    #[must_use]
    pub fn from_config(cluster: &ClusterConfig) -> Self {
        Self::new(cluster.ssh_program.clone(), cluster.ssh_args.clone())
    }

    #[must_use]
    pub fn is_local(&self, host: &str) -> bool {
        self.local_names.iter().any(|name| name == host)
    }

    fn run_remote(&self, host: &str, op: HostOp, path: &Path) -> Result<()> {
        let output = Command::new(&self.ssh_program)
            .args(&self.ssh_args)
            .arg(host)
            .arg(op.shell_command(path))
            .stdin(Stdio::null())
            .output()
            .map_err(|err| TcfError::Runtime {
                details: format!("failed to spawn {}: {err}", self.ssh_program),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(TcfError::Runtime {
            details: format!(
                "{op} of {} on {host} exited with {}: {}",
                path.display(),
                output.status,
                stderr.trim()
            ),
        })
    }
}

impl HostExecutor for ShellExecutor {
    fn run(&self, host: &str, op: HostOp, path: &Path) -> Result<()> {
        if self.is_local(host) {
            run_local(op, path)
        } else {
            self.run_remote(host, op, path)
        }
    }
}

/// Apply `op` to `path` on this machine.
pub fn run_local(op: HostOp, path: &Path) -> Result<()> {
    let result = match op {
        HostOp::CreateDir => fs::create_dir_all(path),
        HostOp::RemoveDir => match fs::remove_dir_all(path) {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        },
    };
    result.map_err(|source| TcfError::io(path, source))
}

/// Quote `raw` as a single POSIX shell word.
#[must_use]
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn local_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
}

#[cfg(not(unix))]
fn local_hostname() -> Option<String> {
    None
}
