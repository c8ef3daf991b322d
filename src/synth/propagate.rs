//! Engine environment: the variables every server and client process needs
//! to find its documents, written as a sourceable shell file.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cluster::exec::shell_quote;
use crate::core::errors::{Result, TcfError};
use crate::core::modes::{AdapterMode, EngineConstant};
use crate::synth::persist::{PersistedPaths, WrittenDocument, write_document};

pub const ENV_FILE_NAME: &str = "hermes_env.sh";

pub const VAR_LOG_VERBOSITY: &str = "HERMES_LOG_VERBOSITY";
pub const VAR_ADAPTER_MODE: &str = "HERMES_ADAPTER_MODE";
pub const VAR_SERVER_CONF: &str = "HERMES_CONF";
pub const VAR_CLIENT_CONF: &str = "HERMES_CLIENT_CONF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEnvironment {
    vars: BTreeMap<String, String>,
}

impl EngineEnvironment {
    #[must_use]
    pub fn new(
        log_verbosity: u8,
        adapter_mode: AdapterMode,
        server_path: &Path,
        client_path: &Path,
    ) -> Self {
        let vars = BTreeMap::from([
            (VAR_LOG_VERBOSITY.to_string(), log_verbosity.to_string()),
            (
                VAR_ADAPTER_MODE.to_string(),
                adapter_mode.engine_constant().to_string(),
            ),
            (
                VAR_SERVER_CONF.to_string(),
                server_path.display().to_string(),
            ),
            (
                VAR_CLIENT_CONF.to_string(),
                client_path.display().to_string(),
            ),
        ]);
        Self { vars }
    }

    #[must_use]
    pub fn for_documents(
        log_verbosity: u8,
        adapter_mode: AdapterMode,
        docs: &PersistedPaths,
    ) -> Self {
        Self::new(
            log_verbosity,
            adapter_mode,
            &docs.server_path,
            &docs.client_path,
        )
    }

    #[must_use]
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// `export NAME='value'` lines, sorted by name.
    #[must_use]
    pub fn render_shell(&self) -> String {
        let mut out = String::from("# Generated by tierconf. Source before launching engine processes.\n");
        for (name, value) in &self.vars {
            out.push_str(&format!("export {name}={}\n", shell_quote(value)));
        }
        out
    }

    /// Write `hermes_env.sh` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<(PathBuf, WrittenDocument)> {
        let path = dir.join(ENV_FILE_NAME);
        let written = write_document(&path, &self.render_shell())?;
        Ok((path, written))
    }

    /// Read back a file written by [`Self::write`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| TcfError::io(path, source))?;
        let mut vars = BTreeMap::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = line
                .strip_prefix("export ")
                .and_then(|rest| rest.split_once('='))
                .and_then(|(name, value)| Some((name.to_string(), shell_unquote(value)?)));
            let Some((name, value)) = parsed else {
                return Err(TcfError::ConfigParse {
                    context: "engine environment file",
                    details: format!("{}: unexpected line {line:?}", path.display()),
                });
            };
            vars.insert(name, value);
        }
        Ok(Self { vars })
    }
}

/// Inverse of [`shell_quote`]: `'...'` runs joined by `\'`.
fn shell_unquote(raw: &str) -> Option<String> {
    let mut out = String::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("\\'") {
            out.push('\'');
            rest = after;
            continue;
        }
        let body = rest.strip_prefix('\'')?;
        let end = body.find('\'')?;
        out.push_str(&body[..end]);
        rest = &body[end + 1..];
    }
    Some(out)
}
