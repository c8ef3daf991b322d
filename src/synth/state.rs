//! Deployment state record: what a `configure` pass materialized, so a later
//! `clean` knows which directories to remove on which hosts.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TcfError};
use crate::synth::persist::write_atomic;

pub const STATE_FILE_NAME: &str = "tierconf_state.json";
const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub config_hash: String,
    pub hosts: Vec<String>,
    /// Per-tier directories created on every host.
    pub backing_dirs: Vec<PathBuf>,
    pub tiers: Vec<String>,
    pub server_path: PathBuf,
    pub client_path: PathBuf,
    pub env_path: PathBuf,
    pub server_digest: String,
    pub client_digest: String,
}

impl DeploymentState {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config_hash: String,
        hosts: Vec<String>,
        backing_dirs: Vec<PathBuf>,
        tiers: Vec<String>,
        server_path: PathBuf,
        client_path: PathBuf,
        env_path: PathBuf,
        digests: (String, String),
    ) -> Self {
        Self {
            version: STATE_VERSION,
            created_at: Utc::now(),
            config_hash,
            hosts,
            backing_dirs,
            tiers,
            server_path,
            client_path,
            env_path,
            server_digest: digests.0,
            client_digest: digests.1,
        }
    }

    #[must_use]
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(STATE_FILE_NAME)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = Self::path_in(dir);
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&path, json.as_bytes())?;
        Ok(path)
    }

    /// `Ok(None)` when no pass has recorded state in `dir`.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = Self::path_in(dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(TcfError::io(&path, source)),
        };
        let state: Self = serde_json::from_str(&raw)?;
        if state.version != STATE_VERSION {
            return Err(TcfError::ConfigParse {
                context: "state",
                details: format!(
                    "{} has version {}, expected {STATE_VERSION}",
                    path.display(),
                    state.version
                ),
            });
        }
        Ok(Some(state))
    }

    /// Delete the generated documents and the state file. Missing files are fine.
    pub fn remove_artifacts(&self, dir: &Path) -> Result<()> {
        for path in [
            &self.server_path,
            &self.client_path,
            &self.env_path,
            &Self::path_in(dir),
        ] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(TcfError::io(path, source)),
            }
        }
        Ok(())
    }
}
