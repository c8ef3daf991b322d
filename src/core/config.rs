//! Deployment configuration: TOML file + env var overrides + smart defaults.
//!
//! [`DeployConfig`] is the user-editable surface. [`DeployConfig::inputs`]
//! validates it once and produces the immutable [`DeploymentInputs`] that the
//! synthesis pass threads through every builder.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TcfError};
use crate::core::modes::{AdapterMode, FlushingMode, PlacementPolicy};
use crate::core::paths::home_dir_or_tmp;
use crate::core::size::parse_size;
use crate::platform::pal::StorageResource;
use crate::synth::pass::{DeploymentInputs, StorageSource};
use crate::synth::server::OrganizerParams;

/// Full tierconf configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeployConfig {
    pub organizer: OrganizerConfig,
    pub adapter: AdapterConfig,
    pub dpe: DpeConfig,
    pub discovery: DiscoveryConfig,
    pub tiers: TiersConfig,
    pub runtime: RuntimeConfig,
    pub cluster: ClusterConfig,
    pub paths: PathsConfig,
}

/// Buffer organizer knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Seconds before a blob is considered stale.
    pub recency_max: f64,
    /// Capacity fraction below which the organizer will not reorganize into RAM.
    pub borg_min_cap: f64,
    /// Milliseconds between organizer scans.
    pub flush_period: u64,
}

/// Client intercept layer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AdapterConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub adapter_mode: AdapterMode,
    pub flush_mode: FlushingMode,
    pub page_size: String,
}

/// Placement engine inputs: RAM budget, policy, and explicit devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DpeConfig {
    pub ram: String,
    pub dpe: PlacementPolicy,
    /// When non-empty, discovery is skipped and exactly these devices are used.
    pub devices: Vec<DeviceSpec>,
}

/// One user-declared device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSpec {
    pub mount: String,
    /// Usable size the tier should end up with (e.g. `100GB`).
    pub size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub require_root: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TiersConfig {
    pub block_size: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine log verbosity: 0 fatal only, 1 info, higher is chattier.
    pub log_verbosity: u8,
}

/// Host set and remote execution settings for directory fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Inline host patterns (`node[01-04]`). Merged after the hostfile.
    pub hosts: Vec<String>,
    pub hostfile: Option<PathBuf>,
    pub parallelism: usize,
    pub timeout_secs: u64,
    pub ssh_program: String,
    pub ssh_args: Vec<String>,
}

/// Filesystem paths used by tierconf.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Deployment-wide directory holding generated documents and state.
    pub shared_dir: PathBuf,
    /// Defaults to `<shared_dir>/tierconf_activity.jsonl`.
    pub activity_log: Option<PathBuf>,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            recency_max: 1.0,
            borg_min_cap: 0.0,
            flush_period: 5_000,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            adapter_mode: AdapterMode::Default,
            flush_mode: FlushingMode::Async,
            page_size: "1m".to_string(),
        }
    }
}

impl Default for DpeConfig {
    fn default() -> Self {
        Self {
            ram: "0".to_string(),
            dpe: PlacementPolicy::MinimizeIoTime,
            devices: Vec::new(),
        }
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            block_size: "4k".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { log_verbosity: 1 }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            hostfile: None,
            parallelism: std::thread::available_parallelism().map_or(4, |n| n.get().min(16)),
            timeout_secs: 120,
            ssh_program: "ssh".to_string(),
            ssh_args: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir_or_tmp("config paths");
        Self {
            config_file: home.join(".config").join("tierconf").join("config.toml"),
            shared_dir: home.join(".local").join("share").join("tierconf"),
            activity_log: None,
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PathsConfig {
    #[must_use]
    pub fn activity_log_path(&self) -> PathBuf {
        self.activity_log
            .clone()
            .unwrap_or_else(|| self.shared_dir.join("tierconf_activity.jsonl"))
    }
}

impl DeployConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| TcfError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(TcfError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(&env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Validate and freeze into the inputs of one synthesis pass.
    pub fn inputs(&self) -> Result<DeploymentInputs> {
        self.validate()?;

        let source = if self.dpe.devices.is_empty() {
            StorageSource::Discover {
                require_root: self.discovery.require_root,
            }
        } else {
            let declared = self
                .dpe
                .devices
                .iter()
                .map(|dev| Ok(StorageResource::declared(&dev.mount, parse_size(&dev.size)?)))
                .collect::<Result<Vec<_>>>()?;
            StorageSource::Declared(declared)
        };

        Ok(DeploymentInputs {
            source,
            ram_bytes: parse_size(&self.dpe.ram)?,
            borg_min_cap: self.organizer.borg_min_cap,
            block_size_bytes: parse_size(&self.tiers.block_size)?,
            organizer: OrganizerParams {
                recency_max: self.organizer.recency_max,
                flush_period: self.organizer.flush_period,
            },
            placement_policy: self.dpe.dpe,
            includes: self.adapter.include.clone(),
            excludes: self.adapter.exclude.clone(),
            flushing_mode: self.adapter.flush_mode,
            page_size_bytes: parse_size(&self.adapter.page_size)?,
            adapter_mode: self.adapter.adapter_mode,
            log_verbosity: self.runtime.log_verbosity,
        })
    }

    fn apply_env_overrides_from(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        // organizer
        set_parsed(lookup, "TCF_ORGANIZER_RECENCY_MAX", &mut self.organizer.recency_max)?;
        set_parsed(lookup, "TCF_ORGANIZER_BORG_MIN_CAP", &mut self.organizer.borg_min_cap)?;
        set_parsed(lookup, "TCF_ORGANIZER_FLUSH_PERIOD", &mut self.organizer.flush_period)?;

        // adapter
        if let Some(raw) = lookup("TCF_ADAPTER_MODE") {
            self.adapter.adapter_mode = raw.trim().parse()?;
        }
        if let Some(raw) = lookup("TCF_ADAPTER_FLUSH_MODE") {
            self.adapter.flush_mode = raw.trim().parse()?;
        }
        set_string(lookup, "TCF_ADAPTER_PAGE_SIZE", &mut self.adapter.page_size);

        // dpe
        set_string(lookup, "TCF_DPE_RAM", &mut self.dpe.ram);
        if let Some(raw) = lookup("TCF_DPE_POLICY") {
            self.dpe.dpe = raw.trim().parse()?;
        }

        set_parsed(lookup, "TCF_DISCOVERY_REQUIRE_ROOT", &mut self.discovery.require_root)?;
        set_parsed(lookup, "TCF_RUNTIME_LOG_VERBOSITY", &mut self.runtime.log_verbosity)?;

        // cluster
        if let Some(raw) = lookup("TCF_HOSTFILE") {
            self.cluster.hostfile = Some(PathBuf::from(raw));
        }
        set_parsed(lookup, "TCF_CLUSTER_PARALLELISM", &mut self.cluster.parallelism)?;
        set_parsed(lookup, "TCF_CLUSTER_TIMEOUT_SECS", &mut self.cluster.timeout_secs)?;

        if let Some(raw) = lookup("TCF_SHARED_DIR") {
            self.paths.shared_dir = PathBuf::from(raw);
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let org = &self.organizer;
        if !org.recency_max.is_finite() || org.recency_max < 0.0 {
            return Err(TcfError::InvalidConfig {
                details: format!(
                    "organizer.recency_max must be a finite value >= 0, got {}",
                    org.recency_max
                ),
            });
        }
        if !(0.0..=1.0).contains(&org.borg_min_cap) {
            return Err(TcfError::InvalidConfig {
                details: format!(
                    "organizer.borg_min_cap must be in [0,1], got {}",
                    org.borg_min_cap
                ),
            });
        }
        if org.flush_period == 0 {
            return Err(TcfError::InvalidConfig {
                details: "organizer.flush_period must be > 0".to_string(),
            });
        }

        if parse_size(&self.adapter.page_size)? == 0 {
            return Err(TcfError::InvalidConfig {
                details: "adapter.page_size must be > 0".to_string(),
            });
        }
        if parse_size(&self.tiers.block_size)? == 0 {
            return Err(TcfError::InvalidConfig {
                details: "tiers.block_size must be > 0".to_string(),
            });
        }
        parse_size(&self.dpe.ram)?;
        for device in &self.dpe.devices {
            parse_size(&device.size)?;
        }

        if self.runtime.log_verbosity > 10 {
            return Err(TcfError::InvalidConfig {
                details: format!(
                    "runtime.log_verbosity must be <= 10, got {}",
                    self.runtime.log_verbosity
                ),
            });
        }

        if self.cluster.parallelism == 0 {
            return Err(TcfError::InvalidConfig {
                details: "cluster.parallelism must be >= 1".to_string(),
            });
        }
        if self.cluster.timeout_secs == 0 {
            return Err(TcfError::InvalidConfig {
                details: "cluster.timeout_secs must be > 0".to_string(),
            });
        }
        if self.cluster.ssh_program.trim().is_empty() {
            return Err(TcfError::InvalidConfig {
                details: "cluster.ssh_program must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<T>(lookup: &dyn Fn(&str) -> Option<String>, name: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| TcfError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_string(lookup: &dyn Fn(&str) -> Option<String>, name: &str, slot: &mut String) {
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().to_string();
    }
}
