//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use tierconf::prelude::*;
//! ```

// Core
pub use crate::core::config::DeployConfig;
pub use crate::core::errors::{Result, TcfError};
pub use crate::core::modes::{AdapterMode, DeviceClass, FlushingMode, PlacementPolicy};
pub use crate::core::size::parse_size;

// Platform
pub use crate::platform::pal::{StorageDiscovery, StorageResource, detect_discovery};

// Cluster
pub use crate::cluster::exec::{HostExecutor, HostOp, ShellExecutor};
pub use crate::cluster::fanout::{FanoutOptions, FanoutReport, materialize, teardown};
pub use crate::cluster::hostfile::HostSet;

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLog};

// Synthesis
pub use crate::synth::client::{ClientConfig, build_client};
pub use crate::synth::pass::{
    DeploymentInputs, PassContext, PassOutcome, StorageSource, SynthesisPlan, dry_run, plan,
    run_pass,
};
pub use crate::synth::persist::{PersistedPaths, RenderedDocuments, persist};
pub use crate::synth::propagate::EngineEnvironment;
pub use crate::synth::server::{OrganizerParams, ServerConfig, assemble};
pub use crate::synth::state::DeploymentState;
pub use crate::synth::tier::{StorageTier, TierBuild, build_memory_tier, build_tier};
