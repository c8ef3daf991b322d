//! One deployment pass: immutable inputs → pure plan → side-effecting execute.
//!
//! [`plan`] reads storage candidates and builds both documents without
//! touching any host. [`execute`] materializes backing directories across the
//! host set, persists the documents and engine environment into the shared
//! directory, and records deployment state. A partial fan-out failure is
//! reported in the returned [`PassOutcome`]; the documents are still written.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cluster::exec::HostExecutor;
use crate::cluster::fanout::{FanoutOptions, FanoutReport, materialize};
use crate::core::errors::{Result, TcfError};
use crate::core::modes::{AdapterMode, FlushingMode, PlacementPolicy};
use crate::logger::activity::{ActivityEvent, ActivityLog};
use crate::platform::pal::{StorageDiscovery, StorageResource};
use crate::synth::client::{ClientConfig, build_client};
use crate::synth::persist::{PersistedPaths, RenderedDocuments};
use crate::synth::propagate::EngineEnvironment;
use crate::synth::server::{OrganizerParams, ServerConfig, assemble};
use crate::synth::state::DeploymentState;
use crate::synth::tier::{TierBuild, build_memory_tier, build_tier_with};

/// Where storage candidates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageSource {
    Discover { require_root: bool },
    /// User-declared devices; discovery is not consulted.
    Declared(Vec<StorageResource>),
}

/// Validated, immutable inputs for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentInputs {
    pub source: StorageSource,
    pub ram_bytes: u64,
    pub borg_min_cap: f64,
    pub block_size_bytes: u64,
    pub organizer: OrganizerParams,
    pub placement_policy: PlacementPolicy,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub flushing_mode: FlushingMode,
    pub page_size_bytes: u64,
    pub adapter_mode: AdapterMode,
    pub log_verbosity: u8,
}

/// A candidate that produced no tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedMount {
    pub index: usize,
    pub raw_mount: String,
    pub reason: String,
}

/// Everything a pass will write, computed without side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisPlan {
    pub resources: Vec<StorageResource>,
    pub server: ServerConfig,
    pub client: ClientConfig,
    /// One per disk tier, in candidate order.
    pub backing_dirs: Vec<PathBuf>,
    pub skipped: Vec<SkippedMount>,
}

impl SynthesisPlan {
    #[must_use]
    pub fn tier_names(&self) -> Vec<String> {
        self.server.devices.keys().cloned().collect()
    }
}

/// Side-effect targets for [`execute`].
pub struct PassContext<'a> {
    pub shared_dir: &'a Path,
    pub hosts: &'a [String],
    pub executor: Arc<dyn HostExecutor>,
    pub fanout: FanoutOptions,
    pub config_hash: String,
    pub log: &'a ActivityLog,
}

/// What a completed pass produced.
#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub tiers: Vec<String>,
    pub skipped: Vec<SkippedMount>,
    pub documents: PersistedPaths,
    pub env_path: PathBuf,
    pub state_path: PathBuf,
    pub materialize: FanoutReport,
}

impl PassOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.materialize.is_success()
    }

    /// `PartialFailure` when some host operations failed.
    #[must_use]
    pub fn to_error(&self) -> Option<TcfError> {
        self.materialize.to_error()
    }
}

/// Build both documents from the process environment.
pub fn plan(
    inputs: &DeploymentInputs,
    discovery: &dyn StorageDiscovery,
    log: &ActivityLog,
) -> Result<SynthesisPlan> {
    plan_with_env(inputs, discovery, log, |name| std::env::var(name).ok())
}

/// Build both documents, resolving mount `$VAR`s through `lookup`.
pub fn plan_with_env<F>(
    inputs: &DeploymentInputs,
    discovery: &dyn StorageDiscovery,
    log: &ActivityLog,
    lookup: F,
) -> Result<SynthesisPlan>
where
    F: Fn(&str) -> Option<String>,
{
    let resources = match &inputs.source {
        StorageSource::Discover { require_root } => discovery.discover(*require_root)?,
        StorageSource::Declared(declared) => declared.clone(),
    };

    let mut tiers = Vec::with_capacity(resources.len() + 1);
    let mut backing_dirs = Vec::new();
    let mut skipped = Vec::new();
    for (index, resource) in resources.iter().enumerate() {
        log.record(ActivityEvent::ResourceDiscovered {
            mount: resource.mount.clone(),
            available_bytes: resource.available_bytes,
            device_class: resource.device_class.to_string(),
        });
        match build_tier_with(resource, index, inputs.block_size_bytes, &lookup) {
            TierBuild::Built { tier, backing_dir } => {
                log.record(ActivityEvent::TierBuilt {
                    tier: tier.name.clone(),
                    mount_uri: tier.mount_uri.clone(),
                    capacity_bytes: tier.capacity_bytes,
                });
                tiers.push(tier);
                backing_dirs.push(backing_dir);
            }
            TierBuild::Skipped { reason } => {
                log.record(ActivityEvent::MountSkipped {
                    index,
                    raw_mount: resource.mount.clone(),
                    reason: reason.clone(),
                });
                skipped.push(SkippedMount {
                    index,
                    raw_mount: resource.mount.clone(),
                    reason,
                });
            }
        }
    }

    if let Some(memory) =
        build_memory_tier(inputs.ram_bytes, inputs.borg_min_cap, inputs.block_size_bytes)
    {
        log.record(ActivityEvent::TierBuilt {
            tier: memory.name.clone(),
            mount_uri: memory.mount_uri.clone(),
            capacity_bytes: memory.capacity_bytes,
        });
        tiers.push(memory);
    }

    let server = assemble(tiers, inputs.organizer, inputs.placement_policy)?;
    let client = build_client(
        &inputs.includes,
        &inputs.excludes,
        inputs.flushing_mode,
        inputs.page_size_bytes,
    );

    Ok(SynthesisPlan {
        resources,
        server,
        client,
        backing_dirs,
        skipped,
    })
}

/// Apply a plan: create directories, write documents, record state.
pub fn execute(
    plan: SynthesisPlan,
    inputs: &DeploymentInputs,
    ctx: &PassContext<'_>,
) -> Result<PassOutcome> {
    let rendered = RenderedDocuments::render(&plan.server, &plan.client)?;
    let report = materialize(
        &plan.backing_dirs,
        ctx.hosts,
        &ctx.executor,
        ctx.fanout,
        ctx.log,
    );

    let documents = rendered.persist(ctx.shared_dir)?;
    for (path, changed) in [
        (&documents.server_path, documents.server_changed),
        (&documents.client_path, documents.client_changed),
    ] {
        ctx.log.record(ActivityEvent::ConfigPersisted {
            path: path.display().to_string(),
            size_bytes: std::fs::metadata(path).map_or(0, |m| m.len()),
            changed,
        });
    }

    let environment =
        EngineEnvironment::for_documents(inputs.log_verbosity, inputs.adapter_mode, &documents);
    let (env_path, env_doc) = environment.write(ctx.shared_dir)?;
    ctx.log.record(ActivityEvent::ConfigPersisted {
        path: env_path.display().to_string(),
        size_bytes: env_doc.size_bytes,
        changed: env_doc.changed,
    });

    let tiers = plan.tier_names();
    let state = DeploymentState::new(
        ctx.config_hash.clone(),
        ctx.hosts.to_vec(),
        plan.backing_dirs,
        tiers.clone(),
        documents.server_path.clone(),
        documents.client_path.clone(),
        env_path.clone(),
        (
            documents.server_digest.clone(),
            documents.client_digest.clone(),
        ),
    );
    let state_path = state.save(ctx.shared_dir)?;

    Ok(PassOutcome {
        tiers,
        skipped: plan.skipped,
        documents,
        env_path,
        state_path,
        materialize: report,
    })
}

/// Plan without touching any host or file, logging the pass boundaries.
pub fn dry_run(
    inputs: &DeploymentInputs,
    discovery: &dyn StorageDiscovery,
    log: &ActivityLog,
    config_hash: &str,
) -> Result<(SynthesisPlan, RenderedDocuments)> {
    let started = Instant::now();
    log.record(ActivityEvent::PassStarted {
        config_hash: config_hash.to_string(),
        dry_run: true,
    });

    let result = plan(inputs, discovery, log).and_then(|plan| {
        let rendered = RenderedDocuments::render(&plan.server, &plan.client)?;
        Ok((plan, rendered))
    });
    match &result {
        Ok((plan, _)) => log.record(ActivityEvent::PassCompleted {
            tiers: plan.server.tier_count(),
            failed_hosts: 0,
            duration_ms: elapsed_ms(started),
        }),
        Err(err) => log.record(ActivityEvent::PassFailed {
            code: err.code().to_string(),
            message: err.to_string(),
        }),
    }
    log.flush();
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Plan and execute, logging the pass boundaries.
pub fn run_pass(
    inputs: &DeploymentInputs,
    discovery: &dyn StorageDiscovery,
    ctx: &PassContext<'_>,
) -> Result<PassOutcome> {
    let started = Instant::now();
    ctx.log.record(ActivityEvent::PassStarted {
        config_hash: ctx.config_hash.clone(),
        dry_run: false,
    });

    let result = plan(inputs, discovery, ctx.log).and_then(|plan| execute(plan, inputs, ctx));
    match &result {
        Ok(outcome) => ctx.log.record(ActivityEvent::PassCompleted {
            tiers: outcome.tiers.len(),
            failed_hosts: outcome.materialize.failed_hosts().len(),
            duration_ms: elapsed_ms(started),
        }),
        Err(err) => ctx.log.record(ActivityEvent::PassFailed {
            code: err.code().to_string(),
            message: err.to_string(),
        }),
    }
    ctx.log.flush();
    result
}
