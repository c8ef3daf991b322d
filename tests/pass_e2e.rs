//! Library-level deployment passes against scripted host executors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use tierconf::cluster::exec::{HostExecutor, HostOp, run_local};
use tierconf::cluster::fanout::{FanoutOptions, JobStatus, teardown};
use tierconf::core::errors::{Result, TcfError};
use tierconf::core::modes::{AdapterMode, DeviceClass, FlushingMode, PlacementPolicy};
use tierconf::logger::activity::ActivityLog;
use tierconf::platform::pal::{StaticDiscovery, StorageResource};
use tierconf::synth::pass::{DeploymentInputs, PassContext, StorageSource, run_pass};
use tierconf::synth::persist::{load_client, load_server};
use tierconf::synth::server::OrganizerParams;
use tierconf::synth::state::DeploymentState;

/// Runs locally for every host except those listed as broken.
#[derive(Default)]
struct ScriptedExecutor {
    broken: Vec<String>,
    calls: Mutex<Vec<(String, HostOp, PathBuf)>>,
}

impl ScriptedExecutor {
    fn with_broken(hosts: &[&str]) -> Self {
        Self {
            broken: hosts.iter().map(ToString::to_string).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl HostExecutor for ScriptedExecutor {
    fn run(&self, host: &str, op: HostOp, path: &Path) -> Result<()> {
        self.calls
            .lock()
            .push((host.to_string(), op, path.to_path_buf()));
        if self.broken.iter().any(|b| b == host) {
            return Err(TcfError::Runtime {
                details: format!("{host} unreachable"),
            });
        }
        run_local(op, path)
    }
}

fn inputs(source: StorageSource) -> DeploymentInputs {
    DeploymentInputs {
        source,
        ram_bytes: 64 << 20,
        borg_min_cap: 0.25,
        block_size_bytes: 4096,
        organizer: OrganizerParams {
            recency_max: 2.5,
            flush_period: 1000,
        },
        placement_policy: PlacementPolicy::RoundRobin,
        includes: vec!["/scratch".to_string()],
        excludes: Vec::new(),
        flushing_mode: FlushingMode::Sync,
        page_size_bytes: 1 << 20,
        adapter_mode: AdapterMode::Scratch,
        log_verbosity: 3,
    }
}

fn options() -> FanoutOptions {
    FanoutOptions {
        parallelism: 4,
        timeout: Duration::from_secs(30),
    }
}

#[test]
fn discovered_pass_orders_and_persists() {
    let shared = tempfile::tempdir().unwrap();
    let nvme = tempfile::tempdir().unwrap();
    let hdd = tempfile::tempdir().unwrap();
    let discovery = StaticDiscovery::new(vec![
        StorageResource {
            mount: nvme.path().display().to_string(),
            available_bytes: 10_000,
            shared: false,
            device_class: DeviceClass::Nvme,
        },
        StorageResource {
            mount: hdd.path().display().to_string(),
            available_bytes: 50_000,
            shared: true,
            device_class: DeviceClass::Hdd,
        },
    ]);
    let hosts = vec!["localhost".to_string()];
    let log = ActivityLog::disabled();
    let ctx = PassContext {
        shared_dir: shared.path(),
        hosts: &hosts,
        executor: Arc::new(ScriptedExecutor::default()),
        fanout: options(),
        config_hash: "hash".to_string(),
        log: &log,
    };

    let outcome = run_pass(
        &inputs(StorageSource::Discover {
            require_root: false,
        }),
        &discovery,
        &ctx,
    )
    .unwrap();
    assert!(outcome.is_complete());

    let server = load_server(&outcome.documents.server_path).unwrap();
    assert_eq!(server.tier_count(), 3);
    let nvme_tier = &server.devices["nvme_0"];
    assert_eq!(nvme_tier.capacity_bytes, 9_000);
    assert!(!nvme_tier.is_shared);
    let hdd_tier = &server.devices["hdd_1"];
    assert_eq!(hdd_tier.capacity_bytes, 45_000);
    assert!(hdd_tier.is_shared);
    let ram = &server.devices["ram"];
    assert_eq!(ram.capacity_bytes, 64 << 20);
    assert_eq!(ram.reorg_threshold_range, [0.25, 1.0]);
    assert_eq!(server.default_placement_policy, PlacementPolicy::RoundRobin);

    let client = load_client(&outcome.documents.client_path).unwrap();
    assert_eq!(client.path_inclusions, ["", "/scratch"]);
    assert_eq!(client.path_exclusions, ["/"]);
    assert_eq!(client.flushing_mode, FlushingMode::Sync);

    assert!(nvme.path().join("hermes_data").is_dir());
    assert!(hdd.path().join("hermes_data").is_dir());

    let env = std::fs::read_to_string(&outcome.env_path).unwrap();
    assert!(env.contains("export HERMES_ADAPTER_MODE='kScratch'"), "{env}");
    assert!(env.contains("export HERMES_LOG_VERBOSITY='3'"), "{env}");
}

#[test]
fn failing_host_is_reported_but_documents_still_persist() {
    let shared = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let mount = data.path().display().to_string();
    let executor = Arc::new(ScriptedExecutor::with_broken(&["node-a"]));
    let hosts = vec!["node-a".to_string(), "node-b".to_string()];
    let log = ActivityLog::disabled();
    let ctx = PassContext {
        shared_dir: shared.path(),
        hosts: &hosts,
        executor: executor.clone(),
        fanout: options(),
        config_hash: "hash".to_string(),
        log: &log,
    };

    let outcome = run_pass(
        &inputs(StorageSource::Declared(vec![StorageResource::declared(
            &mount,
            1 << 30,
        )])),
        &StaticDiscovery::default(),
        &ctx,
    )
    .unwrap();

    assert!(!outcome.is_complete());
    assert_eq!(outcome.materialize.total(), 2);
    assert_eq!(outcome.materialize.failed_hosts(), ["node-a"]);
    let by_host = outcome.materialize.by_host();
    assert_eq!(by_host["node-b"].succeeded, 1);
    assert!(matches!(
        by_host["node-a"].failed[0].status,
        JobStatus::Failed { .. }
    ));
    assert_eq!(outcome.to_error().unwrap().code(), "TCF-3101");

    assert!(outcome.documents.server_path.is_file());
    assert!(outcome.documents.client_path.is_file());
    assert!(data.path().join("hermes_data").is_dir());

    let state = DeploymentState::load(shared.path()).unwrap().unwrap();
    assert_eq!(state.hosts, hosts);
    assert_eq!(state.backing_dirs, [data.path().join("hermes_data")]);
    assert_eq!(executor.calls.lock().len(), 2);
}

#[test]
fn teardown_uses_recorded_state() {
    let shared = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let mount = data.path().display().to_string();
    let hosts = vec!["localhost".to_string()];
    let log = ActivityLog::disabled();
    let executor: Arc<dyn HostExecutor> = Arc::new(ScriptedExecutor::default());
    let ctx = PassContext {
        shared_dir: shared.path(),
        hosts: &hosts,
        executor: executor.clone(),
        fanout: options(),
        config_hash: "hash".to_string(),
        log: &log,
    };
    run_pass(
        &inputs(StorageSource::Declared(vec![StorageResource::declared(
            &mount,
            1 << 20,
        )])),
        &StaticDiscovery::default(),
        &ctx,
    )
    .unwrap();

    let state = DeploymentState::load(shared.path()).unwrap().unwrap();
    let report = teardown(&state.backing_dirs, &state.hosts, &executor, options(), &log);
    assert!(report.is_success());
    state.remove_artifacts(shared.path()).unwrap();

    assert!(!data.path().join("hermes_data").exists());
    assert!(DeploymentState::load(shared.path()).unwrap().is_none());
}

#[test]
fn activity_log_records_the_pass() {
    let shared = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let log_path = shared.path().join("activity.jsonl");
    let log = ActivityLog::open(&log_path).quiet();
    let hosts = vec!["localhost".to_string()];
    let ctx = PassContext {
        shared_dir: shared.path(),
        hosts: &hosts,
        executor: Arc::new(ScriptedExecutor::default()),
        fanout: options(),
        config_hash: "cafe".to_string(),
        log: &log,
    };
    run_pass(
        &inputs(StorageSource::Declared(vec![StorageResource::declared(
            &data.path().display().to_string(),
            1 << 20,
        )])),
        &StaticDiscovery::default(),
        &ctx,
    )
    .unwrap();

    let text = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<String> = text
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("pass_start"));
    assert_eq!(events.last().map(String::as_str), Some("pass_complete"));
    assert!(events.iter().any(|e| e == "materialize"));
    assert!(events.iter().any(|e| e == "config_persisted"));
}
