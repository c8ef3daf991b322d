//! Bounded parallel fan-out of directory operations across a host set.
//!
//! One job per (host, path). Workers pull from a crossbeam work queue and
//! report on a result channel; the coordinator gathers until a deadline and
//! marks anything unreported as timed out. Jobs are never cancelled, and one
//! failure never stops the rest.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, RecvTimeoutError};
use serde::Serialize;

use crate::cluster::exec::{HostExecutor, HostOp};
use crate::core::config::ClusterConfig;
use crate::core::errors::TcfError;
use crate::logger::activity::{ActivityEvent, ActivityLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutOptions {
    pub parallelism: usize,
    /// Deadline for the whole fan-out, not per job.
    pub timeout: Duration,
}

impl FanoutOptions {
    #[must_use]
    pub fn from_config(cluster: &ClusterConfig) -> Self {
        Self {
            parallelism: cluster.parallelism.max(1),
            timeout: cluster.timeout(),
        }
    }
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Failed { code: String, message: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub host: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == JobStatus::Ok
    }
}

/// Per-host roll-up of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostOutcome {
    pub succeeded: usize,
    pub failed: Vec<JobOutcome>,
}

impl HostOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Every job's outcome, in (host, path) submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    #[serde(serialize_with = "serialize_op")]
    pub operation: HostOp,
    pub jobs: Vec<JobOutcome>,
    pub elapsed_ms: u64,
}

fn serialize_op<S: serde::Serializer>(op: &HostOp, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(op.as_str())
}

impl FanoutReport {
    #[must_use]
    pub fn empty(operation: HostOp) -> Self {
        Self {
            operation,
            jobs: Vec::new(),
            elapsed_ms: 0,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.jobs.iter().filter(|job| !job.is_ok())
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    #[must_use]
    pub fn by_host(&self) -> BTreeMap<String, HostOutcome> {
        let mut hosts: BTreeMap<String, HostOutcome> = BTreeMap::new();
        for job in &self.jobs {
            let entry = hosts.entry(job.host.clone()).or_default();
            if job.is_ok() {
                entry.succeeded += 1;
            } else {
                entry.failed.push(job.clone());
            }
        }
        hosts
    }

    #[must_use]
    pub fn failed_hosts(&self) -> Vec<String> {
        self.by_host()
            .into_iter()
            .filter(|(_, outcome)| !outcome.is_ok())
            .map(|(host, _)| host)
            .collect()
    }

    /// `PartialFailure` when any job failed.
    #[must_use]
    pub fn to_error(&self) -> Option<TcfError> {
        let failed = self.failed_count();
        (failed > 0).then(|| TcfError::PartialFailure {
            operation: self.operation.as_str(),
            failed,
            total: self.total(),
        })
    }
}

struct Job {
    index: usize,
    host: String,
    path: PathBuf,
}

/// Create every path on every host.
pub fn materialize(
    paths: &[PathBuf],
    hosts: &[String],
    executor: &Arc<dyn HostExecutor>,
    options: FanoutOptions,
    log: &ActivityLog,
) -> FanoutReport {
    run_fanout(HostOp::CreateDir, paths, hosts, executor, options, log)
}

/// Remove every path on every host. Missing directories count as removed.
pub fn teardown(
    paths: &[PathBuf],
    hosts: &[String],
    executor: &Arc<dyn HostExecutor>,
    options: FanoutOptions,
    log: &ActivityLog,
) -> FanoutReport {
    run_fanout(HostOp::RemoveDir, paths, hosts, executor, options, log)
}

pub fn run_fanout(
    op: HostOp,
    paths: &[PathBuf],
    hosts: &[String],
    executor: &Arc<dyn HostExecutor>,
    options: FanoutOptions,
    log: &ActivityLog,
) -> FanoutReport {
    let started = Instant::now();
    let jobs: Vec<Job> = hosts
        .iter()
        .flat_map(|host| paths.iter().map(move |path| (host, path)))
        .enumerate()
        .map(|(index, (host, path))| Job {
            index,
            host: host.clone(),
            path: path.clone(),
        })
        .collect();
    if jobs.is_empty() {
        return FanoutReport::empty(op);
    }

    let total = jobs.len();
    let mut outcomes: Vec<JobOutcome> = jobs
        .iter()
        .map(|job| JobOutcome {
            host: job.host.clone(),
            path: job.path.clone(),
            status: JobStatus::TimedOut,
        })
        .collect();

    let (work_tx, work_rx) = channel::bounded::<Job>(total);
    let (result_tx, result_rx) = channel::unbounded::<(usize, JobStatus)>();
    for job in jobs {
        // Capacity equals job count, so this never blocks.
        let _ = work_tx.send(job);
    }
    drop(work_tx);

    let workers = options.parallelism.clamp(1, total);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let executor = Arc::clone(executor);
        handles.push(thread::spawn(move || {
            while let Ok(job) = work_rx.recv() {
                let status = match executor.run(&job.host, op, &job.path) {
                    Ok(()) => JobStatus::Ok,
                    Err(err) => JobStatus::Failed {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                };
                if result_tx.send((job.index, status)).is_err() {
                    return;
                }
            }
        }));
    }
    drop(result_tx);

    let deadline = started + options.timeout;
    let mut reported = vec![false; total];
    let mut received = 0;
    let mut workers_gone = false;
    while received < total {
        match result_rx.recv_deadline(deadline) {
            Ok((index, status)) => {
                outcomes[index].status = status;
                reported[index] = true;
                received += 1;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                workers_gone = true;
                break;
            }
        }
    }

    if received == total || workers_gone {
        for handle in handles {
            let _ = handle.join();
        }
    }
    if workers_gone {
        for (outcome, _) in outcomes
            .iter_mut()
            .zip(&reported)
            .filter(|(_, done)| !**done)
        {
            outcome.status = JobStatus::Failed {
                code: "TCF-3900".to_string(),
                message: "worker exited before reporting".to_string(),
            };
        }
    }

    for outcome in &outcomes {
        let (ok, details) = match &outcome.status {
            JobStatus::Ok => (true, None),
            JobStatus::Failed { message, .. } => (false, Some(message.clone())),
            JobStatus::TimedOut => (
                false,
                Some(format!("no result within {}s", options.timeout.as_secs())),
            ),
        };
        let host = outcome.host.clone();
        let path = outcome.path.display().to_string();
        log.record(match op {
            HostOp::CreateDir => ActivityEvent::Materialized {
                host,
                path,
                ok,
                details,
            },
            HostOp::RemoveDir => ActivityEvent::TornDown {
                host,
                path,
                ok,
                details,
            },
        });
    }

    FanoutReport {
        operation: op,
        jobs: outcomes,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}
