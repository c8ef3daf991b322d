//! Typed activity events and the shared handle that records them.
//!
//! Callers describe what happened with an [`ActivityEvent`]; the handle maps it
//! onto a [`LogEntry`] and appends it to the JSONL writer. Warnings are echoed
//! to stderr so an operator running the CLI sees them without tailing the log.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::errors::TcfError;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    PassStarted {
        config_hash: String,
        dry_run: bool,
    },
    ResourceDiscovered {
        mount: String,
        available_bytes: u64,
        device_class: String,
    },
    TierBuilt {
        tier: String,
        mount_uri: String,
        capacity_bytes: u64,
    },
    MountSkipped {
        index: usize,
        raw_mount: String,
        reason: String,
    },
    Materialized {
        host: String,
        path: String,
        ok: bool,
        details: Option<String>,
    },
    ConfigPersisted {
        path: String,
        size_bytes: u64,
        changed: bool,
    },
    PassCompleted {
        tiers: usize,
        failed_hosts: usize,
        duration_ms: u64,
    },
    PassFailed {
        code: String,
        message: String,
    },
    TornDown {
        host: String,
        path: String,
        ok: bool,
        details: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ActivityEvent {
    #[must_use]
    pub fn from_error(err: &TcfError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    fn into_entry(self) -> LogEntry {
        match self {
            Self::PassStarted {
                config_hash,
                dry_run,
            } => {
                let mut e = LogEntry::new(EventType::PassStart, Severity::Info);
                e.details = Some(format!("config_hash={config_hash} dry_run={dry_run}"));
                e
            }
            Self::ResourceDiscovered {
                mount,
                available_bytes,
                device_class,
            } => {
                let mut e = LogEntry::new(EventType::ResourceDiscovered, Severity::Info);
                e.mount_point = Some(mount);
                e.size = Some(available_bytes);
                e.details = Some(device_class);
                e
            }
            Self::TierBuilt {
                tier,
                mount_uri,
                capacity_bytes,
            } => {
                let mut e = LogEntry::new(EventType::TierBuilt, Severity::Info);
                e.tier = Some(tier);
                e.mount_point = Some(mount_uri);
                e.size = Some(capacity_bytes);
                e
            }
            Self::MountSkipped {
                index,
                raw_mount,
                reason,
            } => {
                let mut e = LogEntry::new(EventType::MountSkipped, Severity::Warning);
                e.count = Some(index);
                e.mount_point = Some(raw_mount);
                e.details = Some(reason);
                e
            }
            Self::Materialized {
                host,
                path,
                ok,
                details,
            } => host_entry(EventType::Materialize, host, path, ok, details),
            Self::TornDown {
                host,
                path,
                ok,
                details,
            } => host_entry(EventType::Teardown, host, path, ok, details),
            Self::ConfigPersisted {
                path,
                size_bytes,
                changed,
            } => {
                let mut e = LogEntry::new(EventType::ConfigPersisted, Severity::Info);
                e.path = Some(path);
                e.size = Some(size_bytes);
                e.details = Some(if changed { "changed" } else { "unchanged" }.to_string());
                e
            }
            Self::PassCompleted {
                tiers,
                failed_hosts,
                duration_ms,
            } => {
                let severity = if failed_hosts == 0 {
                    Severity::Info
                } else {
                    Severity::Warning
                };
                let mut e = LogEntry::new(EventType::PassComplete, severity);
                e.count = Some(tiers);
                e.duration_ms = Some(duration_ms);
                e.ok = Some(failed_hosts == 0);
                if failed_hosts > 0 {
                    e.details = Some(format!("{failed_hosts} host(s) with failed operations"));
                }
                e
            }
            Self::PassFailed { code, message } => {
                let mut e = LogEntry::new(EventType::PassFailed, Severity::Critical);
                e.ok = Some(false);
                e.error_code = Some(code);
                e.error_message = Some(message);
                e
            }
            Self::Error { code, message } => {
                let mut e = LogEntry::new(EventType::Error, Severity::Warning);
                e.error_code = Some(code);
                e.error_message = Some(message);
                e
            }
        }
    }
}

fn host_entry(
    event: EventType,
    host: String,
    path: String,
    ok: bool,
    details: Option<String>,
) -> LogEntry {
    let severity = if ok { Severity::Info } else { Severity::Warning };
    let mut e = LogEntry::new(event, severity);
    e.host = Some(host);
    e.path = Some(path);
    e.ok = Some(ok);
    e.details = details;
    e
}

/// Cheaply cloneable handle onto one JSONL activity log.
#[derive(Clone)]
pub struct ActivityLog {
    writer: Arc<Mutex<JsonlWriter>>,
    echo_warnings: bool,
}

impl ActivityLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Self {
        Self {
            writer: Arc::new(Mutex::new(JsonlWriter::open(JsonlConfig::at(path)))),
            echo_warnings: true,
        }
    }

    /// A log that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            writer: Arc::new(Mutex::new(JsonlWriter::discard())),
            echo_warnings: false,
        }
    }

    /// Suppress the stderr echo of warnings (`--quiet`).
    #[must_use]
    pub fn quiet(mut self) -> Self {
        self.echo_warnings = false;
        self
    }

    pub fn record(&self, event: ActivityEvent) {
        let entry = event.into_entry();
        if self.echo_warnings && entry.severity != Severity::Info {
            eprintln!("[TCF-WARN] {}", console_line(&entry));
        }
        self.writer.lock().write_entry(&entry);
    }

    pub fn flush(&self) {
        self.writer.lock().flush();
    }
}

fn console_line(entry: &LogEntry) -> String {
    let mut parts = Vec::new();
    if let Some(host) = &entry.host {
        parts.push(format!("host={host}"));
    }
    if let Some(path) = entry.path.as_ref().or(entry.mount_point.as_ref()) {
        parts.push(format!("path={path}"));
    }
    if let Some(msg) = entry.error_message.as_ref().or(entry.details.as_ref()) {
        parts.push(msg.clone());
    }
    let event = serde_json::to_value(entry.event)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!("{event}: {}", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn read_events(path: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn skipped_mount_is_logged_as_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::open(&path).quiet();
        log.record(ActivityEvent::MountSkipped {
            index: 2,
            raw_mount: "$LOCAL_NVME".to_string(),
            reason: "mount expanded to an empty path".to_string(),
        });
        log.flush();

        let events = read_events(&path);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "mount_skipped");
        assert_eq!(events[0]["severity"], "warning");
        assert_eq!(events[0]["count"], 2);
        assert_eq!(events[0]["mount_point"], "$LOCAL_NVME");
    }

    #[test]
    fn pass_completion_counts_failed_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::open(&path).quiet();
        log.record(ActivityEvent::PassStarted {
            config_hash: "abc".to_string(),
            dry_run: true,
        });
        log.record(ActivityEvent::PassCompleted {
            tiers: 3,
            failed_hosts: 2,
            duration_ms: 7,
        });
        log.flush();

        let events = read_events(&path);
        assert_eq!(events[0]["details"], "config_hash=abc dry_run=true");
        assert_eq!(events[1]["severity"], "warning");
        assert_eq!(events[1]["count"], 3);
        assert_eq!(events[1]["details"], "2 host(s) with failed operations");
    }

    #[test]
    fn failed_host_operation_carries_host_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::open(&path).quiet();
        log.record(ActivityEvent::TornDown {
            host: "node02".to_string(),
            path: "/mnt/nvme/hermes_data".to_string(),
            ok: false,
            details: Some("connection refused".to_string()),
        });
        log.flush();

        let events = read_events(&path);
        assert_eq!(events[0]["event"], "teardown");
        assert_eq!(events[0]["host"], "node02");
        assert_eq!(events[0]["ok"], false);
    }

    #[test]
    fn error_event_keeps_code() {
        let err = TcfError::NoUsableStorage {
            details: "nothing".to_string(),
        };
        let entry = ActivityEvent::from_error(&err).into_entry();
        assert_eq!(entry.error_code.as_deref(), Some("TCF-1010"));
    }

    #[test]
    fn clones_share_one_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let log = ActivityLog::open(&path).quiet();
        let clone = log.clone();
        log.record(ActivityEvent::PassFailed {
            code: "TCF-1010".to_string(),
            message: "no storage".to_string(),
        });
        clone.record(ActivityEvent::PassCompleted {
            tiers: 1,
            failed_hosts: 0,
            duration_ms: 3,
        });
        log.flush();
        assert_eq!(read_events(&path).len(), 2);
    }

    #[test]
    fn disabled_log_accepts_events() {
        let log = ActivityLog::disabled();
        log.record(ActivityEvent::Error {
            code: "TCF-3900".to_string(),
            message: "ignored".to_string(),
        });
        log.flush();
    }
}
