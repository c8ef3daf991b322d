//! Host set parsing: hostfiles and inline patterns with bracket ranges.
//!
//! `node[01-04]` expands to `node01 .. node04` (zero padding follows the
//! range start), `rack[1,3,5-6]-ib` to `rack1-ib rack3-ib rack5-ib rack6-ib`.
//! Several bracket groups multiply out left to right. Hostfiles hold one or
//! more patterns per line; `#` starts a comment.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::errors::{Result, TcfError};

/// Upper bound on a single pattern's expansion.
const MAX_EXPANSION: usize = 65_536;

pub const LOCALHOST: &str = "localhost";

/// Ordered, de-duplicated set of host names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSet {
    hosts: Vec<String>,
}

impl HostSet {
    /// Just this machine.
    #[must_use]
    pub fn local() -> Self {
        Self {
            hosts: vec![LOCALHOST.to_string()],
        }
    }

    /// Parse hostfile contents.
    pub fn parse(text: &str) -> Result<Self> {
        let mut set = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default();
            for pattern in line.split_whitespace() {
                set.push_all(expand_pattern(pattern)?);
            }
        }
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| TcfError::io(path, source))?;
        Self::parse(&text)
    }

    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut set = Self::default();
        for pattern in patterns {
            set.push_all(expand_pattern(pattern.as_ref().trim())?);
        }
        Ok(set)
    }

    /// Append hosts from `other` that are not already present.
    pub fn extend(&mut self, other: Self) {
        self.push_all(other.hosts);
    }

    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.hosts
    }

    fn push_all(&mut self, hosts: Vec<String>) {
        for host in hosts {
            if !self.hosts.contains(&host) {
                self.hosts.push(host);
            }
        }
    }
}

fn bracket_group() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^\[\]]*)\[([^\[\]]*)\](.*)$").expect("bracket pattern compiles")
    })
}

/// Expand one host pattern into concrete host names.
pub fn expand_pattern(pattern: &str) -> Result<Vec<String>> {
    let invalid = |details: String| TcfError::InvalidConfig {
        details: format!("host pattern {pattern:?}: {details}"),
    };
    if pattern.is_empty() {
        return Err(invalid("empty pattern".to_string()));
    }

    let Some(caps) = bracket_group().captures(pattern) else {
        if pattern.contains(['[', ']']) {
            return Err(invalid("unbalanced brackets".to_string()));
        }
        return Ok(vec![pattern.to_string()]);
    };
    let prefix = &caps[1];
    let suffixes = if caps[3].is_empty() {
        vec![String::new()]
    } else {
        expand_pattern(&caps[3])?
    };

    let mut hosts = Vec::new();
    for item in caps[2].split(',') {
        for index in expand_range(item.trim()).map_err(invalid)? {
            for suffix in &suffixes {
                hosts.push(format!("{prefix}{index}{suffix}"));
                if hosts.len() > MAX_EXPANSION {
                    return Err(invalid(format!("expands past {MAX_EXPANSION} hosts")));
                }
            }
        }
    }
    Ok(hosts)
}

fn expand_range(item: &str) -> std::result::Result<Vec<String>, String> {
    let (start_raw, end_raw) = item.split_once('-').unwrap_or((item, item));
    let parse = |raw: &str| {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("range bound {raw:?} is not a number"));
        }
        raw.parse::<u64>()
            .map_err(|_| format!("range bound {raw:?} out of range"))
    };
    let start = parse(start_raw)?;
    let end = parse(end_raw)?;
    if start > end {
        return Err(format!("range {item:?} runs backwards"));
    }
    if end - start >= MAX_EXPANSION as u64 {
        return Err(format!("range {item:?} is too large"));
    }

    let width = if start_raw.len() > 1 && start_raw.starts_with('0') {
        start_raw.len()
    } else {
        0
    };
    Ok((start..=end).map(|n| format!("{n:0width$}")).collect())
}
