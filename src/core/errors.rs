//! TCF-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TcfError>;

/// Top-level error type for tierconf.
#[derive(Debug, Error)]
pub enum TcfError {
    #[error("[TCF-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TCF-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TCF-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TCF-1004] invalid {axis} {value:?}; expected one of: {allowed}")]
    InvalidChoice {
        axis: &'static str,
        value: String,
        allowed: String,
    },

    #[error("[TCF-1005] invalid size {raw:?}: {details}")]
    InvalidSize { raw: String, details: String },

    #[error("[TCF-1010] no usable storage: {details}")]
    NoUsableStorage { details: String },

    #[error("[TCF-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[TCF-2001] storage discovery failure for {path}: {details}")]
    Discovery { path: PathBuf, details: String },

    #[error("[TCF-2002] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[TCF-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TCF-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TCF-3101] {operation} failed on {failed} of {total} host operations")]
    PartialFailure {
        operation: &'static str,
        failed: usize,
        total: usize,
    },

    #[error("[TCF-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl TcfError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TCF-1001",
            Self::MissingConfig { .. } => "TCF-1002",
            Self::ConfigParse { .. } => "TCF-1003",
            Self::InvalidChoice { .. } => "TCF-1004",
            Self::InvalidSize { .. } => "TCF-1005",
            Self::NoUsableStorage { .. } => "TCF-1010",
            Self::UnsupportedPlatform { .. } => "TCF-1101",
            Self::Discovery { .. } => "TCF-2001",
            Self::MountParse { .. } => "TCF-2002",
            Self::Serialization { .. } => "TCF-2101",
            Self::Io { .. } => "TCF-3002",
            Self::PartialFailure { .. } => "TCF-3101",
            Self::Runtime { .. } => "TCF-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Rejection of a literal outside a closed choice set.
    #[must_use]
    pub fn invalid_choice(axis: &'static str, value: &str, allowed: &[&str]) -> Self {
        Self::InvalidChoice {
            axis,
            value: value.to_string(),
            allowed: allowed.join(", "),
        }
    }
}

impl From<serde_json::Error> for TcfError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TcfError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for TcfError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
