//! Client document: which paths the intercept layer buffers, and how it flushes.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::modes::{FlushingMode, engine_repr};

/// Inclusion prefix that matches every path.
pub const DEFAULT_INCLUSION: &str = "";
/// Exclusion that keeps the root filesystem out unless re-included.
pub const DEFAULT_EXCLUSION: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub path_inclusions: Vec<String>,
    pub path_exclusions: Vec<String>,
    #[serde(with = "engine_repr")]
    pub flushing_mode: FlushingMode,
    /// Bytes.
    pub file_page_size: u64,
}

/// Defaults first, then user entries in the order given. Nothing is deduplicated.
#[must_use]
pub fn build_client(
    includes: &[String],
    excludes: &[String],
    flushing_mode: FlushingMode,
    page_size_bytes: u64,
) -> ClientConfig {
    let with_default = |default: &str, extra: &[String]| {
        std::iter::once(default.to_string())
            .chain(extra.iter().cloned())
            .collect::<Vec<_>>()
    };
    ClientConfig {
        path_inclusions: with_default(DEFAULT_INCLUSION, includes),
        path_exclusions: with_default(DEFAULT_EXCLUSION, excludes),
        flushing_mode,
        file_page_size: page_size_bytes,
    }
}
