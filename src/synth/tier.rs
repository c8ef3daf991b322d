//! Tier construction: one storage resource in, one engine tier out.
//!
//! Pure apart from reading the environment for `$VAR` expansion, which is
//! injectable. Directory creation is the fan-out's job, not this module's.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::modes::DeviceClass;
use crate::core::paths::{absolutize, expand_env_vars_with};
use crate::core::size::apply_reservation;
use crate::platform::pal::StorageResource;

/// Directory created under each mount for the engine's data.
pub const BACKING_DIR_NAME: &str = "hermes_data";

/// Default block size for every tier.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

/// Slab ladder for disk tiers: 4 KiB, 16 KiB, 64 KiB, 1 MiB.
pub const DISK_SLAB_SIZES: [u64; 4] = [4096, 16_384, 65_536, 1_048_576];

/// Slab ladder for the memory tier, finer at the small end.
pub const MEMORY_SLAB_SIZES: [u64; 7] = [256, 512, 1024, 4096, 16_384, 65_536, 1_048_576];

/// Name of the memory tier.
pub const MEMORY_TIER_NAME: &str = "ram";

/// One buffering tier as the engine's server document spells it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTier {
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "mount_point")]
    pub mount_uri: String,
    #[serde(rename = "capacity")]
    pub capacity_bytes: u64,
    #[serde(rename = "block_size")]
    pub block_size_bytes: u64,
    pub slab_sizes: Vec<u64>,
    #[serde(rename = "is_shared_device")]
    pub is_shared: bool,
    /// `[low, high]` capacity fractions that trigger reorganization.
    #[serde(rename = "borg_capacity_thresh")]
    pub reorg_threshold_range: [f64; 2],
}

/// Result of building a tier from one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum TierBuild {
    Built {
        tier: StorageTier,
        /// Absolute directory to create on every host.
        backing_dir: PathBuf,
    },
    Skipped {
        reason: String,
    },
}

/// Build a tier from the process environment.
#[must_use]
pub fn build_tier(resource: &StorageResource, index: usize, block_size_bytes: u64) -> TierBuild {
    build_tier_with(resource, index, block_size_bytes, |name| {
        std::env::var(name).ok()
    })
}

/// Build a tier, resolving `$VAR` references through `lookup`.
///
/// The tier is named `{class}_{index}`; `index` is the candidate's position,
/// so a skipped candidate leaves a gap in the numbering.
pub fn build_tier_with<F>(
    resource: &StorageResource,
    index: usize,
    block_size_bytes: u64,
    lookup: F,
) -> TierBuild
where
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand_env_vars_with(&resource.mount, lookup);
    if expanded.trim().is_empty() {
        return TierBuild::Skipped {
            reason: format!("mount {:?} expanded to an empty path", resource.mount),
        };
    }

    let backing_dir = backing_dir_for(Path::new(&expanded));
    let tier = StorageTier {
        name: tier_name(resource.device_class, index),
        mount_uri: format!("fs://{}", backing_dir.display()),
        capacity_bytes: apply_reservation(resource.available_bytes),
        block_size_bytes,
        slab_sizes: DISK_SLAB_SIZES.to_vec(),
        is_shared: resource.shared,
        reorg_threshold_range: [0.0, 1.0],
    };
    TierBuild::Built { tier, backing_dir }
}

/// The memory tier, or `None` when no RAM was requested.
#[must_use]
pub fn build_memory_tier(
    ram_bytes: u64,
    min_capacity_fraction: f64,
    block_size_bytes: u64,
) -> Option<StorageTier> {
    (ram_bytes > 0).then(|| StorageTier {
        name: MEMORY_TIER_NAME.to_string(),
        mount_uri: "ram://".to_string(),
        capacity_bytes: ram_bytes,
        block_size_bytes,
        slab_sizes: MEMORY_SLAB_SIZES.to_vec(),
        is_shared: false,
        reorg_threshold_range: [min_capacity_fraction, 1.0],
    })
}

#[must_use]
pub fn tier_name(class: DeviceClass, index: usize) -> String {
    format!("{}_{index}", class.as_str())
}

fn backing_dir_for(mount: &Path) -> PathBuf {
    absolutize(mount).join(BACKING_DIR_NAME)
}
