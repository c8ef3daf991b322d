//! Server document assembly: tiers + organizer knobs + placement policy.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TcfError};
use crate::core::modes::{PlacementPolicy, engine_repr};
use crate::synth::tier::StorageTier;

/// Buffer organizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrganizerParams {
    /// Seconds before a blob counts as stale.
    pub recency_max: f64,
    /// Milliseconds between organizer passes.
    pub flush_period: u64,
}

/// The engine's server-side document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(with = "engine_repr")]
    pub default_placement_policy: PlacementPolicy,
    pub buffer_organizer: OrganizerParams,
    /// Keyed by tier name; sorted so the rendered document is deterministic.
    pub devices: BTreeMap<String, StorageTier>,
}

impl ServerConfig {
    #[must_use]
    pub fn tier_count(&self) -> usize {
        self.devices.len()
    }

    /// Copy map keys back into each tier's `name` after deserialization.
    pub(crate) fn restore_tier_names(&mut self) {
        for (name, tier) in &mut self.devices {
            tier.name.clone_from(name);
        }
    }
}

/// Merge built tiers with organizer and placement settings.
///
/// Fails on an empty tier list and on duplicate tier names.
pub fn assemble(
    tiers: Vec<StorageTier>,
    organizer: OrganizerParams,
    policy: PlacementPolicy,
) -> Result<ServerConfig> {
    if tiers.is_empty() {
        return Err(TcfError::NoUsableStorage {
            details: "no storage tiers were built: declare [dpe] devices, grant writable \
                      mounts, or set [dpe] ram"
                .to_string(),
        });
    }

    let mut devices = BTreeMap::new();
    for tier in tiers {
        let name = tier.name.clone();
        if devices.insert(name.clone(), tier).is_some() {
            return Err(TcfError::InvalidConfig {
                details: format!("duplicate tier name {name:?}"),
            });
        }
    }

    Ok(ServerConfig {
        default_placement_policy: policy,
        buffer_organizer: organizer,
        devices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::tier::build_memory_tier;

    fn organizer() -> OrganizerParams {
        OrganizerParams {
            recency_max: 1.0,
            flush_period: 5000,
        }
    }

    fn ram_tier() -> StorageTier {
        build_memory_tier(1 << 30, 0.0, 4096).unwrap()
    }

    #[test]
    fn empty_tier_list_is_no_usable_storage() {
        let err = assemble(Vec::new(), organizer(), PlacementPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "TCF-1010");
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = assemble(
            vec![ram_tier(), ram_tier()],
            organizer(),
            PlacementPolicy::Random,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate tier name"));
    }

    #[test]
    fn placement_policy_written_in_engine_spelling() {
        let server = assemble(vec![ram_tier()], organizer(), PlacementPolicy::RoundRobin).unwrap();
        let rendered = toml::to_string(&server).unwrap();
        assert!(rendered.contains("default_placement_policy = \"RoundRobin\""));
        assert!(rendered.contains("[buffer_organizer]"));
        assert!(rendered.contains("[devices.ram]"));
    }

    #[test]
    fn restore_tier_names_after_parse() {
        let server = assemble(vec![ram_tier()], organizer(), PlacementPolicy::None).unwrap();
        let rendered = toml::to_string(&server).unwrap();
        let mut parsed: ServerConfig = toml::from_str(&rendered).unwrap();
        parsed.restore_tier_names();
        assert_eq!(parsed, server);
    }
}
