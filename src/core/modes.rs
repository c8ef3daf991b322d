//! Closed choice sets for every mode axis, validated once at the input boundary.
//!
//! User-facing spellings (`sync`, `bypass`, `MinimizeIoTime`) parse via
//! [`FromStr`]; the spelling the buffering engine expects on disk or in its
//! environment comes from [`EngineConstant`].

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::errors::TcfError;

/// A value with a fixed engine-side spelling.
pub trait EngineConstant: Sized {
    fn engine_constant(&self) -> &'static str;
    fn from_engine_constant(raw: &str) -> Option<Self>;
}

/// How the client intercept layer treats files it redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterMode {
    #[default]
    Default,
    Scratch,
    Bypass,
}

impl AdapterMode {
    pub const CHOICES: [&'static str; 3] = ["default", "scratch", "bypass"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Scratch => "scratch",
            Self::Bypass => "bypass",
        }
    }
}

impl EngineConstant for AdapterMode {
    fn engine_constant(&self) -> &'static str {
        match self {
            Self::Default => "kDefault",
            Self::Scratch => "kScratch",
            Self::Bypass => "kBypass",
        }
    }

    fn from_engine_constant(raw: &str) -> Option<Self> {
        match raw {
            "kDefault" => Some(Self::Default),
            "kScratch" => Some(Self::Scratch),
            "kBypass" => Some(Self::Bypass),
            _ => None,
        }
    }
}

impl FromStr for AdapterMode {
    type Err = TcfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "default" => Ok(Self::Default),
            "scratch" => Ok(Self::Scratch),
            "bypass" => Ok(Self::Bypass),
            other => Err(TcfError::invalid_choice(
                "adapter mode",
                other,
                &Self::CHOICES,
            )),
        }
    }
}

/// Whether the client flushes buffered data inline or in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlushingMode {
    Sync,
    #[default]
    Async,
}

impl FlushingMode {
    pub const CHOICES: [&'static str; 2] = ["sync", "async"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

impl EngineConstant for FlushingMode {
    fn engine_constant(&self) -> &'static str {
        match self {
            Self::Sync => "kSync",
            Self::Async => "kAsync",
        }
    }

    fn from_engine_constant(raw: &str) -> Option<Self> {
        match raw {
            "kSync" => Some(Self::Sync),
            "kAsync" => Some(Self::Async),
            _ => None,
        }
    }
}

impl FromStr for FlushingMode {
    type Err = TcfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            other => Err(TcfError::invalid_choice(
                "flushing mode",
                other,
                &Self::CHOICES,
            )),
        }
    }
}

/// Placement strategy the engine uses for new data. Opaque to this crate
/// beyond membership in the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlacementPolicy {
    Random,
    RoundRobin,
    #[default]
    MinimizeIoTime,
    None,
}

impl PlacementPolicy {
    pub const CHOICES: [&'static str; 4] = ["Random", "RoundRobin", "MinimizeIoTime", "None"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Random => "Random",
            Self::RoundRobin => "RoundRobin",
            Self::MinimizeIoTime => "MinimizeIoTime",
            Self::None => "None",
        }
    }
}

impl EngineConstant for PlacementPolicy {
    fn engine_constant(&self) -> &'static str {
        self.as_str()
    }

    fn from_engine_constant(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromStr for PlacementPolicy {
    type Err = TcfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "Random" => Ok(Self::Random),
            "RoundRobin" => Ok(Self::RoundRobin),
            "MinimizeIoTime" => Ok(Self::MinimizeIoTime),
            "None" => Ok(Self::None),
            other => Err(TcfError::invalid_choice(
                "placement policy",
                other,
                &Self::CHOICES,
            )),
        }
    }
}

/// Storage device class tag, also the tier-name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceClass {
    Pmem,
    Nvme,
    Ssd,
    Hdd,
    Pfs,
    Custom,
    Unknown,
}

impl DeviceClass {
    pub const CHOICES: [&'static str; 7] =
        ["pmem", "nvme", "ssd", "hdd", "pfs", "custom", "unknown"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pmem => "pmem",
            Self::Nvme => "nvme",
            Self::Ssd => "ssd",
            Self::Hdd => "hdd",
            Self::Pfs => "pfs",
            Self::Custom => "custom",
            Self::Unknown => "unknown",
        }
    }

    /// Rank used to order discovered devices, fastest first.
    #[must_use]
    pub const fn speed_rank(self) -> u8 {
        match self {
            Self::Pmem => 0,
            Self::Nvme => 1,
            Self::Ssd => 2,
            Self::Custom => 3,
            Self::Hdd => 4,
            Self::Pfs => 5,
            Self::Unknown => 6,
        }
    }
}

impl FromStr for DeviceClass {
    type Err = TcfError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pmem" => Ok(Self::Pmem),
            "nvme" => Ok(Self::Nvme),
            "ssd" => Ok(Self::Ssd),
            "hdd" => Ok(Self::Hdd),
            "pfs" => Ok(Self::Pfs),
            "custom" => Ok(Self::Custom),
            "unknown" => Ok(Self::Unknown),
            other => Err(TcfError::invalid_choice(
                "device class",
                other,
                &Self::CHOICES,
            )),
        }
    }
}

macro_rules! user_facing_serde {
    ($($ty:ty),+ $(,)?) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    )+};
}

user_facing_serde!(AdapterMode, FlushingMode, PlacementPolicy, DeviceClass);

/// `#[serde(with = "engine_repr")]` for fields written in the engine's spelling.
pub mod engine_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::EngineConstant;

    pub fn serialize<T: EngineConstant, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.engine_constant())
    }

    pub fn deserialize<'de, T: EngineConstant, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let raw = String::deserialize(deserializer)?;
        T::from_engine_constant(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("unrecognized engine constant {raw:?}"))
        })
    }
}
