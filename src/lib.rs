#![forbid(unsafe_code)]

//! tierconf: configuration synthesizer for a tiered I/O buffering engine.
//!
//! One deployment pass:
//! 1. **Discover** writable storage (or take it from the config) and order it fastest first
//! 2. **Synthesize** a memory tier plus one tier per device, then the client adapter document
//! 3. **Materialize** backing directories on every host and persist both documents
//!    with the environment the engine reads at start-up
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use tierconf::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use tierconf::core::config::DeployConfig;
//! use tierconf::synth::tier::{StorageTier, build_tier};
//! ```

pub mod prelude;

pub mod cluster;
pub mod core;
pub mod logger;
pub mod platform;
pub mod synth;
