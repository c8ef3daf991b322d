//! Core types: errors, configuration, mode enums, sizes, paths.

pub mod config;
pub mod errors;
pub mod modes;
pub mod paths;
pub mod size;
