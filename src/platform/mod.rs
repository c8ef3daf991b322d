//! Host platform adapters.

pub mod pal;
