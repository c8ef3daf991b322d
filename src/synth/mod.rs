//! Configuration synthesis: tiers, server and client documents, persistence,
//! engine environment, and the deployment pass tying them together.

pub mod client;
pub mod pass;
pub mod persist;
pub mod propagate;
pub mod server;
pub mod state;
pub mod tier;
