//! Host set handling and parallel per-host directory operations.

pub mod exec;
pub mod fanout;
pub mod hostfile;
