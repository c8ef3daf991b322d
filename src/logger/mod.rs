//! Activity logging: typed events appended to a JSONL file with stderr fallback.

pub mod activity;
pub mod jsonl;
