//! Pure domain logic for the kiro worker.
//!
//! Everything here is free of I/O so it can be shared by the lock,
//! pipeline, and worker crates and tested in isolation.

pub mod coverage;
pub mod error;
pub mod hashing;
pub mod lock;
pub mod pipeline;
pub mod report;
pub mod sanitize;
pub mod steering;
pub mod tasks;
pub mod test_report;
pub mod types;
pub mod work_item;
