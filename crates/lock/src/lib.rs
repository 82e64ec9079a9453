//! Distributed work lock for kiro worker pollers.
//!
//! - [`LockStore`]: conditional-write store abstraction.
//! - [`DynamoDbLockStore`]: production store over a DynamoDB table.
//! - [`InMemoryLockStore`]: same semantics in process.
//! - [`WorkLockManager`]: acquire / release / stale detection.

pub mod dynamodb;
pub mod manager;
pub mod memory;
pub mod store;

pub use dynamodb::DynamoDbLockStore;
pub use manager::{LockError, WorkLockManager};
pub use memory::InMemoryLockStore;
pub use store::{LockStore, StoreError};
