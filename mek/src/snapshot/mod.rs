//! Snapshot layer: canonical hashing, the snapshot record, and the
//! append-only store consulted across the friction boundary.

pub mod canonical;
pub mod store;
pub mod types;

pub use store::{SnapshotQuery, SnapshotStatistics, SnapshotStore};
pub use types::{RevalidationState, Snapshot, SnapshotMismatch};
