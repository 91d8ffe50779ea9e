//! Concurrency layer for the object-state engine
//!
//! This crate implements optimistic multi-version concurrency with:
//! - Snapshot: a transaction's private view and write-set
//! - SnapshotManager: acquire, writable, rebase, commit, collect
//! - Merge: conflict predicate and rebase merge
//! - MonitorState: busy-state bookkeeping for named operation groups

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod merge;
pub mod monitor;
pub mod snapshot;

pub use manager::{Completion, Conflict, ManagerStats, MemberChange, SnapshotManager};
pub use merge::{is_conflicting, merge, Merge};
pub use monitor::MonitorState;
pub use snapshot::{Snapshot, SnapshotStatus};
