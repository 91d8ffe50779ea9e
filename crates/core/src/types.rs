//! Core identity types for the object-state engine
//!
//! This module defines the fundamental identifiers used throughout the system:
//! - [`ObjectId`]: Stable identity of a stateful object across all revisions
//! - [`SnapshotId`]: Identity of a transaction's unit of work
//! - [`RevisionId`]: Arena key of one immutable object revision
//! - [`Timestamp`]: Position of a snapshot on the logical timeline
//! - [`MethodId`], [`WorkerId`], [`Token`]: registration and reentrance handles

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of a member (field) of a stateful object
///
/// Member names are shared strings: revisions clone their member maps on
/// write, and an `Arc<str>` key keeps those clones cheap.
pub type Member = Arc<str>;

/// Reserved member recording disposal in write-sets and conflict-sets
pub const DISPOSED: &str = "<disposed>";

/// Unique identifier of a stateful object
///
/// ObjectId is assigned once when an object is constructed and never reused
/// within an engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Create an ObjectId from its raw value
    pub const fn new(value: u64) -> Self {
        ObjectId(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier of a snapshot (transaction)
///
/// Snapshot ids increase monotonically in construction order. They are
/// unrelated to timestamps, which are assigned on acquire and may change at
/// commit time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// The snapshot owning the `NIL` revision
    pub const NIL: SnapshotId = SnapshotId(0);

    /// Create a SnapshotId from its raw value
    pub const fn new(value: u64) -> Self {
        SnapshotId(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Arena key of a revision
///
/// `RevisionId::NIL` is the synthetic root revision meaning
/// "object does not exist".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionId(u64);

impl RevisionId {
    /// The root sentinel revision
    pub const NIL: RevisionId = RevisionId(0);

    /// Create a RevisionId from its raw value
    pub const fn new(value: u64) -> Self {
        RevisionId(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Check if this is the root sentinel
    pub const fn is_nil(&self) -> bool {
        self.0 == 0
    }
}

/// Logical timestamp of a snapshot
///
/// Timestamps order snapshots on the logical timeline. A reader at timestamp
/// `t` sees exactly the committed revisions whose timestamp is `<= t`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Timestamp of the `NIL` revision
    pub const ZERO: Timestamp = Timestamp(0);

    /// Timestamp of a snapshot that has not been acquired yet
    pub const UNDEFINED: Timestamp = Timestamp(u64::MAX - 1);

    /// Initial bumper value: a bumper above it means prior state was touched
    pub const INITIAL_BUMPER: Timestamp = Timestamp(100);

    /// Create a timestamp from its raw value
    pub const fn new(value: u64) -> Self {
        Timestamp(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Check if the timestamp is still undefined
    pub const fn is_undefined(&self) -> bool {
        self.0 == u64::MAX - 1
    }

    /// The next timestamp on the timeline
    pub const fn next(&self) -> Timestamp {
        Timestamp(self.0 + 1)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_undefined() {
            write!(f, "v?")
        } else {
            write!(f, "v{}", self.0)
        }
    }
}

/// Identifier of a registered method (one per object instance and name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodId(u64);

impl MethodId {
    /// Create a MethodId from its raw value
    pub const fn new(value: u64) -> Self {
        MethodId(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Identifier of one in-flight invocation tracked by a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Create a WorkerId from its raw value
    pub const fn new(value: u64) -> Self {
        WorkerId(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Reentrance/cache token carried by a nested snapshot
///
/// A snapshot with a token shares the timestamp of its outer snapshot and
/// commits onto the outer timeline instead of issuing a new sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(u64);

impl Token {
    /// Create a token from its raw value
    pub const fn new(value: u64) -> Self {
        Token(value)
    }

    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}
