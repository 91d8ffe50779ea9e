//! Snapshot: a transaction's private view and write-set
//!
//! A snapshot reads the revision store as of its timestamp and writes into
//! provisional revisions collected in its change-set. The
//! [`SnapshotManager`](crate::SnapshotManager) drives its lifecycle:
//!
//! ```text
//! acquire ──► Running ──► Completed { committed } ──► collected
//! ```

use revo_core::{ObjectId, RevisionId, SnapshotId, SnapshotOptions, Timestamp, Token, TraceOptions};
use std::collections::BTreeMap;

/// Lifecycle state of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Accepting reads and writes
    Running,
    /// Completed; `committed` is false when the change-set was discarded
    Completed {
        /// Whether the change-set was published
        committed: bool,
    },
}

/// A transaction's view of the object store
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) id: SnapshotId,
    pub(crate) hint: String,
    pub(crate) token: Option<Token>,
    pub(crate) trace: Option<TraceOptions>,
    pub(crate) stamp: Timestamp,
    /// Highest timestamp among revisions this snapshot superseded
    pub(crate) bumper: Timestamp,
    pub(crate) changeset: BTreeMap<ObjectId, RevisionId>,
    pub(crate) parent: Option<SnapshotId>,
    pub(crate) read_only: bool,
    pub(crate) canceled: Option<String>,
    pub(crate) status: SnapshotStatus,
}

impl Snapshot {
    pub(crate) fn new(
        id: SnapshotId,
        options: &SnapshotOptions,
        stamp: Timestamp,
        parent: Option<SnapshotId>,
        read_only: bool,
    ) -> Self {
        Self {
            id,
            hint: options.hint_or_default().to_string(),
            token: options.token,
            trace: options.trace,
            stamp,
            bumper: Timestamp::INITIAL_BUMPER,
            changeset: BTreeMap::new(),
            parent,
            read_only,
            canceled: None,
            status: SnapshotStatus::Running,
        }
    }

    /// Snapshot id
    #[inline]
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Diagnostic name
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Reentrance/cache token
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Logical timestamp: the read point while running, the publish point after commit
    #[inline]
    pub fn stamp(&self) -> Timestamp {
        self.stamp
    }

    /// Highest superseded timestamp seen so far
    pub fn bumper(&self) -> Timestamp {
        self.bumper
    }

    /// Outer snapshot whose change-set this one reads through
    pub fn parent(&self) -> Option<SnapshotId> {
        self.parent
    }

    /// Whether writes are rejected as side effects
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Provisional revisions by object
    pub fn changeset(&self) -> &BTreeMap<ObjectId, RevisionId> {
        &self.changeset
    }

    /// Current lifecycle state
    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    /// Whether the snapshot still accepts reads and writes
    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == SnapshotStatus::Running
    }

    /// Whether the snapshot has completed
    #[inline]
    pub fn is_completed(&self) -> bool {
        !self.is_running()
    }

    /// Cancellation reason, if the snapshot was canceled
    pub fn canceled(&self) -> Option<&str> {
        self.canceled.as_deref()
    }

    /// Whether the snapshot was flagged canceled
    pub fn is_canceled(&self) -> bool {
        self.canceled.is_some()
    }

    /// Whether trace switches elevate transaction events
    pub fn traces_transactions(&self) -> bool {
        self.trace.map(|t| t.transactions).unwrap_or(false)
    }

    /// Whether trace switches elevate change events
    pub fn traces_changes(&self) -> bool {
        self.trace.map(|t| t.changes).unwrap_or(false)
    }

    /// Whether trace switches elevate collection events
    pub fn traces_gc(&self) -> bool {
        self.trace.map(|t| t.gc).unwrap_or(false)
    }

    pub(crate) fn bump_by(&mut self, stamp: Timestamp) {
        if stamp > self.bumper && !stamp.is_undefined() {
            self.bumper = stamp;
        }
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hint, self.id)
    }
}
