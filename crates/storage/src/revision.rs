//! Revision and ObjectHolder - the unit of optimistic concurrency
//!
//! A [`Revision`] is one version of an object's members. It is provisional
//! while its owning snapshot is in flight and sealed once that snapshot has
//! completed; sealed revisions are never mutated except for the `prev` link,
//! which garbage collection cuts.
//!
//! An [`ObjectHolder`] is the stable identity of an object across all its
//! revisions.

use revo_core::{Member, ObjectId, RevisionId, SnapshotId, Timestamp, Value, DISPOSED};
use std::collections::{BTreeMap, BTreeSet};

/// One version of an object's members
#[derive(Debug, Clone)]
pub struct Revision {
    pub(crate) id: RevisionId,
    pub(crate) object: ObjectId,
    pub(crate) snapshot: SnapshotId,
    /// Final timestamp once published; undefined while provisional
    pub(crate) stamp: Timestamp,
    pub(crate) prev: RevisionId,
    pub(crate) data: BTreeMap<Member, Value>,
    pub(crate) disposed: bool,
    pub(crate) changes: BTreeSet<Member>,
    pub(crate) conflicts: BTreeMap<Member, RevisionId>,
    /// Number of revisions whose `prev` points here
    pub(crate) links: u32,
}

impl Revision {
    /// The root sentinel: "object does not exist"
    pub(crate) fn nil() -> Self {
        Self {
            id: RevisionId::NIL,
            object: ObjectId::new(0),
            snapshot: SnapshotId::NIL,
            stamp: Timestamp::ZERO,
            prev: RevisionId::NIL,
            data: BTreeMap::new(),
            disposed: false,
            changes: BTreeSet::new(),
            conflicts: BTreeMap::new(),
            links: 0,
        }
    }

    /// Arena key
    #[inline]
    pub fn id(&self) -> RevisionId {
        self.id
    }

    /// Object this revision belongs to
    #[inline]
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Snapshot that created this revision
    #[inline]
    pub fn snapshot(&self) -> SnapshotId {
        self.snapshot
    }

    /// Timestamp at which this revision was published
    #[inline]
    pub fn stamp(&self) -> Timestamp {
        self.stamp
    }

    /// Previous revision (`RevisionId::NIL` at the root or after unlinking)
    #[inline]
    pub fn prev(&self) -> RevisionId {
        self.prev
    }

    /// Whether this is the root sentinel
    #[inline]
    pub fn is_nil(&self) -> bool {
        self.id.is_nil()
    }

    /// Whether this revision marks the object disposed
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether the owning snapshot has published this revision
    #[inline]
    pub fn is_published(&self) -> bool {
        !self.stamp.is_undefined()
    }

    /// Value of a member, if present
    pub fn get(&self, member: &str) -> Option<&Value> {
        self.data.get(member)
    }

    /// All member values
    pub fn data(&self) -> &BTreeMap<Member, Value> {
        &self.data
    }

    /// Members changed relative to the previous revision
    pub fn changes(&self) -> &BTreeSet<Member> {
        &self.changes
    }

    /// Conflicting members and the competing revision for each
    pub fn conflicts(&self) -> &BTreeMap<Member, RevisionId> {
        &self.conflicts
    }

    /// Whether this revision changed the disposal state
    pub fn disposes(&self) -> bool {
        self.changes.contains(DISPOSED)
    }

    /// Set a member value and record it as changed
    ///
    /// Only provisional revisions may be written; the snapshot layer enforces
    /// this before calling.
    pub fn set(&mut self, member: Member, value: Value) {
        self.data.insert(member.clone(), value);
        self.changes.insert(member);
    }

    /// Set a member back to its value in the previous revision
    ///
    /// The member no longer counts as changed.
    pub fn restore(&mut self, member: Member, value: Value) {
        self.changes.remove(&member);
        self.data.insert(member, value);
    }

    /// Mark the object disposed in this revision
    pub fn mark_disposed(&mut self) {
        self.disposed = true;
        self.changes.insert(Member::from(DISPOSED));
    }

    /// Record a conflict with a competing revision
    pub fn record_conflict(&mut self, member: Member, theirs: RevisionId) {
        self.conflicts.insert(member, theirs);
    }

    /// Replace the member data after a merge
    pub fn replace_data(&mut self, data: BTreeMap<Member, Value>, disposed: bool) {
        self.data = data;
        self.disposed = disposed;
    }
}

/// Stable identity of a logical object
#[derive(Debug, Clone)]
pub struct ObjectHolder {
    pub(crate) id: ObjectId,
    pub(crate) hint: String,
    pub(crate) head: RevisionId,
    pub(crate) changing: Option<RevisionId>,
    pub(crate) writers: u32,
}

impl ObjectHolder {
    pub(crate) fn new(id: ObjectId, hint: String) -> Self {
        Self {
            id,
            hint,
            head: RevisionId::NIL,
            changing: None,
            writers: 0,
        }
    }

    /// Object identity
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Human-readable name
    #[inline]
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Latest committed revision
    #[inline]
    pub fn head(&self) -> RevisionId {
        self.head
    }

    /// Revision most recently forked by an in-flight snapshot
    #[inline]
    pub fn changing(&self) -> Option<RevisionId> {
        self.changing
    }

    /// Number of in-flight snapshots writing this object
    #[inline]
    pub fn writers(&self) -> u32 {
        self.writers
    }
}
