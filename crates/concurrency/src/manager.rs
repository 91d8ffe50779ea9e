//! Snapshot manager for coordinating commit operations
//!
//! Provides atomic commit by orchestrating:
//! 1. Rebase (merge onto moved heads, record conflicts)
//! 2. Timestamp finalization
//! 3. Publication of new heads (visibility)
//! 4. History collection in completion order
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. rebase() - merge every revision whose base is no longer the head
//! 2. finalize stamp:
//!      token-carrying      -> bumper (downgrade to the outer timeline)
//!      touched prior state -> next global sequence number
//!      only new objects    -> bumper + 1
//! 3. publish revisions, release writers
//! 4. collect() - unlink history no pending snapshot can read any more
//! ```
//!
//! Conflicts never abort a commit; they are reported in the [`Completion`].
//!
//! ## Timeline
//!
//! Sequence numbers start at 101. A new top-level snapshot reads at the
//! latest issued sequence number; a nested snapshot reads at its parent's
//! timestamp and sees the parent's provisional revisions.

use crate::merge::merge;
use crate::snapshot::{Snapshot, SnapshotStatus};
use revo_core::{
    Error, Member, ObjectId, Result, RevisionId, SnapshotId, SnapshotOptions, Timestamp, Value,
    DISPOSED,
};
use revo_storage::RevisionStore;
use rustc_hash::FxHashMap;

/// First snapshot id and first global sequence number
const FIRST_SEQUENCE: u64 = 101;

/// One member changed by a committed snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct MemberChange {
    /// Changed object
    pub object: ObjectId,
    /// Changed member (`DISPOSED` for disposal)
    pub member: Member,
    /// Value before the commit
    pub old: Option<Value>,
    /// Value after the commit
    pub new: Option<Value>,
}

impl MemberChange {
    /// Whether this change disposed the object
    pub fn is_disposal(&self) -> bool {
        self.member.as_ref() == DISPOSED
    }
}

/// A concurrent update overwritten during rebase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Object both snapshots changed
    pub object: ObjectId,
    /// Conflicting member
    pub member: Member,
    /// Revision whose value was overwritten
    pub theirs: RevisionId,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.object, self.member)
    }
}

/// Outcome of completing a snapshot
#[derive(Debug, Clone, Default)]
pub struct Completion {
    /// Final timestamp (the read timestamp if nothing was written)
    pub stamp: Timestamp,
    /// Whether the change-set was published
    pub committed: bool,
    /// Members changed by the snapshot, in object order
    pub changes: Vec<MemberChange>,
    /// Conflicts recorded during rebase
    pub conflicts: Vec<Conflict>,
    /// Revisions reclaimed by the collection this completion triggered
    pub reclaimed: usize,
}

/// Manager statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Snapshots not yet collected
    pub pending: usize,
    /// Snapshots still running
    pub running: usize,
    /// Latest issued global sequence number
    pub stamp: Timestamp,
}

/// Manages snapshot lifecycle and atomic commits
///
/// SnapshotManager owns every snapshot from acquire to collection. It is not
/// synchronized itself: callers hold the engine lock around each operation,
/// which makes acquire, rebase, complete and collect critical sections.
pub struct SnapshotManager {
    snapshots: FxHashMap<SnapshotId, Snapshot>,
    /// Acquired, not yet collected; sorted by timestamp at collection
    pending: Vec<SnapshotId>,
    oldest: Option<SnapshotId>,
    next_id: u64,
    /// Latest issued global sequence number
    stamp_gen: Timestamp,
}

impl SnapshotManager {
    /// Create a new snapshot manager
    pub fn new() -> Self {
        SnapshotManager {
            snapshots: FxHashMap::default(),
            pending: Vec::new(),
            oldest: None,
            next_id: FIRST_SEQUENCE,
            stamp_gen: Timestamp::new(FIRST_SEQUENCE),
        }
    }

    /// Latest issued global sequence number
    pub fn stamp(&self) -> Timestamp {
        self.stamp_gen
    }

    /// Get a snapshot that has not been collected yet
    pub fn snapshot(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.get(&id)
    }

    /// Oldest pending snapshot
    pub fn oldest(&self) -> Option<SnapshotId> {
        self.oldest
    }

    /// Number of snapshots not yet collected
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Current statistics
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            pending: self.pending.len(),
            running: self.snapshots.values().filter(|s| s.is_running()).count(),
            stamp: self.stamp_gen,
        }
    }

    /// Start a snapshot
    ///
    /// With a `parent`, the snapshot shares the parent's timestamp and reads
    /// through its provisional revisions. A `read_only` snapshot rejects
    /// every write as a side effect.
    pub fn acquire(
        &mut self,
        options: &SnapshotOptions,
        parent: Option<SnapshotId>,
        read_only: bool,
    ) -> SnapshotId {
        let id = SnapshotId::new(self.next_id);
        self.next_id += 1;
        let stamp = parent
            .and_then(|p| self.snapshots.get(&p))
            .map(|p| p.stamp)
            .filter(|s| !s.is_undefined())
            .unwrap_or(self.stamp_gen);
        let snapshot = Snapshot::new(id, options, stamp, parent, read_only);
        if snapshot.traces_transactions() {
            tracing::info!(snapshot = %snapshot, stamp = %stamp, "snapshot acquired");
        } else {
            tracing::debug!(snapshot = %snapshot, stamp = %stamp, "snapshot acquired");
        }
        self.snapshots.insert(id, snapshot);
        self.pending.push(id);
        if self.oldest.is_none() {
            self.oldest = Some(id);
        }
        id
    }

    fn running(&self, id: SnapshotId) -> Result<&Snapshot> {
        match self.snapshots.get(&id) {
            Some(s) if s.is_running() => Ok(s),
            Some(s) => Err(Error::misuse(format!("transaction {} is already completed", s))),
            None => Err(Error::misuse(format!("transaction {} is already completed", id))),
        }
    }

    /// Revision of `object` visible to snapshot `id`
    ///
    /// Provisional revisions of the snapshot and its parents take precedence
    /// over committed history. Fails with `NotFound` when the object did not
    /// exist at the snapshot's timestamp or is disposed.
    pub fn readable(
        &self,
        store: &RevisionStore,
        id: SnapshotId,
        object: ObjectId,
    ) -> Result<RevisionId> {
        let snapshot = self.running(id)?;
        let mut current = Some(snapshot);
        let mut found = None;
        while let Some(s) = current {
            if let Some(r) = s.changeset.get(&object) {
                found = Some(*r);
                break;
            }
            current = s.parent.and_then(|p| self.snapshots.get(&p));
        }
        let r = found.unwrap_or_else(|| store.visible(object, snapshot.stamp));
        match store.revision(r) {
            Some(rev) if !rev.is_nil() && !rev.is_disposed() => Ok(r),
            _ => Err(Error::NotFound {
                object,
                stamp: snapshot.stamp,
                hint: snapshot.hint.clone(),
            }),
        }
    }

    /// Private revision of `object` for snapshot `id`, forking one if needed
    ///
    /// `member` names the member about to be written and only serves
    /// diagnostics.
    pub fn writable(
        &mut self,
        store: &mut RevisionStore,
        id: SnapshotId,
        object: ObjectId,
        member: &str,
    ) -> Result<RevisionId> {
        let snapshot = self.running(id)?;
        let hint = store
            .holder(object)
            .map(|h| h.hint().to_string())
            .unwrap_or_else(|| object.to_string());
        if snapshot.read_only {
            return Err(Error::misuse(format!(
                "{} should not have side effects (trying to change {}.{})",
                snapshot, hint, member
            )));
        }
        if let Some(r) = snapshot.changeset.get(&object).copied() {
            let disposed = store.revision(r).map(|r| r.is_disposed()).unwrap_or(false);
            if disposed && member != DISPOSED {
                return Err(Error::misuse(format!(
                    "{} can't change disposed object {}.{}",
                    snapshot, hint, member
                )));
            }
            return Ok(r);
        }
        if !store.contains(object) {
            return Err(Error::NotFound {
                object,
                stamp: snapshot.stamp,
                hint: snapshot.hint.clone(),
            });
        }
        let base = store.visible(object, snapshot.stamp);
        let base_stamp = match store.revision(base) {
            Some(b) if b.is_disposed() => {
                return Err(Error::misuse(format!(
                    "{} can't change disposed object {}.{}",
                    snapshot, hint, member
                )));
            }
            Some(b) if !b.is_nil() => Some(b.stamp()),
            _ => None,
        };
        let r = store
            .fork(object, base, id)
            .ok_or_else(|| Error::Internal(format!("fork of {} failed", object)))?;
        if let Some(s) = self.snapshots.get_mut(&id) {
            if let Some(stamp) = base_stamp {
                s.bump_by(stamp);
            }
            s.changeset.insert(object, r);
        }
        Ok(r)
    }

    /// Flag a running snapshot canceled
    ///
    /// The snapshot keeps running until its owner notices; completing it
    /// discards the change-set. Returns false if it is not running.
    pub fn cancel(&mut self, id: SnapshotId, reason: impl Into<String>) -> bool {
        match self.snapshots.get_mut(&id) {
            Some(s) if s.is_running() => {
                if s.canceled.is_none() {
                    s.canceled = Some(reason.into());
                    tracing::debug!(snapshot = %s, "snapshot canceled");
                }
                true
            }
            _ => false,
        }
    }

    /// Whether a snapshot has been flagged canceled
    pub fn is_canceled(&self, id: SnapshotId) -> bool {
        self.snapshots
            .get(&id)
            .map(|s| s.is_canceled())
            .unwrap_or(false)
    }

    /// Rebase, publish and collect
    ///
    /// A canceled snapshot is rolled back instead and fails with
    /// `Error::Canceled`.
    pub fn commit(&mut self, store: &mut RevisionStore, id: SnapshotId) -> Result<Completion> {
        let snapshot = self.running(id)?;
        if let Some(reason) = snapshot.canceled.clone() {
            self.rollback(store, id, &reason);
            return Err(Error::Canceled(reason));
        }

        let conflicts = self.rebase(store, id);
        let Some(snapshot) = self.snapshots.get_mut(&id) else {
            return Err(Error::Internal(format!("snapshot {} vanished", id)));
        };

        if !snapshot.changeset.is_empty() {
            snapshot.stamp = if snapshot.token.is_some() {
                snapshot.bumper
            } else if snapshot.bumper > Timestamp::INITIAL_BUMPER {
                self.stamp_gen = self.stamp_gen.next();
                self.stamp_gen
            } else {
                snapshot.bumper.next()
            };
        }
        let stamp = snapshot.stamp;
        snapshot.status = SnapshotStatus::Completed { committed: true };
        let changeset: Vec<(ObjectId, RevisionId)> =
            snapshot.changeset.iter().map(|(o, r)| (*o, *r)).collect();
        let traced = snapshot.traces_transactions();
        let label = snapshot.to_string();

        let mut changes = Vec::new();
        for (object, r) in changeset {
            if let Some(rev) = store.revision(r) {
                let prev = store.revision(rev.prev());
                for member in rev.changes() {
                    if member.as_ref() == DISPOSED {
                        changes.push(MemberChange {
                            object,
                            member: member.clone(),
                            old: None,
                            new: Some(Value::Bool(true)),
                        });
                        continue;
                    }
                    changes.push(MemberChange {
                        object,
                        member: member.clone(),
                        old: prev.and_then(|p| p.get(member)).cloned(),
                        new: rev.get(member).cloned(),
                    });
                }
            }
            store.release_writer(object);
            store.publish(r, stamp);
        }

        if traced {
            tracing::info!(snapshot = %label, stamp = %stamp, changes = changes.len(), "snapshot committed");
        } else {
            tracing::debug!(snapshot = %label, stamp = %stamp, changes = changes.len(), "snapshot committed");
        }

        let reclaimed = self.collect(store, id);
        Ok(Completion {
            stamp,
            committed: true,
            changes,
            conflicts,
            reclaimed,
        })
    }

    /// Discard the change-set and collect
    pub fn rollback(&mut self, store: &mut RevisionStore, id: SnapshotId, reason: &str) -> Completion {
        let Some(snapshot) = self.snapshots.get_mut(&id) else {
            return Completion::default();
        };
        if snapshot.is_completed() {
            return Completion {
                stamp: snapshot.stamp,
                ..Completion::default()
            };
        }
        snapshot.status = SnapshotStatus::Completed { committed: false };
        let stamp = snapshot.stamp;
        let revisions = std::mem::take(&mut snapshot.changeset);
        tracing::debug!(snapshot = %snapshot, reason = reason, "snapshot discarded");
        for (object, r) in revisions {
            store.release_writer(object);
            store.discard(r);
        }
        let reclaimed = self.collect(store, id);
        Completion {
            stamp,
            committed: false,
            reclaimed,
            ..Completion::default()
        }
    }

    /// Merge every revision whose base is no longer the head
    fn rebase(&mut self, store: &mut RevisionStore, id: SnapshotId) -> Vec<Conflict> {
        let Some(snapshot) = self.snapshots.get(&id) else {
            return Vec::new();
        };
        let label = snapshot.to_string();
        let traced = snapshot.traces_changes();
        let changeset: Vec<(ObjectId, RevisionId)> =
            snapshot.changeset.iter().map(|(o, r)| (*o, *r)).collect();

        let mut conflicts = Vec::new();
        for (object, r) in changeset {
            let head = store.head(object);
            let (merged, base) = match store.revision(r) {
                Some(ours) if ours.prev() != head => {
                    match (store.revision(ours.prev()), store.revision(head)) {
                        (Some(base), Some(theirs)) => (merge(ours, base, theirs), ours.prev()),
                        _ => continue,
                    }
                }
                _ => continue,
            };
            if traced {
                tracing::info!(snapshot = %label, object = %object, base = base.as_u64(), head = head.as_u64(), "revision merged");
            } else {
                tracing::debug!(snapshot = %label, object = %object, base = base.as_u64(), head = head.as_u64(), "revision merged");
            }
            if let Some(rev) = store.revision_mut(r) {
                rev.replace_data(merged.data, merged.disposed);
                for member in &merged.conflicts {
                    rev.record_conflict(member.clone(), head);
                }
            }
            store.relink(r, head);
            for member in merged.conflicts {
                tracing::warn!(snapshot = %label, object = %object, member = %member, "write conflict");
                conflicts.push(Conflict {
                    object,
                    member,
                    theirs: head,
                });
            }
        }
        conflicts
    }

    /// Unlink history that no pending snapshot can read any more
    ///
    /// Runs only when `completed` is the oldest pending snapshot: pending
    /// snapshots are ordered by timestamp and every completed snapshot at the
    /// front of that order is collected.
    fn collect(&mut self, store: &mut RevisionStore, completed: SnapshotId) -> usize {
        if self.oldest != Some(completed) {
            return 0;
        }
        let snapshots = &self.snapshots;
        self.pending.sort_by_key(|p| {
            snapshots
                .get(p)
                .map(|s| (s.stamp, s.id))
                .unwrap_or((Timestamp::ZERO, *p))
        });
        let count = self
            .pending
            .iter()
            .take_while(|p| snapshots.get(p).map(|s| s.is_completed()).unwrap_or(true))
            .count();

        let mut reclaimed = 0;
        let mut traced = false;
        for id in self.pending.drain(..count) {
            let Some(snapshot) = self.snapshots.remove(&id) else {
                continue;
            };
            traced |= snapshot.traces_gc();
            if snapshot.status != (SnapshotStatus::Completed { committed: true }) {
                continue;
            }
            for (object, r) in snapshot.changeset {
                let disposal_head = store.head(object) == r
                    && store.revision(r).map(|r| r.is_disposed()).unwrap_or(false);
                reclaimed += store.unlink(r);
                if disposal_head && store.remove_object(object) {
                    tracing::trace!(object = %object, "disposed object removed");
                }
            }
        }
        self.oldest = self.pending.first().copied();

        if traced {
            tracing::info!(collected = count, reclaimed = reclaimed, pending = self.pending.len(), "history collected");
        } else {
            tracing::trace!(collected = count, reclaimed = reclaimed, pending = self.pending.len(), "history collected");
        }
        reclaimed
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("pending", &self.pending.len())
            .field("oldest", &self.oldest)
            .field("stamp", &self.stamp_gen)
            .finish()
    }
}
