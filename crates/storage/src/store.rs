//! Revision arena
//!
//! Replaces language-level back-references with an arena keyed by
//! [`RevisionId`]. Every revision counts the revisions whose `prev` points at
//! it, so reclamation is an explicit operation: a revision that is neither a
//! head nor linked from any other revision is unreachable from every future
//! read and is removed.
//!
//! # Design
//!
//! - FxHashMap arena: O(1) lookups, fast non-crypto hash
//! - Heads live in [`ObjectHolder`]s, one per object
//! - The `NIL` sentinel is stored at `RevisionId::NIL` and never removed
//!
//! # Visibility
//!
//! [`RevisionStore::visible`] walks from the head through `prev` links and
//! returns the newest published revision whose timestamp does not exceed the
//! reader's timestamp.

use crate::revision::{ObjectHolder, Revision};
use revo_core::{ObjectId, RevisionId, SnapshotId, Timestamp};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// Arena of object holders and their revisions
pub struct RevisionStore {
    holders: FxHashMap<ObjectId, ObjectHolder>,
    revisions: FxHashMap<RevisionId, Revision>,
    next_object: u64,
    next_revision: u64,
}

impl RevisionStore {
    /// Create an empty store containing only the `NIL` sentinel
    pub fn new() -> Self {
        let mut revisions = FxHashMap::default();
        revisions.insert(RevisionId::NIL, Revision::nil());
        Self {
            holders: FxHashMap::default(),
            revisions,
            next_object: 1,
            next_revision: 1,
        }
    }

    /// Register a new object identity with no state (head is `NIL`)
    pub fn create_object(&mut self, hint: impl Into<String>) -> ObjectId {
        let id = ObjectId::new(self.next_object);
        self.next_object += 1;
        self.holders.insert(id, ObjectHolder::new(id, hint.into()));
        id
    }

    /// Get an object holder
    #[inline]
    pub fn holder(&self, object: ObjectId) -> Option<&ObjectHolder> {
        self.holders.get(&object)
    }

    /// Check if an object identity exists
    #[inline]
    pub fn contains(&self, object: ObjectId) -> bool {
        self.holders.contains_key(&object)
    }

    /// Get a revision
    #[inline]
    pub fn revision(&self, id: RevisionId) -> Option<&Revision> {
        self.revisions.get(&id)
    }

    /// Get a revision for mutation
    #[inline]
    pub fn revision_mut(&mut self, id: RevisionId) -> Option<&mut Revision> {
        if id.is_nil() {
            return None;
        }
        self.revisions.get_mut(&id)
    }

    /// The `NIL` sentinel
    pub fn nil(&self) -> &Revision {
        &self.revisions[&RevisionId::NIL]
    }

    /// Head revision of an object (`NIL` for unknown objects)
    #[inline]
    pub fn head(&self, object: ObjectId) -> RevisionId {
        self.holders
            .get(&object)
            .map(|h| h.head)
            .unwrap_or(RevisionId::NIL)
    }

    /// Newest published revision visible at `stamp`
    ///
    /// Returns `RevisionId::NIL` if the walk reaches the root sentinel, i.e.
    /// the object did not exist at that point in time.
    pub fn visible(&self, object: ObjectId, stamp: Timestamp) -> RevisionId {
        let mut current = self.head(object);
        while !current.is_nil() {
            match self.revisions.get(&current) {
                Some(r) if r.stamp > stamp => current = r.prev,
                Some(_) => return current,
                None => return RevisionId::NIL,
            }
        }
        RevisionId::NIL
    }

    /// Create a provisional revision for `snapshot` based on `base`
    ///
    /// The new revision copies the base's members, links back to it, and
    /// becomes the holder's `changing` revision.
    pub fn fork(
        &mut self,
        object: ObjectId,
        base: RevisionId,
        snapshot: SnapshotId,
    ) -> Option<RevisionId> {
        if !self.holders.contains_key(&object) {
            return None;
        }
        let (data, disposed) = match self.revisions.get(&base) {
            Some(b) if !base.is_nil() => (b.data.clone(), b.disposed),
            _ => (BTreeMap::new(), false),
        };
        let id = RevisionId::new(self.next_revision);
        self.next_revision += 1;
        self.revisions.insert(
            id,
            Revision {
                id,
                object,
                snapshot,
                stamp: Timestamp::UNDEFINED,
                prev: base,
                data,
                disposed,
                changes: BTreeSet::new(),
                conflicts: BTreeMap::new(),
                links: 0,
            },
        );
        self.acquire_link(base);
        if let Some(h) = self.holders.get_mut(&object) {
            h.changing = Some(id);
            h.writers += 1;
        }
        Some(id)
    }

    /// Move a revision's `prev` link to `new_prev`
    pub fn relink(&mut self, id: RevisionId, new_prev: RevisionId) {
        let old_prev = match self.revision_mut(id) {
            Some(r) if r.prev != new_prev => std::mem::replace(&mut r.prev, new_prev),
            _ => return,
        };
        self.acquire_link(new_prev);
        self.release_link(old_prev);
        self.reclaim(old_prev);
    }

    /// Make a revision the head of its object, stamped with `stamp`
    pub fn publish(&mut self, id: RevisionId, stamp: Timestamp) {
        let object = match self.revision_mut(id) {
            Some(r) => {
                r.stamp = stamp;
                r.object
            }
            None => return,
        };
        let old_head = match self.holders.get_mut(&object) {
            Some(h) => std::mem::replace(&mut h.head, id),
            None => return,
        };
        self.reclaim(old_head);
    }

    /// A snapshot writing `object` has completed
    pub fn release_writer(&mut self, object: ObjectId) {
        if let Some(h) = self.holders.get_mut(&object) {
            h.writers = h.writers.saturating_sub(1);
            if h.writers == 0 {
                h.changing = None;
            }
        }
    }

    /// Remove a provisional revision whose snapshot failed
    pub fn discard(&mut self, id: RevisionId) {
        if id.is_nil() {
            return;
        }
        if let Some(r) = self.revisions.remove(&id) {
            if let Some(h) = self.holders.get_mut(&r.object) {
                if h.changing == Some(id) {
                    h.changing = None;
                }
            }
            self.release_link(r.prev);
            self.reclaim(r.prev);
        }
    }

    /// Cut a revision's history and reclaim whatever became unreachable
    ///
    /// Returns the number of revisions removed from the arena.
    pub fn unlink(&mut self, id: RevisionId) -> usize {
        let prev = match self.revision_mut(id) {
            Some(r) => std::mem::replace(&mut r.prev, RevisionId::NIL),
            None => return 0,
        };
        self.release_link(prev);
        self.reclaim(prev)
    }

    /// Remove an object identity and its unreachable history
    pub fn remove_object(&mut self, object: ObjectId) -> bool {
        match self.holders.remove(&object) {
            Some(h) => {
                self.reclaim(h.head);
                true
            }
            None => false,
        }
    }

    /// Number of object identities
    pub fn object_count(&self) -> usize {
        self.holders.len()
    }

    /// Number of revisions in the arena (excluding `NIL`)
    pub fn revision_count(&self) -> usize {
        self.revisions.len() - 1
    }

    /// Length of the committed history reachable from an object's head
    pub fn chain_len(&self, object: ObjectId) -> usize {
        let mut len = 0;
        let mut current = self.head(object);
        while let Some(r) = self.revisions.get(&current).filter(|_| !current.is_nil()) {
            len += 1;
            current = r.prev;
        }
        len
    }

    fn acquire_link(&mut self, id: RevisionId) {
        if let Some(r) = self.revision_mut(id) {
            r.links += 1;
        }
    }

    fn release_link(&mut self, id: RevisionId) {
        if let Some(r) = self.revision_mut(id) {
            r.links = r.links.saturating_sub(1);
        }
    }

    fn is_head(&self, id: RevisionId) -> bool {
        self.revisions
            .get(&id)
            .and_then(|r| self.holders.get(&r.object))
            .map(|h| h.head == id)
            .unwrap_or(false)
    }

    /// Remove `id` and its predecessors while they are unreachable
    fn reclaim(&mut self, id: RevisionId) -> usize {
        let mut removed = 0;
        let mut current = id;
        while !current.is_nil() {
            let prev = match self.revisions.get(&current) {
                Some(r) if r.links == 0 && r.is_published() && !self.is_head(current) => r.prev,
                _ => break,
            };
            self.revisions.remove(&current);
            removed += 1;
            tracing::trace!(revision = current.as_u64(), "revision reclaimed");
            self.release_link(prev);
            current = prev;
        }
        removed
    }
}

impl Default for RevisionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RevisionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionStore")
            .field("object_count", &self.object_count())
            .field("revision_count", &self.revision_count())
            .finish()
    }
}
