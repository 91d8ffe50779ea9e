//! Undo journal
//!
//! A bounded log of committed snapshots. Attach a journal to a transaction
//! through [`TransactionOptions::journal`](crate::TransactionOptions) and
//! each successful commit is remembered as a [`Patch`];
//! [`Engine::undo`](crate::Engine::undo) writes the old values back.

use parking_lot::Mutex;
use revo_concurrency::MemberChange;
use revo_core::Timestamp;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of patches kept
pub const DEFAULT_JOURNAL_CAPACITY: usize = 5;

/// Changes of one committed snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Hint of the committed snapshot
    pub hint: String,
    /// Commit timestamp
    pub stamp: Timestamp,
    /// `(object, member, old, new)` entries
    pub changes: Vec<MemberChange>,
}

#[derive(Debug)]
struct JournalInner {
    capacity: usize,
    patches: VecDeque<Patch>,
}

/// Bounded undo log, shared by clones
#[derive(Debug, Clone)]
pub struct UndoJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl UndoJournal {
    /// Create a journal keeping at most `capacity` patches
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(JournalInner {
                capacity: capacity.max(1),
                patches: VecDeque::new(),
            })),
        }
    }

    /// Record a patch, evicting the oldest when full
    pub fn remember(&self, patch: Patch) {
        let mut inner = self.inner.lock();
        if inner.patches.len() == inner.capacity {
            inner.patches.pop_front();
        }
        inner.patches.push_back(patch);
    }

    /// Remove and return the newest `count` patches, newest first
    pub(crate) fn take_newest(&self, count: usize) -> Vec<Patch> {
        let mut inner = self.inner.lock();
        let n = count.min(inner.patches.len());
        let mut taken = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(p) = inner.patches.pop_back() {
                taken.push(p);
            }
        }
        taken
    }

    /// Whether there is anything to undo
    pub fn can_undo(&self) -> bool {
        !self.inner.lock().patches.is_empty()
    }

    /// Number of remembered patches
    pub fn len(&self) -> usize {
        self.inner.lock().patches.len()
    }

    /// Whether the journal is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of patches kept
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Hints of remembered patches, oldest first
    pub fn hints(&self) -> Vec<String> {
        self.inner
            .lock()
            .patches
            .iter()
            .map(|p| p.hint.clone())
            .collect()
    }
}

impl Default for UndoJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}
