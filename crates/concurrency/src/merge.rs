//! Rebase merge and the conflict predicate
//!
//! When a snapshot's revision was forked from a revision that is no longer
//! the head, its changes are replayed on top of the current head:
//!
//! - head data is the base
//! - every member this snapshot changed overwrites the head's value
//! - a member conflicts when the head's value differs from the value the
//!   snapshot originally forked from
//! - disposal mismatch between the head and this snapshot always conflicts
//!
//! The snapshot's value wins in every case. Conflicts are informational.

use revo_core::{Member, Value, DISPOSED};
use revo_storage::Revision;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Result of replaying a revision's changes onto a newer head
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    /// Merged member values
    pub data: BTreeMap<Member, Value>,
    /// Merged disposal state
    pub disposed: bool,
    /// Members whose concurrent update was overwritten
    pub conflicts: SmallVec<[Member; 4]>,
}

/// Whether two versions of a member disagree
///
/// Structural inequality of the head value against the base value.
#[inline]
pub fn is_conflicting(theirs: Option<&Value>, base: Option<&Value>) -> bool {
    theirs != base
}

/// Replay `ours` (forked from `base`) onto `head`
pub fn merge(ours: &Revision, base: &Revision, head: &Revision) -> Merge {
    let mut data = head.data().clone();
    let mut disposed = head.is_disposed();
    let mut conflicts = SmallVec::new();

    for member in ours.changes() {
        if member.as_ref() == DISPOSED {
            if !head.is_disposed() {
                conflicts.push(member.clone());
            }
            disposed = true;
            continue;
        }
        if head.is_disposed() {
            conflicts.push(member.clone());
        } else if is_conflicting(head.get(member), base.get(member)) {
            conflicts.push(member.clone());
        }
        match ours.get(member) {
            Some(v) => {
                data.insert(member.clone(), v.clone());
            }
            None => {
                data.remove(member);
            }
        }
    }

    Merge {
        data,
        disposed,
        conflicts,
    }
}
