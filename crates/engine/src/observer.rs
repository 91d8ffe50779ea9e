//! Dependency tracker / observer graph
//!
//! An [`Observer`] records one invocation of a cached method or reaction:
//! the `(object, member)` pairs it read, the observers it called, and its
//! last result. Committed writes mark observers of the written members
//! stale; staleness cascades to every observer that consumed a stale
//! observer's result.
//!
//! # Lifecycle
//!
//! ```text
//! begin ──► Computing ──► finish ──► UpToDate ──► invalidate ──► Stale
//!                │                                      ▲
//!                └── invalidated while computing ───────┘
//! ```
//!
//! Only one observer per method is current; finishing a new one replaces
//! the previous.

use revo_core::{Kind, Member, MethodId, ObjectId, Result, Timestamp, Value};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Identity of one observer (one recorded invocation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Get the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Freshness of an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObserverStatus {
    /// Body running; `invalidated` is set by commits landing meanwhile
    Computing { invalidated: bool },
    /// Result reflects current committed state
    UpToDate,
    /// Result is outdated
    Stale,
}

/// Record of one cached or reactive invocation
#[derive(Debug, Clone)]
pub(crate) struct Observer {
    pub(crate) method: MethodId,
    pub(crate) owner: ObjectId,
    pub(crate) kind: Kind,
    pub(crate) args: Vec<Value>,
    /// Strongly observed members and the value seen
    pub(crate) observed: FxHashMap<(ObjectId, Member), Option<Value>>,
    /// Observers whose results this one consumed
    pub(crate) upstream: SmallVec<[ObserverId; 4]>,
    pub(crate) result: Option<Result<Value>>,
    pub(crate) status: ObserverStatus,
    /// Read provisional revisions of an enclosing transaction
    pub(crate) provisional: bool,
    pub(crate) stamp: Timestamp,
}

impl Observer {
    pub(crate) fn is_up_to_date(&self) -> bool {
        self.status == ObserverStatus::UpToDate
    }
}

/// Observers and their subscriptions
#[derive(Debug, Default)]
pub(crate) struct ObserverGraph {
    observers: FxHashMap<ObserverId, Observer>,
    subscribers: FxHashMap<ObjectId, FxHashMap<Member, FxHashSet<ObserverId>>>,
    /// upstream -> observers that consumed its result
    dependents: FxHashMap<ObserverId, FxHashSet<ObserverId>>,
    current: FxHashMap<MethodId, ObserverId>,
    next_id: u64,
}

impl ObserverGraph {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn get(&self, id: ObserverId) -> Option<&Observer> {
        self.observers.get(&id)
    }

    /// Current observer of a method
    pub(crate) fn current(&self, method: MethodId) -> Option<(ObserverId, &Observer)> {
        let id = *self.current.get(&method)?;
        self.observers.get(&id).map(|o| (id, o))
    }

    /// Start recording an invocation
    pub(crate) fn begin(
        &mut self,
        method: MethodId,
        owner: ObjectId,
        kind: Kind,
        args: Vec<Value>,
        stamp: Timestamp,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.insert(
            id,
            Observer {
                method,
                owner,
                kind,
                args,
                observed: FxHashMap::default(),
                upstream: SmallVec::new(),
                result: None,
                status: ObserverStatus::Computing { invalidated: false },
                provisional: false,
                stamp,
            },
        );
        id
    }

    /// Record a strong read
    pub(crate) fn subscribe(
        &mut self,
        id: ObserverId,
        object: ObjectId,
        member: Member,
        seen: Option<Value>,
    ) {
        let Some(o) = self.observers.get_mut(&id) else {
            return;
        };
        if !matches!(o.status, ObserverStatus::Computing { .. }) {
            return;
        }
        o.observed.entry((object, member.clone())).or_insert(seen);
        self.subscribers
            .entry(object)
            .or_default()
            .entry(member)
            .or_default()
            .insert(id);
    }

    /// Record that `downstream` consumed the result of `upstream`
    pub(crate) fn depend(&mut self, downstream: ObserverId, upstream: ObserverId) {
        if downstream == upstream {
            return;
        }
        let Some(o) = self.observers.get_mut(&downstream) else {
            return;
        };
        if !o.upstream.contains(&upstream) {
            o.upstream.push(upstream);
        }
        self.dependents.entry(upstream).or_default().insert(downstream);
    }

    pub(crate) fn mark_provisional(&mut self, id: ObserverId) {
        if let Some(o) = self.observers.get_mut(&id) {
            o.provisional = true;
        }
    }

    /// Forget a read (the observer's own snapshot wrote the member)
    pub(crate) fn unobserve(&mut self, id: ObserverId, object: ObjectId, member: &Member) {
        if let Some(o) = self.observers.get_mut(&id) {
            o.observed.remove(&(object, member.clone()));
        }
        if let Some(members) = self.subscribers.get_mut(&object) {
            if let Some(set) = members.get_mut(member) {
                set.remove(&id);
            }
        }
    }

    /// Observers of one member, except `except`
    pub(crate) fn invalidate_member(
        &mut self,
        object: ObjectId,
        member: &str,
        except: Option<ObserverId>,
    ) -> Vec<ObserverId> {
        let targets: Vec<ObserverId> = self
            .subscribers
            .get(&object)
            .and_then(|m| m.get(member))
            .map(|s| s.iter().copied().filter(|id| Some(*id) != except).collect())
            .unwrap_or_default();
        self.invalidate_all(targets)
    }

    /// Observers of any member of an object
    pub(crate) fn invalidate_object(
        &mut self,
        object: ObjectId,
        except: Option<ObserverId>,
    ) -> Vec<ObserverId> {
        let targets: Vec<ObserverId> = self
            .subscribers
            .get(&object)
            .map(|m| {
                m.values()
                    .flat_map(|s| s.iter().copied())
                    .filter(|id| Some(*id) != except)
                    .collect()
            })
            .unwrap_or_default();
        self.invalidate_all(targets)
    }

    /// Mark an observer stale and cascade to its dependents
    ///
    /// Returns every reaction that turned stale.
    pub(crate) fn invalidate(&mut self, id: ObserverId) -> Vec<ObserverId> {
        self.invalidate_all(vec![id])
    }

    fn invalidate_all(&mut self, mut work: Vec<ObserverId>) -> Vec<ObserverId> {
        let mut reactions = Vec::new();
        let mut seen = FxHashSet::default();
        while let Some(id) = work.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(o) = self.observers.get_mut(&id) else {
                continue;
            };
            match o.status {
                ObserverStatus::UpToDate => {
                    o.status = ObserverStatus::Stale;
                    if o.kind == Kind::Reaction {
                        reactions.push(id);
                    }
                }
                ObserverStatus::Computing { .. } => {
                    o.status = ObserverStatus::Computing { invalidated: true };
                }
                ObserverStatus::Stale => continue,
            }
            if let Some(ds) = self.dependents.get(&id) {
                work.extend(ds.iter().copied());
            }
        }
        reactions
    }

    /// Store the result and make the observer current for its method
    ///
    /// `outdated` marks the observer stale right away. The replaced observer
    /// is removed; reactions that consumed its result are returned stale.
    pub(crate) fn finish(
        &mut self,
        id: ObserverId,
        result: Result<Value>,
        outdated: bool,
    ) -> Vec<ObserverId> {
        let Some(o) = self.observers.get_mut(&id) else {
            return Vec::new();
        };
        let invalidated = matches!(o.status, ObserverStatus::Computing { invalidated: true });
        o.status = if invalidated || outdated {
            ObserverStatus::Stale
        } else {
            ObserverStatus::UpToDate
        };
        o.result = Some(result);
        let method = o.method;

        let mut stale = Vec::new();
        if let Some(previous) = self.current.insert(method, id) {
            if previous != id {
                let downstream: Vec<ObserverId> = self
                    .dependents
                    .get(&previous)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                for d in downstream {
                    let computing = self
                        .observers
                        .get(&d)
                        .map(|o| matches!(o.status, ObserverStatus::Computing { .. }))
                        .unwrap_or(true);
                    if !computing {
                        stale.extend(self.invalidate(d));
                    }
                    if let Some(o) = self.observers.get_mut(&d) {
                        o.upstream.retain(|up| *up != previous);
                    }
                    self.depend(d, id);
                }
                self.remove(previous);
            }
        }
        stale
    }

    /// Drop an observer that must not be memoized
    pub(crate) fn discard(&mut self, id: ObserverId) {
        if self.current.get(&self.method_of(id)) != Some(&id) {
            self.remove(id);
        }
    }

    fn method_of(&self, id: ObserverId) -> MethodId {
        self.observers
            .get(&id)
            .map(|o| o.method)
            .unwrap_or(MethodId::new(0))
    }

    /// Remove an observer and all its edges
    pub(crate) fn remove(&mut self, id: ObserverId) {
        let Some(o) = self.observers.remove(&id) else {
            return;
        };
        for (object, member) in o.observed.keys() {
            if let Some(members) = self.subscribers.get_mut(object) {
                if let Some(set) = members.get_mut(member) {
                    set.remove(&id);
                    if set.is_empty() {
                        members.remove(member);
                    }
                }
                if members.is_empty() {
                    self.subscribers.remove(object);
                }
            }
        }
        for up in &o.upstream {
            if let Some(ds) = self.dependents.get_mut(up) {
                ds.remove(&id);
            }
        }
        self.dependents.remove(&id);
        if self.current.get(&o.method) == Some(&id) {
            self.current.remove(&o.method);
        }
    }

    /// Remove every observer owned by an object
    pub(crate) fn remove_owned(&mut self, owner: ObjectId) -> usize {
        let ids: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, o)| o.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }
}
