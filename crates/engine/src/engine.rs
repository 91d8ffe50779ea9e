//! Engine: the host entry point
//!
//! The [`Engine`] owns all state: the revision store, the snapshot manager,
//! the observer graph, registered methods, in-flight invocations, monitors
//! and the reaction queue. It is a cheap cloneable handle; every clone
//! refers to the same state.
//!
//! # Locking
//!
//! One `parking_lot::Mutex` guards the state. It is held for each
//! individual acquire/read/write/commit step and never while user code
//! runs, so method bodies can freely call back into the engine.
//!
//! # Example
//!
//! ```ignore
//! use revo::prelude::*;
//!
//! let engine = Engine::new();
//! let demo = engine.transaction("create", |tx| tx.create("Demo", [("title", "Demo")]))?;
//! assert_eq!(engine.read(demo, "title")?, Value::from("Demo"));
//! ```

use crate::config::EngineConfig;
use crate::controller::{Controller, ControllerOptions};
use crate::journal::{Patch, UndoJournal};
use crate::monitor::{Monitor, MonitorEntry};
use crate::observer::{ObserverGraph, ObserverId};
use crate::reentrance::{Admission, ReentranceTable};
use crate::registry::{MethodBody, MethodDef, MethodTable};
use crate::transaction::{Access, Transaction};
use parking_lot::{Mutex, MutexGuard};
use revo_concurrency::{Completion, Conflict, MonitorState, SnapshotManager};
use revo_core::{
    Error, Kind, Member, MemberOptions, MethodId, ObjectId, Reentrance, Result, SnapshotId,
    SnapshotOptions, Timestamp, Token, TraceOptions, Value, WorkerId,
};
use revo_storage::RevisionStore;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Options of a top-level transaction
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Snapshot options
    pub snapshot: SnapshotOptions,
    /// Journal remembering the committed changes
    pub journal: Option<UndoJournal>,
}

impl TransactionOptions {
    /// Options with a hint
    pub fn hint(hint: impl Into<String>) -> Self {
        SnapshotOptions::hint(hint).into()
    }

    /// Remember the commit in a journal
    pub fn with_journal(mut self, journal: &UndoJournal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    /// Set trace switches
    pub fn with_trace(mut self, trace: TraceOptions) -> Self {
        self.snapshot.trace = Some(trace);
        self
    }
}

impl From<SnapshotOptions> for TransactionOptions {
    fn from(snapshot: SnapshotOptions) -> Self {
        Self {
            snapshot,
            journal: None,
        }
    }
}

impl From<&str> for TransactionOptions {
    fn from(hint: &str) -> Self {
        Self::hint(hint)
    }
}

/// Result of a committed transaction
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    /// Value returned by the transaction body
    pub value: T,
    /// Commit timestamp
    pub timestamp: Timestamp,
    /// Concurrent updates overwritten by this commit
    pub conflicts: Vec<Conflict>,
}

impl<T> Outcome<T> {
    /// Whether the commit overwrote concurrent updates
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Live object identities
    pub objects: usize,
    /// Revisions held in the arena
    pub revisions: usize,
    /// Snapshots not yet collected
    pub pending_snapshots: usize,
    /// Snapshots still running
    pub running_snapshots: usize,
    /// Recorded observers
    pub observers: usize,
    /// Registered methods
    pub methods: usize,
    /// Reactions waiting to run
    pub queued_reactions: usize,
    /// Latest issued global sequence number
    pub stamp: Timestamp,
}

/// Mutable engine state, guarded by the engine lock
pub(crate) struct EngineState {
    pub(crate) store: RevisionStore,
    pub(crate) snapshots: SnapshotManager,
    pub(crate) observers: ObserverGraph,
    pub(crate) methods: MethodTable,
    pub(crate) reentrance: ReentranceTable,
    pub(crate) monitors: FxHashMap<String, MonitorEntry>,
    /// Objects instantiated by running snapshots
    pub(crate) instantiated: FxHashMap<SnapshotId, Vec<ObjectId>>,
    reactions: VecDeque<MethodId>,
    /// Asynchronous reactions waiting for an asynchronous drain
    deferred: VecDeque<MethodId>,
    queued: FxHashSet<MethodId>,
    draining: bool,
    draining_async: bool,
    next_worker: u64,
    last_summary: Instant,
}

impl EngineState {
    fn new() -> Self {
        Self {
            store: RevisionStore::new(),
            snapshots: SnapshotManager::new(),
            observers: ObserverGraph::new(),
            methods: MethodTable::new(),
            reentrance: ReentranceTable::new(),
            monitors: FxHashMap::default(),
            instantiated: FxHashMap::default(),
            reactions: VecDeque::new(),
            deferred: VecDeque::new(),
            queued: FxHashSet::default(),
            draining: false,
            draining_async: false,
            next_worker: 1,
            last_summary: Instant::now(),
        }
    }

    fn enqueue(&mut self, method: MethodId) {
        if self.queued.insert(method) {
            self.reactions.push_back(method);
        }
    }

    fn enqueue_observers(&mut self, stale: Vec<ObserverId>) {
        for id in stale {
            if let Some(method) = self.observers.get(id).map(|o| o.method) {
                self.enqueue(method);
            }
        }
    }

    fn object_hint(&self, object: ObjectId) -> String {
        self.store
            .holder(object)
            .map(|h| h.hint().to_string())
            .unwrap_or_else(|| object.to_string())
    }

    /// Whether any member an observer saw has since changed in committed state
    ///
    /// A consumed cached result that is no longer up to date counts as a
    /// change.
    fn is_outdated(&self, id: ObserverId) -> bool {
        let Some(o) = self.observers.get(id) else {
            return true;
        };
        let changed = o.observed.iter().any(|((object, member), seen)| {
            let head = self.store.head(*object);
            match self.store.revision(head) {
                Some(r) if !r.is_nil() && !r.is_disposed() => r.get(member) != seen.as_ref(),
                _ => true,
            }
        });
        changed
            || o.upstream.iter().any(|up| {
                self.observers
                    .get(*up)
                    .map(|u| !u.is_up_to_date())
                    .unwrap_or(true)
            })
    }

    /// Whether snapshot `snapshot` sees every input an observer computed from
    ///
    /// Checks the observer's reads and, recursively, those of the cached
    /// results it consumed.
    fn is_visible_to(&self, id: ObserverId, snapshot: SnapshotId) -> bool {
        let Some(o) = self.observers.get(id) else {
            return false;
        };
        let same = o.observed.iter().all(|((object, member), seen)| {
            match self.snapshots.readable(&self.store, snapshot, *object) {
                Ok(r) => self
                    .store
                    .revision(r)
                    .map(|rev| rev.get(member) == seen.as_ref())
                    .unwrap_or(false),
                Err(_) => false,
            }
        });
        same && o.upstream.iter().all(|up| self.is_visible_to(*up, snapshot))
    }
}

struct Shared {
    state: Mutex<EngineState>,
    config: EngineConfig,
}

/// The object-state engine
///
/// Create an engine using [`Engine::new`] or [`Engine::builder`].
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

/// How a method invocation may start
enum Start {
    Started(SnapshotId),
    Wait(watch::Receiver<bool>),
}

/// How a cached call proceeds
enum CachedStart {
    /// The memoized result is valid for the caller
    Hit(Result<Value>),
    /// Compute in this nested snapshot, recording into the observer
    Compute(Transaction, ObserverId),
}

/// Rolls a snapshot back if its owner never completes it
struct SnapshotGuard<'a> {
    engine: &'a Engine,
    snapshot: SnapshotId,
    frame: Option<ObserverId>,
    armed: bool,
}

impl<'a> SnapshotGuard<'a> {
    fn new(engine: &'a Engine, snapshot: SnapshotId) -> Self {
        Self {
            engine,
            snapshot,
            frame: None,
            armed: true,
        }
    }

    /// Also drop the observer recording into the snapshot
    fn with_frame(engine: &'a Engine, snapshot: SnapshotId, frame: ObserverId) -> Self {
        Self {
            frame: Some(frame),
            ..Self::new(engine, snapshot)
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SnapshotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.engine.abandon(self.snapshot, "abandoned");
            if let Some(frame) = self.frame {
                self.engine.lock().observers.discard(frame);
            }
        }
    }
}

/// Leaves the reentrance table and the monitor when an invocation ends
struct WorkerGuard<'a> {
    engine: &'a Engine,
    method: MethodId,
    worker: WorkerId,
    monitor: Option<String>,
}

impl WorkerGuard<'_> {
    fn enter_monitor(&mut self, def: &MethodDef) {
        if let Some(name) = &def.options.monitor {
            self.engine.monitor_enter(name, self.worker);
            self.monitor = Some(name.clone());
        }
    }
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.engine.lock().reentrance.leave(self.method, self.worker);
        if let Some(name) = &self.monitor {
            self.engine.monitor_leave(name, self.worker);
        }
    }
}

/// Clears a draining flag even if a reaction panics or the drain is dropped
struct DrainGuard<'a> {
    engine: &'a Engine,
    asynchronous: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.engine.lock();
        if self.asynchronous {
            state.draining_async = false;
        } else {
            state.draining = false;
        }
    }
}

impl Engine {
    /// Create an engine with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new()),
                config,
            }),
        }
    }

    /// Create a builder for engine configuration
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.shared.state.lock()
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let state = self.lock();
        let m = state.snapshots.stats();
        EngineStats {
            objects: state.store.object_count(),
            revisions: state.store.revision_count(),
            pending_snapshots: m.pending,
            running_snapshots: m.running,
            observers: state.observers.len(),
            methods: state.methods.len(),
            queued_reactions: state.reactions.len() + state.deferred.len(),
            stamp: m.stamp,
        }
    }

    fn effective(&self, options: &SnapshotOptions) -> SnapshotOptions {
        let mut options = options.clone();
        if options.trace.is_none() && self.config().trace != TraceOptions::default() {
            options.trace = Some(self.config().trace);
        }
        options
    }

    // ========================================================================
    // Snapshot lifecycle
    // ========================================================================

    fn start(
        &self,
        options: &SnapshotOptions,
        parent: Option<SnapshotId>,
        read_only: bool,
        access: Access,
    ) -> Transaction {
        let options = self.effective(options);
        let snapshot = self.lock().snapshots.acquire(&options, parent, read_only);
        Transaction {
            engine: self.clone(),
            snapshot,
            frame: None,
            access,
            hint: Arc::from(options.hint_or_default()),
        }
    }

    /// Commit a snapshot and propagate its changes
    fn complete(
        &self,
        tx: &Transaction,
        journal: Option<&UndoJournal>,
    ) -> Result<Completion> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let instantiated = state.instantiated.remove(&tx.snapshot).unwrap_or_default();
        let completion = match state.snapshots.commit(&mut state.store, tx.snapshot) {
            Ok(c) => c,
            Err(e) => {
                for object in instantiated {
                    state.methods.remove_object(object);
                }
                return Err(e);
            }
        };
        self.propagate(state, &completion, tx.frame);
        for object in instantiated {
            let reactions: Vec<MethodId> = state
                .methods
                .methods_of(object)
                .filter(|m| m.kind() == Kind::Reaction)
                .map(|m| m.id)
                .collect();
            for method in reactions {
                state.enqueue(method);
            }
        }
        self.maybe_summarize(state);
        drop(guard);

        if let Some(journal) = journal {
            if !completion.changes.is_empty() {
                journal.remember(Patch {
                    hint: tx.hint.to_string(),
                    stamp: completion.stamp,
                    changes: completion.changes.clone(),
                });
            }
        }
        Ok(completion)
    }

    /// Invalidate observers of everything a completion changed
    fn propagate(&self, state: &mut EngineState, completion: &Completion, except: Option<ObserverId>) {
        let verbose = self.config().trace.invalidations;
        for change in &completion.changes {
            let stale = if change.is_disposal() {
                state.observers.invalidate_object(change.object, except)
            } else {
                state
                    .observers
                    .invalidate_member(change.object, &change.member, except)
            };
            if !stale.is_empty() {
                if verbose {
                    tracing::info!(object = %change.object, member = %change.member, reactions = stale.len(), "observers invalidated");
                } else {
                    tracing::debug!(object = %change.object, member = %change.member, reactions = stale.len(), "observers invalidated");
                }
            }
            state.enqueue_observers(stale);
            if change.is_disposal() {
                let removed = state.observers.remove_owned(change.object);
                state.methods.remove_object(change.object);
                tracing::debug!(object = %change.object, observers = removed, "object disposed");
            }
        }
    }

    fn maybe_summarize(&self, state: &mut EngineState) {
        let Some(interval) = self.config().gc_summary_interval() else {
            return;
        };
        if state.last_summary.elapsed() < interval {
            return;
        }
        state.last_summary = Instant::now();
        let m = state.snapshots.stats();
        tracing::info!(
            objects = state.store.object_count(),
            revisions = state.store.revision_count(),
            pending = m.pending,
            stamp = %m.stamp,
            "history summary"
        );
    }

    /// Discard a snapshot's changes
    pub(crate) fn abandon(&self, snapshot: SnapshotId, reason: &str) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(objects) = state.instantiated.remove(&snapshot) {
            for object in objects {
                state.methods.remove_object(object);
            }
        }
        state.snapshots.rollback(&mut state.store, snapshot, reason);
    }

    fn finish<T>(
        &self,
        tx: &Transaction,
        result: Result<T>,
        journal: Option<&UndoJournal>,
    ) -> Result<Outcome<T>> {
        match result {
            Ok(value) => {
                let c = self.complete(tx, journal)?;
                Ok(Outcome {
                    value,
                    timestamp: c.stamp,
                    conflicts: c.conflicts,
                })
            }
            Err(e) => {
                self.abandon(tx.snapshot, &e.to_string());
                Err(e)
            }
        }
    }

    /// Run `f` in a new top-level snapshot without draining reactions
    pub(crate) fn execute<T>(
        &self,
        options: &TransactionOptions,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let tx = self.start(&options.snapshot, None, false, Access::ReadWrite);
        let guard = SnapshotGuard::new(self, tx.snapshot);
        let result = f(&tx);
        guard.disarm();
        self.finish(&tx, result, options.journal.as_ref())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `f` as a transaction
    ///
    /// The transaction commits if `f` succeeds and is discarded otherwise.
    /// Reactions invalidated by the commit run before this returns.
    pub fn run<T>(
        &self,
        options: impl Into<TransactionOptions>,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<Outcome<T>> {
        let outcome = self.execute(&options.into(), f);
        self.drain_reactions();
        outcome
    }

    /// Run `f` as a transaction and return its value
    pub fn transaction<T>(
        &self,
        hint: &str,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        self.run(hint, f).map(|o| o.value)
    }

    /// Run a transaction whose body may suspend
    pub async fn run_async<T, F, Fut>(
        &self,
        options: impl Into<TransactionOptions>,
        f: F,
    ) -> Result<Outcome<T>>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let options = options.into();
        let tx = self.start(&options.snapshot, None, false, Access::ReadWrite);
        let guard = SnapshotGuard::new(self, tx.snapshot);
        let result = f(tx.clone()).await;
        guard.disarm();
        let outcome = self.finish(&tx, result, options.journal.as_ref());
        self.settle().await;
        outcome
    }

    /// Run `f` in its own transaction, detached from any running one
    pub fn isolated<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        self.transaction("isolated", f)
    }

    /// Run `f` outside of any transaction
    ///
    /// Reads see the latest committed state and are not tracked; writes fail
    /// with `Misuse`.
    pub fn outside<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self.start(&SnapshotOptions::hint("outside"), None, true, Access::Outside);
        let guard = SnapshotGuard::new(self, tx.snapshot);
        let result = f(&tx);
        guard.disarm();
        self.finish(&tx, result, None).map(|o| o.value)
    }

    /// Read one member at the latest committed state
    pub fn read(&self, object: ObjectId, member: &str) -> Result<Value> {
        self.outside(|tx| tx.inspect(object, member))
    }

    /// Read all members at the latest committed state
    pub fn snapshot(&self, object: ObjectId) -> Result<BTreeMap<Member, Value>> {
        self.outside(|tx| tx.members(object))
    }

    /// Dispose an object in its own transaction
    pub fn dispose(&self, object: ObjectId) -> Result<()> {
        self.transaction("dispose", |tx| tx.dispose(object))
    }

    /// Undo the newest `count` remembered commits in one transaction
    ///
    /// Returns the number of patches undone. Disposals are not undone.
    pub fn undo(&self, journal: &UndoJournal, count: usize) -> Result<usize> {
        let patches = journal.take_newest(count);
        if patches.is_empty() {
            return Ok(0);
        }
        let result = self.transaction("undo", |tx| {
            for patch in &patches {
                for change in patch.changes.iter().rev() {
                    if change.is_disposal() {
                        continue;
                    }
                    let old = change.old.clone().unwrap_or_default();
                    tx.write(change.object, &change.member, old)?;
                }
            }
            Ok(patches.len())
        });
        if result.is_err() {
            for patch in patches.into_iter().rev() {
                journal.remember(patch);
            }
        }
        result
    }

    // ========================================================================
    // Methods
    // ========================================================================

    pub(crate) fn method(&self, object: ObjectId, name: &str) -> Result<MethodDef> {
        let state = self.lock();
        state
            .methods
            .lookup(object, name)
            .and_then(|id| state.methods.get(id))
            .cloned()
            .ok_or_else(|| {
                Error::misuse(format!(
                    "method {}.{} is not defined",
                    state.object_hint(object),
                    name
                ))
            })
    }

    pub(crate) fn method_by_id(&self, id: MethodId) -> Option<MethodDef> {
        self.lock().methods.get(id).cloned()
    }

    /// Register a method on an existing object
    ///
    /// A reaction runs for the first time before this returns.
    pub fn define(
        &self,
        object: ObjectId,
        name: &str,
        options: MemberOptions,
        body: MethodBody,
    ) -> Result<Controller> {
        let kind = options.kind;
        let method = {
            let mut state = self.lock();
            if !state.store.contains(object) {
                return Err(Error::misuse(format!("object {} doesn't exist", object)));
            }
            let id = state.methods.register(object, name.into(), options, body)?;
            if kind == Kind::Reaction {
                state.enqueue(id);
            }
            id
        };
        self.drain_reactions();
        Ok(Controller::new(self.clone(), method, object, name.into()))
    }

    /// Controller of a registered method
    pub fn controller(&self, object: ObjectId, name: &str) -> Result<Controller> {
        let def = self.method(object, name)?;
        Ok(Controller::new(self.clone(), def.id, object, def.name))
    }

    /// Whether the controller's last result reflects current state
    pub fn is_up_to_date(&self, controller: &Controller) -> bool {
        controller.is_up_to_date()
    }

    /// Change the options of a registered method
    pub fn configure(
        &self,
        controller: &Controller,
        options: ControllerOptions,
    ) -> Result<MemberOptions> {
        let mut state = self.lock();
        let def = state
            .methods
            .get_mut(controller.method_id())
            .ok_or_else(|| Error::misuse(format!("method {} is not defined", controller)))?;
        options.apply(&mut def.options);
        Ok(def.options.clone())
    }

    /// Invoke a registered method according to its kind
    ///
    /// Transactions run in their own snapshot under their reentrance policy;
    /// cached methods return the memoized result when it is up to date;
    /// plain methods run outside of any transaction; reactions run now.
    pub fn invoke(&self, object: ObjectId, name: &str, args: &[Value]) -> Result<Value> {
        let def = self.method(object, name)?;
        let result = match def.kind() {
            Kind::Plain => match &def.body {
                MethodBody::Sync(body) => self.outside(|tx| body(tx, object, args)),
                MethodBody::Async(_) => Err(Self::async_misuse(&def)),
            },
            Kind::Transaction => self.invoke_transaction(&def, args),
            Kind::Cached => self.call_cached(&def, args, None),
            Kind::Reaction => self.run_reaction(def.id).unwrap_or_else(|| {
                Err(Error::misuse(format!("reaction {} is not defined", def.name)))
            }),
        };
        self.drain_reactions();
        result
    }

    /// Invoke a registered method that may suspend
    ///
    /// Under `WaitAndRestart` a transaction waits for the running invocation
    /// to finish and then starts from scratch. Queued reactions, including
    /// asynchronous ones, run before this returns.
    pub async fn invoke_async(
        &self,
        object: ObjectId,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let def = self.method(object, name)?;
        let result = match def.kind() {
            Kind::Plain => return self.invoke(object, name, &args),
            Kind::Transaction => self.invoke_transaction_async(&def, args).await,
            Kind::Cached => self.call_cached_async(&def, args, None).await,
            Kind::Reaction => self
                .run_reaction_async(def.id)
                .await
                .unwrap_or_else(|| Err(Error::misuse(format!("reaction {} is not defined", def.name)))),
        };
        self.settle().await;
        result
    }

    async fn invoke_transaction_async(&self, def: &MethodDef, args: Vec<Value>) -> Result<Value> {
        let worker = self.next_worker();
        let mut leave = self.worker_guard(def, worker);
        let snapshot = self.start_async(def, worker).await?;
        leave.enter_monitor(def);
        let tx = self.transaction_for(def, snapshot);
        let guard = SnapshotGuard::new(self, snapshot);
        let result = match &def.body {
            MethodBody::Async(body) => body(tx.clone(), def.object, args).await,
            MethodBody::Sync(body) => body(&tx, def.object, &args),
        };
        guard.disarm();
        self.finish(&tx, result, None).map(|o| o.value)
    }

    /// Acquire a snapshot for `worker`, waiting while the policy says so
    async fn start_async(&self, def: &MethodDef, worker: WorkerId) -> Result<SnapshotId> {
        loop {
            match self.try_start(def, worker)? {
                Start::Started(s) => return Ok(s),
                Start::Wait(mut rx) => {
                    tracing::debug!(method = %def.name, worker = worker.as_u64(), "waiting for running invocation");
                    let _ = rx.wait_for(|done| *done).await;
                }
            }
        }
    }

    fn async_misuse(def: &MethodDef) -> Error {
        Error::misuse(format!(
            "{}.{} is asynchronous; use invoke_async",
            def.object, def.name
        ))
    }

    fn next_worker(&self) -> WorkerId {
        let mut state = self.lock();
        let w = WorkerId::new(state.next_worker);
        state.next_worker += 1;
        w
    }

    fn method_options(&self, state: &EngineState, def: &MethodDef) -> SnapshotOptions {
        SnapshotOptions {
            hint: Some(format!("{}.{}", state.object_hint(def.object), def.name)),
            token: None,
            trace: def.options.trace,
        }
    }

    /// Apply the reentrance policy and acquire a snapshot if admitted
    fn try_start(&self, def: &MethodDef, worker: WorkerId) -> Result<Start> {
        let policy = def
            .options
            .reentrance
            .unwrap_or(self.config().default_reentrance);
        let mut guard = self.lock();
        let state = &mut *guard;
        let options = self.effective(&self.method_options(state, def));
        let hint = options.hint_or_default().to_string();
        match state.reentrance.admit(def.id, worker, policy) {
            Admission::Proceed => {}
            Admission::CancelAndProceed(running) => {
                for s in running {
                    state
                        .snapshots
                        .cancel(s, format!("{} was restarted", hint));
                }
            }
            Admission::Wait(rx) => return Ok(Start::Wait(rx)),
            Admission::Reject(running) => {
                return Err(Error::Reentrance(format!(
                    "{} is not reentrant over worker #{}",
                    hint,
                    running.as_u64()
                )));
            }
        }
        let snapshot = state
            .snapshots
            .acquire(&options, None, def.options.no_side_effects);
        state.reentrance.enter(def.id, worker, snapshot);
        Ok(Start::Started(snapshot))
    }

    fn worker_guard(&self, def: &MethodDef, worker: WorkerId) -> WorkerGuard<'_> {
        WorkerGuard {
            engine: self,
            method: def.id,
            worker,
            monitor: None,
        }
    }

    fn transaction_for(&self, def: &MethodDef, snapshot: SnapshotId) -> Transaction {
        let state = self.lock();
        let hint = state
            .snapshots
            .snapshot(snapshot)
            .map(|s| s.hint().to_string())
            .unwrap_or_else(|| def.name.to_string());
        Transaction {
            engine: self.clone(),
            snapshot,
            frame: None,
            access: Access::ReadWrite,
            hint: Arc::from(hint),
        }
    }

    fn invoke_transaction(&self, def: &MethodDef, args: &[Value]) -> Result<Value> {
        let body = match &def.body {
            MethodBody::Sync(body) => body.clone(),
            MethodBody::Async(_) => return Err(Self::async_misuse(def)),
        };
        let worker = self.next_worker();
        let mut leave = self.worker_guard(def, worker);
        let snapshot = match self.try_start(def, worker)? {
            Start::Started(s) => s,
            Start::Wait(_) => {
                return Err(Error::Reentrance(format!(
                    "{} is in progress; use invoke_async to wait for it",
                    def.name
                )));
            }
        };
        leave.enter_monitor(def);
        let tx = self.transaction_for(def, snapshot);
        let guard = SnapshotGuard::new(self, snapshot);
        let result = body(&tx, def.object, args);
        guard.disarm();
        self.finish(&tx, result, None).map(|o| o.value)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Return the memoized result of a cached method or compute it
    pub(crate) fn call_cached(
        &self,
        def: &MethodDef,
        args: &[Value],
        caller: Option<&Transaction>,
    ) -> Result<Value> {
        let body = match &def.body {
            MethodBody::Sync(body) => body.clone(),
            MethodBody::Async(_) => return Err(Self::async_misuse(def)),
        };
        let (tx, frame) = match self.begin_cached(def, args, caller) {
            CachedStart::Hit(result) => return result,
            CachedStart::Compute(tx, frame) => (tx, frame),
        };
        let guard = SnapshotGuard::with_frame(self, tx.snapshot, frame);
        let result = body(&tx, def.object, args);
        guard.disarm();
        self.end_cached(def, &tx, frame, caller, result)
    }

    /// Like [`call_cached`](Self::call_cached), awaiting asynchronous bodies
    pub(crate) async fn call_cached_async(
        &self,
        def: &MethodDef,
        args: Vec<Value>,
        caller: Option<&Transaction>,
    ) -> Result<Value> {
        let (tx, frame) = match self.begin_cached(def, &args, caller) {
            CachedStart::Hit(result) => return result,
            CachedStart::Compute(tx, frame) => (tx, frame),
        };
        let guard = SnapshotGuard::with_frame(self, tx.snapshot, frame);
        let result = match &def.body {
            MethodBody::Async(body) => body(tx.clone(), def.object, args).await,
            MethodBody::Sync(body) => body(&tx, def.object, &args),
        };
        guard.disarm();
        self.end_cached(def, &tx, frame, caller, result)
    }

    /// Reuse the current result if the caller sees the same inputs,
    /// otherwise open a nested read-only snapshot to compute in
    fn begin_cached(
        &self,
        def: &MethodDef,
        args: &[Value],
        caller: Option<&Transaction>,
    ) -> CachedStart {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some((id, o)) = state.observers.current(def.id) {
            let args_match = !def.options.sensitive_args || o.args.as_slice() == args;
            let reusable = o.is_up_to_date()
                && args_match
                && caller
                    .map(|c| state.is_visible_to(id, c.snapshot))
                    .unwrap_or(true);
            if reusable {
                let result = o.result.clone().unwrap_or(Ok(Value::Null));
                if let Some(frame) = caller.and_then(|c| c.frame) {
                    state.observers.depend(frame, id);
                }
                return CachedStart::Hit(result);
            }
        }

        let mut options = self.effective(&self.method_options(state, def));
        options.token = Some(Token::new(def.id.as_u64()));
        let snapshot = state
            .snapshots
            .acquire(&options, caller.map(|c| c.snapshot), true);
        let stamp = state
            .snapshots
            .snapshot(snapshot)
            .map(|s| s.stamp())
            .unwrap_or_default();
        let frame = state
            .observers
            .begin(def.id, def.object, Kind::Cached, args.to_vec(), stamp);
        let tx = Transaction {
            engine: self.clone(),
            snapshot,
            frame: Some(frame),
            access: Access::ReadWrite,
            hint: Arc::from(options.hint_or_default()),
        };
        CachedStart::Compute(tx, frame)
    }

    /// Complete a cached computation and decide whether to memoize it
    ///
    /// A result is not memoized when it read uncommitted writes, or when it
    /// is already outdated while the current result is up to date (the
    /// caller's snapshot predates the current one).
    fn end_cached(
        &self,
        def: &MethodDef,
        tx: &Transaction,
        frame: ObserverId,
        caller: Option<&Transaction>,
        result: Result<Value>,
    ) -> Result<Value> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Err(e) = state.snapshots.commit(&mut state.store, tx.snapshot) {
            tracing::warn!(method = %tx.hint, error = %e, "cached snapshot failed to complete");
        }
        let caller_frame = caller.and_then(|c| c.frame);
        let provisional = state
            .observers
            .get(frame)
            .map(|o| o.provisional)
            .unwrap_or(true);
        let outdated = state.is_outdated(frame);
        let superseded = outdated
            && state
                .observers
                .current(def.id)
                .map(|(_, o)| o.is_up_to_date())
                .unwrap_or(false);
        if provisional || superseded {
            state.observers.discard(frame);
            if let Some(caller_frame) = caller_frame {
                if provisional {
                    state.observers.mark_provisional(caller_frame);
                } else {
                    let stale = state.observers.invalidate(caller_frame);
                    state.enqueue_observers(stale);
                }
            }
        } else {
            let stale = state.observers.finish(frame, result.clone(), outdated);
            state.enqueue_observers(stale);
            if let Some(caller_frame) = caller_frame {
                state.observers.depend(caller_frame, frame);
            }
        }
        result
    }

    /// Run a reaction in its own transaction and record what it read
    ///
    /// Returns None if the method no longer exists. A reaction whose
    /// reentrance policy refuses to start now is skipped: the running
    /// invocation re-queues the reaction if it finishes outdated.
    pub(crate) fn run_reaction(&self, method: MethodId) -> Option<Result<Value>> {
        let def = self.method_by_id(method)?;
        let body = match &def.body {
            MethodBody::Sync(body) => body.clone(),
            MethodBody::Async(_) => return Some(Err(Self::async_misuse(&def))),
        };
        let worker = self.next_worker();
        let mut leave = self.worker_guard(&def, worker);
        let snapshot = match self.try_start(&def, worker) {
            Ok(Start::Started(s)) => s,
            Ok(Start::Wait(_)) => {
                return Some(Err(Error::Reentrance(format!(
                    "reaction {} is in progress",
                    def.name
                ))))
            }
            Err(e) => return Some(Err(e)),
        };
        leave.enter_monitor(&def);
        let (tx, frame) = self.begin_reaction(&def, snapshot);
        let guard = SnapshotGuard::with_frame(self, snapshot, frame);
        let result = body(&tx, def.object, &[]);
        guard.disarm();
        let result = self.end_reaction(&def, &tx, frame, result);
        drop(leave);
        Some(result)
    }

    /// Run a reaction whose body may suspend
    ///
    /// Under `WaitAndRestart` it waits for the running invocation first.
    pub(crate) async fn run_reaction_async(&self, method: MethodId) -> Option<Result<Value>> {
        let def = self.method_by_id(method)?;
        let worker = self.next_worker();
        let mut leave = self.worker_guard(&def, worker);
        let snapshot = match self.start_async(&def, worker).await {
            Ok(s) => s,
            Err(e) => return Some(Err(e)),
        };
        leave.enter_monitor(&def);
        let (tx, frame) = self.begin_reaction(&def, snapshot);
        let guard = SnapshotGuard::with_frame(self, snapshot, frame);
        let result = match &def.body {
            MethodBody::Async(body) => body(tx.clone(), def.object, Vec::new()).await,
            MethodBody::Sync(body) => body(&tx, def.object, &[]),
        };
        guard.disarm();
        let result = self.end_reaction(&def, &tx, frame, result);
        drop(leave);
        Some(result)
    }

    fn begin_reaction(&self, def: &MethodDef, snapshot: SnapshotId) -> (Transaction, ObserverId) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let (stamp, hint) = state
            .snapshots
            .snapshot(snapshot)
            .map(|s| (s.stamp(), s.hint().to_string()))
            .unwrap_or_else(|| (Timestamp::default(), def.name.to_string()));
        let frame = state
            .observers
            .begin(def.id, def.object, Kind::Reaction, Vec::new(), stamp);
        let tx = Transaction {
            engine: self.clone(),
            snapshot,
            frame: Some(frame),
            access: Access::ReadWrite,
            hint: Arc::from(hint),
        };
        (tx, frame)
    }

    /// Commit a reaction's snapshot, record its result and re-queue it if
    /// it is already outdated
    fn end_reaction(
        &self,
        def: &MethodDef,
        tx: &Transaction,
        frame: ObserverId,
        result: Result<Value>,
    ) -> Result<Value> {
        let result = match result {
            Ok(value) => self.complete(tx, None).map(|c| (value, c)),
            Err(e) => {
                self.abandon(tx.snapshot, &e.to_string());
                Err(e)
            }
        };

        let mut guard = self.lock();
        let state = &mut *guard;
        let result = match result {
            Ok((value, completion)) => {
                for change in &completion.changes {
                    state
                        .observers
                        .unobserve(frame, change.object, &change.member);
                }
                Ok(value)
            }
            Err(e) if e.is_canceled() => {
                tracing::debug!(reaction = %tx.hint, "reaction superseded");
                state.observers.discard(frame);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(reaction = %tx.hint, error = %e, "reaction failed");
                Err(e)
            }
        };
        let outdated = state.is_outdated(frame);
        let stale = state.observers.finish(frame, result.clone(), outdated);
        state.enqueue_observers(stale);
        let current = state
            .observers
            .get(frame)
            .map(|o| o.is_up_to_date())
            .unwrap_or(false);
        if !current {
            state.enqueue(def.id);
        }
        result
    }

    /// Mark a method's current observer stale
    pub(crate) fn invalidate_method(&self, method: MethodId) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let kind = state.methods.get(method).map(|m| m.kind());
            if let Some((id, _)) = state.observers.current(method) {
                let stale = state.observers.invalidate(id);
                state.enqueue_observers(stale);
            }
            // a reaction left stale by the loop limit is not in the queue
            if kind == Some(Kind::Reaction) {
                state.enqueue(method);
            }
        }
        self.drain_reactions();
    }

    /// Run queued reactions until the queue is empty
    ///
    /// Each reaction runs in its own transaction. A reaction re-run more
    /// than `reaction_loop_limit` times in one drain is left stale.
    /// Asynchronous reactions are set aside for [`settle`](Self::settle).
    pub(crate) fn drain_reactions(&self) {
        {
            let mut state = self.lock();
            if state.draining || state.reactions.is_empty() {
                return;
            }
            state.draining = true;
        }
        let _drain = DrainGuard {
            engine: self,
            asynchronous: false,
        };
        let limit = self.config().reaction_loop_limit;
        let mut runs: FxHashMap<MethodId, usize> = FxHashMap::default();
        loop {
            let next = {
                let mut guard = self.lock();
                let state = &mut *guard;
                let Some(m) = state.reactions.pop_front() else {
                    break;
                };
                let asynchronous = state
                    .methods
                    .get(m)
                    .map(|d| d.body.is_async())
                    .unwrap_or(false);
                if asynchronous {
                    // stays in `queued` until the asynchronous drain takes it
                    state.deferred.push_back(m);
                    continue;
                }
                state.queued.remove(&m);
                m
            };
            if Self::over_limit(&mut runs, next, limit) {
                continue;
            }
            self.run_reaction(next);
        }
    }

    /// Run queued reactions, asynchronous ones included, until none is left
    ///
    /// Asynchronous reactions run one at a time. Asynchronous entry points
    /// settle on their own; call this after synchronous transactions that
    /// trigger asynchronous reactions. Returns at once if another task is
    /// already settling.
    pub async fn settle(&self) {
        {
            let mut state = self.lock();
            if state.draining_async {
                return;
            }
            state.draining_async = true;
        }
        let _drain = DrainGuard {
            engine: self,
            asynchronous: true,
        };
        let limit = self.config().reaction_loop_limit;
        let mut runs: FxHashMap<MethodId, usize> = FxHashMap::default();
        loop {
            self.drain_reactions();
            let next = {
                let mut state = self.lock();
                match state.deferred.pop_front() {
                    Some(m) => {
                        state.queued.remove(&m);
                        m
                    }
                    None => {
                        state.draining_async = false;
                        break;
                    }
                }
            };
            if Self::over_limit(&mut runs, next, limit) {
                continue;
            }
            if let Some(Err(e)) = self.run_reaction_async(next).await {
                tracing::debug!(method = next.as_u64(), error = %e, "asynchronous reaction ended with error");
            }
        }
    }

    fn over_limit(runs: &mut FxHashMap<MethodId, usize>, method: MethodId, limit: usize) -> bool {
        let n = runs.entry(method).or_insert(0);
        *n += 1;
        if *n > limit {
            tracing::warn!(method = method.as_u64(), limit = limit, "reaction loop limit reached");
            return true;
        }
        false
    }

    // ========================================================================
    // Monitors
    // ========================================================================

    /// Get or create a monitor
    ///
    /// The monitor is also a stateful object with members `active` and
    /// `count`, so computations can depend on its busy state.
    pub fn monitor(&self, name: &str) -> Result<Monitor> {
        if let Some(entry) = self.lock().monitors.get(name) {
            return Ok(Monitor::new(self.clone(), name, entry.object));
        }
        let object = self
            .execute(&TransactionOptions::hint(format!("Monitor:{}", name)), |tx| {
                tx.create(
                    &format!("Monitor:{}", name),
                    [("active", Value::Bool(false)), ("count", Value::Int(0))],
                )
            })?
            .value;
        let mut state = self.lock();
        let entry = state
            .monitors
            .entry(name.to_string())
            .or_insert_with(|| MonitorEntry {
                object,
                state: MonitorState::new(name),
            });
        Ok(Monitor::new(self.clone(), name, entry.object))
    }

    pub(crate) fn monitor_enter(&self, name: &str, worker: WorkerId) {
        if let Err(e) = self.monitor(name) {
            tracing::warn!(monitor = name, error = %e, "monitor unavailable");
            return;
        }
        let object = {
            let mut state = self.lock();
            match state.monitors.get_mut(name) {
                Some(entry) => {
                    entry.state.enter(worker);
                    entry.object
                }
                None => return,
            }
        };
        self.publish_monitor(name, object);
    }

    pub(crate) fn monitor_leave(&self, name: &str, worker: WorkerId) {
        let object = {
            let mut state = self.lock();
            match state.monitors.get_mut(name) {
                Some(entry) => {
                    entry.state.leave(worker);
                    entry.object
                }
                None => return,
            }
        };
        self.publish_monitor(name, object);
    }

    /// Copy the live monitor state into its object
    fn publish_monitor(&self, name: &str, object: ObjectId) {
        let hint = format!("Monitor:{}", name);
        let result = self.execute(&TransactionOptions::hint(hint), |tx| {
            let (active, count) = tx
                .engine()
                .lock()
                .monitors
                .get(name)
                .map(|e| (e.state.is_active(), e.state.count()))
                .unwrap_or((false, 0));
            tx.write(object, "active", active)?;
            tx.write(object, "count", count as i64)
        });
        if let Err(e) = result {
            tracing::warn!(monitor = name, error = %e, "monitor update failed");
        }
    }

    /// Default reentrance policy
    pub fn default_reentrance(&self) -> Reentrance {
        self.config().default_reentrance
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Engine")
            .field("objects", &stats.objects)
            .field("revisions", &stats.revisions)
            .field("pending_snapshots", &stats.pending_snapshots)
            .field("stamp", &stats.stamp)
            .finish()
    }
}

/// Builder for engine configuration.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::builder()
///     .reaction_loop_limit(3)
///     .default_reentrance(Reentrance::WaitAndRestart)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum re-runs of one reaction during a single drain.
    pub fn reaction_loop_limit(mut self, limit: usize) -> Self {
        self.config.reaction_loop_limit = limit;
        self
    }

    /// Interval between periodic history summaries.
    pub fn gc_summary_interval(mut self, interval: Duration) -> Self {
        self.config.gc_summary_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Reentrance policy of operations that don't set one.
    pub fn default_reentrance(mut self, reentrance: Reentrance) -> Self {
        self.config.default_reentrance = reentrance;
        self
    }

    /// Trace switches of snapshots that don't set their own.
    pub fn trace(mut self, trace: TraceOptions) -> Self {
        self.config.trace = trace;
        self
    }

    /// Validate the configuration and create the engine.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        Ok(Engine::with_config(self.config))
    }
}
