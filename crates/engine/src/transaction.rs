//! Transaction handle
//!
//! A [`Transaction`] is an owned, cloneable handle on one running snapshot.
//! Every read and write of object state goes through it; reads made while a
//! cached method or reaction is computing are recorded in its observer.
//!
//! Handles outlive nothing: once the snapshot completes, every operation on
//! the handle fails with `Misuse`.

use crate::engine::Engine;
use crate::observer::ObserverId;
use crate::registry::{MethodBody, ObjectType};
use revo_core::{
    Error, Kind, Member, ObjectId, Result, SnapshotId, SnapshotOptions, Timestamp, Value, DISPOSED,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the handle may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// A transaction: reads and writes
    ReadWrite,
    /// Untracked reads at the latest timestamp; writes are misuse
    Outside,
}

/// Handle on a running snapshot
#[derive(Clone)]
pub struct Transaction {
    pub(crate) engine: Engine,
    pub(crate) snapshot: SnapshotId,
    pub(crate) frame: Option<ObserverId>,
    pub(crate) access: Access,
    pub(crate) hint: Arc<str>,
}

impl Transaction {
    /// Engine this transaction belongs to
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Snapshot id
    pub fn id(&self) -> SnapshotId {
        self.snapshot
    }

    /// Diagnostic name
    pub fn hint(&self) -> &str {
        &self.hint
    }

    /// Current timestamp of the snapshot
    ///
    /// Returns `Timestamp::UNDEFINED` once the snapshot has been collected.
    pub fn timestamp(&self) -> Timestamp {
        self.engine
            .lock()
            .snapshots
            .snapshot(self.snapshot)
            .map(|s| s.stamp())
            .unwrap_or(Timestamp::UNDEFINED)
    }

    /// Whether a newer invocation canceled this one
    ///
    /// Cancellation is cooperative: the body may check this and stop early.
    /// A canceled transaction never commits.
    pub fn is_canceled(&self) -> bool {
        self.engine.lock().snapshots.is_canceled(self.snapshot)
    }

    /// Read a member, subscribing the running computation to it
    ///
    /// Missing members read as `Value::Null`.
    pub fn read(&self, object: ObjectId, member: &str) -> Result<Value> {
        self.read_member(object, member, true)
    }

    /// Read a member without subscribing
    pub fn inspect(&self, object: ObjectId, member: &str) -> Result<Value> {
        self.read_member(object, member, false)
    }

    /// Read every member of an object, subscribing to each
    pub fn members(&self, object: ObjectId) -> Result<BTreeMap<Member, Value>> {
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        let r = state.snapshots.readable(&state.store, self.snapshot, object)?;
        let data = state
            .store
            .revision(r)
            .map(|rev| rev.data().clone())
            .unwrap_or_default();
        if let Some(frame) = self.frame {
            for (member, value) in &data {
                state
                    .observers
                    .subscribe(frame, object, member.clone(), Some(value.clone()));
            }
        }
        Ok(data)
    }

    fn read_member(&self, object: ObjectId, member: &str, track: bool) -> Result<Value> {
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        let r = state.snapshots.readable(&state.store, self.snapshot, object)?;
        let (value, provisional) = match state.store.revision(r) {
            Some(rev) => (
                rev.get(member).cloned(),
                !rev.is_published() && rev.snapshot() != self.snapshot,
            ),
            None => (None, false),
        };
        if track {
            if let Some(frame) = self.frame {
                state
                    .observers
                    .subscribe(frame, object, Member::from(member), value.clone());
                if provisional {
                    state.observers.mark_provisional(frame);
                }
            }
        }
        Ok(value.unwrap_or_default())
    }

    fn ensure_writable(&self, object: ObjectId, member: &str) -> Result<()> {
        match self.access {
            Access::ReadWrite => Ok(()),
            Access::Outside => Err(Error::misuse(format!(
                "can't change {}.{} outside of a transaction",
                object, member
            ))),
        }
    }

    /// Write a member
    ///
    /// Writing the value the snapshot already sees is a no-op.
    pub fn write(&self, object: ObjectId, member: &str, value: impl Into<Value>) -> Result<()> {
        self.ensure_writable(object, member)?;
        if member == DISPOSED {
            return Err(Error::misuse(format!("member {} is reserved", DISPOSED)));
        }
        let value = value.into();
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        if let Ok(r) = state.snapshots.readable(&state.store, self.snapshot, object) {
            let unchanged = state
                .store
                .revision(r)
                .and_then(|rev| rev.get(member))
                .map(|current| *current == value)
                .unwrap_or(false);
            if unchanged {
                return Ok(());
            }
        }
        let r = state
            .snapshots
            .writable(&mut state.store, self.snapshot, object, member)?;
        let base = state
            .store
            .revision(r)
            .and_then(|rev| state.store.revision(rev.prev()))
            .and_then(|prev| prev.get(member))
            .cloned();
        if let Some(rev) = state.store.revision_mut(r) {
            if base.as_ref() == Some(&value) {
                rev.restore(Member::from(member), value);
            } else {
                rev.set(Member::from(member), value);
            }
        }
        Ok(())
    }

    /// Create a stateful object with initial members
    pub fn create<I, K, V>(&self, hint: &str, members: I) -> Result<ObjectId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        if self.access == Access::Outside {
            return Err(Error::misuse(format!(
                "can't create {} outside of a transaction",
                hint
            )));
        }
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        let object = state.store.create_object(hint);
        let r = match state
            .snapshots
            .writable(&mut state.store, self.snapshot, object, hint)
        {
            Ok(r) => r,
            Err(e) => {
                state.store.remove_object(object);
                return Err(e);
            }
        };
        if let Some(rev) = state.store.revision_mut(r) {
            for (k, v) in members {
                rev.set(Member::from(k.as_ref()), v.into());
            }
        }
        tracing::trace!(object = %object, hint = hint, snapshot = %self.snapshot, "object created");
        Ok(object)
    }

    /// Create an instance of a declared type and register its methods
    ///
    /// Reactions of the new instance run for the first time after this
    /// transaction commits.
    pub fn instantiate(&self, ty: &ObjectType) -> Result<ObjectId> {
        self.instantiate_with(ty, std::iter::empty::<(&str, Value)>())
    }

    /// Like [`instantiate`](Self::instantiate), overriding some initial members
    pub fn instantiate_with<I, K, V>(&self, ty: &ObjectType, overrides: I) -> Result<ObjectId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut members: BTreeMap<Member, Value> = ty.members.iter().cloned().collect();
        for (k, v) in overrides {
            members.insert(Member::from(k.as_ref()), v.into());
        }
        let object = self.create(ty.name(), members)?;

        let mut guard = self.engine.lock();
        let state = &mut *guard;
        for decl in &ty.methods {
            state.methods.register(
                object,
                decl.name.clone(),
                decl.options.clone(),
                decl.body.clone(),
            )?;
        }
        state
            .instantiated
            .entry(self.snapshot)
            .or_default()
            .push(object);
        Ok(object)
    }

    /// Dispose an object
    ///
    /// After commit, reads of the object fail with `NotFound` and writes with
    /// `Misuse`; observers of the object are invalidated and its own
    /// observers and methods are removed.
    pub fn dispose(&self, object: ObjectId) -> Result<()> {
        self.ensure_writable(object, DISPOSED)?;
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        let r = state
            .snapshots
            .writable(&mut state.store, self.snapshot, object, DISPOSED)?;
        if let Some(rev) = state.store.revision_mut(r) {
            rev.mark_disposed();
        }
        Ok(())
    }

    /// Call a registered method within this transaction
    ///
    /// Transactions and plain methods join this snapshot; cached methods
    /// compute in a nested side-effect-free snapshot that sees this
    /// transaction's uncommitted writes.
    pub fn call(&self, object: ObjectId, name: &str, args: &[Value]) -> Result<Value> {
        let def = self.engine.method(object, name)?;
        if def.kind() == Kind::Cached {
            return self.engine.call_cached(&def, args, Some(self));
        }
        match &def.body {
            MethodBody::Sync(body) => body(self, object, args),
            MethodBody::Async(_) => Err(Error::misuse(format!(
                "{}.{} is asynchronous; use call_async",
                object, name
            ))),
        }
    }

    /// Call a registered method that may suspend, within this transaction
    pub async fn call_async(&self, object: ObjectId, name: &str, args: Vec<Value>) -> Result<Value> {
        let def = self.engine.method(object, name)?;
        if def.kind() == Kind::Cached {
            return self.engine.call_cached_async(&def, args, Some(self)).await;
        }
        match &def.body {
            MethodBody::Async(body) => body(self.clone(), object, args).await,
            MethodBody::Sync(_) => self.call(object, name, &args),
        }
    }

    /// Run `f` in a separate transaction that commits on its own
    pub fn isolated<T>(
        &self,
        hint: &str,
        f: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        self.engine
            .execute(&SnapshotOptions::hint(hint).into(), f)
            .map(|o| o.value)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("snapshot", &self.snapshot)
            .field("hint", &self.hint)
            .field("access", &self.access)
            .finish()
    }
}
