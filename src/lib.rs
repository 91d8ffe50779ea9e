//! # Revo
//!
//! Transactional, reactive object-state engine.
//!
//! Revo keeps the state of application objects as versioned revisions.
//! Transactions run in isolated snapshots and merge concurrent changes when
//! they commit; cached methods memoize results until something they read
//! changes; reactions re-run on their own after every relevant commit.
//!
//! ## Quick Start
//!
//! ```ignore
//! use revo::prelude::*;
//!
//! let engine = Engine::new();
//!
//! // Declare a type with a member and a cached method
//! let doc = ObjectType::new("Doc")
//!     .member("title", "untitled")
//!     .cached("shout", |tx, this, _| {
//!         let title = tx.read(this, "title")?;
//!         Ok(Value::from(title.as_str().unwrap_or("").to_uppercase()))
//!     });
//!
//! // Create an instance in a transaction
//! let d = engine.transaction("create", |tx| tx.instantiate(&doc))?;
//!
//! // Computed once, then memoized until `title` changes
//! let shout = engine.invoke(d, "shout", &[])?;
//!
//! engine.transaction("rename", |tx| tx.write(d, "title", "hello"))?;
//! assert_eq!(engine.invoke(d, "shout", &[])?, Value::from("HELLO"));
//! ```
//!
//! ## Operation kinds
//!
//! 1. **Plain** - runs outside of any transaction, reads latest state
//! 2. **Transaction** - runs in its own snapshot under a reentrance policy
//! 3. **Cached** - memoized, side-effect free, recomputed lazily
//! 4. **Reaction** - re-runs after commits that change what it read
//!
//! ## Crates
//!
//! - [`revo_core`] - ids, timestamps, values, options, errors
//! - [`revo_storage`] - revision store with history reclamation
//! - [`revo_concurrency`] - snapshots, rebase and merge
//! - [`revo_engine`] - host facade, observers, reactions, undo

#![warn(missing_docs)]

pub mod prelude;

pub use revo_concurrency::{Completion, Conflict, MemberChange};
pub use revo_core::{
    Error, Kind, Member, MemberOptions, MethodId, ObjectId, Reentrance, Result, SnapshotId,
    SnapshotOptions, Timestamp, Token, TraceOptions, Value, WorkerId, DISPOSED,
};
pub use revo_engine::{
    Controller, ControllerOptions, Engine, EngineBuilder, EngineConfig, EngineStats, MethodBody,
    Monitor, ObjectType, Outcome, Patch, Transaction, TransactionOptions, UndoJournal,
};

pub use revo_concurrency;
pub use revo_core;
pub use revo_engine;
pub use revo_storage;
