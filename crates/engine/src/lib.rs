//! Engine layer for revo
//!
//! This crate ties the revision store and the snapshot manager into a host
//! facade:
//! - Engine: transactions, method dispatch and the reaction queue
//! - Transaction: reads and writes of one running snapshot
//! - ObjectType / MethodBody: declaring stateful types and their methods
//! - Controller: memoized results of cached methods and reactions
//! - Monitor: busy state of operations in flight
//! - UndoJournal: bounded log of committed changes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod engine;
pub mod journal;
pub mod monitor;
pub mod registry;
pub mod transaction;

mod observer;
mod reentrance;

pub use config::EngineConfig;
pub use controller::{Controller, ControllerOptions};
pub use engine::{Engine, EngineBuilder, EngineStats, Outcome, TransactionOptions};
pub use journal::{Patch, UndoJournal, DEFAULT_JOURNAL_CAPACITY};
pub use monitor::Monitor;
pub use registry::{AsyncBody, BoxFuture, MethodBody, ObjectType, SyncBody};
pub use transaction::Transaction;
