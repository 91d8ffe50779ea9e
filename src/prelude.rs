//! Convenient imports for Revo.
//!
//! This module re-exports the most commonly used types so you can get started
//! with a single import:
//!
//! ```ignore
//! use revo::prelude::*;
//!
//! let engine = Engine::new();
//! let obj = engine.transaction("create", |tx| tx.create("Obj", [("x", 1i64)]))?;
//! ```

// Main entry point
pub use crate::{Engine, EngineBuilder, EngineConfig};

// Error handling
pub use crate::{Error, Result};

// Transactions and registration
pub use crate::{MethodBody, ObjectType, Outcome, Transaction, TransactionOptions};

// Observers and monitors
pub use crate::{Controller, ControllerOptions, Monitor};

// Core types
pub use crate::{Kind, MemberOptions, ObjectId, Reentrance, Timestamp, TraceOptions, Value};

// Undo
pub use crate::UndoJournal;
