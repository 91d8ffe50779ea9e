//! Core types for the object-state engine
//!
//! This crate defines the vocabulary shared by every layer:
//! - Identity types: ObjectId, SnapshotId, RevisionId, Timestamp
//! - Value: the member value model
//! - Options: operation kinds, reentrance policies, snapshot options
//! - Error: the canonical error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod options;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use options::{Kind, MemberOptions, Reentrance, SnapshotOptions, TraceOptions};
pub use types::{
    Member, MethodId, ObjectId, RevisionId, SnapshotId, Timestamp, Token, WorkerId, DISPOSED,
};
pub use value::Value;
