//! Revision storage for the object-state engine
//!
//! This crate holds every object's version history:
//! - Revision: one version of an object's members
//! - ObjectHolder: stable identity with the current head
//! - RevisionStore: FxHashMap arena with explicit reclamation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod revision;
pub mod store;

pub use revision::{ObjectHolder, Revision};
pub use store::RevisionStore;
