//! Engine Integration Tests
//!
//! End-to-end behavior of the object-state engine through the public API.
//!
//! ## Key Verification Points
//!
//! 1. Snapshot isolation and read consistency
//! 2. Rebase merges disjoint changes and reports real conflicts
//! 3. Cached results stay coherent with committed state
//! 4. Reactions re-run after relevant commits only
//! 5. Reentrance policies and monitors under overlapping async calls
//! 6. History is reclaimed once no pending snapshot can read it
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test engine
//!
//! # Reentrance tests only
//! cargo test --test engine reentrance::
//! ```

mod common;

mod caching;
mod conflicts;
mod gc;
mod isolation;
mod properties;
mod reactions;
mod reentrance;
mod undo;
