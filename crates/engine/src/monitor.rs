//! Monitors: named counters of in-flight operations
//!
//! An operation configured with a monitor name enters the monitor when it
//! starts and leaves it when it finishes. The busy state is mirrored into a
//! stateful object with members `active` and `count`, so cached methods and
//! reactions can depend on it like on any other state.

use crate::engine::Engine;
use crate::transaction::Transaction;
use revo_concurrency::MonitorState;
use revo_core::{ObjectId, Result, WorkerId};

/// Live workers of a monitor and the object mirroring them
#[derive(Debug)]
pub(crate) struct MonitorEntry {
    pub(crate) object: ObjectId,
    pub(crate) state: MonitorState,
}

/// Handle on a named monitor
#[derive(Debug, Clone)]
pub struct Monitor {
    engine: Engine,
    name: String,
    object: ObjectId,
}

impl Monitor {
    pub(crate) fn new(engine: Engine, name: &str, object: ObjectId) -> Self {
        Self {
            engine,
            name: name.to_string(),
            object,
        }
    }

    /// Monitor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object holding `active` and `count`
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Number of operations currently inside
    pub fn count(&self) -> usize {
        self.engine
            .lock()
            .monitors
            .get(&self.name)
            .map(|e| e.state.count())
            .unwrap_or(0)
    }

    /// Whether any operation is inside
    pub fn is_active(&self) -> bool {
        self.count() > 0
    }

    /// Workers currently inside, in entry order
    pub fn workers(&self) -> Vec<WorkerId> {
        self.engine
            .lock()
            .monitors
            .get(&self.name)
            .map(|e| e.state.workers().to_vec())
            .unwrap_or_default()
    }

    /// Read `active` within a transaction, subscribing to it
    pub fn is_busy(&self, tx: &Transaction) -> Result<bool> {
        Ok(tx.read(self.object, "active")?.as_bool().unwrap_or(false))
    }

    /// Read `count` within a transaction, subscribing to it
    pub fn busy_count(&self, tx: &Transaction) -> Result<usize> {
        Ok(tx.read(self.object, "count")?.as_int().unwrap_or(0).max(0) as usize)
    }
}
