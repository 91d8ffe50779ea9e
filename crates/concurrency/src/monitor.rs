//! Busy-state counter for a named group of operations
//!
//! A [`MonitorState`] tracks the workers currently inside any operation
//! assigned to the monitor. The engine wraps it in a reactive handle; this
//! type only does the bookkeeping.

use revo_core::WorkerId;
use smallvec::SmallVec;

/// Workers currently in flight under one monitor
#[derive(Debug, Clone, Default)]
pub struct MonitorState {
    name: String,
    workers: SmallVec<[WorkerId; 4]>,
}

impl MonitorState {
    /// Create an idle monitor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: SmallVec::new(),
        }
    }

    /// Monitor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a worker entering; returns true on the idle-to-busy transition
    pub fn enter(&mut self, worker: WorkerId) -> bool {
        if self.workers.contains(&worker) {
            return false;
        }
        self.workers.push(worker);
        self.workers.len() == 1
    }

    /// Record a worker leaving; returns true on the busy-to-idle transition
    pub fn leave(&mut self, worker: WorkerId) -> bool {
        match self.workers.iter().position(|w| *w == worker) {
            Some(i) => {
                self.workers.remove(i);
                self.workers.is_empty()
            }
            None => false,
        }
    }

    /// Number of workers in flight
    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Whether any worker is in flight
    pub fn is_active(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Workers in flight, in entry order
    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }
}
