//! Reentrance control
//!
//! Tracks the in-flight invocations of every method and decides what a new
//! invocation does when one is already running:
//!
//! | Policy | Running invocation | New invocation |
//! |--------|--------------------|----------------|
//! | `PreventWithError` | untouched | fails with `Reentrance` before starting |
//! | `WaitAndRestart` | untouched | waits for it to finish, then starts over |
//! | `CancelPrevious` | flagged canceled | proceeds |
//! | `RunSideBySide` | untouched | proceeds |

use revo_core::{MethodId, Reentrance, SnapshotId, WorkerId};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::watch;

/// One in-flight or queued invocation
#[derive(Debug)]
struct InFlight {
    worker: WorkerId,
    /// None while queued behind another invocation
    snapshot: Option<SnapshotId>,
    done: watch::Sender<bool>,
}

impl InFlight {
    fn new(worker: WorkerId, snapshot: Option<SnapshotId>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            worker,
            snapshot,
            done,
        }
    }
}

/// Decision for a new invocation
#[derive(Debug)]
pub(crate) enum Admission {
    /// Start now
    Proceed,
    /// Start now after canceling these snapshots
    CancelAndProceed(SmallVec<[SnapshotId; 2]>),
    /// Wait until the receiver reports the invocation ahead finished
    Wait(watch::Receiver<bool>),
    /// Refuse; the payload names the running worker
    Reject(WorkerId),
}

/// In-flight invocations per method, in arrival order
#[derive(Debug, Default)]
pub(crate) struct ReentranceTable {
    running: FxHashMap<MethodId, SmallVec<[InFlight; 2]>>,
}

impl ReentranceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decide how `worker` may start an invocation of `method`
    ///
    /// Under `WaitAndRestart` a waiting worker is queued, so waiters start
    /// in arrival order; asking again after a wake-up keeps its place.
    pub(crate) fn admit(
        &mut self,
        method: MethodId,
        worker: WorkerId,
        policy: Reentrance,
    ) -> Admission {
        let Some(list) = self.running.get_mut(&method) else {
            return Admission::Proceed;
        };
        let own = list.iter().position(|f| f.worker == worker);
        let ahead = own.unwrap_or(list.len());
        if ahead == 0 {
            return Admission::Proceed;
        }
        match policy {
            Reentrance::PreventWithError => Admission::Reject(list[0].worker),
            Reentrance::WaitAndRestart => {
                let rx = list[ahead - 1].done.subscribe();
                if own.is_none() {
                    list.push(InFlight::new(worker, None));
                }
                Admission::Wait(rx)
            }
            Reentrance::CancelPrevious => Admission::CancelAndProceed(
                list[..ahead].iter().filter_map(|f| f.snapshot).collect(),
            ),
            Reentrance::RunSideBySide => Admission::Proceed,
        }
    }

    /// Register a started invocation
    pub(crate) fn enter(&mut self, method: MethodId, worker: WorkerId, snapshot: SnapshotId) {
        let list = self.running.entry(method).or_default();
        match list.iter_mut().find(|f| f.worker == worker) {
            Some(f) => f.snapshot = Some(snapshot),
            None => list.push(InFlight::new(worker, Some(snapshot))),
        }
    }

    /// Unregister a finished or abandoned invocation and wake its waiters
    pub(crate) fn leave(&mut self, method: MethodId, worker: WorkerId) {
        let Some(list) = self.running.get_mut(&method) else {
            return;
        };
        if let Some(i) = list.iter().position(|f| f.worker == worker) {
            let f = list.remove(i);
            f.done.send_replace(true);
        }
        if list.is_empty() {
            self.running.remove(&method);
        }
    }

    /// Number of running and queued invocations of a method
    pub(crate) fn in_flight(&self, method: MethodId) -> usize {
        self.running.get(&method).map(|r| r.len()).unwrap_or(0)
    }
}
