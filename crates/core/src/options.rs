//! Operation tagging and snapshot options
//!
//! These types replace annotation-driven method classification: every
//! registered method carries a [`Kind`] and a reentrance policy, and every
//! snapshot carries [`SnapshotOptions`].

use crate::types::Token;
use serde::{Deserialize, Serialize};

/// Kind of a registered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// No tracking and no snapshot of its own
    Plain,
    /// Runs in its own snapshot and commits on success
    Transaction,
    /// Memoized, side-effect-free, recomputed lazily when stale
    Cached,
    /// Re-run automatically outside the triggering snapshot when stale
    Reaction,
}

impl Kind {
    /// Whether invocations of this kind record an observer
    pub fn is_observing(&self) -> bool {
        matches!(self, Kind::Cached | Kind::Reaction)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Kind::Plain => "plain",
            Kind::Transaction => "transaction",
            Kind::Cached => "cached",
            Kind::Reaction => "reaction",
        };
        write!(f, "{}", s)
    }
}

/// What happens when an operation is invoked while a prior invocation of the
/// same target is still in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Reentrance {
    /// Fail immediately with a reentrance error
    #[default]
    PreventWithError,
    /// Wait for the running invocation to finish, then start from scratch
    WaitAndRestart,
    /// Flag the running invocation canceled and proceed
    CancelPrevious,
    /// No coordination
    RunSideBySide,
}

/// Diagnostic trace switches
///
/// Enabled switches raise the corresponding events of a snapshot from
/// `debug` to `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceOptions {
    /// Snapshot begin/commit events
    pub transactions: bool,
    /// Per-revision merge and publish events
    pub changes: bool,
    /// Observer invalidation events
    pub invalidations: bool,
    /// History collection events
    pub gc: bool,
}

impl TraceOptions {
    /// All switches on
    pub fn all() -> Self {
        Self {
            transactions: true,
            changes: true,
            invalidations: true,
            gc: true,
        }
    }
}

/// Per-method options of a registered operation
///
/// `reentrance` left unset falls back to the engine's configured default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberOptions {
    /// Operation kind
    pub kind: Kind,
    /// Reentrance policy
    pub reentrance: Option<Reentrance>,
    /// Whether a change of arguments forces recomputation of a cached result
    pub sensitive_args: bool,
    /// Name of the monitor tracking in-flight invocations
    pub monitor: Option<String>,
    /// Trace switches for snapshots started by this operation
    pub trace: Option<TraceOptions>,
    /// Reject writes as side effects
    pub no_side_effects: bool,
}

impl MemberOptions {
    /// Default options for a kind
    pub fn of(kind: Kind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Set the reentrance policy
    pub fn with_reentrance(mut self, reentrance: Reentrance) -> Self {
        self.reentrance = Some(reentrance);
        self
    }

    /// Assign a monitor
    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = Some(monitor.into());
        self
    }

    /// Set argument sensitivity
    pub fn with_sensitive_args(mut self, sensitive: bool) -> Self {
        self.sensitive_args = sensitive;
        self
    }

    /// Set trace switches
    pub fn with_trace(mut self, trace: TraceOptions) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Reject writes
    pub fn side_effect_free(mut self) -> Self {
        self.no_side_effects = true;
        self
    }
}

impl Default for MemberOptions {
    fn default() -> Self {
        Self {
            kind: Kind::Plain,
            reentrance: None,
            sensitive_args: true,
            monitor: None,
            trace: None,
            no_side_effects: false,
        }
    }
}

/// Options of a single snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotOptions {
    /// Human-readable name used in diagnostics
    pub hint: Option<String>,
    /// Reentrance/cache token; nested snapshots with a token share the outer timestamp
    pub token: Option<Token>,
    /// Trace switches for this snapshot
    pub trace: Option<TraceOptions>,
}

impl SnapshotOptions {
    /// Options with a hint
    pub fn hint(hint: impl Into<String>) -> Self {
        Self {
            hint: Some(hint.into()),
            ..Self::default()
        }
    }

    /// Set the token
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the trace switches
    pub fn with_trace(mut self, trace: TraceOptions) -> Self {
        self.trace = Some(trace);
        self
    }

    /// The hint, or `noname`
    pub fn hint_or_default(&self) -> &str {
        self.hint.as_deref().unwrap_or("noname")
    }
}
