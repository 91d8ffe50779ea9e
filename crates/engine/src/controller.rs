//! Method controllers
//!
//! A [`Controller`] is the handle on one registered method. For cached
//! methods and reactions it exposes the memoized outcome of the current
//! observer: the last value or error, the arguments it was computed with,
//! and whether it still reflects committed state.

use crate::engine::Engine;
use revo_core::{Error, Kind, Member, MemberOptions, MethodId, ObjectId, Reentrance, Result, TraceOptions, Value};

/// Handle on a registered method
#[derive(Debug, Clone)]
pub struct Controller {
    engine: Engine,
    method: MethodId,
    object: ObjectId,
    name: Member,
}

impl Controller {
    pub(crate) fn new(engine: Engine, method: MethodId, object: ObjectId, name: Member) -> Self {
        Self {
            engine,
            method,
            object,
            name,
        }
    }

    pub(crate) fn method_id(&self) -> MethodId {
        self.method
    }

    /// Object the method belongs to
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the method, or None once its object is disposed
    pub fn kind(&self) -> Option<Kind> {
        self.engine.method_by_id(self.method).map(|m| m.kind())
    }

    /// Current options, or None once its object is disposed
    pub fn options(&self) -> Option<MemberOptions> {
        self.engine.method_by_id(self.method).map(|m| m.options)
    }

    /// Whether the last result reflects current committed state
    ///
    /// Always false for methods that were never computed.
    pub fn is_up_to_date(&self) -> bool {
        self.engine
            .lock()
            .observers
            .current(self.method)
            .map(|(_, o)| o.is_up_to_date())
            .unwrap_or(false)
    }

    fn last(&self) -> Option<Result<Value>> {
        self.engine
            .lock()
            .observers
            .current(self.method)
            .and_then(|(_, o)| o.result.clone())
    }

    /// Number of invocations currently running
    pub fn in_flight(&self) -> usize {
        self.engine.lock().reentrance.in_flight(self.method)
    }

    /// Last successful value, without recomputing
    pub fn value(&self) -> Option<Value> {
        self.last().and_then(|r| r.ok())
    }

    /// Last error, without recomputing
    pub fn error(&self) -> Option<Error> {
        self.last().and_then(|r| r.err())
    }

    /// Arguments of the last computation
    pub fn args(&self) -> Option<Vec<Value>> {
        self.engine
            .lock()
            .observers
            .current(self.method)
            .map(|(_, o)| o.args.clone())
    }

    /// Mark the last result stale
    ///
    /// A reaction runs again right away; a cached method recomputes on its
    /// next call.
    pub fn invalidate(&self) {
        self.engine.invalidate_method(self.method);
    }

    /// Invoke the method
    ///
    /// A cached method is recomputed even if its result is up to date.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if self.kind() == Some(Kind::Cached) {
            self.invalidate();
        }
        self.engine.invoke(self.object, &self.name, args)
    }

    /// Invoke a method that may suspend
    pub async fn call_async(&self, args: Vec<Value>) -> Result<Value> {
        if self.kind() == Some(Kind::Cached) {
            self.invalidate();
        }
        self.engine.invoke_async(self.object, &self.name, args).await
    }

    /// Change the method's options
    pub fn configure(&self, options: ControllerOptions) -> Result<MemberOptions> {
        self.engine.configure(self, options)
    }
}

impl std::fmt::Display for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.object, self.name)
    }
}

/// Option changes applied by [`Controller::configure`]
///
/// Unset fields leave the current option untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    /// New reentrance policy
    pub reentrance: Option<Reentrance>,
    /// New monitor; `Some(None)` detaches the current one
    pub monitor: Option<Option<String>>,
    /// New trace switches
    pub trace: Option<TraceOptions>,
    /// New argument sensitivity
    pub sensitive_args: Option<bool>,
}

impl ControllerOptions {
    /// No changes
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reentrance policy
    pub fn reentrance(mut self, reentrance: Reentrance) -> Self {
        self.reentrance = Some(reentrance);
        self
    }

    /// Attach a monitor
    pub fn monitor(mut self, name: impl Into<String>) -> Self {
        self.monitor = Some(Some(name.into()));
        self
    }

    /// Detach the monitor
    pub fn no_monitor(mut self) -> Self {
        self.monitor = Some(None);
        self
    }

    /// Set trace switches
    pub fn trace(mut self, trace: TraceOptions) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Set argument sensitivity
    pub fn sensitive_args(mut self, sensitive: bool) -> Self {
        self.sensitive_args = Some(sensitive);
        self
    }

    pub(crate) fn apply(self, options: &mut MemberOptions) {
        if let Some(r) = self.reentrance {
            options.reentrance = Some(r);
        }
        if let Some(m) = self.monitor {
            options.monitor = m;
        }
        if let Some(t) = self.trace {
            options.trace = Some(t);
        }
        if let Some(s) = self.sensitive_args {
            options.sensitive_args = s;
        }
    }
}
