//! Method registration
//!
//! Operations are tagged explicitly instead of through annotations: an
//! [`ObjectType`] lists an object's default members and its methods, each
//! with a [`Kind`] and [`MemberOptions`]. Instantiating the type creates the
//! object and registers every method in the engine's [`MethodTable`].

use crate::transaction::Transaction;
use revo_core::{Error, Kind, Member, MemberOptions, MethodId, ObjectId, Result, Value};
use rustc_hash::FxHashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by asynchronous method bodies
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Synchronous method body: `(transaction, this, args)`
pub type SyncBody = Arc<dyn Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync>;

/// Asynchronous method body: `(transaction, this, args)`
pub type AsyncBody =
    Arc<dyn Fn(Transaction, ObjectId, Vec<Value>) -> BoxFuture<Result<Value>> + Send + Sync>;

/// Callable body of a registered method
#[derive(Clone)]
pub enum MethodBody {
    /// Runs to completion without suspending
    Sync(SyncBody),
    /// May suspend; not valid for plain methods
    Async(AsyncBody),
}

impl MethodBody {
    /// Wrap a synchronous closure
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        MethodBody::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous closure
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn(Transaction, ObjectId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        MethodBody::Async(Arc::new(move |tx, this, args| Box::pin(f(tx, this, args))))
    }

    /// Whether the body may suspend
    pub fn is_async(&self) -> bool {
        matches!(self, MethodBody::Async(_))
    }
}

impl std::fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodBody::Sync(_) => write!(f, "MethodBody::Sync"),
            MethodBody::Async(_) => write!(f, "MethodBody::Async"),
        }
    }
}

/// A method declared by an [`ObjectType`]
#[derive(Debug, Clone)]
pub(crate) struct MethodDecl {
    pub(crate) name: Member,
    pub(crate) options: MemberOptions,
    pub(crate) body: MethodBody,
}

/// Declaration of a stateful object type
///
/// # Example
///
/// ```ignore
/// let demo = ObjectType::new("Demo")
///     .member("title", "")
///     .transaction("rename", |tx, this, args| {
///         tx.write(this, "title", args[0].clone())?;
///         Ok(Value::Null)
///     })
///     .cached("upper", |tx, this, _| {
///         let title = tx.read(this, "title")?;
///         Ok(Value::from(title.as_str().unwrap_or("").to_uppercase()))
///     });
/// ```
#[derive(Debug, Clone)]
pub struct ObjectType {
    name: String,
    pub(crate) members: Vec<(Member, Value)>,
    pub(crate) methods: Vec<MethodDecl>,
}

impl ObjectType {
    /// Start declaring a type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Type name, used as the hint of its instances
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a member with its initial value
    pub fn member(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.members.push((Member::from(name), default.into()));
        self
    }

    /// Declare a method with explicit options
    pub fn method(mut self, name: &str, options: MemberOptions, body: MethodBody) -> Self {
        self.methods.push(MethodDecl {
            name: Member::from(name),
            options,
            body,
        });
        self
    }

    /// Declare an untracked method
    pub fn plain<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.method(name, MemberOptions::of(Kind::Plain), MethodBody::sync(f))
    }

    /// Declare a transaction
    pub fn transaction<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.method(name, MemberOptions::of(Kind::Transaction), MethodBody::sync(f))
    }

    /// Declare a transaction that may suspend
    pub fn transaction_async<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Transaction, ObjectId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.method(
            name,
            MemberOptions::of(Kind::Transaction),
            MethodBody::asynchronous(f),
        )
    }

    /// Declare a memoized computation
    pub fn cached<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.method(name, MemberOptions::of(Kind::Cached), MethodBody::sync(f))
    }

    /// Declare a memoized computation that may suspend
    pub fn cached_async<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Transaction, ObjectId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.method(name, MemberOptions::of(Kind::Cached), MethodBody::asynchronous(f))
    }

    /// Declare a reaction
    pub fn reaction<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Transaction, ObjectId, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.method(name, MemberOptions::of(Kind::Reaction), MethodBody::sync(f))
    }

    /// Declare a reaction that may suspend
    ///
    /// It runs when the engine settles: at the end of every asynchronous
    /// entry point, or through [`Engine::settle`](crate::Engine::settle).
    pub fn reaction_async<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Transaction, ObjectId, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.method(
            name,
            MemberOptions::of(Kind::Reaction),
            MethodBody::asynchronous(f),
        )
    }

    /// Replace the options of a declared method; its kind is kept
    pub fn options(mut self, name: &str, options: MemberOptions) -> Self {
        if let Some(decl) = self.methods.iter_mut().find(|m| m.name.as_ref() == name) {
            let kind = decl.options.kind;
            decl.options = MemberOptions { kind, ..options };
        }
        self
    }
}

/// A registered method
#[derive(Debug, Clone)]
pub(crate) struct MethodDef {
    pub(crate) id: MethodId,
    pub(crate) object: ObjectId,
    pub(crate) name: Member,
    pub(crate) options: MemberOptions,
    pub(crate) body: MethodBody,
}

impl MethodDef {
    pub(crate) fn kind(&self) -> Kind {
        self.options.kind
    }
}

/// Registered methods, by id and by `(object, name)`
#[derive(Debug, Default)]
pub(crate) struct MethodTable {
    methods: FxHashMap<MethodId, MethodDef>,
    by_name: FxHashMap<(ObjectId, Member), MethodId>,
    next_id: u64,
}

impl MethodTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    pub(crate) fn register(
        &mut self,
        object: ObjectId,
        name: Member,
        options: MemberOptions,
        body: MethodBody,
    ) -> Result<MethodId> {
        if body.is_async() && options.kind == Kind::Plain {
            return Err(Error::misuse(format!(
                "{} method {}.{} must be synchronous",
                options.kind, object, name
            )));
        }
        if self.by_name.contains_key(&(object, name.clone())) {
            return Err(Error::misuse(format!(
                "method {}.{} is already defined",
                object, name
            )));
        }
        let id = MethodId::new(self.next_id);
        self.next_id += 1;
        self.by_name.insert((object, name.clone()), id);
        self.methods.insert(
            id,
            MethodDef {
                id,
                object,
                name,
                options,
                body,
            },
        );
        Ok(id)
    }

    pub(crate) fn get(&self, id: MethodId) -> Option<&MethodDef> {
        self.methods.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: MethodId) -> Option<&mut MethodDef> {
        self.methods.get_mut(&id)
    }

    pub(crate) fn lookup(&self, object: ObjectId, name: &str) -> Option<MethodId> {
        self.by_name.get(&(object, Member::from(name))).copied()
    }

    /// Methods registered on an object
    pub(crate) fn methods_of(&self, object: ObjectId) -> impl Iterator<Item = &MethodDef> + '_ {
        self.methods.values().filter(move |m| m.object == object)
    }

    /// Unregister every method of an object
    pub(crate) fn remove_object(&mut self, object: ObjectId) -> Vec<MethodId> {
        let ids: Vec<MethodId> = self
            .methods
            .values()
            .filter(|m| m.object == object)
            .map(|m| m.id)
            .collect();
        for id in &ids {
            if let Some(m) = self.methods.remove(id) {
                self.by_name.remove(&(m.object, m.name));
            }
        }
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.methods.len()
    }
}
