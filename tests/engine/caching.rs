//! Cache coherence

use crate::common::*;
use revo::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn sum_type(runs: Arc<AtomicUsize>) -> ObjectType {
    ObjectType::new("Sum")
        .member("a", 1i64)
        .member("b", 2i64)
        .member("unrelated", 0i64)
        .cached("sum", move |tx, this, _| {
            runs.fetch_add(1, Ordering::SeqCst);
            let a = tx.read(this, "a")?.as_int().unwrap_or(0);
            let b = tx.read(this, "b")?.as_int().unwrap_or(0);
            Ok(Value::Int(a + b))
        })
}

#[test]
fn test_stale_only_when_a_read_member_changes() {
    let engine = engine();
    let runs = Arc::new(AtomicUsize::new(0));
    let ty = sum_type(runs.clone());
    let o = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    let sum = engine.controller(o, "sum").unwrap();

    assert_eq!(engine.invoke(o, "sum", &[]).unwrap(), Value::Int(3));
    engine.transaction("u", |tx| tx.write(o, "unrelated", 5i64)).unwrap();
    assert!(sum.is_up_to_date());

    engine.transaction("same", |tx| tx.write(o, "a", 1i64)).unwrap();
    assert!(sum.is_up_to_date());

    engine.transaction("b", |tx| tx.write(o, "b", 10i64)).unwrap();
    assert!(!sum.is_up_to_date());
    assert_eq!(engine.invoke(o, "sum", &[]).unwrap(), Value::Int(11));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_inspect_does_not_subscribe() {
    let engine = engine();
    let ty = ObjectType::new("Weak")
        .member("strong", 1i64)
        .member("weak", 1i64)
        .cached("peek", |tx, this, _| {
            let s = tx.read(this, "strong")?.as_int().unwrap_or(0);
            let w = tx.inspect(this, "weak")?.as_int().unwrap_or(0);
            Ok(Value::Int(s * 100 + w))
        });
    let o = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    let peek = engine.controller(o, "peek").unwrap();
    assert_eq!(engine.invoke(o, "peek", &[]).unwrap(), Value::Int(101));

    engine.transaction("weak", |tx| tx.write(o, "weak", 2i64)).unwrap();
    assert!(peek.is_up_to_date());
    assert_eq!(engine.invoke(o, "peek", &[]).unwrap(), Value::Int(101));

    engine.transaction("strong", |tx| tx.write(o, "strong", 2i64)).unwrap();
    assert_eq!(engine.invoke(o, "peek", &[]).unwrap(), Value::Int(202));
}

#[test]
fn test_cached_across_objects() {
    let engine = engine();
    let source = object(&engine, "Source", &[("v", 3)]);
    let ty = ObjectType::new("View").member("source", Value::from(source)).cached(
        "render",
        |tx, this, _| {
            let src = tx.read(this, "source")?;
            let id = src.as_ref_id().ok_or_else(|| Error::user("no source"))?;
            let v = tx.read(id, "v")?.as_int().unwrap_or(0);
            Ok(Value::from(format!("<{}>", v)))
        },
    );
    let view = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    assert_eq!(engine.invoke(view, "render", &[]).unwrap(), Value::from("<3>"));
    engine.transaction("v", |tx| tx.write(source, "v", 4i64)).unwrap();
    assert_eq!(engine.invoke(view, "render", &[]).unwrap(), Value::from("<4>"));
}

#[test]
fn test_disposing_a_read_object_invalidates() {
    let engine = engine();
    let source = object(&engine, "Source", &[("v", 3)]);
    let view = object(&engine, "View", &[]);
    let c = engine
        .define(
            view,
            "read_source",
            MemberOptions::of(Kind::Cached),
            MethodBody::sync(move |tx, _, _| tx.read(source, "v")),
        )
        .unwrap();
    engine.invoke(view, "read_source", &[]).unwrap();
    assert!(c.is_up_to_date());
    engine.dispose(source).unwrap();
    assert!(!c.is_up_to_date());
    assert!(engine
        .invoke(view, "read_source", &[])
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_cached_error_is_memoized() {
    let engine = engine();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let o = object(&engine, "Obj", &[("d", 0)]);
    engine
        .define(
            o,
            "ratio",
            MemberOptions::of(Kind::Cached),
            MethodBody::sync(move |tx, o, _| {
                r.fetch_add(1, Ordering::SeqCst);
                match tx.read(o, "d")?.as_int() {
                    Some(0) | None => Err(Error::user("division by zero")),
                    Some(d) => Ok(Value::Int(100 / d)),
                }
            }),
        )
        .unwrap();
    assert!(engine.invoke(o, "ratio", &[]).is_err());
    assert!(engine.invoke(o, "ratio", &[]).is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    engine.transaction("d", |tx| tx.write(o, "d", 4i64)).unwrap();
    assert_eq!(engine.invoke(o, "ratio", &[]).unwrap(), Value::Int(25));
}

#[test]
fn test_cached_result_respects_caller_snapshot() {
    let engine = engine();
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let ty = ObjectType::new("Doubler")
        .member("x", 1i64)
        .cached("double", move |tx, this, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(tx.read(this, "x")?.as_int().unwrap_or(0) * 2))
        });
    let o = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    let double = engine.controller(o, "double").unwrap();

    engine
        .transaction("reader", |tx| {
            tx.isolated("writer", |w| w.write(o, "x", 5i64))?;
            assert_eq!(tx.engine().invoke(o, "double", &[])?, Value::Int(10));
            // the reader still sees x = 1, and so must its cached call
            assert_eq!(tx.read(o, "x")?, Value::Int(1));
            assert_eq!(tx.call(o, "double", &[])?, Value::Int(2));
            Ok(())
        })
        .unwrap();

    // the older result didn't replace the current one
    assert!(double.is_up_to_date());
    assert_eq!(double.value(), Some(Value::Int(10)));
    assert_eq!(engine.invoke(o, "double", &[]).unwrap(), Value::Int(10));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
